// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter counters

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Live counters of one adapter
#[derive(Debug, Default)]
pub struct AdapterStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    late_successes: AtomicU64,
    timed_out: AtomicU64,
    deferred_reclaims: AtomicU64,
    rejected: AtomicU64,
    unmatched_completions: AtomicU64,
    events_queued: AtomicU64,
    events_dropped: AtomicU64,
    loopback_violations: AtomicU64,
}

/// Point in time copy of [`AdapterStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdapterStatsSnapshot {
    /// Commands handed to the device
    pub submitted: u64,

    /// Exchanges completed before their deadline
    pub completed: u64,

    /// Exchanges completed after the deadline but before the timeout won
    pub late_successes: u64,

    /// Exchanges parked for deferred reclamation
    pub timed_out: u64,

    /// Parked exchanges reclaimed by a late completion or detach
    pub deferred_reclaims: u64,

    /// Submissions the device refused
    pub rejected: u64,

    /// Completions whose tag matched no exchange
    pub unmatched_completions: u64,

    /// Event records published
    pub events_queued: u64,

    /// Unsolicited frames that did not produce a record
    pub events_dropped: u64,

    /// Loopback records that found the slot occupied
    pub loopback_violations: u64,
}

macro_rules! counters {
    ($($name:ident => $inc:ident),* $(,)?) => {
        impl AdapterStats {
            $(
                pub(crate) fn $inc(&self) {
                    self.$name.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Copy the current counter values
            pub fn snapshot(&self) -> AdapterStatsSnapshot {
                AdapterStatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    submitted => inc_submitted,
    completed => inc_completed,
    late_successes => inc_late_successes,
    timed_out => inc_timed_out,
    deferred_reclaims => inc_deferred_reclaims,
    rejected => inc_rejected,
    unmatched_completions => inc_unmatched_completions,
    events_queued => inc_events_queued,
    events_dropped => inc_events_dropped,
    loopback_violations => inc_loopback_violations,
}
