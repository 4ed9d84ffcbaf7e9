// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! State guarded by the adapter lock

use std::time::Duration;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;
use parking_lot::MutexGuard;

use crate::engine::ExchangeTable;
use crate::event_queue::EventQueue;

/// Everything mutated by more than one thread of one adapter
#[derive(Debug)]
pub(crate) struct AdapterState {
    pub(crate) exchanges: ExchangeTable,
    pub(crate) events: EventQueue,
}

/// The adapter lock and the condition variables paired with it.
///
/// Exchange waiters each bring their own condition variable; the event
/// queue and the loopback slot have one each.
#[derive(Debug)]
pub(crate) struct AdapterShared {
    pub(crate) state: Mutex<AdapterState>,
    pub(crate) events_ready: Condvar,
    pub(crate) loopback_ready: Condvar,
}

impl AdapterShared {
    pub(crate) fn new(event_warn_depth: usize) -> Self {
        Self {
            state: Mutex::new(AdapterState {
                exchanges: ExchangeTable::default(),
                events: EventQueue::new(event_warn_depth),
            }),
            events_ready: Condvar::new(),
            loopback_ready: Condvar::new(),
        }
    }
}

/// Deadline `wait` from now, `None` when it lies past what [`Instant`] can
/// represent.
pub(crate) fn deadline_after(wait: Duration) -> Option<Instant> {
    Instant::now().checked_add(wait)
}

/// Block on `cond` until notified or until `deadline`; without a deadline
/// only a notification ends the wait.
///
/// # Returns
/// * `true` - The deadline passed
pub(crate) fn wait_until<T>(
    cond: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    deadline: Option<Instant>,
) -> bool {
    match deadline {
        Some(deadline) => cond.wait_until(guard, deadline).timed_out(),
        None => {
            cond.wait(guard);
            false
        }
    }
}
