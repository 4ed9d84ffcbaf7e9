// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Exchange engine
//!
//! Submits one exchange, blocks the caller until the device completes or
//! the deadline passes, and settles the race between the two under the
//! adapter lock. Whichever side loses the race hands the exchange to the
//! other, so its buffers are released exactly once.

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use hbamgmt_ddi_interface::*;
use parking_lot::Condvar;

use crate::context::ExchangeContext;
use crate::context::ExchangeRequest;
use crate::context::ExchangeState;
use crate::context::ResponseView;
use crate::shared::deadline_after;
use crate::shared::wait_until;
use crate::shared::AdapterShared;
use crate::stats::AdapterStats;

#[derive(Debug)]
struct PendingExchange {
    state: ExchangeState,
    waiter: Arc<Condvar>,
    response: Option<ResponseSlot>,
}

/// A timed out exchange waiting for its late completion
#[derive(Debug)]
pub struct TimeoutRecovery {
    context: ExchangeContext,
    expired_at: Instant,
}

/// What happened to an exchange
#[derive(Debug)]
pub(crate) enum ExchangeEvent {
    /// The device reported completion
    DeviceCompleted(ResponseSlot),

    /// The waiter's deadline passed; the waiter offers its context
    DeadlineExpired(ExchangeContext),
}

/// Result of applying an [`ExchangeEvent`]. Variants carrying a value hand
/// ownership of the exchange to the side that must reclaim it.
#[derive(Debug)]
pub(crate) enum Transition {
    /// The completion arrived first; the waiter finishes the exchange
    WonNormally,

    /// The deadline arrived first; the context is parked
    WonAsTimeout,

    /// The completion arrived for a parked exchange
    LostToTimeout(TimeoutRecovery),

    /// The deadline arrived after the completion
    LostToCompletion(ExchangeContext, ResponseSlot),

    /// Nothing is left to act on
    AlreadyReclaimed,
}

/// Pending and parked exchanges of one adapter
#[derive(Debug, Default)]
pub(crate) struct ExchangeTable {
    pending: HashMap<CorrelationTag, PendingExchange>,
    recovery: HashMap<CorrelationTag, TimeoutRecovery>,
}

impl ExchangeTable {
    fn in_use(&self, tag: CorrelationTag) -> bool {
        tag == 0 || self.pending.contains_key(&tag) || self.recovery.contains_key(&tag)
    }

    fn register(&mut self, tag: CorrelationTag, waiter: Arc<Condvar>) {
        self.pending.insert(
            tag,
            PendingExchange {
                state: ExchangeState::Pending,
                waiter,
                response: None,
            },
        );
    }

    fn unregister(&mut self, tag: CorrelationTag) {
        self.pending.remove(&tag);
    }

    // Response of an exchange the device completed before its deadline
    fn take_completed(&mut self, tag: CorrelationTag) -> Option<ResponseSlot> {
        match self.pending.get(&tag) {
            Some(entry) if entry.state == ExchangeState::Completed => {
                self.pending.remove(&tag).and_then(|entry| entry.response)
            }
            _ => None,
        }
    }

    pub(crate) fn parked(&self) -> usize {
        self.recovery.len()
    }

    fn take_parked(&mut self) -> Vec<TimeoutRecovery> {
        self.recovery.drain().map(|(_, record)| record).collect()
    }

    /// Apply `event` to the exchange under `tag`.
    pub(crate) fn transition(&mut self, tag: CorrelationTag, event: ExchangeEvent) -> Transition {
        match event {
            ExchangeEvent::DeviceCompleted(resp) => {
                if let Some(entry) = self.pending.get_mut(&tag) {
                    if entry.state != ExchangeState::Pending {
                        return Transition::AlreadyReclaimed;
                    }
                    entry.state = ExchangeState::Completed;
                    entry.response = Some(resp);
                    entry.waiter.notify_one();
                    return Transition::WonNormally;
                }

                match self.recovery.remove(&tag) {
                    Some(record) => Transition::LostToTimeout(record),
                    None => Transition::AlreadyReclaimed,
                }
            }
            ExchangeEvent::DeadlineExpired(mut context) => {
                let entry = self.pending.remove(&tag);
                if let Some(PendingExchange {
                    state: ExchangeState::Completed,
                    response: Some(resp),
                    ..
                }) = entry
                {
                    context.set_state(ExchangeState::Completed);
                    return Transition::LostToCompletion(context, resp);
                }

                if entry.is_none() {
                    tracing::error!(tag, "deadline for an unregistered exchange; parking it");
                }
                context.set_state(ExchangeState::TimedOut);
                self.recovery.insert(
                    tag,
                    TimeoutRecovery {
                        context,
                        expired_at: Instant::now(),
                    },
                );
                Transition::WonAsTimeout
            }
        }
    }
}

/// Submits exchanges to one device and settles their outcome
pub struct ExchangeEngine {
    dev: Arc<dyn DdiDev>,
    shared: Arc<AdapterShared>,
    stats: Arc<AdapterStats>,
    next_tag: AtomicU32,
}

impl std::fmt::Debug for ExchangeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeEngine")
            .field("next_tag", &self.next_tag)
            .finish()
    }
}

impl ExchangeEngine {
    pub(crate) fn new(
        dev: Arc<dyn DdiDev>,
        shared: Arc<AdapterShared>,
        stats: Arc<AdapterStats>,
    ) -> Self {
        Self {
            dev,
            shared,
            stats,
            next_tag: AtomicU32::new(1),
        }
    }

    /// Submit `req` and wait up to `timeout` for the device.
    ///
    /// A completion that arrives after the deadline but before the timeout
    /// is recorded is returned as a success.
    ///
    /// # Error
    /// * `DdiError::DeviceRejected` - The device refused the command; every
    ///   buffer was released
    /// * `DdiError::TimedOut` - The deadline won; the buffers are released
    ///   when the device eventually completes
    #[tracing::instrument(skip(self, req), fields(kind = ?req.kind()))]
    pub fn submit_and_wait(
        &self,
        req: ExchangeRequest,
        timeout: Duration,
    ) -> DdiResult<ResponseView> {
        let waiter = Arc::new(Condvar::new());
        let tag = self.register(waiter.clone());
        let ctx = ExchangeContext::new(tag, req);

        let bpls = ctx.bpl_refs();
        self.stats.inc_submitted();
        let status = self.dev.submit_command(SubmitRequest {
            tag,
            kind: ctx.kind(),
            command: ctx.command(),
            bpls: &bpls,
            timeout,
        });

        if status == SubmitStatus::Rejected {
            tracing::warn!(tag, "device rejected submission");
            self.shared.state.lock().exchanges.unregister(tag);
            ctx.reclaim(self.dev.as_ref());
            self.stats.inc_rejected();
            return Err(DdiError::DeviceRejected);
        }

        let deadline = deadline_after(timeout);
        let mut state = self.shared.state.lock();
        loop {
            if let Some(resp) = state.exchanges.take_completed(tag) {
                drop(state);
                self.stats.inc_completed();
                return self.finish(ctx, resp);
            }
            if wait_until(&waiter, &mut state, deadline) {
                break;
            }
        }

        let transition = state
            .exchanges
            .transition(tag, ExchangeEvent::DeadlineExpired(ctx));
        drop(state);
        self.settle_expiry(tag, transition)
    }

    /// Offer `ctx` to the timeout path, as a waiter whose deadline passed.
    pub(crate) fn expire(&self, ctx: ExchangeContext) -> DdiResult<ResponseView> {
        let tag = ctx.tag();
        let transition = self
            .shared
            .state
            .lock()
            .exchanges
            .transition(tag, ExchangeEvent::DeadlineExpired(ctx));
        self.settle_expiry(tag, transition)
    }

    fn settle_expiry(&self, tag: CorrelationTag, transition: Transition) -> DdiResult<ResponseView> {
        match transition {
            Transition::WonAsTimeout => {
                tracing::warn!(tag, "exchange timed out; reclaim deferred to completion");
                self.stats.inc_timed_out();
                Err(DdiError::TimedOut)
            }
            Transition::LostToCompletion(ctx, resp) => {
                tracing::info!(tag, "exchange completed at its deadline");
                self.stats.inc_late_successes();
                self.finish(ctx, resp)
            }
            other => {
                tracing::error!(tag, ?other, "unexpected transition at deadline");
                Err(DdiError::TimedOut)
            }
        }
    }

    /// Route a device completion to its exchange.
    pub(crate) fn on_device_completion(&self, tag: CorrelationTag, resp: ResponseSlot) {
        let transition = self
            .shared
            .state
            .lock()
            .exchanges
            .transition(tag, ExchangeEvent::DeviceCompleted(resp));

        match transition {
            Transition::WonNormally => tracing::trace!(tag, "completion delivered to waiter"),
            Transition::LostToTimeout(record) => {
                tracing::debug!(
                    tag,
                    late_by = ?record.expired_at.elapsed(),
                    "late completion; reclaiming timed out exchange"
                );
                record.context.reclaim(self.dev.as_ref());
                self.stats.inc_deferred_reclaims();
            }
            _ => {
                tracing::warn!(tag, "completion for unknown exchange");
                self.stats.inc_unmatched_completions();
            }
        }
    }

    /// Reclaim every parked exchange without waiting for the device.
    ///
    /// # Returns
    /// * `usize` - Exchanges reclaimed
    pub(crate) fn reclaim_parked(&self) -> usize {
        let parked = self.shared.state.lock().exchanges.take_parked();
        let count = parked.len();
        for record in parked {
            tracing::debug!(tag = record.context.tag(), "reclaiming parked exchange");
            record.context.reclaim(self.dev.as_ref());
            self.stats.inc_deferred_reclaims();
        }
        count
    }

    /// Exchanges waiting for a late completion
    pub fn parked_count(&self) -> usize {
        self.shared.state.lock().exchanges.parked()
    }

    fn register(&self, waiter: Arc<Condvar>) -> CorrelationTag {
        let mut state = self.shared.state.lock();
        let mut tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        while state.exchanges.in_use(tag) {
            tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        }
        state.exchanges.register(tag, waiter);
        tag
    }

    fn finish(&self, mut ctx: ExchangeContext, resp: ResponseSlot) -> DdiResult<ResponseView> {
        ctx.set_state(ExchangeState::Completed);
        let tag = ctx.tag();
        let data = ctx.copy_out(resp.bytes_returned as usize);
        ctx.reclaim(self.dev.as_ref());

        tracing::debug!(
            tag,
            status = resp.status,
            bytes_returned = resp.bytes_returned,
            "exchange completed"
        );
        Ok(ResponseView {
            tag,
            status: resp.status,
            ext_status: resp.ext_status,
            bytes_returned: resp.bytes_returned,
            data: data?,
            inline: resp.inline,
        })
    }
}
