// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Event delivery queue
//!
//! Management records queue in arrival order with no hard bound. Loopback
//! records go to a single slot that one self-test waits on.

use std::collections::VecDeque;
use std::time::Duration;

use hbamgmt_ddi_interface::CorrelationTag;

use crate::reassembly::EventRecord;
use crate::shared::deadline_after;
use crate::shared::wait_until;
use crate::shared::AdapterShared;

#[derive(Debug)]
pub(crate) struct EventQueue {
    records: VecDeque<EventRecord>,
    loopback: Option<EventRecord>,
    warn_depth: usize,
    above_threshold: bool,
}

impl EventQueue {
    pub(crate) fn new(warn_depth: usize) -> Self {
        Self {
            records: VecDeque::new(),
            loopback: None,
            warn_depth,
            above_threshold: false,
        }
    }

    fn push(&mut self, record: EventRecord) {
        self.records.push_back(record);
        let depth = self.records.len();
        if depth > self.warn_depth && !self.above_threshold {
            self.above_threshold = true;
            tracing::warn!(depth, threshold = self.warn_depth, "event queue is backing up");
        }
    }

    fn pop(&mut self) -> Option<EventRecord> {
        let record = self.records.pop_front()?;
        if self.records.len() <= self.warn_depth {
            self.above_threshold = false;
        }
        Some(record)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub(crate) fn loopback_pending(&self) -> bool {
        self.loopback.is_some()
    }
}

impl AdapterShared {
    /// Append a management record and wake one retrieval waiter.
    pub(crate) fn publish(&self, record: EventRecord) {
        tracing::debug!(tag = record.tag, len = record.payload_len(), "event queued");
        self.state.lock().events.push(record);
        self.events_ready.notify_one();
    }

    /// Fill the loopback slot.
    ///
    /// # Returns
    /// * `false` - The slot was occupied; `record` was dropped and the
    ///   earlier record kept
    pub(crate) fn publish_loopback(&self, record: EventRecord) -> bool {
        let mut state = self.state.lock();
        if let Some(pending) = &state.events.loopback {
            tracing::warn!(
                pending_tag = pending.tag,
                dropped_tag = record.tag,
                "loopback slot already full; dropping second record"
            );
            return false;
        }

        tracing::debug!(tag = record.tag, len = record.payload_len(), "loopback record ready");
        state.events.loopback = Some(record);
        drop(state);
        self.loopback_ready.notify_one();
        true
    }

    /// Next management record, waiting up to `max_wait`.
    pub(crate) fn try_take(&self, max_wait: Duration) -> Option<EventRecord> {
        let deadline = deadline_after(max_wait);
        let mut state = self.state.lock();
        loop {
            if let Some(record) = state.events.pop() {
                return Some(record);
            }
            if wait_until(&self.events_ready, &mut state, deadline) {
                return state.events.pop();
            }
        }
    }

    /// The loopback echo of exchange `tag`, waiting up to `max_wait`.
    ///
    /// Echoes of other exchanges found in the slot are discarded.
    pub(crate) fn wait_loopback(
        &self,
        tag: CorrelationTag,
        max_wait: Duration,
    ) -> Option<EventRecord> {
        let deadline = deadline_after(max_wait);
        let mut state = self.state.lock();
        loop {
            if let Some(record) = state.events.loopback.take() {
                if record.tag == tag {
                    return Some(record);
                }
                tracing::warn!(
                    tag,
                    stale_tag = record.tag,
                    "discarding loopback echo of another exchange"
                );
                continue;
            }
            if wait_until(&self.loopback_ready, &mut state, deadline) {
                return state
                    .events
                    .loopback
                    .take()
                    .filter(|record| record.tag == tag);
            }
        }
    }

    /// Empty the loopback slot without waiting
    pub(crate) fn take_stale_loopback(&self) -> Option<EventRecord> {
        self.state.lock().events.loopback.take()
    }

    /// Remove every queued record and the loopback slot
    pub(crate) fn drain_events(&self) -> usize {
        let mut state = self.state.lock();
        let mut count = state.events.records.len();
        state.events.records.clear();
        state.events.above_threshold = false;
        if state.events.loopback.take().is_some() {
            count += 1;
        }
        count
    }
}
