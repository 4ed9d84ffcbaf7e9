// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Exchange context

use hbamgmt_ddi_interface::*;

use crate::extent::ExtentList;

/// Most extent lists one exchange can own
pub const MAX_OWNED_EXTENT_LISTS: usize = 3;

/// Lifecycle of an exchange
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeState {
    /// Submitted, no outcome yet
    Pending,

    /// The device completed before the deadline won
    Completed,

    /// The deadline won; resources wait for the device
    TimedOut,

    /// Every owned resource has been released
    Reclaimed,
}

/// Command and buffers for one exchange, before it is submitted
#[derive(Debug)]
pub struct ExchangeRequest {
    kind: CommandKind,
    command: Vec<u8>,
    lists: Vec<ExtentList>,
}

impl ExchangeRequest {
    /// Request with a command slot and no extent lists
    pub fn new(kind: CommandKind, command: Vec<u8>) -> Self {
        Self {
            kind,
            command,
            lists: Vec::with_capacity(MAX_OWNED_EXTENT_LISTS),
        }
    }

    /// Command family
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Hand `list` to the request.
    ///
    /// # Error
    /// * `ExtentList` - The request already owns
    ///   [`MAX_OWNED_EXTENT_LISTS`] lists; ownership goes back to the caller
    pub fn attach(&mut self, list: ExtentList) -> Result<(), ExtentList> {
        if self.lists.len() >= MAX_OWNED_EXTENT_LISTS {
            return Err(list);
        }
        self.lists.push(list);
        Ok(())
    }

    /// Release every attached list without submitting.
    pub fn release<A: DmaAllocator + ?Sized>(self, alloc: &A) {
        for list in self.lists {
            list.release(alloc);
        }
    }
}

/// An exchange in flight.
///
/// Owned by the waiting caller while `Pending`, by the timeout recovery
/// record while `TimedOut`. Consumed by [`ExchangeContext::reclaim`].
#[derive(Debug)]
pub struct ExchangeContext {
    tag: CorrelationTag,
    kind: CommandKind,
    command: Vec<u8>,
    lists: Vec<ExtentList>,
    state: ExchangeState,
}

impl ExchangeContext {
    pub(crate) fn new(tag: CorrelationTag, req: ExchangeRequest) -> Self {
        Self {
            tag,
            kind: req.kind,
            command: req.command,
            lists: req.lists,
            state: ExchangeState::Pending,
        }
    }

    /// Correlation tag
    pub fn tag(&self) -> CorrelationTag {
        self.tag
    }

    /// Command family
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Command slot contents
    pub fn command(&self) -> &[u8] {
        &self.command
    }

    /// Current lifecycle state
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ExchangeState) {
        self.state = state;
    }

    /// Device references of the non-empty owned lists, in attachment order
    pub fn bpl_refs(&self) -> Vec<BplRef> {
        self.lists.iter().filter_map(ExtentList::bpl_ref).collect()
    }

    /// Gather up to `limit` received bytes across the owned lists.
    pub(crate) fn copy_out(&self, limit: usize) -> DdiResult<Vec<u8>> {
        let mut out = Vec::new();
        for list in &self.lists {
            if out.len() >= limit {
                break;
            }
            out.extend(list.copy_out(BdeKind::Receive, limit - out.len())?);
        }
        Ok(out)
    }

    /// Release every owned list. Runs exactly once per exchange.
    pub(crate) fn reclaim<A: DmaAllocator + ?Sized>(mut self, alloc: &A) {
        tracing::trace!(tag = self.tag, from = ?self.state, "reclaiming exchange");
        for list in self.lists.drain(..) {
            list.release(alloc);
        }
        self.state = ExchangeState::Reclaimed;
    }
}

/// Outcome of a completed exchange
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseView {
    /// Correlation tag the exchange ran under
    pub tag: CorrelationTag,

    /// Device status; zero is success
    pub status: u32,

    /// Extended status
    pub ext_status: u32,

    /// Bytes the device reported in the receive entries
    pub bytes_returned: u32,

    /// Received bytes copied out of the receive extents
    pub data: Vec<u8>,

    /// Response returned in the command slot
    pub inline: Vec<u8>,
}
