// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Engine configuration

use std::time::Duration;

use hbamgmt_ddi_interface::CommandKind;
use hbamgmt_ddi_interface::DdiError;
use hbamgmt_ddi_interface::DdiResult;
use hbamgmt_ddi_interface::DevCaps;
use hbamgmt_ddi_interface::BDE_MAX_SIZE;

/// Default largest DMA chunk behind one descriptor entry
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 4096;

/// Default descriptor entries that fit in one page
pub const DEFAULT_BPL_ENTRIES_PER_PAGE: usize = 256;

/// Default entries kept free at the end of every page
pub const DEFAULT_BPL_RESERVED_ENTRIES: usize = 2;

/// Default queue depth above which a warning is logged
pub const DEFAULT_EVENT_QUEUE_WARN_DEPTH: usize = 64;

/// Default largest reassembled unsolicited record
pub const DEFAULT_MAX_EVENT_PAYLOAD: usize = 64 * 1024;

/// Default largest loopback self-test payload
pub const DEFAULT_MAX_LOOPBACK_PAYLOAD: usize = 32 * 1024;

/// How unsolicited fragment chains are sized
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReassemblyMode {
    /// The last fragment carries the authoritative total length
    FooterLength,

    /// Fragment lengths are summed before the record is allocated
    SelfDescribing,
}

/// Where a consumed diagnostic fragment buffer goes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentDisposition {
    /// Back to the device receive pool
    ReturnToPool,

    /// Back to the DMA allocator
    Release,
}

/// Reassembly knobs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReassemblyPolicy {
    /// Forced mode; `None` follows the device capabilities
    pub mode: Option<ReassemblyMode>,

    /// Fate of `Diagnostic` fragments in self-describing mode
    pub diagnostic_fragments: FragmentDisposition,
}

impl Default for ReassemblyPolicy {
    fn default() -> Self {
        Self {
            mode: None,
            diagnostic_fragments: FragmentDisposition::Release,
        }
    }
}

impl ReassemblyPolicy {
    /// Mode to use with a device reporting `caps`
    pub fn resolve(&self, caps: DevCaps) -> ReassemblyMode {
        self.mode.unwrap_or(if caps.footer_length_frames {
            ReassemblyMode::FooterLength
        } else {
            ReassemblyMode::SelfDescribing
        })
    }
}

/// Per command family timeouts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Mailbox commands
    pub mailbox: Duration,

    /// ELS requests
    pub els: Duration,

    /// CT requests
    pub ct: Duration,

    /// Loopback transmit and echo wait
    pub loopback: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            mailbox: Duration::from_secs(30),
            els: Duration::from_secs(60),
            ct: Duration::from_secs(60),
            loopback: Duration::from_secs(20),
        }
    }
}

impl Timeouts {
    /// Timeout for `kind`
    pub fn for_kind(&self, kind: CommandKind) -> Duration {
        match kind {
            CommandKind::Mailbox => self.mailbox,
            CommandKind::ElsRequest => self.els,
            CommandKind::CtRequest => self.ct,
            CommandKind::LoopbackTransmit => self.loopback,
        }
    }
}

/// Adapter engine configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Largest DMA chunk behind one descriptor entry
    pub max_chunk_size: usize,

    /// Descriptor entries that fit in one page
    pub bpl_entries_per_page: usize,

    /// Entries kept free at the end of every page
    pub bpl_reserved_entries: usize,

    /// Queue depth above which a warning is logged; never enforced
    pub event_queue_warn_depth: usize,

    /// Largest reassembled unsolicited record
    pub max_event_payload: usize,

    /// Largest loopback self-test payload
    pub max_loopback_payload: usize,

    /// Default timeouts per command family
    pub timeouts: Timeouts,

    /// Unsolicited frame reassembly policy
    pub reassembly: ReassemblyPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            bpl_entries_per_page: DEFAULT_BPL_ENTRIES_PER_PAGE,
            bpl_reserved_entries: DEFAULT_BPL_RESERVED_ENTRIES,
            event_queue_warn_depth: DEFAULT_EVENT_QUEUE_WARN_DEPTH,
            max_event_payload: DEFAULT_MAX_EVENT_PAYLOAD,
            max_loopback_payload: DEFAULT_MAX_LOOPBACK_PAYLOAD,
            timeouts: Timeouts::default(),
            reassembly: ReassemblyPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Set the largest DMA chunk
    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size;
        self
    }

    /// Set the descriptor page geometry
    pub fn with_bpl_geometry(mut self, entries_per_page: usize, reserved: usize) -> Self {
        self.bpl_entries_per_page = entries_per_page;
        self.bpl_reserved_entries = reserved;
        self
    }

    /// Set the event queue warning depth
    pub fn with_event_queue_warn_depth(mut self, depth: usize) -> Self {
        self.event_queue_warn_depth = depth;
        self
    }

    /// Set the largest loopback payload
    pub fn with_max_loopback_payload(mut self, size: usize) -> Self {
        self.max_loopback_payload = size;
        self
    }

    /// Set the per family timeouts
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the reassembly policy
    pub fn with_reassembly(mut self, policy: ReassemblyPolicy) -> Self {
        self.reassembly = policy;
        self
    }

    /// Usable data entries per descriptor page
    pub fn usable_entries_per_page(&self) -> usize {
        self.bpl_entries_per_page
            .saturating_sub(self.bpl_reserved_entries)
    }

    /// Check the configuration for values the engine cannot work with.
    ///
    /// # Error
    /// * `DdiError::InvalidParameter` - A zero or inconsistent value
    pub fn validate(&self) -> DdiResult<()> {
        if self.max_chunk_size == 0 || self.max_chunk_size > BDE_MAX_SIZE as usize {
            tracing::error!(max_chunk_size = self.max_chunk_size, "invalid chunk size");
            Err(DdiError::InvalidParameter)?
        }

        // a page must hold at least one data entry next to its link
        if self.usable_entries_per_page() < 2 {
            tracing::error!(
                entries_per_page = self.bpl_entries_per_page,
                reserved = self.bpl_reserved_entries,
                "descriptor page too small"
            );
            Err(DdiError::InvalidParameter)?
        }

        if self.max_event_payload == 0 || self.max_loopback_payload == 0 {
            Err(DdiError::InvalidParameter)?
        }

        Ok(())
    }
}
