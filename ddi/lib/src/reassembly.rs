// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Unsolicited frame reassembly
//!
//! Copies a delivered fragment chain into one contiguous record, classifies
//! it by the CT header of the first fragment and hands every fragment buffer
//! back, whether or not a record was produced.

use hbamgmt_ddi_interface::*;
use zerocopy::byteorder::BigEndian;
use zerocopy::byteorder::U16;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

use crate::config::EngineConfig;
use crate::config::FragmentDisposition;
use crate::config::ReassemblyMode;

/// Size of the common transport header
pub const CT_HEADER_LEN: usize = std::mem::size_of::<CtHeader>();

/// Byte offset of the sub-protocol type in the CT header
pub const FS_TYPE_OFFSET: usize = 4;

/// Sub-protocol type of loopback echo frames
pub const FS_TYPE_LOOPBACK: u8 = 0xEA;

/// CT header revision written on outbound frames
pub const CT_REVISION: u8 = 0x01;

/// Common transport header, big endian on the wire
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct CtHeader {
    /// Header revision
    pub revision: u8,

    /// Original requester id
    pub in_id: [u8; 3],

    /// Sub-protocol type
    pub fs_type: u8,

    /// Sub-protocol subtype
    pub fs_subtype: u8,

    /// Options
    pub options: u8,

    reserved1: u8,

    /// Command or response code
    pub cmd_rsp: U16<BigEndian>,

    /// Maximum or residual size
    pub size: U16<BigEndian>,

    reserved2: u8,

    /// Reject reason
    pub reason: u8,

    /// Reject explanation
    pub explanation: u8,

    /// Vendor specific
    pub vendor_unique: u8,
}

impl CtHeader {
    /// Header for a frame of sub-protocol `fs_type`
    pub fn new(fs_type: u8) -> Self {
        Self {
            revision: CT_REVISION,
            fs_type,
            ..Default::default()
        }
    }
}

/// Kind of an unsolicited record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventClass {
    /// Echo of a loopback self-test
    Loopback,

    /// Anything else; queued for retrieval
    Management,
}

/// One reassembled unsolicited frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    /// Classification
    pub class: EventClass,

    /// Tag the device delivered the frame under
    pub tag: CorrelationTag,

    /// Frame bytes, CT header included
    pub payload: Vec<u8>,
}

impl EventRecord {
    /// Payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Reassembles fragment chains according to a fixed policy
#[derive(Clone, Copy, Debug)]
pub struct Reassembler {
    mode: ReassemblyMode,
    diagnostic_fragments: FragmentDisposition,
    max_payload: usize,
}

impl Reassembler {
    /// Reassembler for a device with `caps`
    pub fn new(config: &EngineConfig, caps: DevCaps) -> Self {
        Self {
            mode: config.reassembly.resolve(caps),
            diagnostic_fragments: config.reassembly.diagnostic_fragments,
            max_payload: config.max_event_payload,
        }
    }

    /// Mode in use
    pub fn mode(&self) -> ReassemblyMode {
        self.mode
    }

    /// Build one record from `chain`.
    ///
    /// Every fragment is returned to the receive pool or the allocator before
    /// this returns.
    ///
    /// # Error
    /// * `DdiError::MalformedResponse` - The fragment lengths are inconsistent
    ///   or the frame is empty, oversized or shorter than a CT header
    /// * `DdiError::ResourceExhausted` - The record buffer could not be allocated
    pub fn reassemble<D: DdiDev + ?Sized>(
        &self,
        dev: &D,
        chain: FragmentChain,
        tag: CorrelationTag,
    ) -> DdiResult<EventRecord> {
        let result = self.assemble(&chain, tag);
        self.dispose(dev, chain);

        if let Err(err) = &result {
            tracing::warn!(tag, mode = ?self.mode, ?err, "dropping unsolicited frame");
        }
        result
    }

    fn assemble(&self, chain: &[Fragment], tag: CorrelationTag) -> DdiResult<EventRecord> {
        let first = chain.first().ok_or(DdiError::MalformedResponse)?;
        if first.len < CT_HEADER_LEN {
            Err(DdiError::MalformedResponse)?
        }

        let total = match self.mode {
            ReassemblyMode::FooterLength => chain
                .last()
                .and_then(|last| last.total_len)
                .ok_or(DdiError::MalformedResponse)? as usize,
            ReassemblyMode::SelfDescribing => chain
                .iter()
                .try_fold(0usize, |sum, f| sum.checked_add(f.len))
                .ok_or(DdiError::MalformedResponse)?,
        };

        if total > self.max_payload {
            tracing::warn!(tag, total, max = self.max_payload, "unsolicited frame too large");
            Err(DdiError::MalformedResponse)?
        }

        let mut payload = Vec::new();
        payload
            .try_reserve_exact(total)
            .map_err(|_| DdiError::ResourceExhausted)?;
        payload.resize(total, 0);

        let mut offset = 0usize;
        for fragment in chain {
            let end = offset
                .checked_add(fragment.len)
                .ok_or(DdiError::MalformedResponse)?;
            let dst = payload
                .get_mut(offset..end)
                .ok_or(DdiError::MalformedResponse)?;
            fragment
                .buffer
                .read_at(0, dst)
                .map_err(|_| DdiError::MalformedResponse)?;
            offset = end;
        }
        if offset != total {
            tracing::warn!(tag, total, received = offset, "unsolicited frame short of its length");
            Err(DdiError::MalformedResponse)?
        }

        let class = match payload[FS_TYPE_OFFSET] {
            FS_TYPE_LOOPBACK => EventClass::Loopback,
            _ => EventClass::Management,
        };

        tracing::debug!(tag, ?class, len = total, fragments = chain.len(), "frame reassembled");
        Ok(EventRecord {
            class,
            tag,
            payload,
        })
    }

    fn dispose<D: DdiDev + ?Sized>(&self, dev: &D, chain: FragmentChain) {
        for fragment in chain {
            let disposition = match (self.mode, fragment.class) {
                (ReassemblyMode::FooterLength, _) | (_, BufferClass::Pool) => {
                    FragmentDisposition::ReturnToPool
                }
                (ReassemblyMode::SelfDescribing, BufferClass::Diagnostic) => {
                    self.diagnostic_fragments
                }
            };

            match disposition {
                FragmentDisposition::ReturnToPool => dev.repost_receive_buffer(fragment.buffer),
                FragmentDisposition::Release => dev.release_dma_buffer(fragment.buffer),
            }
        }
    }
}
