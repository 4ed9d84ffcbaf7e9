// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Host adapter Device Driver Interface (DDI) interface library
//!
//! Narrow contracts between the management exchange engine and the
//! transport, interrupt and memory layers it runs on.

mod bde;
mod dma;
mod error;

use std::cmp::Ordering;
use std::sync::Weak;
use std::time::Duration;

pub use bde::*;
pub use dma::*;
pub use error::DdiError;

/// DDI Result
pub type DdiResult<T> = Result<T, DdiError>;

/// Opaque identifier the device echoes back on completion or unsolicited
/// delivery. Zero is never handed out for an exchange.
pub type CorrelationTag = u32;

/// Device Info
#[derive(Clone, Debug)]
pub struct DevInfo {
    /// Device path
    pub path: String,

    /// Driver Version
    pub driver_ver: String,

    /// Firmware Version
    pub firmware_ver: String,

    /// Hardware Version
    pub hardware_ver: String,

    /// PCI BDF information
    pub pci_info: String,

    /// World wide port name
    pub wwpn: u64,
}

impl Ord for DevInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

impl PartialOrd for DevInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DevInfo {
    fn eq(&self, other: &Self) -> bool {
        self.path.eq(&other.path)
    }
}

impl Eq for DevInfo {}

/// Device Driver Interface trait
pub trait Ddi: Default {
    /// Device
    type Dev: DdiDev;

    /// Returns the adapter device information list
    ///
    /// # Returns
    /// * `Vec<DevInfo>` - Adapter device information list
    fn dev_info_list(&self) -> Vec<DevInfo>;

    /// Open adapter device
    ///
    /// # Arguments
    /// `path` - Device path
    ///
    /// # Returns
    /// `Self::Dev` - Adapter device
    ///
    /// # Error
    /// * `DdiError` - Error encountered while opening the device
    fn open_dev(&self, path: &str) -> DdiResult<Self::Dev>;
}

/// Command families the engine knows how to package
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Mailbox command; the mailbox travels in the command slot
    Mailbox,

    /// Extended link service request
    ElsRequest,

    /// Common transport request
    CtRequest,

    /// Loopback self-test transmit
    LoopbackTransmit,
}

/// Command handed to the device transport
#[derive(Debug)]
pub struct SubmitRequest<'a> {
    /// Correlation tag the device must echo on completion
    pub tag: CorrelationTag,

    /// Command family
    pub kind: CommandKind,

    /// Command slot contents
    pub command: &'a [u8],

    /// Descriptor lists owned by the exchange, in attachment order
    pub bpls: &'a [BplRef],

    /// Time the caller is willing to wait
    pub timeout: Duration,
}

/// Result of handing a command to the device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitStatus {
    /// Command queued to the device
    Accepted,

    /// Command refused; the device holds no reference to its buffers
    Rejected,
}

/// Response slot filled by the device on completion
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseSlot {
    /// Completion status; zero is success
    pub status: u32,

    /// Command specific extended status
    pub ext_status: u32,

    /// Bytes the device wrote into the receive entries
    pub bytes_returned: u32,

    /// Response carried in the command slot itself (mailbox)
    pub inline: Vec<u8>,
}

/// Origin of a received fragment buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferClass {
    /// Buffer belongs to the device receive pool
    Pool,

    /// Buffer was allocated for a diagnostic delivery
    Diagnostic,
}

/// One delivered piece of an unsolicited frame
#[derive(Debug)]
pub struct Fragment {
    /// Buffer holding the fragment bytes
    pub buffer: DmaBuffer,

    /// Valid bytes in `buffer`
    pub len: usize,

    /// Where the buffer came from
    pub class: BufferClass,

    /// Total frame length, carried by the last fragment on devices that
    /// report it
    pub total_len: Option<u32>,
}

/// Ordered fragments of one unsolicited frame
pub type FragmentChain = Vec<Fragment>;

/// Device capabilities relevant to the management engine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DevCaps {
    /// The last fragment of an unsolicited frame carries the total length
    pub footer_length_frames: bool,
}

/// Notifications raised by the device's interrupt or poll path
pub trait DeviceEventSink: Send + Sync {
    /// The device finished the command submitted under `tag`
    fn on_device_completion(&self, tag: CorrelationTag, resp: ResponseSlot);

    /// The device delivered an unsolicited frame
    fn on_unsolicited_frame(&self, chain: FragmentChain, tag: CorrelationTag);
}

/// Device-visible memory allocator
pub trait DmaAllocator {
    /// Allocate a zeroed, device-visible buffer
    ///
    /// # Error
    /// * `DdiError::ResourceExhausted` - No memory left
    fn allocate_dma_buffer(&self, size: usize) -> DdiResult<DmaBuffer>;

    /// Give a buffer back to the allocator
    fn release_dma_buffer(&self, buffer: DmaBuffer);
}

/// Device Trait
pub trait DdiDev: DmaAllocator + Send + Sync + 'static {
    /// Device capabilities
    fn caps(&self) -> DevCaps;

    /// Route completions and unsolicited frames to `sink`.
    ///
    /// The device keeps a weak reference; notifications for a dropped sink
    /// are discarded.
    fn set_event_sink(&self, sink: Weak<dyn DeviceEventSink>);

    /// Hand a command to the device transport
    ///
    /// # Arguments
    /// * `req` - Command, correlation tag and descriptor lists
    ///
    /// # Returns
    /// * `SubmitStatus` - Whether the device took the command
    fn submit_command(&self, req: SubmitRequest<'_>) -> SubmitStatus;

    /// Return a consumed receive buffer to the device's free pool
    fn repost_receive_buffer(&self, buffer: DmaBuffer);
}
