// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Device Driver Interface (DDI) library - Error module

use thiserror::Error;

/// Management engine error
#[derive(Error, Debug)]
pub enum DdiError {
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParameter,

    /// Index out of bounds
    #[error("index out of bounds")]
    IndexOutOfBounds,

    /// Adapter device not found
    #[error("device not found")]
    DeviceNotFound,

    /// No adapter is attached under the given handle
    #[error("adapter not found")]
    AdapterNotFound,

    /// A DMA buffer, descriptor page or record buffer could not be allocated.
    /// Everything allocated by the failing call has been released.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// The device refused the submission; no resources were committed
    #[error("device rejected the command")]
    DeviceRejected,

    /// The deadline expired before the device answered. The exchange's
    /// buffers now belong to the deferred reclaimer.
    #[error("exchange timed out")]
    TimedOut,

    /// A delivered frame had no consistent length or header
    #[error("malformed response")]
    MalformedResponse,

    /// The device completed the command with a failure status
    #[error("device status {status:#x} (ext {ext_status:#x})")]
    DeviceStatus {
        /// Completion status reported by the device
        status: u32,

        /// Command specific extended status
        ext_status: u32,
    },

    /// Nothing is available yet; try again later
    #[error("operation would block")]
    WouldBlock,

    /// IO error
    #[error("io error")]
    IoError(#[from] std::io::Error),
}

impl DdiError {
    /// Returns `true` when the caller gave up ownership of the exchange
    /// buffers to the deferred reclaimer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DdiError::TimedOut)
    }
}
