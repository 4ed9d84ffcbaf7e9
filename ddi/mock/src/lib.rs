// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! DDI Implementation - Mock Adapter
//!
//! A software adapter that walks descriptor lists out of its own DMA
//! address space, answers commands through a pluggable responder and echoes
//! loopback traffic back as unsolicited frames.

mod ddi;
mod dev;
mod dma;

pub use ddi::*;
pub use dev::*;
pub use dma::MockDma;
