// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Host adapter management exchange engine
//!
//! Packages management commands into device-visible buffers, waits for the
//! device under a deadline and reassembles the unsolicited frames the device
//! sends back.

mod adapter;
mod config;
mod context;
mod engine;
mod event_queue;
mod extent;
mod mgmt;
mod reassembly;
mod registry;
mod shared;
mod stats;

pub use adapter::HbaAdapter;
pub use config::*;
pub use context::ExchangeContext;
pub use context::ExchangeRequest;
pub use context::ExchangeState;
pub use context::ResponseView;
pub use context::MAX_OWNED_EXTENT_LISTS;
pub use extent::ExtentBuilder;
pub use extent::ExtentDirection;
pub use extent::ExtentList;
pub use hbamgmt_ddi_interface::*;
pub use mgmt::MailboxResponse;
pub use mgmt::MgmtKind;
pub use mgmt::MAILBOX_CMD_SIZE;
pub use reassembly::CtHeader;
pub use reassembly::EventClass;
pub use reassembly::EventRecord;
pub use reassembly::Reassembler;
pub use reassembly::CT_HEADER_LEN;
pub use reassembly::CT_REVISION;
pub use reassembly::FS_TYPE_LOOPBACK;
pub use reassembly::FS_TYPE_OFFSET;
pub use registry::*;
pub use stats::AdapterStats;
pub use stats::AdapterStatsSnapshot;
