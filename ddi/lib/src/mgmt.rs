// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Management operations on an attached adapter

use std::io::Cursor;
use std::time::Duration;

use hbamgmt_ddi_interface::*;
use zerocopy::IntoBytes;

use crate::adapter::HbaAdapter;
use crate::context::ExchangeRequest;
use crate::context::ResponseView;
use crate::extent::ExtentDirection;
use crate::extent::ExtentList;
use crate::reassembly::CtHeader;
use crate::reassembly::EventRecord;
use crate::reassembly::CT_HEADER_LEN;
use crate::reassembly::FS_TYPE_LOOPBACK;
use crate::stats::AdapterStatsSnapshot;

/// Largest mailbox that fits in the command slot
pub const MAILBOX_CMD_SIZE: usize = 256;

/// Pass-through frame families
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MgmtKind {
    /// Extended link service
    Els,

    /// Common transport
    Ct,
}

impl From<MgmtKind> for CommandKind {
    fn from(kind: MgmtKind) -> Self {
        match kind {
            MgmtKind::Els => CommandKind::ElsRequest,
            MgmtKind::Ct => CommandKind::CtRequest,
        }
    }
}

/// Mailbox completion
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MailboxResponse {
    /// Mailbox as returned in the command slot
    pub mailbox: Vec<u8>,

    /// Extension data written by the device
    pub ext: Vec<u8>,
}

impl HbaAdapter {
    /// Send an ELS or CT frame and collect the reply.
    ///
    /// # Arguments
    /// * `kind` - Frame family
    /// * `request` - Frame bytes
    /// * `reply_len` - Largest reply accepted
    /// * `timeout` - Wait limit; `None` uses the configured default
    ///
    /// # Returns
    /// * `Vec<u8>` - The bytes the device returned
    ///
    /// # Error
    /// * `DdiError::InvalidParameter` - Empty request or zero reply length
    /// * `DdiError::DeviceStatus` - The device completed with an error
    /// * `DdiError::TimedOut` - No completion before the deadline
    #[tracing::instrument(skip(self, request), fields(handle = self.handle, len = request.len()))]
    pub fn send_mgmt_cmd(
        &self,
        kind: MgmtKind,
        request: &[u8],
        reply_len: usize,
        timeout: Option<Duration>,
    ) -> DdiResult<Vec<u8>> {
        if request.is_empty() || reply_len == 0 {
            Err(DdiError::InvalidParameter)?
        }

        let list = self.transfer_list(request, reply_len)?;
        let mut req = ExchangeRequest::new(kind.into(), Vec::new());
        self.attach_list(&mut req, list)?;

        let view = self.submit(req, timeout)?;
        Ok(view.data)
    }

    /// Issue a mailbox command.
    ///
    /// # Arguments
    /// * `mailbox` - Mailbox bytes, at most [`MAILBOX_CMD_SIZE`]
    /// * `ext_in` - Extension data for the device
    /// * `ext_out_len` - Room for extension data from the device
    /// * `timeout` - Wait limit; `None` uses the configured default
    ///
    /// # Error
    /// * `DdiError::InvalidParameter` - Empty or oversized mailbox
    /// * `DdiError::DeviceStatus` - The device completed with an error
    /// * `DdiError::TimedOut` - No completion before the deadline
    #[tracing::instrument(skip(self, mailbox, ext_in), fields(handle = self.handle))]
    pub fn issue_mailbox(
        &self,
        mailbox: &[u8],
        ext_in: &[u8],
        ext_out_len: usize,
        timeout: Option<Duration>,
    ) -> DdiResult<MailboxResponse> {
        if mailbox.is_empty() || mailbox.len() > MAILBOX_CMD_SIZE {
            tracing::error!(len = mailbox.len(), "invalid mailbox size");
            Err(DdiError::InvalidParameter)?
        }

        let mut req = ExchangeRequest::new(CommandKind::Mailbox, mailbox.to_vec());
        if !ext_in.is_empty() || ext_out_len > 0 {
            let list = self.transfer_list(ext_in, ext_out_len)?;
            self.attach_list(&mut req, list)?;
        }

        let view = self.submit(req, timeout)?;
        Ok(MailboxResponse {
            mailbox: view.inline,
            ext: view.data,
        })
    }

    /// Next queued management event.
    ///
    /// # Error
    /// * `DdiError::WouldBlock` - Nothing arrived within `max_wait`
    pub fn get_event(&self, max_wait: Duration) -> DdiResult<EventRecord> {
        self.shared
            .try_take(max_wait)
            .ok_or(DdiError::WouldBlock)
    }

    /// Run a loopback self-test: transmit `payload` and wait for the device
    /// to echo it back as an unsolicited frame.
    ///
    /// Self-tests on one adapter run one at a time. Only the echo delivered
    /// under the transmit exchange's tag is accepted.
    ///
    /// # Returns
    /// * `Vec<u8>` - The echoed payload
    ///
    /// # Error
    /// * `DdiError::InvalidParameter` - Empty or oversized payload
    /// * `DdiError::TimedOut` - The transmit or the echo did not arrive in time
    #[tracing::instrument(skip(self, payload), fields(handle = self.handle, len = payload.len()))]
    pub fn loopback_test(&self, payload: &[u8], timeout: Option<Duration>) -> DdiResult<Vec<u8>> {
        if payload.is_empty() || payload.len() > self.config.max_loopback_payload {
            Err(DdiError::InvalidParameter)?
        }

        let _guard = self.loopback_guard.lock();
        if let Some(stale) = self.shared.take_stale_loopback() {
            tracing::debug!(tag = stale.tag, "discarding stale loopback record");
        }

        let mut frame = Vec::with_capacity(CT_HEADER_LEN + payload.len());
        frame.extend_from_slice(CtHeader::new(FS_TYPE_LOOPBACK).as_bytes());
        frame.extend_from_slice(payload);

        let mut source = Cursor::new(frame.as_slice());
        let list = self.builder.build(
            self.dev.as_ref(),
            frame.len(),
            ExtentDirection::CopyIn(&mut source),
        )?;
        let mut req = ExchangeRequest::new(CommandKind::LoopbackTransmit, Vec::new());
        self.attach_list(&mut req, list)?;

        let timeout = timeout.unwrap_or(self.config.timeouts.loopback);
        let view = self.submit(req, Some(timeout))?;

        let record = self
            .shared
            .wait_loopback(view.tag, timeout)
            .ok_or_else(|| {
                tracing::warn!(tag = view.tag, "loopback echo did not arrive");
                DdiError::TimedOut
            })?;

        let echoed = record
            .payload
            .get(CT_HEADER_LEN..)
            .ok_or(DdiError::MalformedResponse)?;
        Ok(echoed.to_vec())
    }

    /// Submit a caller-built exchange and wait for it.
    ///
    /// Unlike the typed operations, a non-zero device status is returned in
    /// the [`ResponseView`] rather than as an error.
    ///
    /// # Error
    /// * `DdiError::DeviceRejected` - The device refused the command
    /// * `DdiError::TimedOut` - No completion before the deadline
    pub fn submit_exchange(
        &self,
        req: ExchangeRequest,
        timeout: Option<Duration>,
    ) -> DdiResult<ResponseView> {
        let timeout = timeout.unwrap_or_else(|| self.config.timeouts.for_kind(req.kind()));
        self.engine.submit_and_wait(req, timeout)
    }

    /// Current counters
    pub fn stats(&self) -> AdapterStatsSnapshot {
        self.stats.snapshot()
    }

    // Transmit entries for `tx`, then receive entries for `rx_len` bytes
    fn transfer_list(&self, tx: &[u8], rx_len: usize) -> DdiResult<ExtentList> {
        let mut source = Cursor::new(tx);
        let mut list = self.builder.build(
            self.dev.as_ref(),
            tx.len(),
            ExtentDirection::CopyIn(&mut source),
        )?;

        if let Err(err) =
            self.builder
                .append(self.dev.as_ref(), &mut list, rx_len, ExtentDirection::ZeroFill)
        {
            list.release(self.dev.as_ref());
            return Err(err);
        }
        Ok(list)
    }

    fn attach_list(&self, req: &mut ExchangeRequest, list: ExtentList) -> DdiResult<()> {
        req.attach(list).map_err(|list| {
            list.release(self.dev.as_ref());
            DdiError::InvalidParameter
        })
    }

    fn submit(&self, req: ExchangeRequest, timeout: Option<Duration>) -> DdiResult<ResponseView> {
        let view = self.submit_exchange(req, timeout)?;
        if view.status != 0 {
            tracing::warn!(
                status = view.status,
                ext_status = view.ext_status,
                "device completed with error"
            );
            Err(DdiError::DeviceStatus {
                status: view.status,
                ext_status: view.ext_status,
            })?
        }
        Ok(view)
    }
}
