// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Attached host adapter

use std::sync::Arc;
use std::sync::Weak;

use hbamgmt_ddi_interface::*;
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::engine::ExchangeEngine;
use crate::extent::ExtentBuilder;
use crate::reassembly::EventClass;
use crate::reassembly::Reassembler;
use crate::registry::AdapterHandle;
use crate::shared::AdapterShared;
use crate::stats::AdapterStats;

/// One device bound to the management engine.
///
/// The adapter is the device's event sink: completions go to the exchange
/// engine, unsolicited frames to the reassembler and then the event queue.
pub struct HbaAdapter {
    pub(crate) handle: AdapterHandle,
    pub(crate) dev: Arc<dyn DdiDev>,
    pub(crate) config: EngineConfig,
    pub(crate) shared: Arc<AdapterShared>,
    pub(crate) engine: ExchangeEngine,
    pub(crate) reassembler: Reassembler,
    pub(crate) builder: ExtentBuilder,
    pub(crate) stats: Arc<AdapterStats>,

    // one loopback self-test at a time owns the loopback slot
    pub(crate) loopback_guard: Mutex<()>,
}

impl std::fmt::Debug for HbaAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HbaAdapter")
            .field("handle", &self.handle)
            .field("caps", &self.dev.caps())
            .field("mode", &self.reassembler.mode())
            .finish()
    }
}

impl HbaAdapter {
    pub(crate) fn new(handle: AdapterHandle, dev: Arc<dyn DdiDev>, config: EngineConfig) -> Self {
        let shared = Arc::new(AdapterShared::new(config.event_queue_warn_depth));
        let stats = Arc::new(AdapterStats::default());
        let engine = ExchangeEngine::new(dev.clone(), shared.clone(), stats.clone());
        let reassembler = Reassembler::new(&config, dev.caps());
        let builder = ExtentBuilder::new(&config);

        Self {
            handle,
            dev,
            config,
            shared,
            engine,
            reassembler,
            builder,
            stats,
            loopback_guard: Mutex::new(()),
        }
    }

    /// Registry handle
    pub fn handle(&self) -> AdapterHandle {
        self.handle
    }

    /// Configuration the adapter was attached with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Capabilities of the underlying device
    pub fn caps(&self) -> DevCaps {
        self.dev.caps()
    }

    /// Underlying device; also the allocator for caller-built extent lists
    pub fn device(&self) -> &Arc<dyn DdiDev> {
        &self.dev
    }

    /// Extent builder configured for this adapter
    pub fn extent_builder(&self) -> &ExtentBuilder {
        &self.builder
    }

    /// Exchanges waiting for a late completion
    pub fn parked_exchanges(&self) -> usize {
        self.engine.parked_count()
    }

    pub(crate) fn bind(self: &Arc<Self>) {
        let sink: Weak<HbaAdapter> = Arc::downgrade(self);
        self.dev.set_event_sink(sink);
    }

    /// Stop receiving device notifications and release what the adapter
    /// still holds.
    pub(crate) fn shutdown(&self) {
        self.dev.set_event_sink(Weak::<HbaAdapter>::new());
        let reclaimed = self.engine.reclaim_parked();
        let drained = self.shared.drain_events();
        tracing::info!(
            handle = self.handle,
            reclaimed,
            drained,
            "adapter detached"
        );
    }
}

impl DeviceEventSink for HbaAdapter {
    fn on_device_completion(&self, tag: CorrelationTag, resp: ResponseSlot) {
        self.engine.on_device_completion(tag, resp);
    }

    fn on_unsolicited_frame(&self, chain: FragmentChain, tag: CorrelationTag) {
        if chain.is_empty() {
            tracing::warn!(handle = self.handle, tag, "empty fragment chain");
            self.stats.inc_events_dropped();
            return;
        }

        let record = match self.reassembler.reassemble(self.dev.as_ref(), chain, tag) {
            Ok(record) => record,
            Err(_) => {
                self.stats.inc_events_dropped();
                return;
            }
        };

        match record.class {
            EventClass::Loopback => {
                if !self.shared.publish_loopback(record) {
                    self.stats.inc_loopback_violations();
                    self.stats.inc_events_dropped();
                }
            }
            EventClass::Management => {
                self.shared.publish(record);
                self.stats.inc_events_queued();
            }
        }
    }
}
