// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use hbamgmt_ddi::*;
use hbamgmt_ddi_mock::*;
use test_with_tracing::test;

use super::common::*;

#[test]
fn test_attach_and_detach() {
    let dev = DdiMockDev::new(FOOTER_CAPS).unwrap();
    let handle = attach_adapter(Arc::new(dev.clone()), EngineConfig::default()).unwrap();
    assert_ne!(handle, 0);
    assert!(adapter_handles().contains(&handle));

    let adapter = hbamgmt_ddi::adapter(handle).unwrap();
    assert_eq!(adapter.handle(), handle);
    assert!(adapter.caps().footer_length_frames);

    detach_adapter(handle).unwrap();
    assert!(!adapter_handles().contains(&handle));
    assert!(matches!(
        hbamgmt_ddi::adapter(handle),
        Err(DdiError::AdapterNotFound)
    ));
    assert!(matches!(
        detach_adapter(handle),
        Err(DdiError::AdapterNotFound)
    ));
}

#[test]
fn test_attach_rejects_invalid_config() {
    let dev = DdiMockDev::new(FOOTER_CAPS).unwrap();
    let config = EngineConfig::default().with_max_chunk_size(0);
    assert!(matches!(
        attach_adapter(Arc::new(dev), config),
        Err(DdiError::InvalidParameter)
    ));
}

#[test]
fn test_attach_through_ddi() {
    let ddi = DdiMock::default();
    let devs = ddi.dev_info_list();
    assert_eq!(devs.len(), 2);

    for info in &devs {
        let handle = attach_path(&ddi, &info.path, EngineConfig::default()).unwrap();
        let adapter = hbamgmt_ddi::adapter(handle).unwrap();
        let echoed = adapter.loopback_test(b"hello", None).unwrap();
        assert_eq!(echoed, b"hello");
        detach_adapter(handle).unwrap();
    }

    assert!(matches!(
        attach_path(&ddi, "/dev/none", EngineConfig::default()),
        Err(DdiError::DeviceNotFound)
    ));
}

#[test]
fn test_detach_drains_events() {
    let dev = DdiMockDev::new(SELF_DESCRIBING_CAPS).unwrap();
    let handle = attach_adapter(Arc::new(dev.clone()), EngineConfig::default()).unwrap();
    let adapter = hbamgmt_ddi::adapter(handle).unwrap();

    dev.inject_unsolicited(&ct_frame(0xFC, b"one"), 1).unwrap();
    dev.inject_unsolicited(&ct_frame(0xFC, b"two"), 2).unwrap();
    detach_adapter(handle).unwrap();

    assert!(matches!(
        adapter.get_event(Duration::ZERO),
        Err(DdiError::WouldBlock)
    ));

    // frames after detach go straight back to the pool
    dev.inject_unsolicited(&ct_frame(0xFC, b"three"), 3).unwrap();
    assert_eq!(adapter.stats().events_queued, 2);
    assert_eq!(dev.rx_pool_available(), RX_POOL_DEPTH);
}
