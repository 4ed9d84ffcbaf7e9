// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::time::Duration;

use hbamgmt_ddi::*;
use hbamgmt_ddi_mock::*;
use test_with_tracing::test;

use super::common::*;

const SHORT: Option<Duration> = Some(Duration::from_millis(20));

#[test]
fn test_timeout_then_late_completion_returns_to_baseline() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        dev.hold_completions(true);

        let result = adapter.send_mgmt_cmd(MgmtKind::Els, &pattern(300, 4), 300, SHORT);
        assert!(matches!(result, Err(DdiError::TimedOut)));

        // the device still owns the buffers
        assert_eq!(adapter.parked_exchanges(), 1);
        assert!(dev.dma().outstanding() > baseline);

        assert_eq!(dev.release_held(), 1);
        assert_eq!(adapter.parked_exchanges(), 0);
        assert_eq!(dev.dma().outstanding(), baseline);
        assert_eq!(dev.dma().invalid_releases(), 0);

        let stats = adapter.stats();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.deferred_reclaims, 1);
        assert_eq!(stats.completed, 0);
    });
}

#[test]
fn test_adapter_usable_after_timeout() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        dev.hold_completions(true);
        assert!(adapter.issue_mailbox(&[0x01], &[], 0, SHORT).is_err());
        dev.hold_completions(false);

        let resp = adapter.issue_mailbox(&[0x02], &[], 0, None).unwrap();
        assert_eq!(resp.mailbox, vec![0x02]);

        // the stale completion for the first mailbox is reclaimed, not matched
        dev.release_held();
        assert_eq!(adapter.stats().deferred_reclaims, 1);
    });
}

#[test]
fn test_slow_device_within_deadline() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        dev.set_latency(Duration::from_millis(30));
        let request = pattern(50, 1);
        let reply = adapter
            .send_mgmt_cmd(MgmtKind::Ct, &request, 50, Some(Duration::from_secs(10)))
            .unwrap();
        assert_eq!(reply, request);
    });
}

#[test]
fn test_detach_reclaims_parked_exchanges() {
    let dev = DdiMockDev::new(SELF_DESCRIBING_CAPS).unwrap();
    let baseline = dev.dma().outstanding();
    let handle = attach_adapter(std::sync::Arc::new(dev.clone()), EngineConfig::default()).unwrap();
    let adapter = hbamgmt_ddi::adapter(handle).unwrap();

    dev.hold_completions(true);
    for _ in 0..3 {
        assert!(adapter
            .send_mgmt_cmd(MgmtKind::Ct, b"no answer", 64, SHORT)
            .is_err());
    }
    assert_eq!(adapter.parked_exchanges(), 3);
    assert!(dev.dma().outstanding() > baseline);

    detach_adapter(handle).unwrap();
    assert_eq!(adapter.parked_exchanges(), 0);
    assert_eq!(dev.dma().outstanding(), baseline);

    // late completions find no sink
    assert_eq!(dev.release_held(), 3);
    assert_eq!(dev.dma().invalid_releases(), 0);
}
