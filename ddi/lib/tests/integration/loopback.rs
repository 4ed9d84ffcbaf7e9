// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::time::Duration;

use hbamgmt_ddi::*;
use hbamgmt_ddi_mock::*;
use test_with_tracing::test;

use super::common::*;

#[test]
fn test_loopback_footer_device() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        let payload = pattern(3000, 11);

        let echoed = adapter.loopback_test(&payload, None).unwrap();
        assert_eq!(echoed, payload);

        assert_eq!(dev.dma().outstanding(), baseline);
        assert_eq!(dev.rx_pool_available(), RX_POOL_DEPTH);
    });
}

#[test]
fn test_loopback_self_describing_device() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        dev.set_rx_fragment_size(100);
        let payload = pattern(1000, 12);

        let echoed = adapter.loopback_test(&payload, None).unwrap();
        assert_eq!(echoed, payload);
        assert_eq!(dev.rx_pool_available(), RX_POOL_DEPTH);
    });
}

#[test]
fn test_loopback_diagnostic_fragments_released() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        dev.set_diagnostic_fragments(true);
        dev.set_rx_fragment_size(256);

        let payload = pattern(2000, 13);
        let echoed = adapter.loopback_test(&payload, None).unwrap();
        assert_eq!(echoed, payload);

        assert_eq!(dev.dma().outstanding(), baseline);
        assert_eq!(dev.dma().invalid_releases(), 0);
        assert_eq!(dev.rx_pool_available(), RX_POOL_DEPTH);
    });
}

#[test]
fn test_loopback_diagnostic_fragments_returned_to_pool() {
    let config = EngineConfig::default().with_reassembly(ReassemblyPolicy {
        mode: None,
        diagnostic_fragments: FragmentDisposition::ReturnToPool,
    });

    adapter_test(SELF_DESCRIBING_CAPS, config, |adapter, dev| {
        dev.set_diagnostic_fragments(true);
        dev.set_rx_fragment_size(RX_BUFFER_SIZE);

        let payload = pattern(RX_BUFFER_SIZE, 14);
        assert!(adapter.loopback_test(&payload, None).is_ok());

        // header plus payload spans two diagnostic fragments
        assert_eq!(dev.rx_pool_available(), RX_POOL_DEPTH + 2);
    });
}

#[test]
fn test_loopback_payload_limits() {
    let config = EngineConfig::default().with_max_loopback_payload(64);
    adapter_test(FOOTER_CAPS, config, |adapter, dev| {
        assert!(matches!(
            adapter.loopback_test(&[], None),
            Err(DdiError::InvalidParameter)
        ));
        assert!(matches!(
            adapter.loopback_test(&[0u8; 65], None),
            Err(DdiError::InvalidParameter)
        ));
        assert!(adapter.loopback_test(&[0u8; 64], None).is_ok());
        assert_eq!(dev.submitted_count(), 1);
    });
}

#[test]
fn test_second_loopback_record_is_a_violation() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        dev.inject_unsolicited(&ct_frame(FS_TYPE_LOOPBACK, b"first"), 1)
            .unwrap();
        dev.inject_unsolicited(&ct_frame(FS_TYPE_LOOPBACK, b"second"), 2)
            .unwrap();

        let stats = adapter.stats();
        assert_eq!(stats.loopback_violations, 1);
        assert_eq!(stats.events_dropped, 1);

        // loopback records never reach the management queue
        assert!(matches!(
            adapter.get_event(Duration::ZERO),
            Err(DdiError::WouldBlock)
        ));
        assert_eq!(dev.rx_pool_available(), RX_POOL_DEPTH);
    });
}

#[test]
fn test_stale_loopback_record_discarded() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        dev.inject_unsolicited(&ct_frame(FS_TYPE_LOOPBACK, b"stale"), 1)
            .unwrap();

        let echoed = adapter.loopback_test(b"fresh", None).unwrap();
        assert_eq!(echoed, b"fresh");
        assert_eq!(adapter.stats().loopback_violations, 0);
    });
}

#[test]
fn test_loopback_transmit_timeout() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        dev.hold_completions(true);

        let result = adapter.loopback_test(b"held", Some(Duration::from_millis(20)));
        assert!(matches!(result, Err(DdiError::TimedOut)));

        // the late echo lands in the slot and is discarded by the next test
        dev.release_held();
        dev.hold_completions(false);
        assert_eq!(dev.dma().outstanding(), baseline);

        let echoed = adapter.loopback_test(b"again", None).unwrap();
        assert_eq!(echoed, b"again");
    });
}

#[test]
fn test_concurrent_loopback_tests_get_their_own_echo() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        dev.set_latency(Duration::from_millis(30));

        for round in 0..10u8 {
            let first = [round; 64];
            let second = [0x80 | round; 64];

            let (r1, r2) = std::thread::scope(|s| {
                let h1 = s.spawn(|| adapter.loopback_test(&first, None));
                let h2 = s.spawn(|| adapter.loopback_test(&second, None));
                (h1.join().unwrap(), h2.join().unwrap())
            });

            assert_eq!(r1.unwrap(), first);
            assert_eq!(r2.unwrap(), second);
        }
        assert_eq!(adapter.stats().loopback_violations, 0);
    });
}

#[test]
fn test_loopback_without_deadline() {
    default_adapter_test(FOOTER_CAPS, |adapter, _dev| {
        let echoed = adapter.loopback_test(b"unbounded", Some(Duration::MAX)).unwrap();
        assert_eq!(echoed, b"unbounded");
    });
}
