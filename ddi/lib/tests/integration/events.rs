// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::time::Duration;
use std::time::Instant;

use hbamgmt_ddi::*;
use hbamgmt_ddi_mock::*;
use test_with_tracing::test;

use super::common::*;

#[test]
fn test_events_delivered_in_order() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        for tag in 1..=5u32 {
            let frame = ct_frame(0xFC, &pattern(200 * tag as usize, tag as u8));
            dev.inject_unsolicited(&frame, tag).unwrap();
        }

        for tag in 1..=5u32 {
            let record = adapter.get_event(Duration::ZERO).unwrap();
            assert_eq!(record.tag, tag);
            assert_eq!(record.class, EventClass::Management);
            assert_eq!(
                record.payload,
                ct_frame(0xFC, &pattern(200 * tag as usize, tag as u8))
            );
        }

        assert!(matches!(
            adapter.get_event(Duration::ZERO),
            Err(DdiError::WouldBlock)
        ));
        assert_eq!(dev.rx_pool_available(), RX_POOL_DEPTH);
        assert_eq!(adapter.stats().events_queued, 5);
    });
}

#[test]
fn test_queue_keeps_records_above_warning_depth() {
    let config = EngineConfig::default().with_event_queue_warn_depth(4);
    adapter_test(SELF_DESCRIBING_CAPS, config, |adapter, dev| {
        for tag in 1..=40u32 {
            dev.inject_unsolicited(&ct_frame(0x20, &tag.to_le_bytes()), tag)
                .unwrap();
        }

        for tag in 1..=40u32 {
            assert_eq!(adapter.get_event(Duration::ZERO).unwrap().tag, tag);
        }
        assert_eq!(adapter.stats().events_dropped, 0);
    });
}

#[test]
fn test_get_event_without_deadline_returns_queued_record() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        dev.inject_unsolicited(&ct_frame(0xFC, b"queued"), 3).unwrap();

        let record = adapter.get_event(Duration::MAX).unwrap();
        assert_eq!(record.tag, 3);
        assert_eq!(record.payload, ct_frame(0xFC, b"queued"));
    });
}

#[test]
fn test_get_event_waits() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        let start = Instant::now();
        assert!(matches!(
            adapter.get_event(Duration::from_millis(20)),
            Err(DdiError::WouldBlock)
        ));
        assert!(start.elapsed() >= Duration::from_millis(20));

        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                dev.inject_unsolicited(&ct_frame(0xFC, b"RSCN"), 77).unwrap();
            });

            let record = adapter.get_event(Duration::from_secs(10)).unwrap();
            assert_eq!(record.tag, 77);
        });
    });
}

#[test]
fn test_malformed_frames_dropped() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        // shorter than a CT header
        dev.inject_unsolicited(&[0u8; 8], 1).unwrap();

        // footer missing
        let buffer = dev.take_rx_buffer().unwrap();
        buffer.write_at(0, &ct_frame(0xFC, b"x")).unwrap();
        dev.inject_chain(
            vec![Fragment {
                buffer,
                len: CT_HEADER_LEN + 1,
                class: BufferClass::Pool,
                total_len: None,
            }],
            2,
        );

        // empty chain
        dev.inject_chain(FragmentChain::new(), 3);

        assert_eq!(adapter.stats().events_dropped, 3);
        assert!(matches!(
            adapter.get_event(Duration::ZERO),
            Err(DdiError::WouldBlock)
        ));
        assert_eq!(dev.rx_pool_available(), RX_POOL_DEPTH);
    });
}

#[test]
fn test_oversized_frame_dropped() {
    let config = EngineConfig {
        max_event_payload: 512,
        ..Default::default()
    };
    adapter_test(SELF_DESCRIBING_CAPS, config, |adapter, dev| {
        dev.inject_unsolicited(&ct_frame(0xFC, &[0u8; 600]), 1)
            .unwrap();
        assert_eq!(adapter.stats().events_dropped, 1);
        assert_eq!(dev.rx_pool_available(), RX_POOL_DEPTH);
    });
}

#[test]
fn test_forced_reassembly_mode() {
    let config = EngineConfig::default().with_reassembly(ReassemblyPolicy {
        mode: Some(ReassemblyMode::SelfDescribing),
        ..Default::default()
    });

    // footer present but ignored
    adapter_test(FOOTER_CAPS, config, |adapter, dev| {
        dev.set_rx_fragment_size(64);
        let frame = ct_frame(0xFC, &pattern(300, 8));
        dev.inject_unsolicited(&frame, 5).unwrap();

        let record = adapter.get_event(Duration::ZERO).unwrap();
        assert_eq!(record.payload, frame);
    });
}
