// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::io::Cursor;
use std::time::Duration;

use hbamgmt_ddi::*;
use hbamgmt_ddi_mock::*;
use test_with_tracing::test;

use super::common::*;

#[test]
fn test_ct_request_echo() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        let request = ct_frame(0xFC, &pattern(100, 1));

        let reply = adapter
            .send_mgmt_cmd(MgmtKind::Ct, &request, 512, None)
            .unwrap();
        assert_eq!(reply, request);

        assert_eq!(dev.dma().outstanding(), baseline);
        let stats = adapter.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
    });
}

#[test]
fn test_ct_request_without_deadline() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        dev.set_latency(Duration::from_millis(10));
        let request = ct_frame(0xFC, &pattern(40, 2));

        let reply = adapter
            .send_mgmt_cmd(MgmtKind::Ct, &request, 64, Some(Duration::MAX))
            .unwrap();
        assert_eq!(reply, request);
        assert_eq!(dev.dma().outstanding(), baseline);
    });
}

#[test]
fn test_els_reply_truncated_to_reply_len() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        let request = pattern(64, 9);

        let reply = adapter
            .send_mgmt_cmd(MgmtKind::Els, &request, 16, None)
            .unwrap();
        assert_eq!(reply, &request[..16]);
        assert_eq!(dev.dma().outstanding(), baseline);
    });
}

#[test]
fn test_request_spanning_descriptor_pages() {
    // 4 data entries per page and 256 byte chunks
    let config = EngineConfig::default()
        .with_max_chunk_size(256)
        .with_bpl_geometry(6, 2);

    adapter_test(SELF_DESCRIBING_CAPS, config, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        let request = pattern(256 * 7 + 10, 3);

        let reply = adapter
            .send_mgmt_cmd(MgmtKind::Ct, &request, request.len(), None)
            .unwrap();
        assert_eq!(reply, request);
        assert_eq!(dev.dma().outstanding(), baseline);
        assert_eq!(dev.dma().invalid_releases(), 0);
    });
}

#[test]
fn test_device_status_error() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        dev.set_responder(|_, _, _| MockReply {
            status: 3,
            ext_status: 0x29,
            ..Default::default()
        });

        let result = adapter.send_mgmt_cmd(MgmtKind::Els, b"plogi", 64, None);
        assert!(matches!(
            result,
            Err(DdiError::DeviceStatus {
                status: 3,
                ext_status: 0x29
            })
        ));
        assert_eq!(dev.dma().outstanding(), baseline);
    });
}

#[test]
fn test_custom_responder_sees_request() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        let request = ct_frame(0xFC, b"GID_FT");
        let expected = request.clone();
        dev.set_responder(move |kind, _, tx| {
            assert_eq!(kind, CommandKind::CtRequest);
            assert_eq!(tx, expected.as_slice());
            MockReply {
                data: b"accept".to_vec(),
                ..Default::default()
            }
        });

        let reply = adapter
            .send_mgmt_cmd(MgmtKind::Ct, &request, 128, None)
            .unwrap();
        assert_eq!(reply, b"accept");
    });
}

#[test]
fn test_rejected_submission() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        dev.reject_next_submits(1);

        let result = adapter.send_mgmt_cmd(MgmtKind::Ct, b"request", 32, None);
        assert!(matches!(result, Err(DdiError::DeviceRejected)));
        assert_eq!(dev.dma().outstanding(), baseline);
        assert_eq!(adapter.stats().rejected, 1);

        // the next submission goes through
        assert!(adapter
            .send_mgmt_cmd(MgmtKind::Ct, b"request", 32, None)
            .is_ok());
    });
}

#[test]
fn test_invalid_parameters() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        assert!(matches!(
            adapter.send_mgmt_cmd(MgmtKind::Ct, &[], 32, None),
            Err(DdiError::InvalidParameter)
        ));
        assert!(matches!(
            adapter.send_mgmt_cmd(MgmtKind::Ct, b"x", 0, None),
            Err(DdiError::InvalidParameter)
        ));
        assert_eq!(dev.submitted_count(), 0);
    });
}

#[test]
fn test_allocation_failure_leaves_nothing_behind() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();

        // the transmit side is built, the receive side fails
        dev.dma().fail_after(2);
        let result = adapter.send_mgmt_cmd(MgmtKind::Ct, b"request", 32, None);
        dev.dma().clear_failure();

        assert!(matches!(result, Err(DdiError::ResourceExhausted)));
        assert_eq!(dev.dma().outstanding(), baseline);
        assert_eq!(dev.submitted_count(), 0);
    });
}

#[test]
fn test_caller_built_exchange() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        let builder = adapter.extent_builder();
        let alloc = adapter.device().as_ref();

        let data = pattern(3000, 7);
        let mut source = Cursor::new(data.clone());
        let tx = builder
            .build(alloc, data.len(), ExtentDirection::CopyIn(&mut source))
            .unwrap();
        let rx = builder
            .build(alloc, data.len(), ExtentDirection::ZeroFill)
            .unwrap();

        let mut req = ExchangeRequest::new(CommandKind::ElsRequest, vec![0x03]);
        req.attach(tx).unwrap();
        req.attach(rx).unwrap();

        let view = adapter
            .submit_exchange(req, Some(Duration::from_secs(10)))
            .unwrap();
        assert_eq!(view.status, 0);
        assert_eq!(view.bytes_returned as usize, data.len());
        assert_eq!(view.data, data);
        assert_eq!(dev.dma().outstanding(), baseline);
    });
}

#[test]
fn test_concurrent_callers() {
    default_adapter_test(SELF_DESCRIBING_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        dev.set_latency(Duration::from_millis(2));

        std::thread::scope(|s| {
            for seed in 0..8u8 {
                s.spawn(move || {
                    for _ in 0..10 {
                        let request = pattern(700, seed);
                        let reply = adapter
                            .send_mgmt_cmd(MgmtKind::Ct, &request, 700, None)
                            .unwrap();
                        assert_eq!(reply, request);
                    }
                });
            }
        });

        assert_eq!(adapter.stats().completed, 80);
        assert_eq!(dev.dma().outstanding(), baseline);
    });
}
