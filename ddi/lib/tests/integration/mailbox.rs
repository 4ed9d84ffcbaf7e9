// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use hbamgmt_ddi::*;
use hbamgmt_ddi_mock::*;
use test_with_tracing::test;

use super::common::*;

#[test]
fn test_mailbox_returns_inline() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        let mailbox = pattern(MAILBOX_CMD_SIZE, 5);

        let resp = adapter.issue_mailbox(&mailbox, &[], 0, None).unwrap();
        assert_eq!(resp.mailbox, mailbox);
        assert!(resp.ext.is_empty());
        assert_eq!(dev.dma().outstanding(), baseline);
    });
}

#[test]
fn test_mailbox_with_extension_data() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        let baseline = dev.dma().outstanding();
        let ext_in = pattern(5000, 2);

        let resp = adapter
            .issue_mailbox(&[0x9b, 0, 0, 0], &ext_in, 6000, None)
            .unwrap();
        assert_eq!(resp.mailbox, vec![0x9b, 0, 0, 0]);
        assert_eq!(resp.ext, ext_in);
        assert_eq!(dev.dma().outstanding(), baseline);
    });
}

#[test]
fn test_mailbox_responder_output_only() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        dev.set_responder(|kind, command, tx| {
            assert_eq!(kind, CommandKind::Mailbox);
            assert!(tx.is_empty());
            let mut inline = command.to_vec();
            inline[1] = 0x01;
            MockReply {
                inline,
                data: b"config region".to_vec(),
                ..Default::default()
            }
        });

        let resp = adapter.issue_mailbox(&[0x17, 0x00], &[], 64, None).unwrap();
        assert_eq!(resp.mailbox, vec![0x17, 0x01]);
        assert_eq!(resp.ext, b"config region");
    });
}

#[test]
fn test_mailbox_size_limits() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        assert!(matches!(
            adapter.issue_mailbox(&[], &[], 0, None),
            Err(DdiError::InvalidParameter)
        ));
        assert!(matches!(
            adapter.issue_mailbox(&[0u8; MAILBOX_CMD_SIZE + 1], &[], 0, None),
            Err(DdiError::InvalidParameter)
        ));
        assert_eq!(dev.submitted_count(), 0);
    });
}

#[test]
fn test_mailbox_error_status() {
    default_adapter_test(FOOTER_CAPS, |adapter, dev| {
        dev.set_responder(|_, _, _| MockReply {
            status: 0x1,
            ext_status: 0xfc,
            ..Default::default()
        });

        assert!(matches!(
            adapter.issue_mailbox(&[0x01], &[], 0, None),
            Err(DdiError::DeviceStatus {
                status: 0x1,
                ext_status: 0xfc
            })
        ));
    });
}
