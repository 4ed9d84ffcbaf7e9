// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::sync::Arc;

use hbamgmt_ddi::*;
use hbamgmt_ddi_mock::*;

/// Device caps with footer-length unsolicited frames
pub const FOOTER_CAPS: DevCaps = DevCaps {
    footer_length_frames: true,
};

/// Device caps with self-describing unsolicited frames
pub const SELF_DESCRIBING_CAPS: DevCaps = DevCaps {
    footer_length_frames: false,
};

/// Attach a fresh mock device, run `test` and detach again.
///
/// The mock handle passed to `test` shares state with the attached device,
/// so tests can inject frames, hold completions and check DMA accounting.
pub fn adapter_test<F>(caps: DevCaps, config: EngineConfig, test: F)
where
    F: FnOnce(&HbaAdapter, &DdiMockDev),
{
    let dev = DdiMockDev::new(caps).unwrap();
    let handle = attach_adapter(Arc::new(dev.clone()), config).unwrap();
    let adapter = hbamgmt_ddi::adapter(handle).unwrap();

    test(&adapter, &dev);

    drop(adapter);
    detach_adapter(handle).unwrap();
}

/// Same as [`adapter_test`] with the default configuration
pub fn default_adapter_test<F>(caps: DevCaps, test: F)
where
    F: FnOnce(&HbaAdapter, &DdiMockDev),
{
    adapter_test(caps, EngineConfig::default(), test)
}

/// Deterministic test pattern
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// A CT frame of sub-protocol `fs_type` with `body` after the header
pub fn ct_frame(fs_type: u8, body: &[u8]) -> Vec<u8> {
    let mut header = [0u8; CT_HEADER_LEN];
    header[0] = CT_REVISION;
    header[FS_TYPE_OFFSET] = fs_type;

    let mut frame = header.to_vec();
    frame.extend_from_slice(body);
    frame
}
