// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! DDI Implementation - Mock Adapter - DDI Module

use hbamgmt_ddi_interface::Ddi;
use hbamgmt_ddi_interface::DdiError;
use hbamgmt_ddi_interface::DdiResult;
use hbamgmt_ddi_interface::DevCaps;
use hbamgmt_ddi_interface::DevInfo;
use lazy_static::lazy_static;
use rand::Rng;

use crate::dev::DdiMockDev;

/// Mock adapter whose unsolicited frames carry a length footer
pub const MOCK_FOOTER_DEV_PATH: &str = "/dev/hbamgmt-mock0";

/// Mock adapter whose unsolicited frames are self-describing
pub const MOCK_SELF_DESCRIBING_DEV_PATH: &str = "/dev/hbamgmt-mock1";

lazy_static! {
    static ref G_WWPN_BASE: u64 = {
        let mut rng = rand::thread_rng();
        0x1000_0000_c900_0000 | u64::from(rng.gen::<u16>()) << 8
    };
}

/// DDI Implementation - Mock Adapter Interface
#[derive(Default, Debug)]
pub struct DdiMock {}

impl Ddi for DdiMock {
    type Dev = DdiMockDev;

    /// Returns the adapter device information list
    ///
    /// # Returns
    /// * `Vec<DevInfo>` - Adapter device information list
    #[tracing::instrument]
    fn dev_info_list(&self) -> Vec<DevInfo> {
        let devs: Vec<DevInfo> = [MOCK_FOOTER_DEV_PATH, MOCK_SELF_DESCRIBING_DEV_PATH]
            .iter()
            .enumerate()
            .map(|(i, path)| DevInfo {
                path: String::from(*path),
                driver_ver: String::from("0.1.0"),
                firmware_ver: String::from("0.1.0"),
                hardware_ver: String::from("0.1.0"),
                pci_info: format!("0000:00:0{}.0", i + 1),
                wwpn: *G_WWPN_BASE + i as u64,
            })
            .collect();

        // Log a success message and a list of all devices
        tracing::debug!(size = devs.len(), "Got DdiMock device info list");
        for (i, dev) in devs.iter().enumerate() {
            tracing::debug!(index = i, path = ?dev.path);
        }
        tracing::trace!(devs = ?devs);

        devs
    }

    /// Open adapter device
    ///
    /// # Arguments
    /// `path` - Device path
    ///
    /// # Returns
    /// `Self::Dev` - Adapter device
    ///
    /// # Error
    /// * `DdiError` - Error encountered while opening the device
    fn open_dev(&self, path: &str) -> DdiResult<Self::Dev> {
        match path {
            MOCK_FOOTER_DEV_PATH => DdiMockDev::new(DevCaps {
                footer_length_frames: true,
            }),
            MOCK_SELF_DESCRIBING_DEV_PATH => DdiMockDev::new(DevCaps {
                footer_length_frames: false,
            }),
            _ => Err(DdiError::DeviceNotFound),
        }
    }
}
