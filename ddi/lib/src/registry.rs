// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-wide adapter table

use std::collections::HashMap;
use std::sync::Arc;

use hbamgmt_ddi_interface::*;
use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::adapter::HbaAdapter;
use crate::config::EngineConfig;

/// Handle of an attached adapter
pub type AdapterHandle = u32;

struct AdapterTable {
    next: AdapterHandle,
    adapters: HashMap<AdapterHandle, Arc<HbaAdapter>>,
}

lazy_static! {
    static ref G_ADAPTERS: RwLock<AdapterTable> = RwLock::new(AdapterTable {
        next: 1,
        adapters: HashMap::new(),
    });
}

/// Attach `dev` to the management engine.
///
/// # Arguments
/// * `dev` - Opened device
/// * `config` - Engine configuration for this adapter
///
/// # Returns
/// * `AdapterHandle` - Handle for later lookups
///
/// # Error
/// * `DdiError::InvalidParameter` - `config` failed validation
#[tracing::instrument(skip(dev, config))]
pub fn attach_adapter(dev: Arc<dyn DdiDev>, config: EngineConfig) -> DdiResult<AdapterHandle> {
    config.validate()?;

    let mut table = G_ADAPTERS.write();
    let mut handle = table.next;
    while handle == 0 || table.adapters.contains_key(&handle) {
        handle = handle.wrapping_add(1);
    }
    table.next = handle.wrapping_add(1);

    let adapter = Arc::new(HbaAdapter::new(handle, dev, config));
    adapter.bind();
    table.adapters.insert(handle, adapter);

    tracing::debug!(handle, "adapter attached");
    Ok(handle)
}

/// Open `path` through `ddi` and attach it.
///
/// # Error
/// * `DdiError::DeviceNotFound` - No device at `path`
/// * `DdiError::InvalidParameter` - `config` failed validation
pub fn attach_path<T: Ddi>(ddi: &T, path: &str, config: EngineConfig) -> DdiResult<AdapterHandle> {
    let dev = ddi.open_dev(path)?;
    attach_adapter(Arc::new(dev), config)
}

/// Detach an adapter: unbind its event sink, reclaim every parked exchange
/// and drop queued events.
///
/// # Error
/// * `DdiError::AdapterNotFound` - Unknown handle
#[tracing::instrument]
pub fn detach_adapter(handle: AdapterHandle) -> DdiResult<()> {
    let adapter = G_ADAPTERS
        .write()
        .adapters
        .remove(&handle)
        .ok_or(DdiError::AdapterNotFound)?;
    adapter.shutdown();
    Ok(())
}

/// Look up an attached adapter.
///
/// # Error
/// * `DdiError::AdapterNotFound` - Unknown handle
pub fn adapter(handle: AdapterHandle) -> DdiResult<Arc<HbaAdapter>> {
    G_ADAPTERS
        .read()
        .adapters
        .get(&handle)
        .cloned()
        .ok_or(DdiError::AdapterNotFound)
}

/// Handles of every attached adapter, in ascending order
pub fn adapter_handles() -> Vec<AdapterHandle> {
    let mut handles: Vec<AdapterHandle> = G_ADAPTERS.read().adapters.keys().copied().collect();
    handles.sort_unstable();
    handles
}
