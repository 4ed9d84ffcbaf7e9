// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tracing-enabled `#[test]` attribute for the workspace crates.
//!
//! Every test wrapped by [`test`] calls [`init`] first, so engine logs show
//! up in the captured test output with thread ids attached.

#[cfg(test)]
extern crate self as test_with_tracing;

use std::sync::Once;

pub use test_with_tracing_macro::test;
#[doc(hidden)]
pub use tracing;
use tracing::metadata::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

/// Level used when `RUST_LOG` is unset or unparsable
pub const DEFAULT_TEST_LEVEL: LevelFilter = LevelFilter::DEBUG;

static INIT: Once = Once::new();

// Filter from `RUST_LOG`, with the parse error kept for reporting once the
// subscriber is up
fn test_targets(var: Option<String>) -> (Targets, Option<String>) {
    let default = || Targets::new().with_default(DEFAULT_TEST_LEVEL);
    match var {
        None => (default(), None),
        Some(var) => match var.parse::<Targets>() {
            Ok(targets) => (targets, None),
            Err(err) => (default(), Some(format!("ignoring RUST_LOG={var:?}: {err}"))),
        },
    }
}

#[doc(hidden)]
/// Install the test subscriber; later calls do nothing.
pub fn init() {
    INIT.call_once(|| {
        let (targets, rejected) = test_targets(std::env::var("RUST_LOG").ok());
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_test_writer()
            .with_max_level(LevelFilter::TRACE)
            .with_thread_ids(true)
            .with_target(true)
            .finish()
            .with(targets)
            .init();

        if let Some(reason) = rejected {
            tracing::warn!("{reason}");
        }
    });
}
