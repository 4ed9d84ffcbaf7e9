// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Arguments;

use hbamgmt_ddi::*;

pub(crate) trait Logger {
    fn println(&mut self, value: Arguments<'_>);
}

pub(crate) struct StdoutLogger;

impl Logger for StdoutLogger {
    fn println(&mut self, value: Arguments<'_>) {
        println!("{}", value);
    }
}

pub(crate) fn print_dev_info(logger: &mut impl Logger, index: usize, info: &DevInfo) {
    logger.println(format_args!("[{}] {}", index, info.path));
    logger.println(format_args!("    PCI info:         {}", info.pci_info));
    logger.println(format_args!("    WWPN:             {:016x}", info.wwpn));
    logger.println(format_args!("    Driver version:   {}", info.driver_ver));
    logger.println(format_args!("    Firmware version: {}", info.firmware_ver));
    logger.println(format_args!("    Hardware version: {}", info.hardware_ver));
}

pub(crate) fn print_stats(logger: &mut impl Logger, stats: &AdapterStatsSnapshot) {
    let rows = [
        ("submitted", stats.submitted),
        ("completed", stats.completed),
        ("late successes", stats.late_successes),
        ("timed out", stats.timed_out),
        ("deferred reclaims", stats.deferred_reclaims),
        ("rejected", stats.rejected),
        ("unmatched completions", stats.unmatched_completions),
        ("events queued", stats.events_queued),
        ("events dropped", stats.events_dropped),
        ("loopback violations", stats.loopback_violations),
    ];

    logger.println(format_args!("==== Adapter counters"));
    for (name, value) in rows {
        logger.println(format_args!("{:<22} {}", name, value));
    }
}
