// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod cli;
mod report;

use std::process::ExitCode;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use hbamgmt_ddi::*;
use hbamgmt_ddi_mock::*;
use parking_lot::Mutex;
use rand::Rng;
use tracing::metadata::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

use crate::cli::*;
use crate::report::*;

const MGMT_FS_TYPE: u8 = 0xFC;

fn main() -> ExitCode {
    let cli_args = CliArgs::parse();
    init_tracing();

    match run(&cli_args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("hbamgmt_diag: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let targets = std::env::var("RUST_LOG")
        .ok()
        .and_then(|var| var.parse::<Targets>().ok())
        .unwrap_or_else(|| Targets::new().with_default(LevelFilter::WARN));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(LevelFilter::TRACE)
        .with_thread_ids(true)
        .finish()
        .with(targets)
        .init();
}

fn run(args: &CliArgs) -> DdiResult<()> {
    let ddi = DdiMock::default();
    let mut devs = ddi.dev_info_list();
    devs.sort();

    if let CliCommand::List = args.command {
        for (index, info) in devs.iter().enumerate() {
            print_dev_info(&mut StdoutLogger, index, info);
        }
        return Ok(());
    }

    let info = devs.get(args.device).ok_or(DdiError::DeviceNotFound)?;
    let dev = ddi.open_dev(&info.path)?;
    let handle = attach_adapter(Arc::new(dev.clone()), args.engine_config())?;
    let adapter = hbamgmt_ddi::adapter(handle)?;
    tracing::debug!(handle, path = %info.path, "adapter attached");

    let result = match &args.command {
        CliCommand::List => Ok(()),
        CliCommand::Loopback(cmd) => loopback(&adapter, &dev, cmd, args.timeout()),
        CliCommand::CtEcho(cmd) => ct_echo(&adapter, cmd, args.timeout()),
        CliCommand::Events(cmd) => events(&adapter, &dev, cmd),
    };

    print_stats(&mut StdoutLogger, &adapter.stats());
    drop(adapter);
    detach_adapter(handle)?;
    result
}

fn loopback(
    adapter: &HbaAdapter,
    dev: &DdiMockDev,
    args: &LoopbackArgs,
    timeout: Option<Duration>,
) -> DdiResult<()> {
    dev.set_diagnostic_fragments(args.diagnostic);

    let mut rng = rand::thread_rng();
    let mut payload = vec![0u8; args.size];
    let start = Instant::now();

    for iteration in 0..args.iterations {
        rng.fill(payload.as_mut_slice());
        let echoed = adapter.loopback_test(&payload, timeout)?;
        if echoed != payload {
            tracing::error!(iteration, sent = payload.len(), received = echoed.len(), "loopback mismatch");
            Err(DdiError::MalformedResponse)?
        }
    }

    println!(
        "Loopback: {} x {} bytes in {:?}",
        args.iterations,
        args.size,
        start.elapsed()
    );
    Ok(())
}

fn ct_echo(adapter: &HbaAdapter, args: &CtEchoArgs, timeout: Option<Duration>) -> DdiResult<()> {
    let passed = AtomicUsize::new(0);
    let first_error = Mutex::new(None);
    let start = Instant::now();

    std::thread::scope(|s| {
        for _ in 0..args.threads {
            s.spawn(|| {
                let mut rng = rand::thread_rng();
                let mut request = vec![0u8; args.size];
                for _ in 0..args.count {
                    rng.fill(request.as_mut_slice());
                    let result = adapter
                        .send_mgmt_cmd(MgmtKind::Ct, &request, args.size, timeout)
                        .and_then(|reply| {
                            if reply == request {
                                Ok(())
                            } else {
                                Err(DdiError::MalformedResponse)
                            }
                        });

                    match result {
                        Ok(()) => {
                            passed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            tracing::error!(?err, "CT echo failed");
                            first_error.lock().get_or_insert(err);
                        }
                    }
                }
            });
        }
    });

    println!(
        "CT echo: {} of {} passed in {:?}",
        passed.load(Ordering::Relaxed),
        args.threads * args.count,
        start.elapsed()
    );

    match first_error.into_inner() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn events(adapter: &HbaAdapter, dev: &DdiMockDev, args: &EventsArgs) -> DdiResult<()> {
    let mut rng = rand::thread_rng();

    for tag in 1..=args.count {
        let mut frame = vec![0u8; CT_HEADER_LEN];
        frame[0] = CT_REVISION;
        frame[FS_TYPE_OFFSET] = MGMT_FS_TYPE;

        let body_len = rng.gen_range(1..=args.max_size.max(1));
        frame.extend((0..body_len).map(|_| rng.gen::<u8>()));
        dev.inject_unsolicited(&frame, tag)?;
    }

    let max_wait = Duration::from_millis(args.max_wait_ms);
    let mut received = 0u32;
    loop {
        match adapter.get_event(max_wait) {
            Ok(record) => {
                received += 1;
                println!(
                    "event tag={} class={:?} len={}",
                    record.tag,
                    record.class,
                    record.payload_len()
                );
            }
            Err(DdiError::WouldBlock) => break,
            Err(err) => return Err(err),
        }
    }

    println!("Events: {} injected, {} received", args.count, received);
    if received != args.count {
        Err(DdiError::MalformedResponse)?
    }
    Ok(())
}
