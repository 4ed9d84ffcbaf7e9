// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use clap::*;
use hbamgmt_ddi::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct CliArgs {
    /// Selected device index
    #[arg(long, global = true, default_value_t = 0)]
    pub(crate) device: usize,

    /// Largest DMA chunk behind one descriptor entry
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CHUNK_SIZE)]
    pub(crate) max_chunk_size: usize,

    /// Descriptor entries per page
    #[arg(long, global = true, default_value_t = DEFAULT_BPL_ENTRIES_PER_PAGE)]
    pub(crate) bpl_entries: usize,

    /// Unsolicited frame reassembly mode
    #[arg(long, global = true, default_value_t = ModeArg::Auto, value_enum)]
    pub(crate) reassembly: ModeArg,

    /// Fate of diagnostic fragment buffers
    #[arg(long, global = true, default_value_t = DispositionArg::Release, value_enum)]
    pub(crate) diagnostic_fragments: DispositionArg,

    /// Per command timeout in milliseconds
    #[arg(long, global = true)]
    pub(crate) timeout_ms: Option<u64>,

    /// CLI Command
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// List adapters
    List,

    /// Loopback self-test with random payloads
    Loopback(LoopbackArgs),

    /// Echo CT frames through the device
    CtEcho(CtEchoArgs),

    /// Inject unsolicited management frames and drain them
    Events(EventsArgs),
}

#[derive(Args, Debug)]
pub(crate) struct LoopbackArgs {
    /// Payload size in bytes
    #[arg(long, default_value_t = 2048)]
    pub(crate) size: usize,

    /// Number of round trips
    #[arg(long, default_value_t = 10)]
    pub(crate) iterations: usize,

    /// Deliver echoes in diagnostic buffers
    #[arg(long, default_value_t = false)]
    pub(crate) diagnostic: bool,
}

#[derive(Args, Debug)]
pub(crate) struct CtEchoArgs {
    /// Request size in bytes
    #[arg(long, default_value_t = 4096)]
    pub(crate) size: usize,

    /// Requests per thread
    #[arg(long, default_value_t = 100)]
    pub(crate) count: usize,

    /// Number of caller threads
    #[arg(long, default_value_t = 4)]
    pub(crate) threads: usize,
}

#[derive(Args, Debug)]
pub(crate) struct EventsArgs {
    /// Frames to inject
    #[arg(long, default_value_t = 16)]
    pub(crate) count: u32,

    /// Longest frame body in bytes
    #[arg(long, default_value_t = 512)]
    pub(crate) max_size: usize,

    /// Wait per retrieval in milliseconds
    #[arg(long, default_value_t = 100)]
    pub(crate) max_wait_ms: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum, Debug)]
pub(crate) enum ModeArg {
    /// Follow the device capabilities
    Auto,

    /// Trust the length footer
    Footer,

    /// Sum the fragment lengths
    SelfDescribing,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum, Debug)]
pub(crate) enum DispositionArg {
    /// Back to the DMA allocator
    Release,

    /// Back to the receive pool
    Pool,
}

impl CliArgs {
    pub(crate) fn engine_config(&self) -> EngineConfig {
        let mode = match self.reassembly {
            ModeArg::Auto => None,
            ModeArg::Footer => Some(ReassemblyMode::FooterLength),
            ModeArg::SelfDescribing => Some(ReassemblyMode::SelfDescribing),
        };
        let diagnostic_fragments = match self.diagnostic_fragments {
            DispositionArg::Release => FragmentDisposition::Release,
            DispositionArg::Pool => FragmentDisposition::ReturnToPool,
        };

        EngineConfig::default()
            .with_max_chunk_size(self.max_chunk_size)
            .with_bpl_geometry(self.bpl_entries, DEFAULT_BPL_RESERVED_ENTRIES)
            .with_reassembly(ReassemblyPolicy {
                mode,
                diagnostic_fragments,
            })
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
