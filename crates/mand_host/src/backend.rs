//! Opening the cluster for a command.
//!
//! The CLI drives either the physical bridge window or the simulated cluster.
//! Both are wrapped in [`Backend`] so that every subcommand runs the same
//! [`RegisterBridge`] code against either of them.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use mand_common::mmio::BRIDGE_BASE;
use mand_core::bridge::RegisterBridge;
use mand_core::error::Result as BridgeResult;
use mand_core::layout::LayoutVersion;
use mand_core::poll::{PollPolicy, Poller};
use mand_core::regs::RegisterBlock;
use mand_core::sim::{SimConfig, SimulatedCluster};
use mand_hw::{DevMem, MapError, MonotonicClock, SleepDelay, SpinWait};
use mand_io::parser::parse_u64;
use tracing::{debug, info};

/// Where the register file lives and how it is laid out.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Register file revision of the loaded bitstream (v1, v2, v3).
    #[arg(long, default_value = "v2")]
    pub layout: LayoutVersion,

    /// Physical base address of the bridge window.
    #[arg(long, default_value_t = BRIDGE_BASE, value_parser = parse_u64)]
    pub base: u64,

    /// Bytes to map. Defaults to the span of the selected layout.
    #[arg(long, value_parser = parse_span)]
    pub span: Option<usize>,

    /// Drive the simulated cluster instead of physical memory.
    #[arg(long)]
    pub sim: bool,

    /// Cores of the simulated cluster.
    #[arg(long, default_value_t = 4)]
    pub sim_cores: u64,

    /// Busy polls a simulated computation lasts.
    #[arg(long, default_value_t = 16)]
    pub sim_polls: u64,
}

impl DeviceArgs {
    /// Bytes to map: `--span`, or the deployed span of the layout.
    pub fn span(&self) -> usize {
        self.span.unwrap_or(self.layout.default_span())
    }
}

/// Bounds of a busy poll.
#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    /// Give up on a core after this many milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub timeout_ms: u64,

    /// Sleep between two polls. Zero spins.
    #[arg(long, default_value_t = 0)]
    pub interval_us: u64,
}

impl PollArgs {
    /// Spin or sleep between polls, bounded by the timeout.
    pub fn policy(&self) -> PollPolicy {
        PollPolicy::SPIN
            .with_interval(Duration::from_micros(self.interval_us))
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }

    /// A poller on the host clock that sleeps when an interval is set.
    pub fn poller(&self) -> Poller<'static, MonotonicClock, SleepDelay> {
        Poller::new(self.policy(), MonotonicClock::new(), SleepDelay)
    }
}

fn parse_span(text: &str) -> Result<usize> {
    let span = parse_u64(text)?;
    usize::try_from(span).context("span does not fit the address space")
}

/// Bridge driven by every subcommand.
pub type HostBridge = RegisterBridge<Backend, SpinWait>;

/// Register block behind the bridge.
pub enum Backend {
    Device(DevMem),
    Simulated(SimulatedCluster),
}

impl Backend {
    /// Releases the physical mapping. Nothing to do for the simulator.
    pub fn close(&mut self) -> Result<(), MapError> {
        match self {
            Backend::Device(mem) => mem.close(),
            Backend::Simulated(_) => Ok(()),
        }
    }
}

impl RegisterBlock for Backend {
    fn span(&self) -> usize {
        match self {
            Backend::Device(mem) => mem.span(),
            Backend::Simulated(sim) => sim.span(),
        }
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> BridgeResult<()> {
        match self {
            Backend::Device(mem) => mem.read(offset, buf),
            Backend::Simulated(sim) => sim.read(offset, buf),
        }
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> BridgeResult<()> {
        match self {
            Backend::Device(mem) => mem.write(offset, data),
            Backend::Simulated(sim) => sim.write(offset, data),
        }
    }

    fn write_settle(&self) -> Duration {
        match self {
            Backend::Device(mem) => mem.write_settle(),
            Backend::Simulated(sim) => sim.write_settle(),
        }
    }
}

/// Maps the register file described by `args`.
pub fn open(args: &DeviceArgs) -> Result<HostBridge> {
    let version = args.layout;
    let span = args.span();

    let block = if args.sim {
        info!(%version, span, cores = args.sim_cores, "using simulated cluster");
        let config = SimConfig::new(version)
            .with_span(span)
            .with_cores(args.sim_cores)
            .with_busy_polls(args.sim_polls);
        Backend::Simulated(SimulatedCluster::new(config))
    } else {
        Backend::Device(DevMem::open(args.base, span)?)
    };

    let bridge = RegisterBridge::new(block, version)?.with_delay(SpinWait);
    debug!(%version, settle = ?bridge.settle(), "register bridge ready");
    Ok(bridge)
}

/// Drops the bridge, surfacing a failure to release the mapping.
pub fn release(bridge: HostBridge) -> Result<()> {
    let mut block = bridge.into_inner();
    block.close()?;
    Ok(())
}
