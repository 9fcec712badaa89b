mod backend;
mod report;
mod run;
mod snapshot;
mod stats;
mod throughput;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use mand_hw::MapError;
use mand_io::parser::parse_u64;
use tracing_subscriber::EnvFilter;

use backend::{DeviceArgs, PollArgs};

/// Diagnostics for the mandelbrot cluster behind the HPS-to-FPGA bridge.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print metadata, control registers and status vectors.
    Meta {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Compute one point on one core.
    Run {
        #[command(flatten)]
        device: DeviceArgs,
        #[command(flatten)]
        poll: PollArgs,
        #[arg(long, allow_hyphen_values = true, default_value = "0")]
        x: String,
        #[arg(long, allow_hyphen_values = true, default_value = "0")]
        y: String,
        #[arg(long, default_value_t = 1000, value_parser = parse_u64)]
        max_iterations: u64,
        #[arg(long, default_value_t = 0)]
        core: usize,
    },
    /// Compute every point of a file on one core.
    Batch {
        #[command(flatten)]
        device: DeviceArgs,
        #[command(flatten)]
        poll: PollArgs,
        #[arg(short, long)]
        points: PathBuf,
        #[arg(long, default_value_t = 0)]
        core: usize,
    },
    /// Compare cluster results with the software reference.
    Verify {
        #[command(flatten)]
        device: DeviceArgs,
        #[command(flatten)]
        poll: PollArgs,
        #[arg(short, long)]
        points: PathBuf,
        #[arg(long, default_value_t = 0)]
        core: usize,
        /// Only compute the reference; no device is opened.
        #[arg(long)]
        reference_only: bool,
    },
    /// Save the register file to a snapshot.
    Dump {
        #[command(flatten)]
        device: DeviceArgs,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Decode a saved snapshot.
    Inspect {
        #[arg(short, long)]
        from: PathBuf,
    },
    /// Reset one core.
    #[cfg(feature = "reset_command")]
    Reset {
        #[command(flatten)]
        device: DeviceArgs,
        #[arg(long, default_value_t = 0)]
        core: usize,
    },
}

/// Log filter for `-v` repeated `verbose` times on top of `RUST_LOG`.
///
/// Without `-v` the environment decides, falling back to `warn`.
fn env_filter(verbose: u8, rust_log: Option<&str>) -> Result<EnvFilter> {
    let level = match verbose {
        0 => {
            return Ok(match rust_log {
                Some(directives) => EnvFilter::try_new(directives)?,
                None => EnvFilter::new("warn"),
            });
        }
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = match rust_log {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::default(),
    };
    Ok(filter.add_directive(level.parse()?))
}

fn init_tracing(verbose: u8) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose, rust_log.as_deref())?)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Process exit code for a failed command.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.chain().find_map(|cause| cause.downcast_ref::<MapError>()) {
        Some(MapError::AccessDenied { .. } | MapError::DeviceUnavailable { .. }) => -2,
        Some(MapError::MapFailed { .. }) => -3,
        Some(MapError::UnmapFailed { .. } | MapError::CloseFailed { .. }) => -4,
        None => -1,
    }
}

fn meta(device: &DeviceArgs) -> Result<()> {
    let bridge = backend::open(device)?;
    println!(
        "Bridge window {:#x}, span {:#x}{}",
        device.base,
        device.span(),
        if device.sim { " (simulated)" } else { "" }
    );
    report::print_registers(&bridge)?;

    let busy = bridge.busy_flags()?;
    let valid = bridge.valid_flags()?;
    println!("Busy cores:  {:?}", busy.iter_set().collect::<Vec<_>>());
    println!("Valid cores: {:?}", valid.iter_set().collect::<Vec<_>>());
    backend::release(bridge)
}

#[cfg(feature = "reset_command")]
fn reset(device: &DeviceArgs, core: usize) -> Result<()> {
    let mut bridge = backend::open(device)?;
    let status = bridge.reset_core(core)?;
    println!("Reset core {core}: {status:?}");
    backend::release(bridge)
}

fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Meta { device } => meta(&device),
        Commands::Run {
            device,
            poll,
            x,
            y,
            max_iterations,
            core,
        } => run::run_single(&device, &poll, core, &x, &y, max_iterations),
        Commands::Batch {
            device,
            poll,
            points,
            core,
        } => run::run_batch(&device, &poll, core, &points),
        Commands::Verify {
            device,
            poll,
            points,
            core,
            reference_only,
        } => run::run_verify(&device, &poll, core, &points, reference_only),
        Commands::Dump { device, out } => snapshot::dump(&device, &out),
        Commands::Inspect { from } => snapshot::inspect(&from),
        #[cfg(feature = "reset_command")]
        Commands::Reset { device, core } => reset(&device, core),
    }
}

fn main() {
    let cli = Cli::parse();
    let outcome = init_tracing(cli.verbose).and_then(|()| execute(cli.command));
    if let Err(err) = outcome {
        eprintln!("Error: {err:#}");
        process::exit(exit_code(&err));
    }
}
