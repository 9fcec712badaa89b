//! Computations on the cluster: single points, batches and verification
//! against the software reference.

use std::path::Path;
use std::time::Instant;

use anyhow::{Result, bail};
use mand_core::bridge::{CoreParams, CoreRun};
use mand_core::layout::LayoutVersion;
use mand_core::mandelbrot::{CoordFormat, escape_iterations};
use mand_core::poll::Poller;
use mand_core::sim::SimConfig;
use mand_hw::{MonotonicClock, SleepDelay};
use mand_io::parser::{Point, load_points_file, parse_fixed};
use tracing::{debug, warn};

use crate::backend::{self, DeviceArgs, HostBridge, PollArgs};
use crate::stats::LatencyStats;
use crate::throughput::{mitt_per_second, run_reference};

type HostPoller = Poller<'static, MonotonicClock, SleepDelay>;

/// Fixed-point format of the loaded bitstream.
fn cluster_format(bridge: &HostBridge) -> Result<CoordFormat> {
    let meta = bridge.read_metadata()?;
    debug!(?meta, "cluster metadata");
    Ok(meta.coord_format()?)
}

/// Fixed-point format of the reference build of `version`, for runs
/// without a cluster.
pub fn default_format(version: LayoutVersion) -> Result<CoordFormat> {
    let config = SimConfig::new(version);
    Ok(CoordFormat::from_sizes(
        config.fixed_size,
        config.fixed_integer_size,
    )?)
}

fn run_point(
    bridge: &mut HostBridge,
    core: usize,
    point: &Point,
    poller: &mut HostPoller,
) -> Result<CoreRun> {
    let params = CoreParams {
        x: point.x,
        y: point.y,
        max_iterations: point.max_iterations,
    };
    let run = bridge.run_core(core, &params, poller)?;
    if !run.result.valid {
        warn!(core, "core finished without a valid result");
    }
    Ok(run)
}

/// `run`: one point, start to result.
pub fn run_single(
    device: &DeviceArgs,
    poll: &PollArgs,
    core: usize,
    x: &str,
    y: &str,
    max_iterations: u64,
) -> Result<()> {
    let mut bridge = backend::open(device)?;
    let format = cluster_format(&bridge)?;
    let point = Point {
        x: parse_fixed(x, format)?,
        y: parse_fixed(y, format)?,
        max_iterations,
    };

    let mut poller = poll.poller();
    let start = Instant::now();
    let run = run_point(&mut bridge, core, &point, &mut poller)?;
    let elapsed = start.elapsed();

    println!("Core:        {core}");
    println!("Result:      {}", run.result.result);
    println!("Busy:        {}", run.result.busy);
    println!("Valid:       {}", run.result.valid);
    println!("Polls:       {}", run.poll.polls);
    println!("Elapsed:     {:?}", elapsed);
    println!(
        "Throughput:  {:.3} Mitt/s",
        mitt_per_second(run.result.result, elapsed)
    );
    println!(
        "Reference:   {}",
        escape_iterations(point.x, point.y, format, max_iterations)
    );

    backend::release(bridge)
}

/// `batch`: every point of a file on one core, with latency statistics.
pub fn run_batch(device: &DeviceArgs, poll: &PollArgs, core: usize, points: &Path) -> Result<()> {
    let mut bridge = backend::open(device)?;
    let format = cluster_format(&bridge)?;
    let points = load_points_file(points, format)?;
    println!("Loaded {} points.", points.len());

    let mut poller = poll.poller();
    let mut stats = LatencyStats::new();
    let mut iterations = 0u64;
    let start = Instant::now();
    for point in &points {
        let started = Instant::now();
        let run = run_point(&mut bridge, core, point, &mut poller)?;
        stats.record(started.elapsed());
        iterations += run.result.result;
    }
    let elapsed = start.elapsed();

    println!("Time: {:.4} s", elapsed.as_secs_f64());
    println!(
        "Throughput: {:.3} Mitt/s",
        mitt_per_second(iterations, elapsed)
    );
    println!("\n{stats}");

    backend::release(bridge)
}

/// `verify`: compare the cluster with the software reference.
pub fn run_verify(
    device: &DeviceArgs,
    poll: &PollArgs,
    core: usize,
    points: &Path,
    reference_only: bool,
) -> Result<()> {
    if reference_only {
        let format = default_format(device.layout)?;
        let points = load_points_file(points, format)?;
        for (point, count) in points.iter().zip(run_reference(&points, format)) {
            println!(
                "{:.9} {:.9} -> {count}",
                format.to_f64(point.x),
                format.to_f64(point.y)
            );
        }
        return Ok(());
    }

    let mut bridge = backend::open(device)?;
    let format = cluster_format(&bridge)?;
    let points = load_points_file(points, format)?;
    let expected = run_reference(&points, format);

    let mut poller = poll.poller();
    let mut mismatches = 0usize;
    for (index, (point, &want)) in points.iter().zip(&expected).enumerate() {
        let run = run_point(&mut bridge, core, point, &mut poller)?;
        let got = run.result.result;
        if got != want || !run.result.valid {
            mismatches += 1;
            println!(
                "Mismatch at point {index}: cluster {got} (valid {}), reference {want}",
                run.result.valid
            );
        }
    }

    backend::release(bridge)?;
    println!("Verified: {}/{}", points.len() - mismatches, points.len());
    if mismatches > 0 {
        bail!("{mismatches} of {} points differ from the reference", points.len());
    }
    Ok(())
}
