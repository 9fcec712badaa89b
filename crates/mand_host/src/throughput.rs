//! Iteration throughput of the cluster and of the software reference.
//!
//! Throughput is reported in Mitt/s, millions of mandelbrot iterations per
//! second.

use std::time::{Duration, Instant};

use mand_core::mandelbrot::{CoordFormat, escape_iterations};
use mand_io::parser::Point;
use rayon::prelude::*;

pub fn iterations_per_second(iterations: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds == 0.0 {
        0.0
    } else {
        iterations as f64 / seconds
    }
}

/// Millions of iterations per second.
pub fn mitt_per_second(iterations: u64, elapsed: Duration) -> f64 {
    iterations_per_second(iterations, elapsed) / 1e6
}

/// Escape-time counts of `points`, computed in parallel.
pub fn reference_counts(points: &[Point], format: CoordFormat) -> Vec<u64> {
    points
        .par_iter()
        .map(|p| escape_iterations(p.x, p.y, format, p.max_iterations))
        .collect()
}

/// Runs the software reference over `points` and prints its throughput.
pub fn run_reference(points: &[Point], format: CoordFormat) -> Vec<u64> {
    println!("Computing {} reference points (Parallel - Rayon)...", points.len());
    let start = Instant::now();
    let counts = reference_counts(points, format);
    let elapsed = start.elapsed();

    let iterations: u64 = counts.iter().sum();
    println!("Time: {:.4} s", elapsed.as_secs_f64());
    println!(
        "Throughput: {:.3} Mitt/s",
        mitt_per_second(iterations, elapsed)
    );
    counts
}
