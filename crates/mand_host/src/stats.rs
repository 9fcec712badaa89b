//! Latency statistics of batch runs.
//!
//! Every computation of a batch is timed from the start command to the
//! result read. The summary shows minimum, average and maximum service time
//! and a histogram in 10 microsecond buckets.

use std::fmt;
use std::time::Duration;

const BUCKETS: usize = 20;
const BUCKET_NS: u64 = 10_000;

/// Service times of a series of computations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyStats {
    pub min: u64,
    pub max: u64,
    pub sum: u64,
    pub count: u64,
    /// Counts per 10 us bucket. The last bucket also holds everything slower.
    pub buckets: [u64; BUCKETS],
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            min: u64::MAX,
            max: 0,
            sum: 0,
            count: 0,
            buckets: [0; BUCKETS],
        }
    }

    /// Records one service time in nanoseconds.
    pub fn update(&mut self, nanos: u64) {
        self.min = self.min.min(nanos);
        self.max = self.max.max(nanos);
        self.sum = self.sum.saturating_add(nanos);
        self.count += 1;

        let idx = (nanos / BUCKET_NS).min(BUCKETS as u64 - 1) as usize;
        self.buckets[idx] += 1;
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.update(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Average service time in nanoseconds, zero when nothing was recorded.
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Latency Metrics (Service Time)")?;
        writeln!(f, "Count: {}", self.count)?;
        if self.count == 0 {
            return Ok(());
        }

        let avg_ns = self.avg();
        let (scale, unit) = if avg_ns < 1000.0 { (1.0, "ns") } else { (1000.0, "us") };
        writeln!(f, "Min:   {:.2} {unit}", self.min as f64 / scale)?;
        writeln!(f, "Avg:   {:.2} {unit}", avg_ns / scale)?;
        writeln!(f, "Max:   {:.2} {unit}", self.max as f64 / scale)?;

        writeln!(f, "Distribution (10us buckets):")?;
        for (i, &count) in self.buckets.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let lower = i as u64 * BUCKET_NS / 1000;
            let upper = (i as u64 + 1) * BUCKET_NS / 1000;
            let open = if i == BUCKETS - 1 { ">" } else { "" };
            writeln!(f, "[{lower:3}-{upper:3}{open} us]: {count}")?;
        }
        Ok(())
    }
}
