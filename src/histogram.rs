// Exact per-value latency tally with percentile queries, reported in µs.
use std::collections::BTreeMap;
use std::fmt;

const P99_TARGET_NS: u64 = 200_000;
const P999_TARGET_NS: u64 = 500_000;

#[derive(Debug, Default)]
pub struct LatencyHistogram {
    samples: BTreeMap<u64, u64>,
    total_count: u64,
    sum: u64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, latency_ns: u64) {
        *self.samples.entry(latency_ns).or_insert(0) += 1;
        self.total_count += 1;
        self.sum += latency_ns;
    }

    pub fn count(&self) -> u64 {
        self.total_count
    }

    /// Latency at percentile `p` in `[0, 1]` (e.g. `0.99` for p99), in ns.
    pub fn percentile(&self, p: f64) -> u64 {
        if self.total_count == 0 {
            return 0;
        }
        let target_index = ((p * self.total_count as f64) as u64).min(self.total_count - 1);

        let mut cumulative = 0u64;
        for (&latency, &count) in &self.samples {
            cumulative += count;
            if cumulative > target_index {
                return latency;
            }
        }
        self.max()
    }

    pub fn min(&self) -> u64 {
        self.samples.keys().next().copied().unwrap_or(0)
    }

    pub fn max(&self) -> u64 {
        self.samples.keys().next_back().copied().unwrap_or(0)
    }

    pub fn mean(&self) -> u64 {
        if self.total_count == 0 {
            return 0;
        }
        self.sum / self.total_count
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.total_count = 0;
        self.sum = 0;
    }

    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.total_count,
            min_ns: self.min(),
            mean_ns: self.mean(),
            p50_ns: self.percentile(0.50),
            p90_ns: self.percentile(0.90),
            p99_ns: self.percentile(0.99),
            p999_ns: self.percentile(0.999),
            max_ns: self.max(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LatencySummary {
    pub count: u64,
    pub min_ns: u64,
    pub mean_ns: u64,
    pub p50_ns: u64,
    pub p90_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
    pub max_ns: u64,
}

fn us(ns: u64) -> f64 {
    ns as f64 / 1000.0
}

impl fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            return write!(f, "no latency samples recorded");
        }
        writeln!(f, "=== Latency Summary (n={}) ===", self.count)?;
        writeln!(f, "  min:  {:>10.2} us", us(self.min_ns))?;
        writeln!(f, "  mean: {:>10.2} us", us(self.mean_ns))?;
        writeln!(f, "  p50:  {:>10.2} us", us(self.p50_ns))?;
        writeln!(f, "  p90:  {:>10.2} us", us(self.p90_ns))?;
        writeln!(f, "  p99:  {:>10.2} us", us(self.p99_ns))?;
        writeln!(f, "  p999: {:>10.2} us", us(self.p999_ns))?;
        writeln!(f, "  max:  {:>10.2} us", us(self.max_ns))?;
        writeln!(
            f,
            "  p99 < {}us: {} ({:.2}us)",
            P99_TARGET_NS / 1000,
            if self.p99_ns < P99_TARGET_NS { "PASS" } else { "FAIL" },
            us(self.p99_ns)
        )?;
        write!(
            f,
            "  p999 < {}us: {} ({:.2}us)",
            P999_TARGET_NS / 1000,
            if self.p999_ns < P999_TARGET_NS { "PASS" } else { "FAIL" },
            us(self.p999_ns)
        )
    }
}
