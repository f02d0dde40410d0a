//! Prometheus metrics for the pool
//!
//! Lock-free counters, gauges and histograms rendered in the text
//! exposition format at `/metrics`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Histogram for wait-time measurements
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    /// Sum of observations in microseconds
    sum: AtomicU64,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Histogram {
    /// Buckets sized for barrier waits: milliseconds up to tens of seconds
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_buckets(
            name,
            help,
            vec![0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0],
        )
    }

    pub fn with_buckets(name: &'static str, help: &'static str, bounds: Vec<f64>) -> Self {
        let buckets = bounds
            .into_iter()
            .map(|b| (b, AtomicU64::new(0)))
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name,
            help,
        }
    }

    /// Observe a value in seconds
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value * 1_000_000.0) as u64, Ordering::Relaxed);

        for (bound, count) in &self.buckets {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn observe_duration(&self, elapsed: Duration) {
        self.observe(elapsed.as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );

        for (bound, count) in &self.buckets {
            let _ = writeln!(
                output,
                "{}_bucket{{le=\"{}\"}} {}",
                self.name,
                bound,
                count.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(output, "{}_bucket{{le=\"+Inf\"}} {}", self.name, self.count());

        let sum_secs = self.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(output, "{}_sum {}", self.name, sum_secs);
        let _ = writeln!(output, "{}_count {}", self.name, self.count());

        output
    }
}

/// Standard pool metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static ROUNDS_STARTED: Counter =
        Counter::new("racepool_rounds_started_total", "Rounds whose entry barrier opened");

    pub static ROUNDS_COMPLETED: Counter =
        Counter::new("racepool_rounds_completed_total", "Rounds whose exit barrier opened");

    pub static ROUNDS_EMPTY: Counter =
        Counter::new("racepool_rounds_empty_total", "Rounds nobody entered");

    pub static ROUNDS_FORCED: Counter =
        Counter::new("racepool_rounds_forced_total", "Rounds closed without a winner");

    pub static ANNOUNCES_ACCEPTED: Counter =
        Counter::new("racepool_announces_accepted_total", "Winning solutions accepted");

    pub static ANNOUNCES_STALE: Counter =
        Counter::new("racepool_announces_stale_total", "Late or mismatched solutions rejected");

    pub static LOGINS: Counter = Counter::new("racepool_logins_total", "Successful logins");

    pub static EVICTIONS: Counter =
        Counter::new("racepool_evictions_total", "Workers evicted for missing the entry barrier");

    pub static TEMPLATES_ISSUED: Counter =
        Counter::new("racepool_templates_issued_total", "Block templates received");

    pub static LOGGED_IN_WORKERS: Gauge =
        Gauge::new("racepool_logged_in_workers", "Workers currently in the registry");

    pub static CURRENT_ROUND: Gauge = Gauge::new("racepool_current_round", "Current round number");

    pub static ENTRY_BARRIER_WAIT: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("racepool_entry_barrier_wait_seconds", "Time spent collecting entrants")
    });

    pub static EXIT_BARRIER_WAIT: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("racepool_exit_barrier_wait_seconds", "Time spent collecting exits")
    });
}

/// Render every standard metric
pub fn gather_pool_metrics() -> String {
    let mut output = String::new();

    // Counters
    output.push_str(&standard::ROUNDS_STARTED.to_prometheus());
    output.push_str(&standard::ROUNDS_COMPLETED.to_prometheus());
    output.push_str(&standard::ROUNDS_EMPTY.to_prometheus());
    output.push_str(&standard::ROUNDS_FORCED.to_prometheus());
    output.push_str(&standard::ANNOUNCES_ACCEPTED.to_prometheus());
    output.push_str(&standard::ANNOUNCES_STALE.to_prometheus());
    output.push_str(&standard::LOGINS.to_prometheus());
    output.push_str(&standard::EVICTIONS.to_prometheus());
    output.push_str(&standard::TEMPLATES_ISSUED.to_prometheus());

    // Gauges
    output.push_str(&standard::LOGGED_IN_WORKERS.to_prometheus());
    output.push_str(&standard::CURRENT_ROUND.to_prometheus());

    // Histograms
    output.push_str(&standard::ENTRY_BARRIER_WAIT.to_prometheus());
    output.push_str(&standard::EXIT_BARRIER_WAIT.to_prometheus());

    output
}
