use std::time::Duration;

use tracing::debug;

/// Shortest reporting interval. Shorter intervals, including zero, are raised to this.
pub const MIN_REPORTING_INTERVAL: Duration = Duration::from_millis(1);

/// Raises `interval` to at least [`MIN_REPORTING_INTERVAL`].
#[inline]
pub fn clamp_interval(interval: Duration) -> Duration {
    interval.max(MIN_REPORTING_INTERVAL)
}

/// Phase of the output statistics estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsState {
    /// Ignoring the given number of remaining cycles while output settles.
    InitCycles(u32),
    /// The first interval has been computed; rates are not smoothed yet.
    InitInterval,
    /// Rates are a two-point moving average.
    Valid,
}

/// Running packets/bytes per second estimate of the telemetry output.
#[derive(Debug, Clone)]
pub struct OutputStats {
    state: StatsState,
    /// Length of one reporting interval.
    interval: Duration,

    elapsed: Duration,
    interval_pkts: u64,
    interval_bytes: u64,

    prev_pkts_per_sec: f64,
    prev_bytes_per_sec: f64,
    pkts_per_sec: f64,
    bytes_per_sec: f64,
}

impl OutputStats {
    /// Creates a new estimator that skips the cycles falling within `settle`.
    pub fn new(interval: Duration, settle: Duration) -> Self {
        let mut stats = Self {
            state: StatsState::InitCycles(1),
            interval: clamp_interval(interval),
            elapsed: Duration::ZERO,
            interval_pkts: 0,
            interval_bytes: 0,
            prev_pkts_per_sec: 0.0,
            prev_bytes_per_sec: 0.0,
            pkts_per_sec: 0.0,
            bytes_per_sec: 0.0,
        };
        stats.reset(None, settle);
        stats
    }

    /// Restarts estimation. `interval` replaces the reporting interval if given.
    pub fn reset(&mut self, interval: Option<Duration>, settle: Duration) {
        if let Some(interval) = interval {
            self.interval = clamp_interval(interval);
        }

        self.state = StatsState::InitCycles(init_cycles(self.interval, settle));
        self.elapsed = Duration::ZERO;
        self.interval_pkts = 0;
        self.interval_bytes = 0;
        self.prev_pkts_per_sec = 0.0;
        self.prev_bytes_per_sec = 0.0;
        self.pkts_per_sec = 0.0;
        self.bytes_per_sec = 0.0;
    }

    /// Feeds the output of one cycle. `delta` is the wall-clock time since the previous
    /// cycle.
    pub fn update(&mut self, pkts: u64, bytes: u64, delta: Duration) {
        if let StatsState::InitCycles(remaining) = self.state {
            if remaining > 0 {
                self.state = StatsState::InitCycles(remaining - 1);
                self.elapsed = Duration::ZERO;
                self.interval_pkts = 0;
                self.interval_bytes = 0;
                return;
            }
        }

        self.elapsed += delta;
        self.interval_pkts += pkts;
        self.interval_bytes += bytes;

        if self.elapsed < self.interval {
            return;
        }

        let secs = self.elapsed.as_secs_f64();
        let pkts_per_sec = self.interval_pkts as f64 / secs;
        let bytes_per_sec = self.interval_bytes as f64 / secs;

        debug!(
            secs,
            pkts = self.interval_pkts,
            bytes = self.interval_bytes,
            "Output stats interval complete"
        );

        match self.state {
            StatsState::InitCycles(_) => {
                self.state = StatsState::InitInterval;
                self.pkts_per_sec = pkts_per_sec;
                self.bytes_per_sec = bytes_per_sec;
            }
            StatsState::InitInterval | StatsState::Valid => {
                self.state = StatsState::Valid;
                self.pkts_per_sec = (pkts_per_sec + self.prev_pkts_per_sec) / 2.0;
                self.bytes_per_sec = (bytes_per_sec + self.prev_bytes_per_sec) / 2.0;
            }
        }

        self.prev_pkts_per_sec = self.pkts_per_sec;
        self.prev_bytes_per_sec = self.bytes_per_sec;

        self.elapsed = Duration::ZERO;
        self.interval_pkts = 0;
        self.interval_bytes = 0;
    }

    #[inline]
    pub fn state(&self) -> StatsState {
        self.state
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.state == StatsState::Valid
    }

    /// Smoothed packets per second.
    #[inline]
    pub fn pkts_per_sec(&self) -> f64 {
        self.pkts_per_sec
    }

    /// Smoothed bytes per second.
    #[inline]
    pub fn bytes_per_sec(&self) -> f64 {
        self.bytes_per_sec
    }
}

/// Number of cycles to skip so that at least `settle` passes before computing rates.
/// Always at least one.
fn init_cycles(interval: Duration, settle: Duration) -> u32 {
    if interval >= settle {
        return 1;
    }

    let cycles = settle.as_nanos().div_ceil(interval.as_nanos().max(1));
    u32::try_from(cycles).unwrap_or(u32::MAX).max(1)
}
