use crate::constants::{
    DEFAULT_ABORT_STREAK, DEFAULT_LATENCY_THRESHOLD, DEFAULT_STAT_INTERVAL, MAX_PHASE_DURATION,
};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid warmup step `{0}`, expected `<rate>:<seconds>`")]
    WarmupSyntax(String),

    #[error("Invalid rate `{0}`, expected a finite non-negative number")]
    InvalidRate(String),

    #[error("Invalid duration `{0}`, expected a positive number of seconds")]
    InvalidSeconds(String),

    #[error("{0} must be positive")]
    NonPositive(&'static str),

    #[error("{0} exceeds {max}", max = humantime::format_duration(MAX_PHASE_DURATION))]
    TooLong(&'static str),

    #[error("Abort streak must be at least 1")]
    ZeroStreak,
}

/// One ramp step: hold `rate` for `duration` before moving on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarmupStep {
    pub rate: f64,
    pub duration: Duration,
}

impl fmt::Display for WarmupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} msg/s for {}",
            self.rate,
            humantime::format_duration(self.duration)
        )
    }
}

/// Ordered warmup ramp, executed strictly in the order given.
///
/// Parsed from `"<rate>:<seconds>,<rate>:<seconds>,..."`, e.g. `"1:5,3:2"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmupSchedule {
    steps: Vec<WarmupStep>,
}

impl WarmupSchedule {
    pub fn new(steps: Vec<WarmupStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[WarmupStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total time spent ramping.
    pub fn total(&self) -> Duration {
        self.steps.iter().map(|s| s.duration).sum()
    }
}

impl FromStr for WarmupSchedule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut steps = vec![];
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let (rate, secs) = item
                .split_once(':')
                .ok_or_else(|| ConfigError::WarmupSyntax(item.to_string()))?;

            let rate = parse_rate(rate.trim())?;
            let secs = secs.trim();
            let duration = secs
                .parse::<f64>()
                .ok()
                .filter(|s| *s > 0.)
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .ok_or_else(|| ConfigError::InvalidSeconds(secs.to_string()))?;

            steps.push(WarmupStep { rate, duration });
        }
        Ok(Self { steps })
    }
}

fn parse_rate(s: &str) -> Result<f64, ConfigError> {
    s.parse::<f64>()
        .ok()
        .filter(|r| r.is_finite() && *r >= 0.)
        .ok_or_else(|| ConfigError::InvalidRate(s.to_string()))
}

/// Everything needed to drive one load test run.
#[derive(Debug, Clone, PartialEq)]
pub struct TestParameters {
    pub users: u32,
    pub rooms: u32,
    /// Sustained message rate held during measurement.
    pub rate: f64,
    /// Length of the measurement phase.
    pub duration: Duration,
    pub stat_interval: Duration,
    pub warmup: WarmupSchedule,
    pub latency_threshold: f64,
    pub abort_streak: u32,
}

impl TestParameters {
    pub fn new(users: u32, rooms: u32, rate: f64, duration: Duration) -> Self {
        Self {
            users,
            rooms,
            rate,
            duration,
            stat_interval: DEFAULT_STAT_INTERVAL,
            warmup: WarmupSchedule::default(),
            latency_threshold: DEFAULT_LATENCY_THRESHOLD,
            abort_streak: DEFAULT_ABORT_STREAK,
        }
    }

    pub fn stat_interval(mut self, interval: Duration) -> Self {
        self.stat_interval = interval;
        self
    }

    pub fn warmup(mut self, warmup: WarmupSchedule) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn latency_threshold(mut self, threshold: f64) -> Self {
        self.latency_threshold = threshold;
        self
    }

    pub fn abort_streak(mut self, streak: u32) -> Self {
        self.abort_streak = streak;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rate.is_finite() && self.rate >= 0.) {
            return Err(ConfigError::InvalidRate(self.rate.to_string()));
        }
        if self.duration.is_zero() {
            return Err(ConfigError::NonPositive("Test duration"));
        }
        if self.duration > MAX_PHASE_DURATION {
            return Err(ConfigError::TooLong("Test duration"));
        }
        if self.stat_interval.is_zero() {
            return Err(ConfigError::NonPositive("Stat interval"));
        }
        if self.stat_interval > MAX_PHASE_DURATION {
            return Err(ConfigError::TooLong("Stat interval"));
        }
        if !(self.latency_threshold.is_finite() && self.latency_threshold > 0.) {
            return Err(ConfigError::NonPositive("Latency threshold"));
        }
        if self.abort_streak == 0 {
            return Err(ConfigError::ZeroStreak);
        }
        if self.warmup.steps().iter().any(|s| s.duration.is_zero()) {
            return Err(ConfigError::NonPositive("Warmup step duration"));
        }
        if self.warmup.steps().iter().any(|s| s.duration > MAX_PHASE_DURATION) {
            return Err(ConfigError::TooLong("Warmup step duration"));
        }
        Ok(())
    }
}
