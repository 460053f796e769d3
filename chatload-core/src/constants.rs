use std::time::Duration;

/// Interval between `STATS` polls while measuring.
pub const DEFAULT_STAT_INTERVAL: Duration = Duration::from_secs(5);

/// p10 latency above this value counts toward the failure streak.
pub const DEFAULT_LATENCY_THRESHOLD: f64 = 1.0;

/// Number of consecutive over-threshold samples that ends the measurement early.
pub const DEFAULT_ABORT_STREAK: u32 = 6;

/// The percentile watched by the latency controller.
pub const GUARDED_PERCENTILE: u32 = 10;

/// Upper bound accepted for the measurement duration, stat interval and warmup steps.
pub const MAX_PHASE_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
pub const MKUSERS_TIMEOUT: Duration = Duration::from_secs(50);
pub const MKROOMS_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a freshly launched agent has to print its readiness marker.
pub const AGENT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Line written after the agent program text to mark the end of the bootstrap.
pub const AGENT_TERMINATOR: &str = "__CHATLOAD_AGENT_END__";

/// Line printed by the agent once it is ready to take commands.
pub const AGENT_READY_MARKER: &str = "CHATLOAD_AGENT_READY";
