use chatload_core::StatsSample;
use std::fmt;

/// States a run moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    ProvisioningUsers,
    ProvisioningRooms,
    Warmup,
    Measure,
    Winddown,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::ProvisioningUsers => "provisioning users",
            Phase::ProvisioningRooms => "provisioning rooms",
            Phase::Warmup => "warmup",
            Phase::Measure => "measure",
            Phase::Winddown => "winddown",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// How the measurement phase ended. Both outcomes proceed to winddown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureOutcome {
    /// The configured duration elapsed.
    CompletedNormally,
    /// Latency stayed above the threshold for the configured number of samples.
    AbortedOnLatency,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: MeasureOutcome,
    /// Periodic samples taken while measuring.
    pub samples: Vec<StatsSample>,
    /// Sample taken after traffic was stopped.
    pub final_sample: StatsSample,
    /// The agent's `ALLSTATS` reply.
    pub summary: String,
    pub phases: Vec<Phase>,
}
