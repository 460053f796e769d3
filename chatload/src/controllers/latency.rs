use chatload_core::{PercentileMap, GUARDED_PERCENTILE};
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

/// Result of feeding one sample to the [`LatencyController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyVerdict {
    Pass,
    Fail { streak: u32 },
    /// The sample had no usable reading; the streak is left untouched.
    Missing,
    /// The streak reached its limit.
    Abort,
}

/// Tracks consecutive samples whose p10 latency exceeds a threshold.
#[derive(Debug)]
pub struct LatencyController {
    threshold: f64,
    limit: u32,
    streak: u32,
}

impl LatencyController {
    pub fn new(threshold: f64, limit: u32) -> Self {
        Self {
            threshold,
            limit,
            streak: 0,
        }
    }

    #[allow(unused)]
    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn analyze(&mut self, percentiles: &PercentileMap) -> LatencyVerdict {
        let reading = percentiles
            .get(GUARDED_PERCENTILE)
            .filter(|value| value.is_finite());

        let verdict = match reading {
            None => {
                warn!("Sample has no p{GUARDED_PERCENTILE} reading, failure streak unchanged");
                LatencyVerdict::Missing
            }
            Some(latency) if latency <= self.threshold => {
                if self.streak > 0 {
                    debug!("Latency recovered after {} slow sample(s)", self.streak);
                }
                self.streak = 0;
                LatencyVerdict::Pass
            }
            Some(latency) => {
                self.streak += 1;
                info!(
                    "p{GUARDED_PERCENTILE}={latency} above {} ({}/{})",
                    self.threshold, self.streak, self.limit
                );
                if self.streak >= self.limit {
                    LatencyVerdict::Abort
                } else {
                    LatencyVerdict::Fail {
                        streak: self.streak,
                    }
                }
            }
        };

        #[cfg(feature = "metrics")]
        {
            metrics::gauge!("chatload.failure_streak").set(self.streak as f64);
            if let Some(latency) = reading {
                metrics::histogram!("chatload.p10").record(latency);
            }
        }

        verdict
    }
}
