use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Fixed-rate ticker anchored at a start instant: ticks at `start + k * period` for `k >= 1`.
pub(crate) struct Timer {
    interval: Interval,
    interval_dur: Duration,
}

impl Timer {
    pub fn starting_at(start: Instant, interval_dur: Duration) -> Self {
        let mut interval = interval_at(start + interval_dur, interval_dur);
        // A slow reply drops the ticks it overran instead of firing them in a burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            interval_dur,
        }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", humantime::format_duration(self.interval_dur))
    }
}
