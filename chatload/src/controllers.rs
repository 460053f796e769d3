mod latency;

pub use latency::{LatencyController, LatencyVerdict};
