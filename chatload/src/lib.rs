#![cfg_attr(docsrs, feature(doc_cfg))]
//! Drive a chat cluster load test through a remote traffic agent.
//!
//! The agent is a child process speaking a line protocol over its stdin/stdout. A run provisions
//! users and rooms, ramps traffic through an optional warmup schedule, holds the target rate while
//! sampling latency, and winds down once the duration elapses or latency stays above the threshold
//! for too long.

pub mod agent;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod sink;

pub(crate) mod controllers;
pub(crate) mod timer;

pub use agent::{AgentSpec, Launcher};
pub use orchestrator::{MeasureOutcome, Orchestrator, Phase, RunReport};
pub use session::run_session;

pub mod prelude {
    pub use crate::agent::{AgentSpec, Launcher};
    pub use crate::dispatcher::{CommandIssuer, Dispatcher};
    pub use crate::error::RunError;
    pub use crate::orchestrator::{MeasureOutcome, Orchestrator, RunReport};
    pub use crate::session::run_session;
    pub use crate::sink::{ChannelSink, OutputSink, TracingSink};

    pub use chatload_core::{AgentCommand, TestParameters, WarmupSchedule};
}
