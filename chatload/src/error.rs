use chatload_core::ConfigError;
use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to spawn agent `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Agent process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("Failed to send agent program: {0}")]
    Bootstrap(std::io::Error),

    #[error("Agent did not report ready within {timeout:?}")]
    StartupTimeout { timeout: Duration },

    #[error("Agent exited before reporting ready")]
    ExitedBeforeReady,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("No reply to `{command}` within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Failed to write command to agent: {0}")]
    Write(#[from] std::io::Error),

    #[error("Control channel closed before `{command}` was answered")]
    ChannelClosed { command: String },

    #[error("Pending command queue is poisoned")]
    PoisonedQueue,
}

impl<T> From<PoisonError<T>> for CommandError {
    fn from(_err: PoisonError<T>) -> Self {
        Self::PoisonedQueue
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid test parameters: {0}")]
    Config(#[from] ConfigError),

    #[error("Agent launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("Agent command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Run interrupted")]
    Interrupted,
}

/// Failure reported by an [`OutputSink`](crate::sink::OutputSink). Never fatal to a run.
#[derive(Debug, Error)]
#[error("Output sink failed: {0}")]
pub struct SinkError(pub String);
