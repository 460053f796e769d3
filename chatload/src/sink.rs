//! Output Sink
//!
//! Receives every `STATS` line together with the seconds elapsed since measurement started.
//! Sinks are observers: a failing sink is logged and the run carries on.
use crate::error::SinkError;
use tokio::sync::mpsc;
use tracing::info;

pub trait OutputSink {
    fn record(&mut self, line: &str, elapsed: f64) -> Result<(), SinkError>;
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn record(&mut self, line: &str, elapsed: f64) -> Result<(), SinkError> {
        (**self).record(line, elapsed)
    }
}

/// Logs each sample.
#[derive(Debug, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn record(&mut self, line: &str, elapsed: f64) -> Result<(), SinkError> {
        info!(target: "chatload::sample", "[{elapsed:>7.1}s] {line}");
        Ok(())
    }
}

/// Forwards samples over a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(String, f64)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, f64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn record(&mut self, line: &str, elapsed: f64) -> Result<(), SinkError> {
        self.tx
            .send((line.to_string(), elapsed))
            .map_err(|_| SinkError("sample receiver dropped".to_string()))
    }
}
