//! Command Dispatcher
//!
//! Writes one command line at a time to the agent and waits for the reply the reader task routes
//! back, bounded by the command's timeout.
use crate::channel::{read_loop, CommandId, LineBuffer, PendingQueue};
use crate::error::CommandError;
use chatload_core::AgentCommand;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn, Instrument};

/// Something commands can be issued to.
///
/// Callers await each command before issuing the next one; the protocol has no request
/// identifiers, so at most one command is ever live.
#[allow(async_fn_in_trait)]
pub trait CommandIssuer {
    /// Send `text` and wait up to `timeout` for its reply.
    async fn issue(&mut self, text: &str, timeout: Duration) -> Result<String, CommandError>;

    /// Issue a protocol command with its default timeout.
    async fn send(&mut self, command: AgentCommand) -> Result<String, CommandError> {
        self.issue(&command.to_string(), command.timeout()).await
    }
}

/// Issues commands over the write half of a control channel and awaits their replies.
///
/// Owns the reader task for the other half; dropping the dispatcher stops it.
pub struct Dispatcher<W> {
    writer: W,
    pending: PendingQueue,
    next_id: CommandId,
    reader: JoinHandle<()>,
}

impl<W> Dispatcher<W>
where
    W: AsyncWrite + Unpin,
{
    /// Start routing replies from `reader` and return a dispatcher writing to `writer`.
    ///
    /// `buffer` holds any bytes already read from `reader`.
    pub fn open<R>(
        reader: R,
        writer: W,
        buffer: LineBuffer,
        progress: Option<mpsc::UnboundedSender<String>>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pending = PendingQueue::default();
        let reader = tokio::spawn(
            read_loop(reader, buffer, pending.clone(), progress).in_current_span(),
        );
        Self {
            writer,
            pending,
            next_id: 0,
            reader,
        }
    }

    /// Commands still waiting for a reply, including ones whose issuer timed out.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    async fn write_line(&mut self, text: &str) -> Result<(), CommandError> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl<W> CommandIssuer for Dispatcher<W>
where
    W: AsyncWrite + Unpin,
{
    async fn issue(&mut self, text: &str, timeout: Duration) -> Result<String, CommandError> {
        let id = self.next_id;
        self.next_id += 1;

        let reply = self.pending.push(id, text)?;
        debug!(id, command = text, "Issuing command");

        #[cfg(feature = "metrics")]
        metrics::counter!("chatload.command.issued").increment(1);

        let start = Instant::now();
        let exchange = async {
            self.write_line(text).await?;
            reply.await.map_err(|_| CommandError::ChannelClosed {
                command: text.to_string(),
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(reply)) => {
                trace!(id, elapsed = ?start.elapsed(), "Command answered");

                #[cfg(feature = "metrics")]
                metrics::histogram!("chatload.command.latency")
                    .record(start.elapsed().as_secs_f64());

                Ok(reply)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                // The slot stays queued; a late reply is consumed by it and discarded.
                warn!(id, command = text, "No reply within {timeout:?}");

                #[cfg(feature = "metrics")]
                metrics::counter!("chatload.command.timeout").increment(1);

                Err(CommandError::Timeout {
                    command: text.to_string(),
                    timeout,
                })
            }
        }
    }
}

impl<W> Drop for Dispatcher<W> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
