//! Line-framed control channel.
//!
//! The agent's output is read in arbitrary chunks; complete lines are split off a [`LineBuffer`]
//! and routed by verb. `OK` replies resolve the oldest pending command, `PROGRESS` lines are only
//! displayed, and anything else is logged and skipped.
use crate::error::CommandError;
use chatload_core::AgentMessage;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

pub(crate) const READ_CHUNK_SIZE: usize = 4096;

pub(crate) type CommandId = u64;

/// Byte buffer that yields complete newline-terminated lines and keeps any trailing fragment
/// for the next read.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Bytes of an incomplete line waiting for its newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

struct PendingSlot {
    id: CommandId,
    command: String,
    reply: oneshot::Sender<String>,
}

#[derive(Default)]
struct QueueState {
    slots: VecDeque<PendingSlot>,
    closed: bool,
}

/// Outcome of routing one `OK` line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    Delivered { id: CommandId, command: String },
    /// The issuer already gave up on this command.
    Stale { id: CommandId, command: String },
    Unmatched,
}

/// Unresolved commands in issue order.
///
/// Replies carry no identifier; the agent answers strictly in order, so each `OK` belongs to the
/// front of the queue.
#[derive(Clone, Default)]
pub(crate) struct PendingQueue {
    state: Arc<Mutex<QueueState>>,
}

impl PendingQueue {
    pub fn push(
        &self,
        id: CommandId,
        command: &str,
    ) -> Result<oneshot::Receiver<String>, CommandError> {
        let mut state = self.state.lock()?;
        if state.closed {
            return Err(CommandError::ChannelClosed {
                command: command.to_string(),
            });
        }

        let (tx, rx) = oneshot::channel();
        state.slots.push_back(PendingSlot {
            id,
            command: command.to_string(),
            reply: tx,
        });
        Ok(rx)
    }

    pub fn resolve_oldest(&self, reply: String) -> Result<Resolution, CommandError> {
        let slot = self.state.lock()?.slots.pop_front();
        let Some(PendingSlot { id, command, reply: tx }) = slot else {
            return Ok(Resolution::Unmatched);
        };

        match tx.send(reply) {
            Ok(()) => Ok(Resolution::Delivered { id, command }),
            Err(_) => Ok(Resolution::Stale { id, command }),
        }
    }

    /// Drop every pending slot and refuse new ones. Returns how many slots were dropped.
    pub fn close(&self) -> Result<usize, CommandError> {
        let mut state = self.state.lock()?;
        state.closed = true;
        let dropped = state.slots.len();
        state.slots.clear();
        Ok(dropped)
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.slots.len()).unwrap_or(0)
    }
}

/// Read agent output until end-of-stream, routing every complete line.
///
/// `buffer` may already hold bytes read during the bootstrap handshake.
pub(crate) async fn read_loop<R>(
    mut reader: R,
    mut buffer: LineBuffer,
    pending: PendingQueue,
    progress: Option<mpsc::UnboundedSender<String>>,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    'read: loop {
        while let Some(line) = buffer.next_line() {
            if let Err(err) = route(&line, &pending, progress.as_ref()) {
                error!("Control channel failure: {err}");
                break 'read;
            }
        }

        match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("Agent closed its control stream");
                break;
            }
            Ok(n) => buffer.extend(&chunk[..n]),
            Err(err) => {
                error!("Failed reading from agent: {err}");
                break;
            }
        }
    }

    if buffer.pending() > 0 {
        warn!(
            "Discarding {} bytes of unterminated agent output",
            buffer.pending()
        );
    }

    match pending.close() {
        Ok(0) => {}
        Ok(dropped) => warn!("Control channel closed with {dropped} command(s) unanswered"),
        Err(err) => error!("{err}"),
    }
}

fn route(
    line: &str,
    pending: &PendingQueue,
    progress: Option<&mpsc::UnboundedSender<String>>,
) -> Result<(), CommandError> {
    trace!("agent> {line}");
    match AgentMessage::parse(line) {
        AgentMessage::Reply(reply) => match pending.resolve_oldest(reply)? {
            Resolution::Delivered { id, command } => {
                trace!(id, %command, "Reply delivered");
            }
            Resolution::Stale { id, command } => {
                debug!(id, %command, "Discarding late reply to a timed-out command");
            }
            Resolution::Unmatched => {
                debug!("Dropping reply with no pending command");
            }
        },
        AgentMessage::Progress(text) => {
            info!(target: "chatload::progress", "{text}");
            if let Some(tx) = progress {
                // Observer may have gone away; progress is display-only.
                let _ = tx.send(text);
            }
        }
        AgentMessage::Unknown { verb, rest } => {
            warn!("Unrecognized agent message `{verb}`: {rest}");
        }
    }
    Ok(())
}
