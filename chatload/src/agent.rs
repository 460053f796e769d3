//! Agent Launcher
//!
//! Starts the traffic agent as a child process, streams its program text over stdin and waits
//! for the readiness marker. The child's stdout becomes the control channel; its stderr is relayed
//! line by line as diagnostics.
use crate::channel::{LineBuffer, READ_CHUNK_SIZE};
use crate::dispatcher::Dispatcher;
use crate::error::LaunchError;
use chatload_core::{AGENT_READY_MARKER, AGENT_STARTUP_TIMEOUT, AGENT_TERMINATOR};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, Command};
use tokio::sync::mpsc;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

mod registry;

pub use registry::ProcessRegistry;

/// Dispatcher connected to a launched agent process.
pub type AgentDispatcher = Dispatcher<ChildStdin>;

/// How to start the agent and what to send it.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Executable started for the agent, e.g. an interpreter or a remote shell.
    pub program: String,
    pub args: Vec<String>,
    /// Agent program text written to the process's stdin.
    pub source: String,
    pub terminator: String,
    pub ready_marker: String,
    pub startup_timeout: Duration,
}

impl AgentSpec {
    pub fn new(program: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            source: source.into(),
            terminator: AGENT_TERMINATOR.to_string(),
            ready_marker: AGENT_READY_MARKER.to_string(),
            startup_timeout: AGENT_STARTUP_TIMEOUT,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    pub fn ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = marker.into();
        self
    }
}

/// Launches agents and owns every process it starts.
#[derive(Default)]
pub struct Launcher {
    registry: ProcessRegistry,
    progress: Option<mpsc::UnboundedSender<String>>,
}

impl Launcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward `PROGRESS` notifications of launched agents to `observer`.
    pub fn with_progress(mut self, observer: mpsc::UnboundedSender<String>) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn registry(&mut self) -> &mut ProcessRegistry {
        &mut self.registry
    }

    /// Spawn the agent, send its program and wait for it to report ready.
    ///
    /// On failure the process stays registered so [`Launcher::shutdown_all`] still reaps it.
    #[instrument(name = "launch", skip_all, fields(program = %spec.program))]
    pub async fn launch(&mut self, spec: &AgentSpec) -> Result<AgentDispatcher, LaunchError> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        self.registry.register("agent", child);

        let mut stdin = stdin.ok_or(LaunchError::MissingPipe("stdin"))?;
        let mut stdout = stdout.ok_or(LaunchError::MissingPipe("stdout"))?;
        let stderr = stderr.ok_or(LaunchError::MissingPipe("stderr"))?;

        tokio::spawn(relay_diagnostics(stderr).in_current_span());

        let bootstrap = bootstrap(&mut stdin, &mut stdout, spec);
        let buffer = match tokio::time::timeout(spec.startup_timeout, bootstrap).await {
            Ok(res) => res?,
            Err(_) => {
                error!("Agent not ready after {:?}", spec.startup_timeout);
                return Err(LaunchError::StartupTimeout {
                    timeout: spec.startup_timeout,
                });
            }
        };

        info!("Agent ready");
        Ok(Dispatcher::open(stdout, stdin, buffer, self.progress.clone()))
    }

    pub async fn shutdown_all(&mut self) {
        self.registry.shutdown_all().await;
    }
}

/// Write the program text and terminator, then read until the readiness marker.
///
/// Returns whatever was read past the marker so the control channel can pick it up.
pub(crate) async fn bootstrap<W, R>(
    writer: &mut W,
    reader: &mut R,
    spec: &AgentSpec,
) -> Result<LineBuffer, LaunchError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut program = spec.source.clone();
    if !program.is_empty() && !program.ends_with('\n') {
        program.push('\n');
    }
    program.push_str(&spec.terminator);
    program.push('\n');

    writer
        .write_all(program.as_bytes())
        .await
        .map_err(LaunchError::Bootstrap)?;
    writer.flush().await.map_err(LaunchError::Bootstrap)?;
    debug!("Sent {} bytes of agent program", spec.source.len());

    let mut buffer = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        while let Some(line) = buffer.next_line() {
            if line.trim() == spec.ready_marker {
                return Ok(buffer);
            }
            debug!("agent (starting)> {line}");
        }

        let n = reader
            .read(&mut chunk)
            .await
            .map_err(LaunchError::Bootstrap)?;
        if n == 0 {
            return Err(LaunchError::ExitedBeforeReady);
        }
        buffer.extend(&chunk[..n]);
    }
}

async fn relay_diagnostics(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "chatload::agent::stderr", "{line}"),
            Ok(None) => break,
            Err(err) => {
                debug!("Agent diagnostics stream failed: {err}");
                break;
            }
        }
    }
}
