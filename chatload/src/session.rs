//! Session
//!
//! Launches the agent, runs the orchestrator against it and tears every spawned process down no
//! matter how the run ends.
use crate::agent::{AgentSpec, Launcher};
use crate::error::RunError;
use crate::orchestrator::{Orchestrator, RunReport};
use crate::sink::OutputSink;
use chatload_core::TestParameters;
use std::future::Future;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, warn};

/// Run one load test end to end.
///
/// `interrupt` resolving (e.g. on Ctrl-C) abandons the run with [`RunError::Interrupted`]. The
/// launcher's processes are shut down before returning in every case.
#[instrument(name = "session", skip_all, fields(program = %spec.program))]
pub async fn run_session<S, F>(
    launcher: &mut Launcher,
    spec: &AgentSpec,
    params: TestParameters,
    sink: S,
    interrupt: F,
) -> Result<RunReport, RunError>
where
    S: OutputSink,
    F: Future<Output = ()>,
{
    let res = tokio::select! {
        res = drive(launcher, spec, params, sink) => res,
        _ = interrupt => {
            warn!("Interrupted, stopping run");
            Err(RunError::Interrupted)
        }
    };

    if let Err(err) = &res {
        error!("Run failed: {err}");
    }

    launcher.shutdown_all().await;
    res
}

async fn drive<S: OutputSink>(
    launcher: &mut Launcher,
    spec: &AgentSpec,
    params: TestParameters,
    sink: S,
) -> Result<RunReport, RunError> {
    // Checked before launching so a bad configuration spawns nothing; `Orchestrator::run`
    // validates again for callers driving it directly.
    params.validate()?;

    let agent = launcher.launch(spec).await?;
    let mut orchestrator = Orchestrator::new(agent, sink, params);
    let report = orchestrator.run().await?;

    debug!("Run finished in phase {}", orchestrator.phase());
    Ok(report)
}
