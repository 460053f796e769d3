use anyhow::{Context, Result};
use chatload::prelude::*;
use chatload_core::{
    AGENT_STARTUP_TIMEOUT, DEFAULT_ABORT_STREAK, DEFAULT_LATENCY_THRESHOLD, DEFAULT_STAT_INTERVAL,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Reads program text from stdin up to the terminator line and runs it.
const PYTHON_BOOTSTRAP: &str = r#"
import sys
lines = []
for line in sys.stdin:
    if line.rstrip("\r\n") == "__CHATLOAD_AGENT_END__":
        break
    lines.append(line)
exec(compile("".join(lines), "<agent>", "exec"))
"#;

#[derive(Parser, Debug)]
#[command(version = "0.1", about = "Load test a chat cluster through a remote traffic agent")]
struct ChatloadCli {
    /// Agent program sent to the interpreter on startup
    agent: PathBuf,

    /// Number of users to provision
    #[arg(short, long)]
    users: u32,

    /// Number of rooms to provision
    #[arg(short, long)]
    rooms: u32,

    /// Target message rate while measuring
    #[arg(long)]
    rate: f64,

    /// How long to hold the target rate (e.g. "90s", "5m")
    #[arg(short, long, value_parser = humantime::parse_duration)]
    duration: Duration,

    #[arg(long, default_value_t = DEFAULT_STAT_INTERVAL.into())]
    stat_interval: humantime::Duration,

    /// Warmup steps as "rate:secs,rate:secs"
    #[arg(short, long, default_value = "")]
    warmup: WarmupSchedule,

    /// p10 latency (seconds) above which a sample counts as a failure
    #[arg(long, default_value_t = DEFAULT_LATENCY_THRESHOLD)]
    threshold: f64,

    /// Consecutive failing samples that stop the measurement
    #[arg(long, default_value_t = DEFAULT_ABORT_STREAK)]
    streak: u32,

    /// Program that runs the agent
    #[arg(long, default_value = "python3")]
    interpreter: String,

    /// Extra interpreter argument, may be repeated
    #[arg(long = "interpreter-arg", allow_hyphen_values = true)]
    interpreter_args: Vec<String>,

    /// Pass only the given interpreter arguments, without the python bootstrap
    #[arg(long)]
    no_bootstrap: bool,

    #[arg(long, default_value_t = AGENT_STARTUP_TIMEOUT.into())]
    startup_timeout: humantime::Duration,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl ChatloadCli {
    fn params(&self) -> TestParameters {
        TestParameters::new(self.users, self.rooms, self.rate, self.duration)
            .stat_interval(*self.stat_interval)
            .warmup(self.warmup.clone())
            .latency_threshold(self.threshold)
            .abort_streak(self.streak)
    }

    fn spec(&self, source: String) -> AgentSpec {
        let mut args = self.interpreter_args.clone();
        if !self.no_bootstrap {
            args.extend(["-u".to_string(), "-c".to_string(), PYTHON_BOOTSTRAP.to_string()]);
        }

        AgentSpec::new(&self.interpreter, source)
            .args(args)
            .startup_timeout(*self.startup_timeout)
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chatload={level},mock_agent={level}")));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = ChatloadCli::parse();
    init_tracing(args.verbose);

    let source = std::fs::read_to_string(&args.agent)
        .with_context(|| format!("reading agent program {}", args.agent.display()))?;

    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    let mut launcher = Launcher::new();
    let report = run_session(
        &mut launcher,
        &args.spec(source),
        args.params(),
        TracingSink,
        interrupt,
    )
    .await
    .context("load test failed")?;

    info!(
        "Finished with {:?} after {} samples",
        report.outcome,
        report.samples.len()
    );
    println!("{}", report.final_sample.raw);
    println!("{}", report.summary);

    Ok(())
}
