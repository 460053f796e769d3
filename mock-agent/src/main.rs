use anyhow::{Context, Result};
use chatload_core::{AGENT_READY_MARKER, AGENT_TERMINATOR};
use clap::Parser;
use mock_agent::{serve, skip_program, LatencyModel};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(version = "0.1", about = "Fake chatload traffic agent")]
struct MockAgentCli {
    /// Median latency in seconds below capacity
    #[arg(long, default_value_t = 0.05)]
    base_latency: f64,

    /// Rate (msg/s) above which latency blows up
    #[arg(long, default_value_t = 100.)]
    capacity: f64,

    /// Shape of the log-normal noise applied to each reading
    #[arg(long)]
    jitter: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value = AGENT_TERMINATOR)]
    terminator: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // stdout carries the protocol, so diagnostics go to stderr.
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mock_agent=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = MockAgentCli::parse();
    let mut model = LatencyModel::new(args.base_latency, args.capacity);
    if let Some(sigma) = args.jitter {
        model = model.with_jitter(sigma).context("invalid jitter")?;
    }

    let mut stdin = BufReader::new(tokio::io::stdin());
    let skipped = skip_program(&mut stdin, &args.terminator)
        .await
        .context("reading agent program")?;
    info!("Ignoring {skipped} lines of agent program");

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("{AGENT_READY_MARKER}\n").as_bytes())
        .await?;
    stdout.flush().await?;

    serve(stdin, stdout, model, args.seed).await?;
    info!("Shutting down");
    Ok(())
}
