//! A fake traffic agent speaking the chatload line protocol.
//!
//! Nothing is actually sent anywhere: message counts are derived from the configured rate and
//! latencies come from a [`LatencyModel`].
use chatload_core::{PROGRESS_VERB, REPLY_VERB};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, LogNormal, NormalError};
use std::fmt::Write as _;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Percentiles reported by `STATS`.
pub const REPORTED_PERCENTILES: [u32; 6] = [10, 25, 50, 75, 90, 99];

const PROVISION_STEPS: u32 = 4;

/// Latency of the simulated cluster as a function of offered rate.
#[derive(Debug, Clone)]
pub struct LatencyModel {
    base: f64,
    capacity: f64,
    jitter: Option<LogNormal<f64>>,
}

impl LatencyModel {
    /// `base` is the median latency in seconds while the rate stays within `capacity` msg/s.
    pub fn new(base: f64, capacity: f64) -> Self {
        Self {
            base,
            capacity,
            jitter: None,
        }
    }

    /// Multiply every reading by log-normal noise with the given shape.
    pub fn with_jitter(mut self, sigma: f64) -> Result<Self, NormalError> {
        self.jitter = Some(LogNormal::new(0., sigma)?);
        Ok(self)
    }

    /// Noise-free latency for `percentile` at `rate`.
    pub fn expected(&self, percentile: u32, rate: f64) -> f64 {
        let spread = 0.5 + f64::from(percentile) / 100.;
        let overload = if self.capacity > 0. && rate > self.capacity {
            (rate / self.capacity).powi(4)
        } else {
            1.
        };
        self.base * spread * overload
    }

    fn sample(&self, percentile: u32, rate: f64, rng: &mut SmallRng) -> f64 {
        let latency = self.expected(percentile, rate);
        match &self.jitter {
            Some(noise) => latency * noise.sample(rng),
            None => latency,
        }
    }
}

impl Default for LatencyModel {
    fn default() -> Self {
        Self::new(0.05, 100.)
    }
}

/// Simulated traffic state.
#[derive(Debug)]
struct Agent {
    model: LatencyModel,
    rng: SmallRng,
    users: u32,
    rooms: u32,
    rate: f64,
    peak_rate: f64,
    /// Messages accounted for up to `since`.
    sent: f64,
    since: Instant,
}

impl Agent {
    fn new(model: LatencyModel, rng: SmallRng) -> Self {
        Self {
            model,
            rng,
            users: 0,
            rooms: 0,
            rate: 0.,
            peak_rate: 0.,
            sent: 0.,
            since: Instant::now(),
        }
    }

    fn sent(&mut self) -> u64 {
        let now = Instant::now();
        self.sent += self.rate * (now - self.since).as_secs_f64();
        self.since = now;
        self.sent as u64
    }

    fn set_rate(&mut self, rate: f64) {
        self.sent();
        self.rate = rate;
        self.peak_rate = self.peak_rate.max(rate);
    }

    /// Reply lines for one command, the final one answering it.
    fn handle(&mut self, line: &str) -> Vec<String> {
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb, Some(arg.trim())),
            None => (line, None),
        };

        match (verb, arg) {
            ("MKUSERS", Some(arg)) => match arg.parse::<u32>() {
                Ok(n) => {
                    let mut lines: Vec<_> = (1..=PROVISION_STEPS)
                        .map(|step| {
                            let done = n * step / PROVISION_STEPS;
                            format!("{PROGRESS_VERB} created {done}/{n} users")
                        })
                        .collect();
                    self.users = n;
                    lines.push(format!("{REPLY_VERB} {n}"));
                    lines
                }
                Err(_) => vec![bad_argument(line)],
            },
            ("MKROOMS", Some(arg)) => match arg.parse::<u32>() {
                Ok(n) => {
                    self.rooms = n;
                    vec![format!("{REPLY_VERB} {n}")]
                }
                Err(_) => vec![bad_argument(line)],
            },
            ("RATE", Some(arg)) => match arg.parse::<f64>() {
                Ok(rate) if rate.is_finite() && rate >= 0. => {
                    self.set_rate(rate);
                    vec![format!("{REPLY_VERB} {rate}")]
                }
                _ => vec![bad_argument(line)],
            },
            ("STATS", None) => vec![format!("{REPLY_VERB} {}", self.stats())],
            ("ALLSTATS", None) => vec![format!("{REPLY_VERB} {}", self.summary())],
            _ => {
                warn!("Unknown command `{line}`");
                vec!["ERR unknown command".to_string()]
            }
        }
    }

    fn stats(&mut self) -> String {
        let mut out = format!("sent={}", self.sent());
        for p in REPORTED_PERCENTILES {
            let latency = self.model.sample(p, self.rate, &mut self.rng);
            let _ = write!(out, " p{p}={latency:.4}");
        }
        out
    }

    fn summary(&mut self) -> String {
        let mut out = format!(
            "sent={} users={} rooms={} peak_rate={}",
            self.sent(),
            self.users,
            self.rooms,
            self.peak_rate
        );
        for p in [50, 99] {
            let _ = write!(out, " p{p}={:.4}", self.model.expected(p, self.peak_rate));
        }
        out
    }
}

fn bad_argument(line: &str) -> String {
    warn!("Bad argument in `{line}`");
    "ERR bad argument".to_string()
}

/// Answer commands read from `reader` until it closes.
///
/// `seed` fixes the jitter sequence; `None` seeds from entropy.
pub async fn serve<R, W>(
    mut reader: R,
    mut writer: W,
    model: LatencyModel,
    seed: Option<u64>,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let rng = match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    };
    let mut agent = Agent::new(model, rng);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            debug!("Command stream closed");
            return Ok(());
        }

        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        debug!("Received `{command}`");

        for reply in agent.handle(command) {
            writer.write_all(reply.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
    }
}

/// Consume the bootstrap program text up to `terminator`, returning how many lines were skipped.
pub async fn skip_program<R>(reader: &mut R, terminator: &str) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let mut skipped = 0;
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input closed before the program terminator",
            ));
        }
        if line.trim_end_matches(['\r', '\n']) == terminator {
            return Ok(skipped);
        }
        skipped += 1;
    }
}
