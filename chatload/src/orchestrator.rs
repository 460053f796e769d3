//! Test Orchestrator
//!
//! Drives one run through provisioning, warmup, measurement and winddown. Every command is awaited
//! before the next one is issued.
use crate::controllers::{LatencyController, LatencyVerdict};
use crate::dispatcher::CommandIssuer;
use crate::error::RunError;
use crate::sink::OutputSink;
use crate::timer::Timer;
use chatload_core::{AgentCommand, ConfigError, StatsSample, TestParameters};
use tokio::time::{sleep, sleep_until, Instant};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

mod phase;

pub use phase::{MeasureOutcome, Phase, RunReport};

struct Measurement {
    start: Instant,
    outcome: MeasureOutcome,
    samples: Vec<StatsSample>,
}

pub struct Orchestrator<A, S> {
    agent: A,
    sink: S,
    params: TestParameters,
    phases: Vec<Phase>,
}

impl<A, S> Orchestrator<A, S>
where
    A: CommandIssuer,
    S: OutputSink,
{
    pub fn new(agent: A, sink: S, params: TestParameters) -> Self {
        Self {
            agent,
            sink,
            params,
            phases: vec![Phase::Init],
        }
    }

    pub fn phase(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::Init)
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Drive the run to completion. Parameters are validated first, so nothing is issued for an
    /// invalid configuration.
    #[instrument(name = "run", skip_all, fields(users = self.params.users, rooms = self.params.rooms, rate = self.params.rate))]
    pub async fn run(&mut self) -> Result<RunReport, RunError> {
        self.params.validate()?;

        self.enter(Phase::ProvisioningUsers);
        self.agent
            .send(AgentCommand::MkUsers(self.params.users))
            .await?;

        self.enter(Phase::ProvisioningRooms);
        self.agent
            .send(AgentCommand::MkRooms(self.params.rooms))
            .await?;

        self.enter(Phase::Warmup);
        self.warmup().await?;

        self.enter(Phase::Measure);
        let Measurement {
            start,
            outcome,
            samples,
        } = self.measure().await?;

        if outcome == MeasureOutcome::AbortedOnLatency {
            warn!(
                "Stopping measurement after {:.1}s: p10 latency above {} for {} consecutive samples",
                start.elapsed().as_secs_f64(),
                self.params.latency_threshold,
                self.params.abort_streak,
            );
        }

        self.enter(Phase::Winddown);
        let (final_sample, summary) = self.winddown(start).await?;

        self.enter(Phase::Done);
        Ok(RunReport {
            outcome,
            samples,
            final_sample,
            summary,
            phases: self.phases.clone(),
        })
    }

    fn enter(&mut self, phase: Phase) {
        info!("Entering {phase}");
        self.phases.push(phase);
    }

    #[instrument(name = "phase", skip_all, fields(phase = %Phase::Warmup))]
    async fn warmup(&mut self) -> Result<(), RunError> {
        if self.params.warmup.is_empty() {
            debug!("No warmup schedule");
        }

        for step in self.params.warmup.steps() {
            info!("Warming up at {step}");
            self.agent.send(AgentCommand::Rate(step.rate)).await?;
            sleep(step.duration).await;
        }
        Ok(())
    }

    /// Hold the target rate until the duration elapses or latency trips the controller.
    ///
    /// A sample due at the deadline is still taken. Once the deadline has passed, a tick that
    /// came due while a slow `STATS` was in flight ends the measurement instead.
    #[instrument(name = "phase", skip_all, fields(phase = %Phase::Measure))]
    async fn measure(&mut self) -> Result<Measurement, RunError> {
        self.agent.send(AgentCommand::Rate(self.params.rate)).await?;

        let start = Instant::now();
        let deadline = start
            .checked_add(self.params.duration)
            .ok_or(ConfigError::TooLong("Test duration"))?;
        let mut timer = Timer::starting_at(start, self.params.stat_interval);
        let mut controller =
            LatencyController::new(self.params.latency_threshold, self.params.abort_streak);
        let mut samples = vec![];
        let mut idle_since = start;

        info!(
            "Measuring at {} msg/s for {}, sampling every {timer}",
            self.params.rate,
            humantime::format_duration(self.params.duration),
        );

        let outcome = loop {
            tokio::select! {
                biased;
                due = timer.tick() => {
                    // A tick overrun by the previous STATS reply only counts before the deadline.
                    let overrun = due < idle_since;
                    if due > deadline || (overrun && Instant::now() > deadline) {
                        break MeasureOutcome::CompletedNormally;
                    }
                }
                _ = sleep_until(deadline) => break MeasureOutcome::CompletedNormally,
            }

            let sample = self.sample(start).await?;
            idle_since = Instant::now();
            let verdict = controller.analyze(&sample.percentiles);
            samples.push(sample);

            if verdict == LatencyVerdict::Abort {
                break MeasureOutcome::AbortedOnLatency;
            }
        };

        debug!("Measurement finished with {outcome:?} after {} samples", samples.len());
        Ok(Measurement {
            start,
            outcome,
            samples,
        })
    }

    #[instrument(name = "phase", skip_all, fields(phase = %Phase::Winddown))]
    async fn winddown(&mut self, start: Instant) -> Result<(StatsSample, String), RunError> {
        self.agent.send(AgentCommand::Rate(0.)).await?;
        let final_sample = self.sample(start).await?;
        let summary = self.agent.send(AgentCommand::AllStats).await?;
        info!("Run summary: {summary}");
        Ok((final_sample, summary))
    }

    async fn sample(&mut self, start: Instant) -> Result<StatsSample, RunError> {
        let raw = self.agent.send(AgentCommand::Stats).await?;
        let sample = StatsSample::new(raw, start.elapsed().as_secs_f64());
        if let Err(err) = self.sink.record(&sample.raw, sample.elapsed) {
            warn!("{err}");
        }
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommandError, SinkError};
    use crate::sink::ChannelSink;
    use chatload_core::DEFAULT_COMMAND_TIMEOUT;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Records each command with the (virtual) time it was issued and answers from a script.
    #[derive(Default)]
    struct ScriptedAgent {
        start: Option<Instant>,
        log: Vec<(String, Duration)>,
        stats: VecDeque<String>,
        stats_delay: Duration,
        fail_on: Option<String>,
    }

    impl ScriptedAgent {
        fn with_stats<I: IntoIterator<Item = &'static str>>(stats: I) -> Self {
            Self {
                stats: stats.into_iter().map(String::from).collect(),
                ..Default::default()
            }
        }

        fn commands(&self) -> Vec<&str> {
            self.log.iter().map(|(c, _)| c.as_str()).collect()
        }

        fn count(&self, command: &str) -> usize {
            self.log.iter().filter(|(c, _)| c == command).count()
        }
    }

    impl CommandIssuer for ScriptedAgent {
        async fn issue(&mut self, text: &str, timeout: Duration) -> Result<String, CommandError> {
            let start = *self.start.get_or_insert_with(Instant::now);
            self.log.push((text.to_string(), start.elapsed()));

            if self.fail_on.as_deref() == Some(text) {
                tokio::time::sleep(timeout).await;
                return Err(CommandError::Timeout {
                    command: text.to_string(),
                    timeout,
                });
            }

            if text == "STATS" {
                tokio::time::sleep(self.stats_delay).await;
            }

            Ok(match text {
                "STATS" => self
                    .stats
                    .pop_front()
                    .unwrap_or_else(|| "p10=0.1 p50=0.2".to_string()),
                "ALLSTATS" => "sent=1000 p50=0.2".to_string(),
                _ => "done".to_string(),
            })
        }
    }

    struct BrokenSink;

    impl OutputSink for BrokenSink {
        fn record(&mut self, _line: &str, _elapsed: f64) -> Result<(), SinkError> {
            Err(SinkError("disk full".to_string()))
        }
    }

    fn params(duration: u64, interval: u64) -> TestParameters {
        TestParameters::new(100, 10, 20., Duration::from_secs(duration))
            .stat_interval(Duration::from_secs(interval))
    }

    #[tokio::test(start_paused = true)]
    async fn full_run_issues_expected_commands() {
        let (sink, mut rx) = ChannelSink::new();
        let mut orchestrator = Orchestrator::new(ScriptedAgent::default(), sink, params(10, 5));

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.outcome, MeasureOutcome::CompletedNormally);
        assert_eq!(report.samples.len(), 2);
        assert_eq!(report.summary, "sent=1000 p50=0.2");
        assert_eq!(
            orchestrator.agent().commands(),
            vec![
                "MKUSERS 100",
                "MKROOMS 10",
                "RATE 20",
                "STATS",
                "STATS",
                "RATE 0",
                "STATS",
                "ALLSTATS"
            ]
        );
        assert_eq!(orchestrator.agent().count("RATE 0"), 1);
        assert_eq!(
            report.phases,
            vec![
                Phase::Init,
                Phase::ProvisioningUsers,
                Phase::ProvisioningRooms,
                Phase::Warmup,
                Phase::Measure,
                Phase::Winddown,
                Phase::Done
            ]
        );
        assert_eq!(orchestrator.phase(), Phase::Done);

        // Periodic samples at 5s and 10s, the final one at the end of the measurement.
        let mut elapsed = vec![];
        while let Ok((_, secs)) = rx.try_recv() {
            elapsed.push(secs);
        }
        assert_eq!(elapsed, vec![5., 10., 10.]);
    }

    #[tokio::test(start_paused = true)]
    async fn warmup_follows_schedule_without_sampling() {
        let params = params(5, 5).warmup("1:5,3:2".parse().unwrap());
        let mut orchestrator = Orchestrator::new(ScriptedAgent::default(), ChannelSink::new().0, params);

        orchestrator.run().await.unwrap();

        let log = &orchestrator.agent().log;
        let warmup: Vec<_> = log
            .iter()
            .skip(2)
            .take_while(|(c, _)| c != "RATE 20")
            .cloned()
            .collect();
        assert_eq!(
            warmup,
            vec![
                ("RATE 1".to_string(), Duration::ZERO),
                ("RATE 3".to_string(), Duration::from_secs(5)),
            ]
        );

        // Measurement starts once the last step has been held.
        let (command, at) = &log[4];
        assert_eq!(command, "RATE 20");
        assert_eq!(*at, Duration::from_secs(7));

        // The first STATS comes a full interval into the measurement.
        let (command, at) = &log[5];
        assert_eq!(command, "STATS");
        assert_eq!(*at, Duration::from_secs(12));
    }

    fn issued_at(agent: &ScriptedAgent, command: &str) -> Duration {
        agent
            .log
            .iter()
            .find(|(c, _)| c == command)
            .map(|(_, at)| *at)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stats_do_not_outlive_duration() {
        let agent = ScriptedAgent {
            stats_delay: Duration::from_secs(6),
            ..Default::default()
        };
        let mut orchestrator = Orchestrator::new(agent, ChannelSink::new().0, params(10, 5));

        let report = tokio::time::timeout(Duration::from_secs(600), orchestrator.run())
            .await
            .expect("measurement never reached its deadline")
            .unwrap();

        assert_eq!(report.outcome, MeasureOutcome::CompletedNormally);
        // The 5s sample runs until 11s, so the tick due at 10s is past the deadline.
        assert_eq!(report.samples.len(), 1);
        let stopped = issued_at(orchestrator.agent(), "RATE 0");
        assert_eq!(stopped, Duration::from_secs(11));
        assert!(stopped <= Duration::from_secs(10) + DEFAULT_COMMAND_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn replies_within_interval_keep_every_sample() {
        let agent = ScriptedAgent {
            stats_delay: Duration::from_secs(4),
            ..Default::default()
        };
        let mut orchestrator = Orchestrator::new(agent, ChannelSink::new().0, params(10, 5));

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.samples.len(), 2);
        assert_eq!(issued_at(orchestrator.agent(), "RATE 0"), Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_latency_aborts_measurement() {
        let agent = ScriptedAgent::with_stats([
            "p10=1.5", "p10=0.9", "p10=1.2", "p10=1.3", "p10=1.4", "p10=1.5", "p10=1.6", "p10=1.7",
        ]);
        let mut orchestrator = Orchestrator::new(agent, ChannelSink::new().0, params(3600, 5));

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.outcome, MeasureOutcome::AbortedOnLatency);
        // One slow sample, one recovery, then six in a row.
        assert_eq!(report.samples.len(), 8);
        assert_eq!(report.samples.last().unwrap().elapsed, 40.);
        assert_eq!(orchestrator.agent().count("RATE 0"), 1);
        assert_eq!(orchestrator.agent().count("ALLSTATS"), 1);
        assert_eq!(report.phases.last(), Some(&Phase::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_readings_do_not_abort() {
        let agent = ScriptedAgent::with_stats([
            "p10=2", "p10=2", "p10=2", "p10=2", "p10=2", "sent=0", "p10=2",
        ]);
        let mut orchestrator = Orchestrator::new(agent, ChannelSink::new().0, params(35, 5));

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.outcome, MeasureOutcome::AbortedOnLatency);
        assert_eq!(report.samples.len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn five_slow_samples_complete_normally() {
        let agent = ScriptedAgent::with_stats(["p10=2"; 5]);
        let mut orchestrator = Orchestrator::new(agent, ChannelSink::new().0, params(25, 5));

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.outcome, MeasureOutcome::CompletedNormally);
        assert_eq!(report.samples.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn command_timeout_is_fatal() {
        let agent = ScriptedAgent {
            fail_on: Some("MKROOMS 10".to_string()),
            ..Default::default()
        };
        let mut orchestrator = Orchestrator::new(agent, ChannelSink::new().0, params(10, 5));

        let res = orchestrator.run().await;

        assert!(matches!(
            res,
            Err(RunError::Command(CommandError::Timeout { timeout, .. }))
                if timeout == Duration::from_secs(30)
        ));
        assert_eq!(orchestrator.phase(), Phase::ProvisioningRooms);
        assert_eq!(orchestrator.agent().commands(), vec!["MKUSERS 100", "MKROOMS 10"]);
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn sink_failures_are_not_fatal() {
        let mut orchestrator = Orchestrator::new(ScriptedAgent::default(), BrokenSink, params(10, 5));

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.outcome, MeasureOutcome::CompletedNormally);
        assert!(logs_contain("disk full"));
    }

    #[tokio::test]
    async fn invalid_parameters_issue_nothing() {
        let params = params(10, 0);
        let mut orchestrator = Orchestrator::new(ScriptedAgent::default(), ChannelSink::new().0, params);

        assert!(matches!(orchestrator.run().await, Err(RunError::Config(_))));
        assert!(orchestrator.agent().log.is_empty());
    }
}
