mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;

    use chatload::prelude::*;
    use chatload_core::PercentileMap;
    use mock_agent::LatencyModel;
    use std::time::Duration;

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<(String, f64)>) -> Vec<(String, f64)> {
        let mut records = vec![];
        while let Ok(record) = rx.try_recv() {
            records.push(record);
        }
        records
    }

    #[tokio::test(start_paused = true)]
    async fn sample_count_follows_duration_and_interval() {
        init();

        let agent = connect(LatencyModel::new(0.05, 1_000.), None);
        let (sink, mut rx) = ChannelSink::new();
        let params = TestParameters::new(50, 5, 10., Duration::from_secs(30))
            .stat_interval(Duration::from_secs(5))
            .warmup("2:3,4:3".parse().unwrap());

        let mut orchestrator = Orchestrator::new(agent, sink, params);
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.outcome, MeasureOutcome::CompletedNormally);
        assert_eq!(report.samples.len(), 6);

        let records = drain(&mut rx);
        assert_eq!(records.len(), 7);
        let elapsed: Vec<_> = records.iter().map(|(_, secs)| *secs).collect();
        assert_eq!(elapsed, vec![5., 10., 15., 20., 25., 30., 30.]);

        // Warmup traffic plus thirty seconds at the target rate, nothing after RATE 0.
        assert!(report.final_sample.raw.starts_with("sent=318 "), "{}", report.final_sample.raw);
        assert!(
            report.summary.starts_with("sent=318 users=50 rooms=5 peak_rate=10"),
            "{}",
            report.summary
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sink_sees_every_stats_line_verbatim() {
        init();

        let agent = connect(LatencyModel::new(0.05, 1_000.), None);
        let (sink, mut rx) = ChannelSink::new();
        let params = TestParameters::new(1, 1, 5., Duration::from_secs(10))
            .stat_interval(Duration::from_secs(5));

        let report = Orchestrator::new(agent, sink, params).run().await.unwrap();

        let lines: Vec<_> = drain(&mut rx).into_iter().map(|(line, _)| line).collect();
        let mut expected: Vec<_> = report.samples.iter().map(|s| s.raw.clone()).collect();
        expected.push(report.final_sample.raw.clone());
        assert_eq!(lines, expected);

        for line in &lines {
            let percentiles = PercentileMap::parse(line);
            assert_eq!(percentiles.len(), 6, "{line}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overload_aborts_after_streak() {
        init();

        // Latency stays within the threshold until the rate passes capacity.
        let agent = connect(LatencyModel::new(0.5, 20.), None);
        let (sink, mut rx) = ChannelSink::new();
        let params = TestParameters::new(10, 2, 40., Duration::from_secs(3600))
            .stat_interval(Duration::from_secs(5))
            .warmup("10:10,20:10".parse().unwrap());

        let report = Orchestrator::new(agent, sink, params).run().await.unwrap();

        assert_eq!(report.outcome, MeasureOutcome::AbortedOnLatency);
        assert_eq!(report.samples.len(), 6);
        assert_eq!(report.samples.last().unwrap().elapsed, 30.);
        // Samples keep flowing to the sink through winddown.
        assert_eq!(drain(&mut rx).len(), 7);
        assert!(report.summary.contains("peak_rate=40"));
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_rate_runs_full_duration() {
        init();

        let agent = connect(LatencyModel::new(0.5, 20.), None);
        let params = TestParameters::new(10, 2, 20., Duration::from_secs(60))
            .stat_interval(Duration::from_secs(5));

        let report = Orchestrator::new(agent, ChannelSink::new().0, params)
            .run()
            .await
            .unwrap();

        assert_eq!(report.outcome, MeasureOutcome::CompletedNormally);
        assert_eq!(report.samples.len(), 12);
    }
}
