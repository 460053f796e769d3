// Tests here assert on logs through `traced_test`, which owns the global subscriber.
mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;

    use chatload::error::CommandError;
    use chatload::prelude::*;
    use mock_agent::LatencyModel;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tracing_test::traced_test;

    #[tokio::test]
    async fn replies_resolve_in_issue_order() {
        let (observer, mut progress) = tokio::sync::mpsc::unbounded_channel();
        let mut agent = connect(LatencyModel::default(), Some(observer));

        assert_eq!(agent.send(AgentCommand::MkUsers(40)).await.unwrap(), "40");
        assert_eq!(agent.send(AgentCommand::MkRooms(4)).await.unwrap(), "4");
        assert_eq!(agent.send(AgentCommand::Rate(12.5)).await.unwrap(), "12.5");
        assert!(agent.send(AgentCommand::Stats).await.unwrap().starts_with("sent="));
        assert_eq!(agent.pending(), 0);

        let mut updates = vec![];
        while let Ok(update) = progress.try_recv() {
            updates.push(update);
        }
        assert_eq!(
            updates,
            vec![
                "created 10/40 users",
                "created 20/40 users",
                "created 30/40 users",
                "created 40/40 users"
            ]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn unknown_reply_verb_does_not_resolve_command() {
        let mut agent = connect(LatencyModel::default(), None);

        let res = agent.issue("JUMP", Duration::from_millis(100)).await;
        assert!(matches!(res, Err(CommandError::Timeout { .. })));
        assert!(logs_contain("Unrecognized agent message `ERR`"));

        // The timed-out slot is still queued, so the next reply is discarded with it.
        assert_eq!(agent.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn late_reply_lands_in_stale_slot() {
        let (client, server) = duplex(1024);

        // Answers the first command after 20s, the rest immediately.
        tokio::spawn(async move {
            let (rx, mut tx) = tokio::io::split(server);
            let mut lines = BufReader::new(rx).lines();
            let mut first = true;
            while let Ok(Some(line)) = lines.next_line().await {
                if first {
                    tokio::time::sleep(Duration::from_secs(20)).await;
                    first = false;
                }
                let reply = format!("OK {line}\n");
                if tx.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let (rx, tx) = tokio::io::split(client);
        let mut agent = Dispatcher::open(rx, tx, chatload::channel::LineBuffer::new(), None);

        let res = agent.send(AgentCommand::Stats).await;
        assert!(matches!(
            res,
            Err(CommandError::Timeout { ref command, .. }) if command == "STATS"
        ));

        let reply = agent.send(AgentCommand::MkRooms(3)).await.unwrap();
        assert_eq!(reply, "MKROOMS 3");
        assert_eq!(agent.pending(), 0);
        assert!(logs_contain("Discarding late reply to a timed-out command"));
    }

    #[tokio::test]
    #[ntest::timeout(5_000)]
    async fn agent_disconnect_fails_fast() {
        let (client, server) = duplex(1024);
        let (rx, tx) = tokio::io::split(client);
        let mut agent = Dispatcher::open(rx, tx, chatload::channel::LineBuffer::new(), None);

        drop(server);

        let res = agent.issue("STATS", Duration::from_secs(3600)).await;
        assert!(matches!(
            res,
            Err(CommandError::ChannelClosed { .. }) | Err(CommandError::Write(_))
        ));
    }
}
