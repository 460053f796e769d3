use chatload::channel::LineBuffer;
use chatload::dispatcher::Dispatcher;
use mock_agent::LatencyModel;
use std::sync::OnceLock;
use tokio::io::{duplex, BufReader, DuplexStream, WriteHalf};
use tracing_subscriber::FmtSubscriber;

pub type MockDispatcher = Dispatcher<WriteHalf<DuplexStream>>;

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let _ = FmtSubscriber::builder()
            .with_env_filter("chatload=debug,mock_agent=debug")
            .with_test_writer()
            .try_init();
    });
}

/// Serve a mock agent in-process and return a dispatcher connected to it.
#[allow(unused)]
pub fn connect(
    model: LatencyModel,
    progress: Option<tokio::sync::mpsc::UnboundedSender<String>>,
) -> MockDispatcher {
    let (client, server) = duplex(4096);

    let (server_rx, server_tx) = tokio::io::split(server);
    tokio::spawn(async move {
        if let Err(err) = mock_agent::serve(BufReader::new(server_rx), server_tx, model, Some(42)).await {
            tracing::error!("Mock agent failed: {err}");
        }
    });

    let (client_rx, client_tx) = tokio::io::split(client);
    Dispatcher::open(client_rx, client_tx, LineBuffer::new(), progress)
}
