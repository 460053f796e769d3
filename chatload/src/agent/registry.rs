use std::time::Duration;
use tokio::process::Child;
#[allow(unused)]
use tracing::{debug, error, info, warn};

const REAP_TIMEOUT: Duration = Duration::from_secs(5);

struct Registered {
    name: String,
    child: Child,
}

/// Every process spawned for a run, so teardown can terminate them from one place.
///
/// Children are also spawned with `kill_on_drop`, which covers paths that never reach
/// [`ProcessRegistry::shutdown_all`].
#[derive(Default)]
pub struct ProcessRegistry {
    children: Vec<Registered>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, child: Child) {
        let name = name.into();
        debug!(name, pid = ?child.id(), "Registered process");
        self.children.push(Registered { name, child });
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Terminate and reap every registered process that is still running.
    pub async fn shutdown_all(&mut self) {
        for Registered { name, mut child } in self.children.drain(..) {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(name, %status, "Process already exited");
                    continue;
                }
                Ok(None) => {}
                Err(err) => warn!(name, "Unable to query process state: {err}"),
            }

            if let Err(err) = child.start_kill() {
                warn!(name, "Failed to signal process: {err}");
                continue;
            }

            match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => info!(name, %status, "Process terminated"),
                Ok(Err(err)) => warn!(name, "Failed to reap process: {err}"),
                Err(_) => error!(name, "Process did not exit within {REAP_TIMEOUT:?}"),
            }
        }
    }
}
