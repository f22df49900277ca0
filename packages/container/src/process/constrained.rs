// ABOUTME: Process runner that tunnels every launch through the container host client
// ABOUTME: Tracks outstanding sessions so disposal can terminate whatever is still running

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ProcessHandle, ProcessRunSpec, ProcessRunner};
use crate::error::{ContainerError, Result};
use crate::host::ContainerHostClient;

/// Runner with the same contract as the local one, dispatching through the
/// per-container host so every process runs inside the container's
/// confinement.
pub struct ConstrainedProcessRunner {
    host: Arc<dyn ContainerHostClient>,
    sessions: Mutex<Vec<Arc<dyn ProcessHandle>>>,
}

impl ConstrainedProcessRunner {
    pub fn new(host: Arc<dyn ContainerHostClient>) -> Self {
        Self {
            host,
            sessions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ProcessRunner for ConstrainedProcessRunner {
    async fn run(&self, spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>> {
        let handle = self.host.run_process(spec).await?;

        let mut sessions = self.sessions.lock().await;
        // Prune sessions that already finished before tracking the new one.
        let mut live = Vec::with_capacity(sessions.len() + 1);
        for session in sessions.drain(..) {
            if session.exit_code().await.is_none() {
                live.push(session);
            }
        }
        live.push(handle.clone());
        *sessions = live;

        Ok(handle)
    }

    async fn stop_all(&self, _kill: bool) -> Result<()> {
        Err(ContainerError::Unimplemented(
            "ConstrainedProcessRunner::stop_all",
        ))
    }

    async fn find_by_id(&self, _id: u32) -> Result<Option<Arc<dyn ProcessHandle>>> {
        Err(ContainerError::Unimplemented(
            "ConstrainedProcessRunner::find_by_id",
        ))
    }

    async fn dispose(&self) -> Result<()> {
        let sessions: Vec<_> = self.sessions.lock().await.drain(..).collect();
        for session in sessions {
            if session.exit_code().await.is_none() {
                debug!(pid = session.id(), "terminating outstanding session");
                let _ = session.kill().await;
            }
        }
        Ok(())
    }
}
