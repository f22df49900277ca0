// ABOUTME: Container host plane: the per-container supervisor agent and its in-process client
// ABOUTME: Spawns the agent under container credentials, waits for readiness, proxies process runs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capabilities::{Credential, JobObject};
use crate::error::{ContainerError, Result};
use crate::process::{ProcessHandle, ProcessRunSpec, ProcessRunner, StreamKind};

/// Line the host agent prints on stdout once it is ready to serve.
pub const READY_LINE: &str = "palisade-host ready";

/// In-process handle to a running container host.
#[async_trait]
pub trait ContainerHostClient: Send + Sync {
    /// Runs a process inside the container through the host.
    async fn run_process(&self, spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>>;

    /// Shuts the host down; outstanding work is terminated.
    async fn shutdown(&self) -> Result<()>;
}

/// Starts container hosts.
#[async_trait]
pub trait ContainerHostService: Send + Sync {
    async fn start_host(
        &self,
        container_id: &str,
        directory: &Path,
        job_object: Arc<dyn JobObject>,
        credential: &Credential,
    ) -> Result<Arc<dyn ContainerHostClient>>;
}

/// Host service backed by the `palisade-host` agent binary.
///
/// The agent is launched under the container credential with the container
/// root as its working directory, assigned to the container's job object,
/// and considered up once it prints [`READY_LINE`].
pub struct AgentHostService {
    runner: Arc<dyn ProcessRunner>,
    agent_executable: PathBuf,
    startup_timeout: Duration,
}

impl AgentHostService {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        agent_executable: impl Into<PathBuf>,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            agent_executable: agent_executable.into(),
            startup_timeout,
        }
    }
}

#[async_trait]
impl ContainerHostService for AgentHostService {
    async fn start_host(
        &self,
        container_id: &str,
        directory: &Path,
        job_object: Arc<dyn JobObject>,
        credential: &Credential,
    ) -> Result<Arc<dyn ContainerHostClient>> {
        info!(container_id, "starting container host");

        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        let mut spec = ProcessRunSpec::new(&self.agent_executable);
        spec.arguments = vec!["--container-id".into(), container_id.into()];
        spec.working_directory = Some(directory.to_path_buf());
        spec.credential = Some(credential.clone());
        spec.output = Some(output_tx);

        let agent = self
            .runner
            .run(spec)
            .await
            .map_err(|e| ContainerError::HostUnavailable(format!("agent launch failed: {e}")))?;

        job_object.assign(agent.id()).await?;

        let ready = tokio::time::timeout(self.startup_timeout, async {
            while let Some(event) = output_rx.recv().await {
                if event.stream == StreamKind::Stdout && event.line.trim() == READY_LINE {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        if !ready {
            warn!(container_id, "host agent never reported ready; killing it");
            let _ = agent.kill().await;
            return Err(ContainerError::HostUnavailable(format!(
                "container host for {container_id} did not report ready"
            )));
        }

        debug!(container_id, pid = agent.id(), "container host ready");
        Ok(Arc::new(AgentHostClient {
            container_id: container_id.to_string(),
            agent,
            runner: self.runner.clone(),
            credential: credential.clone(),
            directory: directory.to_path_buf(),
        }))
    }
}

/// Client side of a running agent: dispatches work under the container
/// credential with the container root as the default working directory.
pub struct AgentHostClient {
    container_id: String,
    agent: Arc<dyn ProcessHandle>,
    runner: Arc<dyn ProcessRunner>,
    credential: Credential,
    directory: PathBuf,
}

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[async_trait]
impl ContainerHostClient for AgentHostClient {
    async fn run_process(&self, mut spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>> {
        if self.agent.exit_code().await.is_some() {
            return Err(ContainerError::HostUnavailable(format!(
                "container host for {} has exited",
                self.container_id
            )));
        }
        if spec.credential.is_none() {
            spec.credential = Some(self.credential.clone());
        }
        if spec.working_directory.is_none() {
            spec.working_directory = Some(self.directory.clone());
        }
        self.runner.run(spec).await
    }

    async fn shutdown(&self) -> Result<()> {
        if self.agent.exit_code().await.is_some() {
            return Ok(());
        }
        info!(container_id = %self.container_id, "shutting down container host");
        // Closing stdin asks the agent to drain and exit on its own.
        let _ = self.agent.close_stdin().await;
        if tokio::time::timeout(SHUTDOWN_GRACE, self.agent.wait())
            .await
            .is_err()
        {
            warn!(container_id = %self.container_id, "host agent lingered; killing it");
            self.agent.kill().await?;
            let _ = self.agent.wait().await;
        }
        Ok(())
    }
}
