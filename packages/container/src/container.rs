// ABOUTME: The container entity: aggregate of per-container state and owned subsystems
// ABOUTME: Exposes process execution, command dispatch, port reservation, and teardown

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::capabilities::{JobObject, QuotaControl, TcpPortManager};
use crate::commands::{CommandArgs, CommandRunner, TaskCommandResult};
use crate::directory::ContainerDirectory;
use crate::error::{ContainerError, Result};
use crate::host::ContainerHostClient;
use crate::process::{ProcessHandle, ProcessRunSpec, ProcessRunner};
use crate::properties::PropertyService;
use crate::user::ContainerUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Active,
    Destroying,
    Destroyed,
}

/// Point-in-time view of a container for listing surfaces.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub handle: String,
    pub state: ContainerState,
    pub root: PathBuf,
    pub reserved_ports: Vec<u16>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate of everything one container owns.
///
/// Created containers route execution through the constrained runner and
/// the host agent; restored ones fall back to the unconstrained runner for
/// both paths, a degraded but queryable mode.
pub struct Container {
    id: String,
    handle: String,
    user: ContainerUser,
    directory: ContainerDirectory,
    job_object: Arc<dyn JobObject>,
    host_client: Option<Arc<dyn ContainerHostClient>>,
    process_runner: Arc<dyn ProcessRunner>,
    constrained_runner: Arc<dyn ProcessRunner>,
    quota_control: Arc<dyn QuotaControl>,
    ports: Arc<dyn TcpPortManager>,
    reserved_ports: Mutex<Vec<u16>>,
    environment: HashMap<String, String>,
    properties: Arc<PropertyService>,
    commands: Arc<CommandRunner>,
    state: RwLock<ContainerState>,
    created_at: DateTime<Utc>,
}

pub(crate) struct ContainerParts {
    pub id: String,
    pub handle: String,
    pub user: ContainerUser,
    pub directory: ContainerDirectory,
    pub job_object: Arc<dyn JobObject>,
    pub host_client: Option<Arc<dyn ContainerHostClient>>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub constrained_runner: Arc<dyn ProcessRunner>,
    pub quota_control: Arc<dyn QuotaControl>,
    pub ports: Arc<dyn TcpPortManager>,
    pub environment: HashMap<String, String>,
    pub properties: Arc<PropertyService>,
    pub commands: Arc<CommandRunner>,
}

impl Container {
    pub(crate) fn assemble(parts: ContainerParts) -> Self {
        Self {
            id: parts.id,
            handle: parts.handle,
            user: parts.user,
            directory: parts.directory,
            job_object: parts.job_object,
            host_client: parts.host_client,
            process_runner: parts.process_runner,
            constrained_runner: parts.constrained_runner,
            quota_control: parts.quota_control,
            ports: parts.ports,
            reserved_ports: Mutex::new(Vec::new()),
            environment: parts.environment,
            properties: parts.properties,
            commands: parts.commands,
            state: RwLock::new(ContainerState::Active),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn user(&self) -> &ContainerUser {
        &self.user
    }

    pub fn directory(&self) -> &ContainerDirectory {
        &self.directory
    }

    pub fn quota_control(&self) -> &Arc<dyn QuotaControl> {
        &self.quota_control
    }

    pub fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub async fn state(&self) -> ContainerState {
        *self.state.read().await
    }

    pub async fn info(&self) -> ContainerInfo {
        ContainerInfo {
            id: self.id.clone(),
            handle: self.handle.clone(),
            state: self.state().await,
            root: self.directory.root().to_path_buf(),
            reserved_ports: self.reserved_ports.lock().await.clone(),
            created_at: self.created_at,
        }
    }

    async fn ensure_active(&self) -> Result<()> {
        match self.state().await {
            ContainerState::Active => Ok(()),
            state => Err(ContainerError::InvalidOperation(format!(
                "container {} is {state:?}",
                self.handle
            ))),
        }
    }

    /// Runs a process in the container. Privileged runs bypass the host
    /// agent and use the unconstrained runner.
    pub async fn run(
        &self,
        mut spec: ProcessRunSpec,
        privileged: bool,
    ) -> Result<Arc<dyn ProcessHandle>> {
        self.ensure_active().await?;
        if spec.environment.is_empty() && !self.environment.is_empty() {
            spec.environment = self.environment.clone();
        }
        let runner = if privileged {
            &self.process_runner
        } else {
            &self.constrained_runner
        };
        runner.run(spec).await
    }

    /// Dispatches a registered command verb against this container.
    pub async fn run_command(
        self: Arc<Self>,
        verb: &str,
        arguments: Vec<String>,
        privileged: bool,
    ) -> Result<TaskCommandResult> {
        self.ensure_active().await?;
        let mut args = CommandArgs::for_container(arguments, self.clone());
        args.privileged = privileged;
        self.commands.run(verb, args).await
    }

    /// Reserves a TCP port for this container; released again on destroy.
    pub async fn reserve_port(&self, port: u16) -> Result<u16> {
        self.ensure_active().await?;
        let bound = self.ports.reserve_port(&self.id, port).await?;
        self.reserved_ports.lock().await.push(bound);
        Ok(bound)
    }

    /// Reads one persisted property.
    pub async fn property(&self, key: &str) -> Result<Option<String>> {
        self.properties
            .get_property(&self.id, &self.directory, key)
            .await
    }

    /// Snapshot of the persisted property map.
    pub async fn all_properties(&self) -> Result<HashMap<String, String>> {
        self.properties.get_all(&self.id, &self.directory).await
    }

    /// Tears the container down in reverse creation order: host client,
    /// constrained runner, job object, reserved ports, directory, user.
    /// Destroy is monotonic; repeated calls are no-ops.
    pub async fn destroy(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != ContainerState::Active {
                return Ok(());
            }
            *state = ContainerState::Destroying;
        }
        info!(handle = %self.handle, id = %self.id, "destroying container");

        if let Some(host_client) = &self.host_client {
            host_client.shutdown().await?;
        }
        self.constrained_runner.dispose().await?;
        self.job_object.dispose().await?;

        let reserved: Vec<u16> = self.reserved_ports.lock().await.drain(..).collect();
        for port in reserved {
            if let Err(e) = self.ports.release_port(&self.id, port).await {
                warn!(port, error = %e, "failed to release reserved port");
            }
        }

        self.directory.destroy().await?;
        self.user.delete().await?;
        self.properties.forget(&self.id).await;

        *self.state.write().await = ContainerState::Destroyed;
        Ok(())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("root", &self.directory.root())
            .finish()
    }
}
