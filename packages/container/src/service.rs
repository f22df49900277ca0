// ABOUTME: Container service: transactional create/destroy/restore and the handle registry
// ABOUTME: Each creation step pushes its compensator; failures roll back in LIFO order

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::capabilities::{
    FileSystemManager, JobObjectManager, LocalFileSystem, QuotaManager, TcpPortManager,
    UserManager,
};
use crate::commands::{CommandRunner, TaskCommandResult};
use crate::container::{Container, ContainerParts};
use crate::directory::{BindMount, ContainerDirectory};
use crate::error::{ContainerError, Result};
use crate::handle::{generate_handle, generate_id};
use crate::host::{AgentHostService, ContainerHostService};
use crate::process::{ConstrainedProcessRunner, LocalProcessRunner, ProcessRunner};
use crate::properties::PropertyService;
use crate::settings::ContainerServiceSettings;
use crate::undo::UndoStack;
use crate::user::ContainerUser;

/// Caller-supplied description of the container to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub handle: Option<String>,
    pub bind_mounts: Vec<BindMount>,
    pub properties: HashMap<String, String>,
    pub environment: HashMap<String, String>,
}

/// The capability set the service is wired with. Platform bindings supply
/// the user, job-object, quota, and port capabilities; filesystem, process
/// runner, and host service have portable defaults.
#[derive(Clone)]
pub struct HostCapabilities {
    pub users: Arc<dyn UserManager>,
    pub filesystem: Arc<dyn FileSystemManager>,
    pub job_objects: Arc<dyn JobObjectManager>,
    pub quotas: Arc<dyn QuotaManager>,
    pub ports: Arc<dyn TcpPortManager>,
    pub host_service: Arc<dyn ContainerHostService>,
    pub process_runner: Arc<dyn ProcessRunner>,
}

/// Platform-bound capabilities that have no portable default.
#[derive(Clone)]
pub struct PlatformCapabilities {
    pub users: Arc<dyn UserManager>,
    pub job_objects: Arc<dyn JobObjectManager>,
    pub quotas: Arc<dyn QuotaManager>,
    pub ports: Arc<dyn TcpPortManager>,
}

/// Creates, destroys, restores, and indexes containers.
///
/// The registry maps case-folded handles to live containers and is guarded
/// by a single mutex held only across registry mutation points; the slow
/// resource work of create and destroy happens outside the lock.
pub struct ContainerService {
    settings: ContainerServiceSettings,
    capabilities: HostCapabilities,
    properties: Arc<PropertyService>,
    commands: Arc<CommandRunner>,
    registry: Mutex<HashMap<String, Arc<Container>>>,
}

impl ContainerService {
    pub fn new(settings: ContainerServiceSettings, capabilities: HostCapabilities) -> Self {
        Self {
            settings,
            capabilities,
            properties: Arc::new(PropertyService::new()),
            commands: Arc::new(CommandRunner::new()),
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Assembles the portable production defaults around the platform-bound
    /// capability set: local filesystem, credential-aware local process
    /// runner, and the agent-backed host service.
    pub fn with_defaults(
        settings: ContainerServiceSettings,
        platform: PlatformCapabilities,
    ) -> Self {
        let process_runner: Arc<dyn ProcessRunner> =
            Arc::new(LocalProcessRunner::with_user_manager(platform.users.clone()));
        let host_service: Arc<dyn ContainerHostService> = Arc::new(AgentHostService::new(
            process_runner.clone(),
            settings.host_agent_path.clone(),
            settings.host_startup_timeout(),
        ));
        let capabilities = HostCapabilities {
            users: platform.users,
            filesystem: Arc::new(LocalFileSystem::new()),
            job_objects: platform.job_objects,
            quotas: platform.quotas,
            ports: platform.ports,
            host_service,
            process_runner,
        };
        Self::new(settings, capabilities)
    }

    pub fn settings(&self) -> &ContainerServiceSettings {
        &self.settings
    }

    /// The verb registry shared by every container this service owns.
    pub fn commands(&self) -> &Arc<CommandRunner> {
        &self.commands
    }

    /// Creates a container, rolling every step back on failure.
    ///
    /// Returns the ready container, or the triggering error (wrapped in an
    /// aggregate when compensating actions failed too). No partial host
    /// state survives a failed create.
    pub async fn create_container(&self, spec: ContainerSpec) -> Result<Arc<Container>> {
        let handle = spec
            .handle
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .unwrap_or_else(generate_handle);
        let id = generate_id(&handle);
        let key = handle.to_lowercase();
        info!(%handle, %id, "creating container");

        if self.registry.lock().await.contains_key(&key) {
            return Err(ContainerError::ResourceExists(format!(
                "container handle {handle} is already in use"
            )));
        }

        let mut undo = UndoStack::new();
        let container = match self.build_container(&handle, &id, &spec, &mut undo).await {
            Ok(container) => container,
            Err(e) => {
                error!(%handle, error = %e, "container creation failed; rolling back");
                return Err(undo.undo_all(e).await);
            }
        };

        {
            let mut registry = self.registry.lock().await;
            if registry.contains_key(&key) {
                drop(registry);
                let trigger = ContainerError::ResourceExists(format!(
                    "container handle {handle} was registered concurrently"
                ));
                return Err(undo.undo_all(trigger).await);
            }
            registry.insert(key, container.clone());
        }
        undo.commit();
        info!(%handle, %id, "container ready");
        Ok(container)
    }

    async fn build_container(
        &self,
        handle: &str,
        id: &str,
        spec: &ContainerSpec,
        undo: &mut UndoStack,
    ) -> Result<Arc<Container>> {
        let user = ContainerUser::create(
            self.capabilities.users.clone(),
            id,
            self.settings.container_group.as_deref(),
        )
        .await?;
        {
            let user = user.clone();
            undo.push("delete user", async move { user.delete().await });
        }

        let directory = ContainerDirectory::new(
            self.capabilities.filesystem.clone(),
            self.settings.container_base_dir.join(id),
            &self.settings.service_account,
        );
        directory.create_subdirectories(&user).await?;
        {
            let directory = directory.clone();
            undo.push("destroy directory", async move { directory.destroy().await });
        }

        // Bind mounts live inside the directory; its compensator covers them.
        directory.create_bind_mounts(&spec.bind_mounts, &user).await?;

        let job_object = self.capabilities.job_objects.create_job_object(id).await?;
        {
            let job_object = job_object.clone();
            undo.push("dispose job object", async move { job_object.dispose().await });
        }

        let credential = user.credential().cloned().ok_or_else(|| {
            ContainerError::InvalidOperation(format!("user {id} has no credential material"))
        })?;
        let host_client = self
            .capabilities
            .host_service
            .start_host(id, directory.root(), job_object.clone(), &credential)
            .await?;
        {
            let host_client = host_client.clone();
            undo.push("shutdown host client", async move { host_client.shutdown().await });
        }

        let constrained_runner: Arc<dyn ProcessRunner> =
            Arc::new(ConstrainedProcessRunner::new(host_client.clone()));
        {
            let constrained_runner = constrained_runner.clone();
            undo.push("dispose constrained runner", async move {
                constrained_runner.dispose().await
            });
        }

        let quota_control = self
            .capabilities
            .quotas
            .create_quota_control(&directory.volume())
            .await?;
        if let Some(bytes) = self.settings.default_quota_bytes {
            quota_control.set_limit(bytes).await?;
        }

        let container = Arc::new(Container::assemble(ContainerParts {
            id: id.to_string(),
            handle: handle.to_string(),
            user,
            directory,
            job_object,
            host_client: Some(host_client),
            process_runner: self.capabilities.process_runner.clone(),
            constrained_runner,
            quota_control,
            ports: self.capabilities.ports.clone(),
            environment: spec.environment.clone(),
            properties: self.properties.clone(),
            commands: self.commands.clone(),
        }));

        self.properties
            .set_properties(id, container.directory(), &spec.properties)
            .await?;

        Ok(container)
    }

    /// Destroys the container registered under `handle`. Unknown handles
    /// are a no-op.
    pub async fn destroy_container(&self, handle: &str) -> Result<()> {
        let key = handle.to_lowercase();
        let container = self.registry.lock().await.remove(&key);
        match container {
            Some(container) => container.destroy().await,
            None => {
                warn!(handle, "destroy requested for unknown handle");
                Ok(())
            }
        }
    }

    /// Destroys every live container; used on daemon shutdown.
    pub async fn destroy_all(&self) -> Result<()> {
        let containers: Vec<Arc<Container>> =
            self.registry.lock().await.drain().map(|(_, c)| c).collect();
        let mut first_error = None;
        for container in containers {
            if let Err(e) = container.destroy().await {
                error!(handle = container.handle(), error = %e, "destroy failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reattaches containers left on disk by a previous run.
    ///
    /// Each subdirectory of the base names a container id. Restored
    /// containers get a fresh quota control, an empty environment, the
    /// handle set to the id, and the unconstrained runner for both
    /// execution paths: no host agent is revived for them.
    pub async fn restore_containers(&self) -> Result<Vec<Arc<Container>>> {
        let base = &self.settings.container_base_dir;
        if !self.capabilities.filesystem.exists(base).await? {
            return Ok(Vec::new());
        }

        let mut restored = Vec::new();
        for id in self.capabilities.filesystem.enumerate_directories(base).await? {
            let user = ContainerUser::restore(self.capabilities.users.clone(), &id);
            let directory = ContainerDirectory::new(
                self.capabilities.filesystem.clone(),
                base.join(&id),
                &self.settings.service_account,
            );
            let job_object = self.capabilities.job_objects.create_job_object(&id).await?;
            let quota_control = self
                .capabilities
                .quotas
                .create_quota_control(&directory.volume())
                .await?;

            let runner = self.capabilities.process_runner.clone();
            let container = Arc::new(Container::assemble(ContainerParts {
                id: id.clone(),
                handle: id.clone(),
                user,
                directory,
                job_object,
                host_client: None,
                process_runner: runner.clone(),
                constrained_runner: runner,
                quota_control,
                ports: self.capabilities.ports.clone(),
                environment: HashMap::new(),
                properties: self.properties.clone(),
                commands: self.commands.clone(),
            }));

            let key = container.handle().to_lowercase();
            {
                let mut registry = self.registry.lock().await;
                if registry.contains_key(&key) {
                    warn!(%id, "skipping restore; handle already live");
                    continue;
                }
                registry.insert(key, container.clone());
            }
            info!(%id, "container restored");
            restored.push(container);
        }
        Ok(restored)
    }

    /// Case-insensitive lookup.
    pub async fn get_container_by_handle(&self, handle: &str) -> Option<Arc<Container>> {
        self.registry.lock().await.get(&handle.to_lowercase()).cloned()
    }

    /// Snapshot of every live container.
    pub async fn get_containers(&self) -> Vec<Arc<Container>> {
        self.registry.lock().await.values().cloned().collect()
    }

    /// Snapshot of every live handle, in original casing.
    pub async fn get_container_handles(&self) -> Vec<String> {
        self.registry
            .lock()
            .await
            .values()
            .map(|c| c.handle().to_string())
            .collect()
    }

    /// Dispatches a command verb against the container registered under
    /// `handle`.
    pub async fn run_command(
        &self,
        handle: &str,
        verb: &str,
        arguments: Vec<String>,
        privileged: bool,
    ) -> Result<TaskCommandResult> {
        let container = self
            .get_container_by_handle(handle)
            .await
            .ok_or_else(|| ContainerError::ResourceMissing(format!("container {handle}")))?;
        container.run_command(verb, arguments, privileged).await
    }
}
