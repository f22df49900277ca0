// ABOUTME: Container provisioning engine for a warden-style daemon
// ABOUTME: Provisions isolated execution environments backed by users, directories, jobs, and quotas

pub mod capabilities;
pub mod commands;
pub mod container;
pub mod directory;
pub mod envs;
pub mod error;
pub mod escape;
pub mod handle;
pub mod host;
pub mod process;
pub mod properties;
pub mod service;
pub mod settings;
pub mod testing;
pub mod undo;
pub mod user;

pub use capabilities::{
    AccessEntry, AccessRights, Credential, FileSystemManager, JobObject, JobObjectManager,
    LocalFileSystem, LogonToken, Principal, QuotaControl, QuotaManager, TcpPortManager,
    UserManager,
};
pub use commands::{CommandArgs, CommandFactory, CommandRunner, TaskCommand, TaskCommandResult};
pub use container::{Container, ContainerInfo, ContainerState};
pub use directory::{BindMount, ContainerDirectory};
pub use envs::EnvironmentBlock;
pub use error::{ContainerError, Result};
pub use host::{AgentHostService, ContainerHostClient, ContainerHostService, READY_LINE};
pub use process::{
    ConstrainedProcessRunner, LocalProcessRunner, OutputLine, ProcessHandle, ProcessRunSpec,
    ProcessRunner, StreamKind,
};
pub use properties::PropertyService;
pub use service::{ContainerService, ContainerSpec, HostCapabilities, PlatformCapabilities};
pub use settings::ContainerServiceSettings;
pub use user::ContainerUser;
