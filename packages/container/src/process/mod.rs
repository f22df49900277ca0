// ABOUTME: Process-execution contract shared by the local and constrained runners
// ABOUTME: Defines the run specification, streaming output events, and runner/handle traits

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::capabilities::Credential;
use crate::error::Result;

pub mod constrained;
pub mod local;

pub use constrained::ConstrainedProcessRunner;
pub use local::LocalProcessRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One line of process output delivered on the streaming channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub line: String,
}

/// Everything needed to launch and supervise one process.
///
/// When `environment` is empty the runner synthesizes one: the target
/// user's profile environment when a credential is present, the inherited
/// host environment otherwise. With `buffered_io` set, output accumulates
/// on the handle; otherwise line events flow to `output` as they appear.
pub struct ProcessRunSpec {
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub credential: Option<Credential>,
    pub environment: HashMap<String, String>,
    pub buffered_io: bool,
    pub output: Option<mpsc::UnboundedSender<OutputLine>>,
    pub exit: Option<oneshot::Sender<i32>>,
}

impl ProcessRunSpec {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            arguments: Vec::new(),
            working_directory: None,
            credential: None,
            environment: HashMap::new(),
            buffered_io: false,
            output: None,
            exit: None,
        }
    }
}

impl std::fmt::Debug for ProcessRunSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunSpec")
            .field("executable", &self.executable)
            .field("arguments", &self.arguments)
            .field("working_directory", &self.working_directory)
            .field("credential", &self.credential)
            .field("environment_vars", &self.environment.len())
            .field("buffered_io", &self.buffered_io)
            .field("streaming", &self.output.is_some())
            .finish()
    }
}

/// Handle to a launched process.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// OS process id.
    fn id(&self) -> u32;

    /// Waits until the process exits and returns its exit code.
    async fn wait(&self) -> Result<i32>;

    async fn write_stdin(&self, data: &[u8]) -> Result<()>;

    /// Closes the process's stdin, signalling end of input.
    async fn close_stdin(&self) -> Result<()>;

    async fn kill(&self) -> Result<()>;

    /// Exit code, once the process has completed.
    async fn exit_code(&self) -> Option<i32>;

    /// Accumulated (stdout, stderr) for buffered runs; empty otherwise.
    async fn collected_output(&self) -> (String, String);
}

/// Launches processes from run specifications.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>>;

    /// Stops every process this runner launched. Declared for the container
    /// contract; not implemented in the core.
    async fn stop_all(&self, kill: bool) -> Result<()>;

    /// Finds a previously launched process by id. Declared for the container
    /// contract; not implemented in the core.
    async fn find_by_id(&self, id: u32) -> Result<Option<Arc<dyn ProcessHandle>>>;

    /// Releases runner-held resources and tears down outstanding sessions.
    async fn dispose(&self) -> Result<()>;
}
