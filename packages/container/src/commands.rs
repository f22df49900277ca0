// ABOUTME: Verb registry and execution adapter for named task commands
// ABOUTME: Resolves a verb to a command factory, runs the command, returns the uniform result triple

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::container::Container;
use crate::error::{ContainerError, Result};
use crate::escape::escape_arguments;
use crate::process::ProcessRunSpec;

/// Uniform result of one command execution. A non-zero exit code is data,
/// not an error; only failure to execute surfaces as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Arguments handed to a command factory: the raw argument vector plus the
/// ambient container the command targets, if any.
#[derive(Clone)]
pub struct CommandArgs {
    pub arguments: Vec<String>,
    pub container: Option<Arc<Container>>,
    pub privileged: bool,
}

impl CommandArgs {
    pub fn new(arguments: Vec<String>) -> Self {
        Self {
            arguments,
            container: None,
            privileged: false,
        }
    }

    pub fn for_container(arguments: Vec<String>, container: Arc<Container>) -> Self {
        Self {
            arguments,
            container: Some(container),
            privileged: false,
        }
    }
}

/// One executable command instance.
#[async_trait]
pub trait TaskCommand: Send + Sync {
    async fn execute(&self) -> Result<TaskCommandResult>;
}

/// Builds a command instance from its arguments.
pub trait CommandFactory: Send + Sync {
    fn create(&self, args: CommandArgs) -> Box<dyn TaskCommand>;
}

impl<F> CommandFactory for F
where
    F: Fn(CommandArgs) -> Box<dyn TaskCommand> + Send + Sync,
{
    fn create(&self, args: CommandArgs) -> Box<dyn TaskCommand> {
        self(args)
    }
}

/// Maps verbs to command factories and runs them. Verbs match
/// case-sensitively; registering an existing verb replaces its factory.
pub struct CommandRunner {
    factories: RwLock<HashMap<String, Arc<dyn CommandFactory>>>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, verb: impl Into<String>, factory: Arc<dyn CommandFactory>) {
        let verb = verb.into();
        debug!(%verb, "registering command");
        self.factories.write().await.insert(verb, factory);
    }

    pub async fn run(&self, verb: &str, args: CommandArgs) -> Result<TaskCommandResult> {
        if verb.is_empty() {
            return Err(ContainerError::InvalidInput("empty command verb".into()));
        }
        let factory = self
            .factories
            .read()
            .await
            .get(verb)
            .cloned()
            .ok_or_else(|| ContainerError::InvalidOperation(format!("unknown verb: {verb}")))?;
        let command = factory.create(args);
        command.execute().await
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in command that runs an executable inside the target container and
/// buffers its output into the result triple. The first argument names the
/// executable (mapped into the container's `bin/` subtree when relative);
/// the rest become the escaped command line.
pub struct RunProcessCommand {
    args: CommandArgs,
}

impl RunProcessCommand {
    pub fn factory() -> Arc<dyn CommandFactory> {
        Arc::new(|args: CommandArgs| {
            Box::new(RunProcessCommand { args }) as Box<dyn TaskCommand>
        })
    }
}

#[async_trait]
impl TaskCommand for RunProcessCommand {
    async fn execute(&self) -> Result<TaskCommandResult> {
        let container = self
            .args
            .container
            .as_ref()
            .ok_or_else(|| ContainerError::InvalidInput("run requires a container".into()))?;
        let (executable, rest) = self
            .args
            .arguments
            .split_first()
            .ok_or_else(|| ContainerError::InvalidInput("run requires an executable".into()))?;

        let mut spec = ProcessRunSpec::new(container.directory().map_bin_path(executable)?);
        spec.arguments = rest.to_vec();
        spec.working_directory = Some(container.directory().root().to_path_buf());
        spec.buffered_io = true;
        debug!(command_line = %escape_arguments(&self.args.arguments), "running task command");

        let handle = container.run(spec, self.args.privileged).await?;
        let exit_code = handle.wait().await?;
        let (stdout, stderr) = handle.collected_output().await;
        Ok(TaskCommandResult {
            exit_code,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoCommand {
        args: CommandArgs,
    }

    #[async_trait]
    impl TaskCommand for EchoCommand {
        async fn execute(&self) -> Result<TaskCommandResult> {
            Ok(TaskCommandResult {
                exit_code: 0,
                stdout: self.args.arguments.join(" "),
                stderr: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn unknown_verb_is_an_invalid_operation() {
        let runner = CommandRunner::new();
        let err = runner
            .run("nope", CommandArgs::new(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn empty_verb_is_invalid_input() {
        let runner = CommandRunner::new();
        let err = runner.run("", CommandArgs::new(vec![])).await.unwrap_err();
        assert!(matches!(err, ContainerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn registered_verbs_receive_the_exact_args() {
        let runner = CommandRunner::new();
        runner
            .register(
                "echo",
                Arc::new(|args: CommandArgs| Box::new(EchoCommand { args }) as Box<dyn TaskCommand>),
            )
            .await;

        let result = runner
            .run("echo", CommandArgs::new(vec!["a".into(), "b".into()]))
            .await
            .unwrap();
        assert_eq!(
            result,
            TaskCommandResult {
                exit_code: 0,
                stdout: "a b".into(),
                stderr: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn verbs_match_case_sensitively() {
        let runner = CommandRunner::new();
        runner
            .register(
                "echo",
                Arc::new(|args: CommandArgs| Box::new(EchoCommand { args }) as Box<dyn TaskCommand>),
            )
            .await;

        assert!(runner.run("Echo", CommandArgs::new(vec![])).await.is_err());
    }

    #[tokio::test]
    async fn reregistering_a_verb_replaces_the_factory() {
        struct FixedCommand(i32);

        #[async_trait]
        impl TaskCommand for FixedCommand {
            async fn execute(&self) -> Result<TaskCommandResult> {
                Ok(TaskCommandResult {
                    exit_code: self.0,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
        }

        let runner = CommandRunner::new();
        runner
            .register(
                "fixed",
                Arc::new(|_args: CommandArgs| Box::new(FixedCommand(1)) as Box<dyn TaskCommand>),
            )
            .await;
        runner
            .register(
                "fixed",
                Arc::new(|_args: CommandArgs| Box::new(FixedCommand(2)) as Box<dyn TaskCommand>),
            )
            .await;

        let result = runner.run("fixed", CommandArgs::new(vec![])).await.unwrap();
        assert_eq!(result.exit_code, 2);
    }

    #[tokio::test]
    async fn command_failures_propagate() {
        struct FailingCommand;

        #[async_trait]
        impl TaskCommand for FailingCommand {
            async fn execute(&self) -> Result<TaskCommandResult> {
                Err(ContainerError::HostUnavailable("gone".into()))
            }
        }

        let runner = CommandRunner::new();
        runner
            .register(
                "fail",
                Arc::new(|_args: CommandArgs| Box::new(FailingCommand) as Box<dyn TaskCommand>),
            )
            .await;

        let err = runner.run("fail", CommandArgs::new(vec![])).await.unwrap_err();
        assert!(matches!(err, ContainerError::HostUnavailable(_)));
    }

    #[tokio::test]
    async fn concurrent_runs_are_independent() {
        struct RecordingCommand {
            args: CommandArgs,
            log: Arc<Mutex<Vec<String>>>,
        }

        #[async_trait]
        impl TaskCommand for RecordingCommand {
            async fn execute(&self) -> Result<TaskCommandResult> {
                self.log.lock().unwrap().push(self.args.arguments.join("+"));
                Ok(TaskCommandResult {
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
        }

        let runner = Arc::new(CommandRunner::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let factory_log = log.clone();
        runner
            .register(
                "record",
                Arc::new(move |args: CommandArgs| {
                    Box::new(RecordingCommand {
                        args,
                        log: factory_log.clone(),
                    }) as Box<dyn TaskCommand>
                }),
            )
            .await;

        let first = {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner.run("record", CommandArgs::new(vec!["one".into()])).await
            })
        };
        let second = {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner.run("record", CommandArgs::new(vec!["two".into()])).await
            })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let mut entries = log.lock().unwrap().clone();
        entries.sort();
        assert_eq!(entries, vec!["one", "two"]);
    }
}
