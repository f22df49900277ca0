// ABOUTME: Process runner launching and supervising OS processes through tokio
// ABOUTME: Pipes all three stdio streams, pumps line-oriented output, and watches for exit

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, trace, warn};

use super::{OutputLine, ProcessHandle, ProcessRunSpec, ProcessRunner, StreamKind};
use crate::capabilities::UserManager;
use crate::envs::EnvironmentBlock;
use crate::error::{ContainerError, Result};

/// Runs processes directly on the host.
///
/// Credentialed launches derive the target user's profile environment
/// through the [`UserManager`] capability; the credential switch itself is
/// performed by the platform binding that embeds the engine.
pub struct LocalProcessRunner {
    users: Option<Arc<dyn UserManager>>,
}

impl LocalProcessRunner {
    pub fn new() -> Self {
        Self { users: None }
    }

    pub fn with_user_manager(users: Arc<dyn UserManager>) -> Self {
        Self { users: Some(users) }
    }

    async fn build_environment(&self, spec: &ProcessRunSpec) -> Result<EnvironmentBlock> {
        if !spec.environment.is_empty() {
            return Ok(EnvironmentBlock::from(spec.environment.clone()));
        }
        if let (Some(credential), Some(users)) = (&spec.credential, &self.users) {
            let token = users.logon(credential).await?;
            return EnvironmentBlock::for_user(users.as_ref(), &token).await;
        }
        Ok(EnvironmentBlock::inherited())
    }
}

impl Default for LocalProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRunner for LocalProcessRunner {
    async fn run(&self, mut spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>> {
        let environment = self.build_environment(&spec).await?;

        let mut command = Command::new(&spec.executable);
        command
            .args(&spec.arguments)
            .env_clear()
            .envs(environment.as_map())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_directory {
            command.current_dir(dir);
        }

        debug!(executable = %spec.executable.display(), args = ?spec.arguments, "launching process");
        let mut child = command.spawn()?;
        let pid = child.id().unwrap_or_default();
        trace!(pid, "process launched");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_buffer = Arc::new(Mutex::new(String::new()));
        let stderr_buffer = Arc::new(Mutex::new(String::new()));

        if let Some(out) = stdout {
            pump_stream(
                out,
                StreamKind::Stdout,
                spec.buffered_io.then(|| stdout_buffer.clone()),
                spec.output.clone(),
            );
        }
        if let Some(err) = stderr {
            pump_stream(
                err,
                StreamKind::Stderr,
                spec.buffered_io.then(|| stderr_buffer.clone()),
                spec.output.clone(),
            );
        }

        let (exit_tx, exit_rx) = watch::channel::<Option<i32>>(None);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        let exit_notify = spec.exit.take();
        tokio::spawn(async move {
            let mut kill_closed = false;
            let code = loop {
                tokio::select! {
                    status = child.wait() => {
                        break status.ok().and_then(|s| s.code()).unwrap_or(-1);
                    }
                    request = kill_rx.recv(), if !kill_closed => {
                        match request {
                            Some(()) => {
                                if let Err(e) = child.start_kill() {
                                    warn!(pid, error = %e, "kill request failed");
                                }
                            }
                            None => kill_closed = true,
                        }
                    }
                }
            };
            trace!(pid, code, "process exited");
            if let Some(notify) = exit_notify {
                let _ = notify.send(code);
            }
            let _ = exit_tx.send(Some(code));
        });

        Ok(Arc::new(LocalProcessHandle {
            pid,
            stdin: Mutex::new(stdin),
            exit: exit_rx,
            kill: kill_tx,
            stdout_buffer,
            stderr_buffer,
        }))
    }

    async fn stop_all(&self, _kill: bool) -> Result<()> {
        Err(ContainerError::Unimplemented("LocalProcessRunner::stop_all"))
    }

    async fn find_by_id(&self, _id: u32) -> Result<Option<Arc<dyn ProcessHandle>>> {
        Err(ContainerError::Unimplemented("LocalProcessRunner::find_by_id"))
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

/// Forwards one output stream line by line into the buffer, the event
/// channel, or (with neither) the void, so the pipe never backs up.
fn pump_stream<R>(
    stream: R,
    kind: StreamKind,
    buffer: Option<Arc<Mutex<String>>>,
    events: Option<mpsc::UnboundedSender<OutputLine>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(buffer) = &buffer {
                let mut buffer = buffer.lock().await;
                buffer.push_str(&line);
                buffer.push('\n');
            }
            if let Some(events) = &events {
                let _ = events.send(OutputLine { stream: kind, line });
            }
        }
    });
}

struct LocalProcessHandle {
    pid: u32,
    stdin: Mutex<Option<ChildStdin>>,
    exit: watch::Receiver<Option<i32>>,
    kill: mpsc::Sender<()>,
    stdout_buffer: Arc<Mutex<String>>,
    stderr_buffer: Arc<Mutex<String>>,
}

#[async_trait]
impl ProcessHandle for LocalProcessHandle {
    fn id(&self) -> u32 {
        self.pid
    }

    async fn wait(&self) -> Result<i32> {
        let mut exit = self.exit.clone();
        let value = *exit
            .wait_for(|code| code.is_some())
            .await
            .map_err(|_| ContainerError::InvalidOperation("process supervisor gone".into()))?;
        Ok(value.expect("guarded by wait_for"))
    }

    async fn write_stdin(&self, data: &[u8]) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin
            .as_mut()
            .ok_or_else(|| ContainerError::InvalidOperation("stdin is closed".into()))?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn close_stdin(&self) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        if let Some(mut stdin) = stdin.take() {
            stdin.shutdown().await?;
        }
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        // Already-exited processes make this a no-op.
        let _ = self.kill.send(()).await;
        Ok(())
    }

    async fn exit_code(&self) -> Option<i32> {
        *self.exit.borrow()
    }

    async fn collected_output(&self) -> (String, String) {
        (
            self.stdout_buffer.lock().await.clone(),
            self.stderr_buffer.lock().await.clone(),
        )
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn shell_spec(script: &str) -> ProcessRunSpec {
        let mut spec = ProcessRunSpec::new("/bin/sh");
        spec.arguments = vec!["-c".into(), script.into()];
        spec
    }

    #[tokio::test]
    async fn buffered_run_collects_stdout_and_stderr() {
        let runner = LocalProcessRunner::new();
        let mut spec = shell_spec("echo out; echo err >&2");
        spec.buffered_io = true;

        let handle = runner.run(spec).await.unwrap();
        let code = handle.wait().await.unwrap();
        assert_eq!(code, 0);

        // Readers race the exit notification; give them a beat to drain.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (stdout, stderr) = handle.collected_output().await;
        assert_eq!(stdout, "out\n");
        assert_eq!(stderr, "err\n");
    }

    #[tokio::test]
    async fn streaming_run_delivers_tagged_lines() {
        let runner = LocalProcessRunner::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut spec = shell_spec("echo first; echo second >&2");
        spec.output = Some(tx);

        let handle = runner.run(spec).await.unwrap();
        handle.wait().await.unwrap();

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert!(lines.contains(&OutputLine {
            stream: StreamKind::Stdout,
            line: "first".into()
        }));
        assert!(lines.contains(&OutputLine {
            stream: StreamKind::Stderr,
            line: "second".into()
        }));
    }

    #[tokio::test]
    async fn exit_notification_fires_with_exit_code() {
        let runner = LocalProcessRunner::new();
        let (tx, rx) = oneshot::channel();
        let mut spec = shell_spec("exit 3");
        spec.exit = Some(tx);

        let handle = runner.run(spec).await.unwrap();
        assert_eq!(rx.await.unwrap(), 3);
        assert_eq!(handle.exit_code().await, Some(3));
    }

    #[tokio::test]
    async fn stdin_write_reaches_the_process() {
        let runner = LocalProcessRunner::new();
        let mut spec = shell_spec("read line; echo \"got $line\"");
        spec.buffered_io = true;

        let handle = runner.run(spec).await.unwrap();
        handle.write_stdin(b"hello\n").await.unwrap();
        handle.close_stdin().await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (stdout, _) = handle.collected_output().await;
        assert_eq!(stdout, "got hello\n");
    }

    #[tokio::test]
    async fn kill_terminates_a_lingering_process() {
        let runner = LocalProcessRunner::new();
        let handle = runner.run(shell_spec("sleep 30")).await.unwrap();

        handle.kill().await.unwrap();
        let code = handle.wait().await.unwrap();
        assert_ne!(code, 0);
    }

    #[tokio::test]
    async fn explicit_environment_is_used_verbatim() {
        let runner = LocalProcessRunner::new();
        let mut spec = shell_spec("echo \"$PROBE\"");
        spec.environment = [("PROBE".to_string(), "isolated".to_string())].into();
        spec.buffered_io = true;

        let handle = runner.run(spec).await.unwrap();
        handle.wait().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (stdout, _) = handle.collected_output().await;
        assert_eq!(stdout, "isolated\n");
    }

    #[tokio::test]
    async fn stop_all_and_find_by_id_are_unimplemented() {
        let runner = LocalProcessRunner::new();
        assert!(matches!(
            runner.stop_all(true).await,
            Err(ContainerError::Unimplemented(_))
        ));
        assert!(matches!(
            runner.find_by_id(42).await,
            Err(ContainerError::Unimplemented(_))
        ));
    }
}
