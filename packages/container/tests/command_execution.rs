// ABOUTME: Integration tests for the command-runner plane over a live service
// ABOUTME: Exercises verb registry, container-targeted dispatch, and the host-routed run command

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use palisade_container::commands::RunProcessCommand;
use palisade_container::testing::{
    FakeHostService, FakeJobObjectManager, FakePortManager, FakeProcessRunner,
    FakeQuotaManager, InMemoryUserManager, RecordingFileSystem,
};
use palisade_container::{
    CommandArgs, ContainerError, ContainerService, ContainerServiceSettings, ContainerSpec,
    HostCapabilities, Result, TaskCommand, TaskCommandResult,
};
use tempfile::TempDir;

struct Harness {
    service: ContainerService,
    host_service: Arc<FakeHostService>,
    process_runner: Arc<FakeProcessRunner>,
    _base: TempDir,
}

fn harness() -> Harness {
    let base = TempDir::new().unwrap();
    let host_service = Arc::new(FakeHostService::new());
    let process_runner = Arc::new(FakeProcessRunner::new());

    let mut settings = ContainerServiceSettings::default();
    settings.container_base_dir = base.path().join("containers");

    let service = ContainerService::new(
        settings,
        HostCapabilities {
            users: Arc::new(InMemoryUserManager::new()),
            filesystem: Arc::new(RecordingFileSystem::new()),
            job_objects: Arc::new(FakeJobObjectManager::new()),
            quotas: Arc::new(FakeQuotaManager::new()),
            ports: Arc::new(FakePortManager::new()),
            host_service: host_service.clone(),
            process_runner: process_runner.clone(),
        },
    );

    Harness {
        service,
        host_service,
        process_runner,
        _base: base,
    }
}

fn spec(handle: &str) -> ContainerSpec {
    ContainerSpec {
        handle: Some(handle.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn run_command_routes_through_the_container_host() {
    let harness = harness();
    let container = harness.service.create_container(spec("worker")).await.unwrap();

    let client = harness.host_service.client_for(container.id()).unwrap();
    client.respond_with(0, "task output\n", "");

    harness
        .service
        .commands()
        .register("run", RunProcessCommand::factory())
        .await;

    let result = harness
        .service
        .run_command("worker", "run", vec!["tool.exe".into(), "/fast".into()], false)
        .await
        .unwrap();

    assert_eq!(
        result,
        TaskCommandResult {
            exit_code: 0,
            stdout: "task output\n".to_string(),
            stderr: String::new(),
        }
    );

    // The executable was mapped into the container's bin/ subtree and the
    // launch went through the host client.
    let dispatched = client.dispatched_executables();
    assert_eq!(dispatched.len(), 1);
    assert!(dispatched[0].ends_with("tool.exe"));
    assert!(dispatched[0].contains("bin"));
}

#[tokio::test]
async fn nonzero_exit_codes_are_results_not_errors() {
    let harness = harness();
    let container = harness.service.create_container(spec("flaky")).await.unwrap();
    harness
        .host_service
        .client_for(container.id())
        .unwrap()
        .respond_with(7, "", "boom\n");

    harness
        .service
        .commands()
        .register("run", RunProcessCommand::factory())
        .await;

    let result = harness
        .service
        .run_command("flaky", "run", vec!["crash.exe".into()], false)
        .await
        .unwrap();
    assert_eq!(result.exit_code, 7);
    assert_eq!(result.stderr, "boom\n");
}

#[tokio::test]
async fn privileged_commands_bypass_the_container_host() {
    let harness = harness();
    let container = harness.service.create_container(spec("admin")).await.unwrap();

    harness
        .service
        .commands()
        .register("run", RunProcessCommand::factory())
        .await;

    let result = harness
        .service
        .run_command("admin", "run", vec!["diag.exe".into()], true)
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);

    // The launch went to the unconstrained runner, not through the host.
    let dispatched = harness.process_runner.dispatched_executables();
    assert_eq!(dispatched.len(), 1);
    assert!(dispatched[0].ends_with("diag.exe"));
    assert!(harness
        .host_service
        .client_for(container.id())
        .unwrap()
        .dispatched_executables()
        .is_empty());
}

#[tokio::test]
async fn unknown_verbs_fail_with_invalid_operation() {
    let harness = harness();
    harness.service.create_container(spec("idle")).await.unwrap();

    let err = harness
        .service
        .run_command("idle", "does-not-exist", vec![], false)
        .await
        .unwrap_err();
    assert!(matches!(err, ContainerError::InvalidOperation(_)));
}

#[tokio::test]
async fn commands_against_unknown_handles_fail() {
    let harness = harness();
    let err = harness
        .service
        .run_command("ghost", "run", vec![], false)
        .await
        .unwrap_err();
    assert!(matches!(err, ContainerError::ResourceMissing(_)));
}

#[tokio::test]
async fn commands_receive_the_target_container_as_context() {
    struct ContextProbe {
        args: CommandArgs,
        seen: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    }

    #[async_trait]
    impl TaskCommand for ContextProbe {
        async fn execute(&self) -> Result<TaskCommandResult> {
            let handle = self
                .args
                .container
                .as_ref()
                .map(|c| c.handle().to_string())
                .unwrap_or_default();
            self.seen
                .lock()
                .unwrap()
                .push((handle, self.args.arguments.clone()));
            Ok(TaskCommandResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    let harness = harness();
    harness.service.create_container(spec("target")).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let factory_seen = seen.clone();
    harness
        .service
        .commands()
        .register(
            "probe",
            Arc::new(move |args: CommandArgs| {
                Box::new(ContextProbe {
                    args,
                    seen: factory_seen.clone(),
                }) as Box<dyn TaskCommand>
            }),
        )
        .await;

    harness
        .service
        .run_command("target", "probe", vec!["alpha".into(), "beta".into()], false)
        .await
        .unwrap();

    let entries = seen.lock().unwrap().clone();
    assert_eq!(
        entries,
        vec![("target".to_string(), vec!["alpha".to_string(), "beta".to_string()])]
    );
}

#[tokio::test]
async fn destroyed_containers_reject_commands() {
    let harness = harness();
    let container = harness.service.create_container(spec("gone")).await.unwrap();
    container.destroy().await.unwrap();

    let err = container
        .run_command("run", vec!["x".into()], false)
        .await
        .unwrap_err();
    assert!(matches!(err, ContainerError::InvalidOperation(_)));
}
