// ABOUTME: In-memory capability implementations for wiring a full service without a real host
// ABOUTME: Each fake records the calls it sees so tests can assert on lifecycle behavior

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::capabilities::{
    AccessEntry, Credential, FileSystemManager, JobObject, JobObjectManager, LocalFileSystem,
    LogonToken, QuotaControl, QuotaManager, TcpPortManager, UserManager,
};
use crate::error::{ContainerError, Result};
use crate::host::{ContainerHostClient, ContainerHostService};
use crate::process::{ProcessHandle, ProcessRunSpec, ProcessRunner};

/// User manager keeping accounts in memory.
#[derive(Default)]
pub struct InMemoryUserManager {
    users: Mutex<HashMap<String, Credential>>,
    deleted: Mutex<Vec<String>>,
    groups: Mutex<Vec<(String, String)>>,
}

impl InMemoryUserManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn deleted_usernames(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn group_memberships(&self) -> Vec<(String, String)> {
        self.groups.lock().unwrap().clone()
    }

    /// Pre-registers an account, as restore scenarios need.
    pub fn seed_user(&self, username: &str) {
        self.users.lock().unwrap().insert(
            username.to_string(),
            Credential::new(username, "seeded-password"),
        );
    }
}

#[async_trait]
impl UserManager for InMemoryUserManager {
    async fn create_user(&self, username: &str) -> Result<Credential> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(username) {
            return Err(ContainerError::ResourceExists(format!("user {username}")));
        }
        let credential = Credential::new(username, format!("pw-{username}"));
        users.insert(username.to_string(), credential.clone());
        Ok(credential)
    }

    async fn delete_user(&self, username: &str) -> Result<()> {
        let removed = self.users.lock().unwrap().remove(username);
        if removed.is_none() {
            return Err(ContainerError::ResourceMissing(format!("user {username}")));
        }
        self.deleted.lock().unwrap().push(username.to_string());
        Ok(())
    }

    async fn get_sid(&self, username: &str) -> Result<String> {
        if !self.users.lock().unwrap().contains_key(username) {
            return Err(ContainerError::ResourceMissing(format!("user {username}")));
        }
        Ok(format!("S-1-5-21-{}", username.to_uppercase()))
    }

    async fn logon(&self, credential: &Credential) -> Result<LogonToken> {
        Ok(LogonToken::new(format!("token-{}", credential.username())))
    }

    async fn environment_for_token(
        &self,
        token: &LogonToken,
    ) -> Result<HashMap<String, String>> {
        let username = token
            .as_str()
            .strip_prefix("token-")
            .unwrap_or(token.as_str())
            .to_string();
        Ok([
            ("USERNAME".to_string(), username.clone()),
            ("USERPROFILE".to_string(), format!("/home/{username}")),
        ]
        .into())
    }

    async fn add_to_group(&self, username: &str, group: &str) -> Result<()> {
        self.groups
            .lock()
            .unwrap()
            .push((username.to_string(), group.to_string()));
        Ok(())
    }
}

/// Filesystem fake: real local operations plus a record of every access
/// list applied, keyed by path.
#[derive(Default)]
pub struct RecordingFileSystem {
    inner: LocalFileSystem,
    access: Mutex<Vec<(String, Vec<AccessEntry>)>>,
}

impl RecordingFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access_applied_to(&self, path: &Path) -> Option<Vec<AccessEntry>> {
        let needle = path.to_string_lossy().into_owned();
        self.access
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| *p == needle)
            .map(|(_, entries)| entries.clone())
    }
}

#[async_trait]
impl FileSystemManager for RecordingFileSystem {
    async fn create_directory(&self, path: &Path, access: &[AccessEntry]) -> Result<()> {
        self.inner.create_directory(path, access).await?;
        self.access
            .lock()
            .unwrap()
            .push((path.to_string_lossy().into_owned(), access.to_vec()));
        Ok(())
    }

    async fn apply_access(&self, path: &Path, access: &[AccessEntry]) -> Result<()> {
        self.access
            .lock()
            .unwrap()
            .push((path.to_string_lossy().into_owned(), access.to_vec()));
        self.inner.apply_access(path, access).await
    }

    async fn delete_directory(&self, path: &Path) -> Result<()> {
        self.inner.delete_directory(path).await
    }

    async fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        self.inner.copy(source, destination).await
    }

    async fn enumerate_directories(&self, path: &Path) -> Result<Vec<String>> {
        self.inner.enumerate_directories(path).await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        self.inner.exists(path).await
    }
}

/// Job object recording process assignments and disposal.
pub struct FakeJobObject {
    name: String,
    assigned: Mutex<Vec<u32>>,
    disposed: AtomicBool,
}

impl FakeJobObject {
    pub fn assigned_pids(&self) -> Vec<u32> {
        self.assigned.lock().unwrap().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobObject for FakeJobObject {
    fn name(&self) -> &str {
        &self.name
    }

    async fn assign(&self, pid: u32) -> Result<()> {
        self.assigned.lock().unwrap().push(pid);
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Job object manager with create-or-open semantics by name.
#[derive(Default)]
pub struct FakeJobObjectManager {
    jobs: Mutex<HashMap<String, Arc<FakeJobObject>>>,
}

impl FakeJobObjectManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(&self, name: &str) -> Option<Arc<FakeJobObject>> {
        self.jobs.lock().unwrap().get(name).cloned()
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl JobObjectManager for FakeJobObjectManager {
    async fn create_job_object(&self, name: &str) -> Result<Arc<dyn JobObject>> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(FakeJobObject {
                    name: name.to_string(),
                    assigned: Mutex::new(Vec::new()),
                    disposed: AtomicBool::new(false),
                })
            })
            .clone();
        Ok(job)
    }
}

/// Quota control storing its limit in memory.
pub struct FakeQuotaControl {
    volume: String,
    limit: Mutex<u64>,
}

impl FakeQuotaControl {
    pub fn volume(&self) -> &str {
        &self.volume
    }
}

#[async_trait]
impl QuotaControl for FakeQuotaControl {
    async fn set_limit(&self, bytes: u64) -> Result<()> {
        *self.limit.lock().unwrap() = bytes;
        Ok(())
    }

    async fn limit(&self) -> Result<u64> {
        Ok(*self.limit.lock().unwrap())
    }

    fn enabled(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct FakeQuotaManager {
    controls: Mutex<Vec<Arc<FakeQuotaControl>>>,
    fail_creation: AtomicBool,
}

impl FakeQuotaManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn controls(&self) -> Vec<Arc<FakeQuotaControl>> {
        self.controls.lock().unwrap().clone()
    }

    pub fn fail_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuotaManager for FakeQuotaManager {
    async fn create_quota_control(&self, volume: &Path) -> Result<Arc<dyn QuotaControl>> {
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(ContainerError::Quota(format!(
                "simulated quota failure for {}",
                volume.display()
            )));
        }
        let control = Arc::new(FakeQuotaControl {
            volume: volume.to_string_lossy().into_owned(),
            limit: Mutex::new(0),
        });
        self.controls.lock().unwrap().push(control.clone());
        Ok(control)
    }
}

/// Port manager tracking reservations per container.
#[derive(Default)]
pub struct FakePortManager {
    reserved: Mutex<HashSet<(String, u16)>>,
    next_ephemeral: AtomicU32,
}

impl FakePortManager {
    pub fn new() -> Self {
        Self {
            reserved: Mutex::new(HashSet::new()),
            next_ephemeral: AtomicU32::new(61_000),
        }
    }

    pub fn is_reserved(&self, container_id: &str, port: u16) -> bool {
        self.reserved
            .lock()
            .unwrap()
            .contains(&(container_id.to_string(), port))
    }
}

#[async_trait]
impl TcpPortManager for FakePortManager {
    async fn reserve_port(&self, container_id: &str, port: u16) -> Result<u16> {
        let port = if port == 0 {
            self.next_ephemeral.fetch_add(1, Ordering::SeqCst) as u16
        } else {
            port
        };
        let mut reserved = self.reserved.lock().unwrap();
        if !reserved.insert((container_id.to_string(), port)) {
            return Err(ContainerError::PortAllocation(format!(
                "port {port} already reserved for {container_id}"
            )));
        }
        Ok(port)
    }

    async fn release_port(&self, container_id: &str, port: u16) -> Result<()> {
        self.reserved
            .lock()
            .unwrap()
            .remove(&(container_id.to_string(), port));
        Ok(())
    }
}

/// Process handle that never touches the OS; completes on demand.
pub struct FakeProcessHandle {
    pid: u32,
    exit_code: Mutex<Option<i32>>,
    stdin: Mutex<Vec<u8>>,
    killed: AtomicBool,
    output: (String, String),
}

impl FakeProcessHandle {
    pub fn completed(pid: u32, exit_code: i32, stdout: &str, stderr: &str) -> Arc<Self> {
        Arc::new(Self {
            pid,
            exit_code: Mutex::new(Some(exit_code)),
            stdin: Mutex::new(Vec::new()),
            killed: AtomicBool::new(false),
            output: (stdout.to_string(), stderr.to_string()),
        })
    }

    pub fn running(pid: u32) -> Arc<Self> {
        Arc::new(Self {
            pid,
            exit_code: Mutex::new(None),
            stdin: Mutex::new(Vec::new()),
            killed: AtomicBool::new(false),
            output: (String::new(), String::new()),
        })
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessHandle for FakeProcessHandle {
    fn id(&self) -> u32 {
        self.pid
    }

    async fn wait(&self) -> Result<i32> {
        (*self.exit_code.lock().unwrap())
            .ok_or_else(|| ContainerError::InvalidOperation("fake process still running".into()))
    }

    async fn write_stdin(&self, data: &[u8]) -> Result<()> {
        self.stdin.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn close_stdin(&self) -> Result<()> {
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        *self.exit_code.lock().unwrap() = Some(-1);
        Ok(())
    }

    async fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().unwrap()
    }

    async fn collected_output(&self) -> (String, String) {
        self.output.clone()
    }
}

/// Host client recording the run specs it receives and answering each with
/// a completed fake process.
#[derive(Default)]
pub struct FakeHostClient {
    runs: Mutex<Vec<String>>,
    shutdowns: AtomicUsize,
    next_pid: AtomicU32,
    canned_result: Mutex<Option<(i32, String, String)>>,
}

impl FakeHostClient {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
            next_pid: AtomicU32::new(1000),
            canned_result: Mutex::new(None),
        }
    }

    /// Makes subsequent runs report this triple.
    pub fn respond_with(&self, exit_code: i32, stdout: &str, stderr: &str) {
        *self.canned_result.lock().unwrap() =
            Some((exit_code, stdout.to_string(), stderr.to_string()));
    }

    /// Executable paths of every run dispatched through this host.
    pub fn dispatched_executables(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerHostClient for FakeHostClient {
    async fn run_process(&self, spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>> {
        if self.shutdowns.load(Ordering::SeqCst) > 0 {
            return Err(ContainerError::HostUnavailable("host is shut down".into()));
        }
        self.runs
            .lock()
            .unwrap()
            .push(spec.executable.to_string_lossy().into_owned());
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let handle: Arc<dyn ProcessHandle> =
            match self.canned_result.lock().unwrap().as_ref() {
                Some((code, stdout, stderr)) => {
                    FakeProcessHandle::completed(pid, *code, stdout, stderr)
                }
                None => FakeProcessHandle::completed(pid, 0, "", ""),
            };
        Ok(handle)
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Host service handing out [`FakeHostClient`]s, with a switch to simulate
/// agent startup failure.
#[derive(Default)]
pub struct FakeHostService {
    fail_start: AtomicBool,
    clients: Mutex<Vec<(String, Arc<FakeHostClient>)>>,
}

impl FakeHostService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn client_for(&self, container_id: &str) -> Option<Arc<FakeHostClient>> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == container_id)
            .map(|(_, client)| client.clone())
    }

    pub fn started_ids(&self) -> Vec<String> {
        self.clients.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl ContainerHostService for FakeHostService {
    async fn start_host(
        &self,
        container_id: &str,
        _directory: &Path,
        job_object: Arc<dyn JobObject>,
        _credential: &Credential,
    ) -> Result<Arc<dyn ContainerHostClient>> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ContainerError::HostUnavailable(format!(
                "simulated agent start failure for {container_id}"
            )));
        }
        let client = Arc::new(FakeHostClient::new());
        job_object.assign(4242).await?;
        self.clients
            .lock()
            .unwrap()
            .push((container_id.to_string(), client.clone()));
        Ok(client)
    }
}

/// Runner answering every spec with an immediately-completed fake process.
#[derive(Default)]
pub struct FakeProcessRunner {
    runs: Mutex<Vec<String>>,
}

impl FakeProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched_executables(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for FakeProcessRunner {
    async fn run(&self, spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>> {
        self.runs
            .lock()
            .unwrap()
            .push(spec.executable.to_string_lossy().into_owned());
        Ok(FakeProcessHandle::completed(1, 0, "", ""))
    }

    async fn stop_all(&self, _kill: bool) -> Result<()> {
        Err(ContainerError::Unimplemented("FakeProcessRunner::stop_all"))
    }

    async fn find_by_id(&self, _id: u32) -> Result<Option<Arc<dyn ProcessHandle>>> {
        Err(ContainerError::Unimplemented("FakeProcessRunner::find_by_id"))
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}
