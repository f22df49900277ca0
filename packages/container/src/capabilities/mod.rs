// ABOUTME: Capability traits the engine consumes, platform-backed elsewhere
// ABOUTME: Covers local users, filesystem/ACLs, job objects, disk quotas, and TCP port reservation

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

pub mod local;

pub use local::LocalFileSystem;

/// Credential material for a container's local user account.
///
/// The password never appears in `Debug` output.
#[derive(Clone)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque logon token obtained for a credential; consumed when loading a
/// user-profile environment.
#[derive(Debug, Clone)]
pub struct LogonToken {
    raw: String,
}

impl LogonToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRights {
    Read,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Administrators,
    ServiceAccount(String),
    ContainerUser(String),
}

/// One entry of an access list applied to a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEntry {
    pub principal: Principal,
    pub rights: AccessRights,
}

impl AccessEntry {
    pub fn administrators_rw() -> Self {
        Self {
            principal: Principal::Administrators,
            rights: AccessRights::ReadWrite,
        }
    }

    pub fn service_rw(account: impl Into<String>) -> Self {
        Self {
            principal: Principal::ServiceAccount(account.into()),
            rights: AccessRights::ReadWrite,
        }
    }

    pub fn user(username: impl Into<String>, rights: AccessRights) -> Self {
        Self {
            principal: Principal::ContainerUser(username.into()),
            rights,
        }
    }
}

/// Local user account management.
#[async_trait]
pub trait UserManager: Send + Sync {
    /// Creates a local account and returns its credential material.
    async fn create_user(&self, username: &str) -> Result<Credential>;

    async fn delete_user(&self, username: &str) -> Result<()>;

    async fn get_sid(&self, username: &str) -> Result<String>;

    /// Logs the credential on and returns its primary token.
    async fn logon(&self, credential: &Credential) -> Result<LogonToken>;

    /// Loads the user-profile environment reachable through a logon token.
    async fn environment_for_token(&self, token: &LogonToken)
        -> Result<HashMap<String, String>>;

    async fn add_to_group(&self, username: &str, group: &str) -> Result<()>;
}

/// Filesystem operations, including access-list application.
#[async_trait]
pub trait FileSystemManager: Send + Sync {
    async fn create_directory(&self, path: &Path, access: &[AccessEntry]) -> Result<()>;

    async fn apply_access(&self, path: &Path, access: &[AccessEntry]) -> Result<()>;

    async fn delete_directory(&self, path: &Path) -> Result<()>;

    /// Copies a file or directory tree.
    async fn copy(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Names of the immediate subdirectories of `path`.
    async fn enumerate_directories(&self, path: &Path) -> Result<Vec<String>>;

    async fn exists(&self, path: &Path) -> Result<bool>;
}

/// Kernel grouping for every process a container launches.
#[async_trait]
pub trait JobObject: Send + Sync {
    fn name(&self) -> &str;

    async fn assign(&self, pid: u32) -> Result<()>;

    async fn dispose(&self) -> Result<()>;
}

#[async_trait]
pub trait JobObjectManager: Send + Sync {
    /// Creates the job object named `name`, opening the existing one if the
    /// name is already registered.
    async fn create_job_object(&self, name: &str) -> Result<Arc<dyn JobObject>>;
}

/// Per-volume disk usage ceiling scoped to a container directory.
#[async_trait]
pub trait QuotaControl: Send + Sync {
    async fn set_limit(&self, bytes: u64) -> Result<()>;

    async fn limit(&self) -> Result<u64>;

    fn enabled(&self) -> bool;
}

#[async_trait]
pub trait QuotaManager: Send + Sync {
    async fn create_quota_control(&self, volume: &Path) -> Result<Arc<dyn QuotaControl>>;
}

/// TCP port reservation for containers; policy lives outside the engine.
#[async_trait]
pub trait TcpPortManager: Send + Sync {
    /// Reserves `port` for the container, returning the port actually bound
    /// (implementations may substitute when `port` is zero).
    async fn reserve_port(&self, container_id: &str, port: u16) -> Result<u16>;

    async fn release_port(&self, container_id: &str, port: u16) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_redacts_password() {
        let credential = Credential::new("c_ABC", "s3cret");
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("c_ABC"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn access_entry_helpers_build_expected_entries() {
        assert_eq!(
            AccessEntry::administrators_rw(),
            AccessEntry {
                principal: Principal::Administrators,
                rights: AccessRights::ReadWrite,
            }
        );
        assert_eq!(
            AccessEntry::service_rw("svc"),
            AccessEntry {
                principal: Principal::ServiceAccount("svc".into()),
                rights: AccessRights::ReadWrite,
            }
        );
        assert_eq!(
            AccessEntry::user("c_123", AccessRights::Read),
            AccessEntry {
                principal: Principal::ContainerUser("c_123".into()),
                rights: AccessRights::Read,
            }
        );
    }
}
