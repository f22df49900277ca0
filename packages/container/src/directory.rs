// ABOUTME: On-disk layout of one container: root plus bin/, user/, and private/ subtrees
// ABOUTME: Enforces path confinement and per-subtree access lists; owns bind mount creation

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capabilities::{AccessEntry, AccessRights, FileSystemManager};
use crate::error::{ContainerError, Result};
use crate::user::ContainerUser;

pub const BIN_DIR: &str = "bin";
pub const USER_DIR: &str = "user";
pub const PRIVATE_DIR: &str = "private";

/// A source tree copied into the container's user subtree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindMount {
    pub source_path: String,
    pub destination_path: String,
}

/// Exclusive owner of one container's directory subtree.
#[derive(Clone)]
pub struct ContainerDirectory {
    filesystem: Arc<dyn FileSystemManager>,
    root: PathBuf,
    service_account: String,
}

impl ContainerDirectory {
    pub fn new(
        filesystem: Arc<dyn FileSystemManager>,
        root: impl Into<PathBuf>,
        service_account: impl Into<String>,
    ) -> Self {
        Self {
            filesystem,
            root: root.into(),
            service_account: service_account.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path root of the container directory (drive on a lettered host),
    /// used to scope the quota control.
    pub fn volume(&self) -> PathBuf {
        let mut volume = PathBuf::new();
        for component in self.root.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => {
                    volume.push(component.as_os_str())
                }
                _ => break,
            }
        }
        if volume.as_os_str().is_empty() {
            volume.push(Component::RootDir.as_os_str());
        }
        volume
    }

    /// Creates the root and its fixed subdirectories with the access matrix:
    /// root and `bin/` readable by the container user, `user/` writable by
    /// it, `private/` reserved to administrators and the service account.
    pub async fn create_subdirectories(&self, user: &ContainerUser) -> Result<()> {
        info!(root = %self.root.display(), "creating container directory layout");
        let service_access = [
            AccessEntry::administrators_rw(),
            AccessEntry::service_rw(&self.service_account),
        ];
        let with_user = |rights| {
            let mut access = service_access.to_vec();
            access.push(AccessEntry::user(user.username(), rights));
            access
        };

        self.filesystem
            .create_directory(&self.root, &with_user(AccessRights::Read))
            .await?;
        self.filesystem
            .create_directory(&self.root.join(PRIVATE_DIR), &service_access)
            .await?;
        self.filesystem
            .create_directory(&self.root.join(BIN_DIR), &with_user(AccessRights::Read))
            .await?;
        self.filesystem
            .create_directory(&self.root.join(USER_DIR), &with_user(AccessRights::ReadWrite))
            .await?;
        Ok(())
    }

    pub fn map_bin_path(&self, path: &str) -> Result<PathBuf> {
        self.map_subtree_path(BIN_DIR, path)
    }

    pub fn map_user_path(&self, path: &str) -> Result<PathBuf> {
        self.map_subtree_path(USER_DIR, path)
    }

    pub fn map_private_path(&self, path: &str) -> Result<PathBuf> {
        self.map_subtree_path(PRIVATE_DIR, path)
    }

    /// Maps a caller-supplied path into a subtree.
    ///
    /// Drive-rooted absolute paths are returned verbatim. Anything else is
    /// stripped of leading separators, joined onto the subtree, lexically
    /// canonicalized, and verified to still lie inside the subtree.
    fn map_subtree_path(&self, subtree: &str, path: &str) -> Result<PathBuf> {
        if is_drive_rooted(path) {
            return Ok(PathBuf::from(path));
        }

        let base = lexical_canonicalize(&self.root.join(subtree));
        let mut joined = base.clone();
        for segment in path
            .replace('\\', "/")
            .split('/')
            .filter(|s| !s.is_empty())
        {
            joined.push(segment);
        }

        let canonical = lexical_canonicalize(&joined);
        if canonical.starts_with(&base) {
            Ok(canonical)
        } else {
            Err(ContainerError::InvalidPath(path.to_string()))
        }
    }

    /// Copies each bind mount source into the user subtree, creating the
    /// destination directory with user read-write access first.
    pub async fn create_bind_mounts(
        &self,
        mounts: &[BindMount],
        user: &ContainerUser,
    ) -> Result<()> {
        let access = [
            AccessEntry::administrators_rw(),
            AccessEntry::service_rw(&self.service_account),
            AccessEntry::user(user.username(), AccessRights::ReadWrite),
        ];
        for mount in mounts {
            let destination = self.map_user_path(&mount.destination_path)?;
            debug!(
                source = %mount.source_path,
                destination = %destination.display(),
                "creating bind mount"
            );
            self.filesystem.create_directory(&destination, &access).await?;
            self.filesystem
                .copy(Path::new(&mount.source_path), &destination)
                .await?;
        }
        Ok(())
    }

    /// Recursively deletes the container root; an already-absent root is
    /// not an error.
    pub async fn destroy(&self) -> Result<()> {
        if !self.filesystem.exists(&self.root).await? {
            debug!(root = %self.root.display(), "container directory already absent");
            return Ok(());
        }
        info!(root = %self.root.display(), "destroying container directory");
        self.filesystem.delete_directory(&self.root).await
    }
}

/// True for paths that name a drive-lettered absolute location.
fn is_drive_rooted(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolves `.` and `..` components without touching the filesystem.
fn lexical_canonicalize(path: &Path) -> PathBuf {
    let mut canonical = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                canonical.push(component.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => {
                canonical.pop();
            }
            Component::Normal(segment) => canonical.push(segment),
        }
    }
    canonical
}
