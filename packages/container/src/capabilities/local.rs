// ABOUTME: Portable filesystem backend performing real directory and copy operations
// ABOUTME: Access-list application is the platform binding's concern and is traced only

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, trace};

use super::{AccessEntry, FileSystemManager};
use crate::error::Result;

/// Filesystem manager backed by the local filesystem.
///
/// Directory creation, deletion, copying, and enumeration are real
/// operations. Access lists are accepted and traced; wiring them to the
/// host's ACL API belongs to the platform binding that embeds the engine.
#[derive(Debug, Default, Clone)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystemManager for LocalFileSystem {
    async fn create_directory(&self, path: &Path, access: &[AccessEntry]) -> Result<()> {
        debug!(path = %path.display(), "creating directory");
        tokio::fs::create_dir_all(path).await?;
        self.apply_access(path, access).await
    }

    async fn apply_access(&self, path: &Path, access: &[AccessEntry]) -> Result<()> {
        for entry in access {
            trace!(path = %path.display(), ?entry, "recording access entry");
        }
        Ok(())
    }

    async fn delete_directory(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "deleting directory");
        tokio::fs::remove_dir_all(path).await?;
        Ok(())
    }

    async fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
        debug!(source = %source.display(), destination = %destination.display(), "copying");
        let metadata = tokio::fs::metadata(source).await?;
        if metadata.is_file() {
            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(source, destination).await?;
            return Ok(());
        }

        // Iterative walk; directories queue their children as they are found.
        let mut pending: Vec<(PathBuf, PathBuf)> =
            vec![(source.to_path_buf(), destination.to_path_buf())];
        while let Some((from, to)) = pending.pop() {
            tokio::fs::create_dir_all(&to).await?;
            let mut entries = tokio::fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                let target = to.join(entry.file_name());
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), target));
                } else {
                    tokio::fs::copy(entry.path(), target).await?;
                }
            }
        }
        Ok(())
    }

    async fn enumerate_directories(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}
