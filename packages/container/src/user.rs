// ABOUTME: The local user principal backing one container
// ABOUTME: Created with the container, optionally joined to a group, deleted on destroy

use std::sync::Arc;

use tracing::info;

use crate::capabilities::{Credential, UserManager};
use crate::error::Result;

/// Exclusive owner of a container's local user account.
///
/// A created user carries its credential material; a restored one does not
/// (the password is never persisted), which limits restored containers to
/// credential-free operations.
#[derive(Clone)]
pub struct ContainerUser {
    users: Arc<dyn UserManager>,
    username: String,
    credential: Option<Credential>,
}

impl ContainerUser {
    /// Creates the local account named `username` and optionally joins it to
    /// a preconfigured group.
    pub async fn create(
        users: Arc<dyn UserManager>,
        username: &str,
        group: Option<&str>,
    ) -> Result<Self> {
        info!(username, "creating container user");
        let credential = users.create_user(username).await?;
        if let Some(group) = group {
            users.add_to_group(username, group).await?;
        }
        Ok(Self {
            users,
            username: username.to_string(),
            credential: Some(credential),
        })
    }

    /// Reattaches to an existing account without touching it.
    pub fn restore(users: Arc<dyn UserManager>, username: &str) -> Self {
        Self {
            users,
            username: username.to_string(),
            credential: None,
        }
    }

    pub async fn delete(&self) -> Result<()> {
        info!(username = %self.username, "deleting container user");
        self.users.delete_user(&self.username).await
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub async fn sid(&self) -> Result<String> {
        self.users.get_sid(&self.username).await
    }
}

impl std::fmt::Debug for ContainerUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerUser")
            .field("username", &self.username)
            .field("restored", &self.credential.is_none())
            .finish()
    }
}
