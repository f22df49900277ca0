// ABOUTME: Environment block construction for processes launched in containers
// ABOUTME: Builds flat name/value maps from the host process, a user profile, or k=v lists

use std::collections::HashMap;

use crate::capabilities::{LogonToken, UserManager};
use crate::error::{ContainerError, Result};

/// A flat process environment, materialized as a string-to-string map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentBlock {
    variables: HashMap<String, String>,
}

impl EnvironmentBlock {
    /// Captures the environment of the current process.
    pub fn inherited() -> Self {
        Self {
            variables: std::env::vars().collect(),
        }
    }

    /// Loads the profile environment of a target user through a logon token.
    pub async fn for_user(users: &dyn UserManager, token: &LogonToken) -> Result<Self> {
        Ok(Self {
            variables: users.environment_for_token(token).await?,
        })
    }

    /// Parses `NAME=value` entries into a block.
    ///
    /// Values may themselves contain `=`; only the first one splits. Entries
    /// without `=` or with an empty name are rejected.
    pub fn from_list<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut variables = HashMap::new();
        for entry in entries {
            let entry = entry.as_ref();
            let (name, value) = entry.split_once('=').ok_or_else(|| {
                ContainerError::InvalidInput(format!("environment entry without '=': {entry}"))
            })?;
            if name.is_empty() {
                return Err(ContainerError::InvalidInput(format!(
                    "environment entry with empty name: {entry}"
                )));
            }
            variables.insert(name.to_string(), value.to_string());
        }
        Ok(Self { variables })
    }

    /// Re-joins the block into `NAME=value` entries, sorted by name.
    pub fn to_list(&self) -> Vec<String> {
        let mut entries: Vec<String> = self
            .variables
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        entries.sort();
        entries
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.variables
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.variables
    }
}

impl From<HashMap<String, String>> for EnvironmentBlock {
    fn from(variables: HashMap<String, String>) -> Self {
        Self { variables }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_list_splits_on_first_equals_only() {
        let block =
            EnvironmentBlock::from_list(["a=b", "test=1234", "my=varwith=init"]).unwrap();
        assert_eq!(block.get("a"), Some("b"));
        assert_eq!(block.get("test"), Some("1234"));
        assert_eq!(block.get("my"), Some("varwith=init"));
    }

    #[test]
    fn from_list_round_trips_sorted_entries() {
        let entries = ["a=b", "my=varwith=init", "test=1234"];
        let block = EnvironmentBlock::from_list(entries).unwrap();
        assert_eq!(block.to_list(), entries);
    }

    #[test]
    fn entry_without_equals_is_rejected() {
        let err = EnvironmentBlock::from_list(["NOVALUE"]).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidInput(_)));
    }

    #[test]
    fn entry_with_empty_name_is_rejected() {
        let err = EnvironmentBlock::from_list(["=value"]).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidInput(_)));
    }

    #[test]
    fn inherited_block_sees_process_environment() {
        std::env::set_var("ENV_BLOCK_PROBE", "present");
        let block = EnvironmentBlock::inherited();
        assert_eq!(block.get("ENV_BLOCK_PROBE"), Some("present"));
        std::env::remove_var("ENV_BLOCK_PROBE");
    }
}
