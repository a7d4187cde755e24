use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields always requested from the directory for every group member.
pub const DIRECTORY_FIELDS: [&str; 5] = [
    "id",
    "displayName",
    "mail",
    "userPrincipalName",
    "accountEnabled",
];

/// One member of a directory group as returned by the directory service.
///
/// Known attributes are typed fields; anything else that was requested
/// (for example a custom username source) lands in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub account_enabled: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DirectoryUser {
    /// Look up an attribute by its directory name.
    pub fn attribute(&self, field: &str) -> Option<&str> {
        match field {
            "id" => Some(self.id.as_str()),
            "displayName" => self.display_name.as_deref(),
            "mail" => self.mail.as_deref(),
            "userPrincipalName" => self.user_principal_name.as_deref(),
            other => self.extra.get(other).and_then(serde_json::Value::as_str),
        }
    }
}

/// A named object in the key container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlob {
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl KeyBlob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_modified: None,
        }
    }
}

/// Lifecycle of a managed account within a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Discovered,
    UsernameResolved,
    Skipped,
    KeysMatched,
    KeysDownloaded,
    KeysPartial,
    Provisioned,
    Finalized,
    Disabled,
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccountState::Discovered => "discovered",
            AccountState::UsernameResolved => "username_resolved",
            AccountState::Skipped => "skipped",
            AccountState::KeysMatched => "keys_matched",
            AccountState::KeysDownloaded => "keys_downloaded",
            AccountState::KeysPartial => "keys_partial",
            AccountState::Provisioned => "provisioned",
            AccountState::Finalized => "finalized",
            AccountState::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// The local account derived from one enabled directory user.
#[derive(Debug, Clone)]
pub struct ManagedAccount {
    pub username: String,
    /// Directory id of the owning user, kept for log context only.
    pub source_id: String,
    pub principal_name: Option<String>,
    pub ssh_keys: Vec<String>,
    /// False when any key download failed; the authorized keys file is then left alone.
    pub manage_ssh_keys: bool,
    pub state: AccountState,
}

impl ManagedAccount {
    pub fn new(username: String, source: &DirectoryUser) -> Self {
        Self {
            username,
            source_id: source.id.clone(),
            principal_name: source.user_principal_name.clone(),
            ssh_keys: Vec::new(),
            manage_ssh_keys: true,
            state: AccountState::UsernameResolved,
        }
    }
}
