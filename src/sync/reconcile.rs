use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::config::{GroupFailurePolicy, SyncOptions};
use crate::error::{SyncError, SyncResult};
use crate::system::{AccountSystem, PasswdEntry, authorized_keys, partition_groups};
use crate::ui::prelude::*;
use crate::users::{
    AccountState, DirectoryUser, KeyBlob, KeyPattern, ManagedAccount, derive_username,
    sort_users_unique,
};

use super::{BlobStore, Directory, SyncReport};

/// Result of listing the key container once for the whole run.
enum KeyListing {
    Listed(Vec<KeyBlob>),
    /// The container is reachable but holds no matching blobs.
    Empty,
    /// Listing failed; no account's keys can be verified.
    ///
    /// Every account keeps its current authorized keys instead of being
    /// reconciled to "no keys", so an outage never locks users out.
    Unavailable,
}

fn advance(account: &mut ManagedAccount, next: AccountState) {
    emit(
        Level::Debug,
        "sync.state",
        &format!("{}: {} -> {}", account.username, account.state, next),
        None,
    );
    account.state = next;
}

fn skip_user(user: &DirectoryUser, report: &mut SyncReport, reason: String) {
    emit(
        Level::Warn,
        "sync.user.skipped",
        &format!("Skipping directory user {}: {reason}", user.id),
        Some(json!({ "directory_id": user.id, "state": AccountState::Skipped.to_string() })),
    );
    report.skip(&user.id, reason);
}

/// Drives one synchronization run.
pub struct Reconciler<'a> {
    options: &'a SyncOptions,
    directory: &'a dyn Directory,
    blobs: &'a dyn BlobStore,
    system: &'a dyn AccountSystem,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        options: &'a SyncOptions,
        directory: &'a dyn Directory,
        blobs: &'a dyn BlobStore,
        system: &'a dyn AccountSystem,
    ) -> Self {
        Self {
            options,
            directory,
            blobs,
            system,
        }
    }

    /// Run the whole reconciliation.
    ///
    /// Errors returned here are fatal for the run. Per-account problems are
    /// logged and collected in the report instead.
    pub fn run(&self) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();

        self.ensure_managed_group()?;

        let users = self.fetch_directory_users(&mut report)?;
        let listing = self.list_key_blobs();

        let mut accounts = Vec::new();
        let mut claimed: HashMap<String, String> = HashMap::new();
        for user in users {
            if let Some(account) = self.resolve_account(&user, &mut claimed, &mut report) {
                accounts.push(account);
            }
        }

        for account in &mut accounts {
            self.collect_keys(account, &listing);
        }

        let groups = self.additional_groups()?;
        for account in &mut accounts {
            match self.provision(account, &groups, &mut report) {
                Ok(()) => report.provisioned.push(account.username.clone()),
                Err(e) => {
                    emit(
                        Level::Warn,
                        "sync.account.failed",
                        &format!("Unable to manage user {}: {e}", account.username),
                        Some(json!({ "username": account.username, "kind": e.kind() })),
                    );
                    report.fail(&account.username, e);
                }
            }
        }

        if report.failed_groups.is_empty() {
            self.disable_stale_accounts(&accounts, &mut report);
        } else {
            emit(
                Level::Warn,
                "sync.disable.skipped",
                "Not disabling any account because some directory groups could not be resolved",
                Some(json!({ "groups": report.failed_groups })),
            );
        }

        Ok(report)
    }

    fn ensure_managed_group(&self) -> SyncResult<()> {
        let group = &self.options.managed_group;
        if let Some(entry) = self.system.group_entry(group)? {
            emit(
                Level::Debug,
                "sync.group.exists",
                &format!(
                    "Managed group {} (gid {}) has {} member(s)",
                    entry.name,
                    entry.gid,
                    entry.members.len()
                ),
                None,
            );
            return Ok(());
        }
        emit(
            Level::Info,
            "sync.group.create",
            &format!("Create linux group {group}"),
            Some(json!({ "group": group })),
        );
        self.system.create_group(group)
    }

    fn fetch_directory_users(&self, report: &mut SyncReport) -> SyncResult<Vec<DirectoryUser>> {
        let extra_fields = vec![self.options.username_field.clone()];
        let groups = &self.options.directory_groups;
        let mut users = Vec::new();

        for group in groups {
            match self.directory.group_members(group, &extra_fields) {
                Ok(members) => {
                    emit(
                        Level::Info,
                        "sync.directory.group",
                        &format!("Retrieved {} enabled members of group {group}", members.len()),
                        Some(json!({ "group": group, "members": members.len() })),
                    );
                    users.extend(members);
                }
                Err(e) => {
                    emit(
                        Level::Error,
                        "sync.directory.group_failed",
                        &format!("Unable to retrieve members of directory group {group}: {e}"),
                        Some(json!({ "group": group, "kind": e.kind() })),
                    );
                    if self.options.on_group_error == GroupFailurePolicy::Abort {
                        return Err(e);
                    }
                    report.failed_groups.push(group.clone());
                }
            }
        }

        if !groups.is_empty() && report.failed_groups.len() == groups.len() {
            return Err(SyncError::upstream(
                "Directory",
                format!("none of the {} directory groups could be resolved", groups.len()),
            ));
        }

        Ok(sort_users_unique(users))
    }

    fn list_key_blobs(&self) -> KeyListing {
        let prefix = self.options.key_prefix.as_deref();
        match self.blobs.list_blobs(prefix, &self.options.key_suffix) {
            Ok(blobs) => {
                emit(
                    Level::Debug,
                    "sync.keys.listed",
                    &format!("Found {} candidate key blobs", blobs.len()),
                    None,
                );
                KeyListing::Listed(blobs)
            }
            Err(SyncError::NotFound(e)) => {
                emit(Level::Warn, "sync.keys.empty_container", &e.to_string(), None);
                KeyListing::Empty
            }
            Err(e) => {
                emit(
                    Level::Warn,
                    "sync.keys.list_failed",
                    &format!("Unable to list ssh keys, leaving authorized keys untouched: {e}"),
                    Some(json!({ "kind": e.kind() })),
                );
                KeyListing::Unavailable
            }
        }
    }

    /// Derive the local account for a directory user, or skip it.
    fn resolve_account(
        &self,
        user: &DirectoryUser,
        claimed: &mut HashMap<String, String>,
        report: &mut SyncReport,
    ) -> Option<ManagedAccount> {
        let field = &self.options.username_field;
        emit(
            Level::Debug,
            "sync.state",
            &format!("{}: {}", user.id, AccountState::Discovered),
            None,
        );

        let username = match derive_username(user.attribute(field)) {
            Ok(username) => username,
            Err(e) => {
                skip_user(user, report, format!("field {field}: {e}"));
                return None;
            }
        };

        if let Some(owner) = claimed.get(&username) {
            skip_user(
                user,
                report,
                format!("username {username} is already taken by directory user {owner}"),
            );
            return None;
        }

        // Built here so an unusable principal skips the user before provisioning.
        if let Err(e) = self.key_pattern(user.user_principal_name.as_deref()) {
            skip_user(user, report, e.to_string());
            return None;
        }

        claimed.insert(username.clone(), user.id.clone());
        Some(ManagedAccount::new(username, user))
    }

    fn key_pattern(&self, principal: Option<&str>) -> SyncResult<KeyPattern> {
        KeyPattern::new(
            principal.unwrap_or_default(),
            self.options.key_prefix.as_deref(),
            &self.options.key_suffix,
        )
    }

    fn collect_keys(&self, account: &mut ManagedAccount, listing: &KeyListing) {
        let blobs: &[KeyBlob] = match listing {
            KeyListing::Listed(blobs) => blobs,
            KeyListing::Empty => &[],
            KeyListing::Unavailable => {
                account.manage_ssh_keys = false;
                advance(account, AccountState::KeysPartial);
                return;
            }
        };

        let principal = account.principal_name.clone().unwrap_or_default();
        let matched = match self.key_pattern(Some(&principal)) {
            Ok(pattern) => pattern.select(blobs),
            Err(_) => Vec::new(),
        };
        advance(account, AccountState::KeysMatched);

        if matched.is_empty() {
            emit(
                Level::Warn,
                "sync.keys.none",
                &format!("No public ssh keys found for {principal}"),
                Some(json!({ "username": account.username })),
            );
        }

        for blob in matched {
            let modified = blob
                .last_modified
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            emit(
                Level::Debug,
                "sync.keys.download",
                &format!("Downloading {} (last modified {modified})", blob.name),
                None,
            );
            match self.blobs.download_blob(&blob.name) {
                Ok(key) => account.ssh_keys.push(key),
                Err(e) => {
                    account.manage_ssh_keys = false;
                    emit(
                        Level::Warn,
                        "sync.keys.download_failed",
                        &format!("Unable to download ssh pub key {}: {e}", blob.name),
                        Some(json!({ "username": account.username, "blob": blob.name })),
                    );
                }
            }
        }

        let next = if account.manage_ssh_keys {
            AccountState::KeysDownloaded
        } else {
            AccountState::KeysPartial
        };
        advance(account, next);
    }

    /// Additional groups that exist locally; missing ones are reported once.
    fn additional_groups(&self) -> SyncResult<Vec<String>> {
        let (valid, missing) = partition_groups(self.system, &self.options.additional_groups)?;
        if !missing.is_empty() {
            emit(
                Level::Warn,
                "sync.group.missing",
                &format!("Skipping unknown group(s): {}", missing.join(", ")),
                Some(json!({ "groups": missing })),
            );
        }
        Ok(valid)
    }

    fn provision(
        &self,
        account: &mut ManagedAccount,
        additional_groups: &[String],
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let username = account.username.clone();
        let managed_group = &self.options.managed_group;

        let entry = match self.system.passwd_entry(&username)? {
            Some(entry) => {
                let managed = self
                    .system
                    .group_entry(managed_group)?
                    .is_some_and(|g| g.has_member(&username));
                if !managed {
                    return Err(SyncError::local(
                        &username,
                        format!(
                            "account exists but is not a member of {managed_group}, \
                             refusing to take it over"
                        ),
                    ));
                }
                entry
            }
            None => {
                emit(
                    Level::Info,
                    "sync.account.create",
                    &format!("Create linux user {username}"),
                    Some(json!({ "username": username, "directory_id": account.source_id })),
                );
                self.system
                    .create_user(&username, &self.options.login_shell, managed_group)?;
                self.system
                    .passwd_entry(&username)?
                    .ok_or_else(|| SyncError::local(&username, "account missing after creation"))?
            }
        };

        for group in std::iter::once(managed_group).chain(additional_groups) {
            let is_member = self
                .system
                .group_entry(group)?
                .is_some_and(|g| g.has_member(&username));
            if !is_member {
                emit(
                    Level::Info,
                    "sync.account.group",
                    &format!("Add {username} to group {group}"),
                    Some(json!({ "username": username, "group": group })),
                );
                self.system.add_user_to_group(&username, group)?;
            }
        }

        if entry.shell != self.options.login_shell {
            emit(
                Level::Info,
                "sync.account.enable",
                &format!("Enable login shell {} for {username}", self.options.login_shell),
                Some(json!({ "username": username })),
            );
            self.system
                .set_login_shell(&username, &self.options.login_shell)?;
        }
        advance(account, AccountState::Provisioned);

        self.sync_authorized_keys(account, &entry, report)?;
        advance(account, AccountState::Finalized);
        Ok(())
    }

    fn sync_authorized_keys(
        &self,
        account: &ManagedAccount,
        entry: &PasswdEntry,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        if !account.manage_ssh_keys {
            emit(
                Level::Warn,
                "sync.keys.unmanaged",
                &format!(
                    "Leaving authorized keys of {} untouched, not all keys could be retrieved",
                    account.username
                ),
                Some(json!({ "username": account.username })),
            );
            report.unmanaged_keys.push(account.username.clone());
            return Ok(());
        }

        let existing = self.system.read_authorized_keys(entry)?;
        let rendered = authorized_keys::render(existing.as_deref(), &account.ssh_keys);
        let unchanged = match existing.as_deref() {
            Some(current) => current == rendered,
            None => rendered.is_empty(),
        };
        if unchanged {
            emit(
                Level::Debug,
                "sync.keys.unchanged",
                &format!("Authorized keys of {} are up to date", account.username),
                None,
            );
            return Ok(());
        }

        self.system.write_authorized_keys(entry, &rendered)?;
        emit(
            Level::Info,
            "sync.keys.updated",
            &format!(
                "Updated authorized keys of {} ({} managed key(s))",
                account.username,
                authorized_keys::key_lines(&account.ssh_keys).len()
            ),
            Some(json!({ "username": account.username })),
        );
        Ok(())
    }

    /// Switch managed-group members that are no longer wanted to the disabled shell.
    fn disable_stale_accounts(&self, accounts: &[ManagedAccount], report: &mut SyncReport) {
        let managed_group = &self.options.managed_group;
        let members = match self.system.group_entry(managed_group) {
            Ok(entry) => entry.map(|g| g.members).unwrap_or_default(),
            Err(e) => {
                emit(
                    Level::Error,
                    "sync.disable.failed",
                    &format!("Unable to read members of {managed_group}: {e}"),
                    None,
                );
                report.fail(managed_group, e);
                return;
            }
        };

        let wanted: HashSet<&str> = accounts.iter().map(|a| a.username.as_str()).collect();
        for member in members.iter().filter(|m| !wanted.contains(m.as_str())) {
            match self.disable(member) {
                Ok(true) => report.disabled.push(member.clone()),
                Ok(false) => {}
                Err(e) => {
                    emit(
                        Level::Warn,
                        "sync.disable.failed",
                        &format!("Unable to disable user {member}: {e}"),
                        Some(json!({ "username": member })),
                    );
                    report.fail(member, e);
                }
            }
        }
    }

    /// Returns whether the account's shell was changed.
    fn disable(&self, username: &str) -> SyncResult<bool> {
        let disabled_shell = &self.options.disabled_shell;
        match self.system.passwd_entry(username)? {
            None => {
                emit(
                    Level::Warn,
                    "sync.disable.missing",
                    &format!("Group member {username} has no passwd entry"),
                    None,
                );
                Ok(false)
            }
            Some(entry) if &entry.shell == disabled_shell => Ok(false),
            Some(_) => {
                emit(
                    Level::Warn,
                    "sync.disable",
                    &format!("Disabling user {username}"),
                    Some(json!({
                        "username": username,
                        "state": AccountState::Disabled.to_string(),
                    })),
                );
                self.system.set_login_shell(username, disabled_shell)?;
                Ok(true)
            }
        }
    }
}
