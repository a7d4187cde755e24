use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde_json::json;

use crate::error::SyncResult;
use crate::ui::prelude::*;

use super::{AccountSystem, GroupEntry, PasswdEntry};

/// Reports mutations instead of performing them.
///
/// Queries go to the wrapped system. Users and groups "created" during the
/// run are remembered so later lookups see them, the way a real run would.
pub struct DryRun<S> {
    inner: S,
    /// Login shell of every user created so far.
    created_users: RefCell<BTreeMap<String, String>>,
    created_groups: RefCell<BTreeSet<String>>,
    /// `(group, user)` memberships added so far.
    added_members: RefCell<BTreeSet<(String, String)>>,
}

impl<S: AccountSystem> DryRun<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            created_users: RefCell::new(BTreeMap::new()),
            created_groups: RefCell::new(BTreeSet::new()),
            added_members: RefCell::new(BTreeSet::new()),
        }
    }

    fn report(&self, code: &str, message: String, data: serde_json::Value) {
        emit(
            Level::Info,
            code,
            &format!("[dry-run] would {message}"),
            Some(data),
        );
    }
}

impl<S: AccountSystem> AccountSystem for DryRun<S> {
    fn passwd_entry(&self, username: &str) -> SyncResult<Option<PasswdEntry>> {
        if let Some(shell) = self.created_users.borrow().get(username) {
            return Ok(Some(PasswdEntry {
                name: username.to_string(),
                uid: 0,
                gid: 0,
                home: PathBuf::from("/home").join(username),
                shell: shell.clone(),
            }));
        }
        self.inner.passwd_entry(username)
    }

    fn group_entry(&self, group: &str) -> SyncResult<Option<GroupEntry>> {
        let entry = if self.created_groups.borrow().contains(group) {
            Some(GroupEntry {
                name: group.to_string(),
                gid: 0,
                members: Vec::new(),
            })
        } else {
            self.inner.group_entry(group)?
        };
        Ok(entry.map(|mut entry| {
            let added = self.added_members.borrow();
            entry.members.extend(
                added
                    .iter()
                    .filter(|(g, _)| g == group)
                    .map(|(_, user)| user.clone()),
            );
            entry
        }))
    }

    fn create_group(&self, group: &str) -> SyncResult<()> {
        self.report(
            "dry_run.create_group",
            format!("create group {group}"),
            json!({ "group": group }),
        );
        self.created_groups.borrow_mut().insert(group.to_string());
        Ok(())
    }

    fn create_user(&self, username: &str, shell: &str, group: &str) -> SyncResult<()> {
        self.report(
            "dry_run.create_user",
            format!("create user {username} with shell {shell} in group {group}"),
            json!({ "username": username, "shell": shell, "group": group }),
        );
        self.created_users
            .borrow_mut()
            .insert(username.to_string(), shell.to_string());
        self.added_members
            .borrow_mut()
            .insert((group.to_string(), username.to_string()));
        Ok(())
    }

    fn set_login_shell(&self, username: &str, shell: &str) -> SyncResult<()> {
        self.report(
            "dry_run.set_shell",
            format!("set login shell of {username} to {shell}"),
            json!({ "username": username, "shell": shell }),
        );
        Ok(())
    }

    fn add_user_to_group(&self, username: &str, group: &str) -> SyncResult<()> {
        self.report(
            "dry_run.add_to_group",
            format!("add {username} to group {group}"),
            json!({ "username": username, "group": group }),
        );
        self.added_members
            .borrow_mut()
            .insert((group.to_string(), username.to_string()));
        Ok(())
    }

    fn read_authorized_keys(&self, account: &PasswdEntry) -> SyncResult<Option<String>> {
        if self.created_users.borrow().contains_key(&account.name) {
            return Ok(None);
        }
        self.inner.read_authorized_keys(account)
    }

    fn write_authorized_keys(&self, account: &PasswdEntry, contents: &str) -> SyncResult<()> {
        self.report(
            "dry_run.authorized_keys",
            format!(
                "write {} key line(s) to {}",
                contents.lines().count(),
                account.authorized_keys_path().display()
            ),
            json!({ "username": account.name }),
        );
        Ok(())
    }
}
