//! In-memory account system for tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::{SyncError, SyncResult};

use super::{AccountSystem, GroupEntry, PasswdEntry};

#[derive(Default)]
pub struct FakeSystem {
    pub users: RefCell<BTreeMap<String, PasswdEntry>>,
    pub groups: RefCell<BTreeMap<String, GroupEntry>>,
    pub authorized_keys: RefCell<BTreeMap<String, String>>,
    /// Every mutating call, in order.
    pub calls: RefCell<Vec<String>>,
    pub failing_users: RefCell<BTreeSet<String>>,
    pub fail_group_creation: Cell<bool>,
    /// Fail the next `add_user_to_group` call only.
    pub fail_next_group_add: Cell<bool>,
    next_id: Cell<u32>,
}

impl FakeSystem {
    pub fn new() -> Self {
        let system = Self::default();
        system.next_id.set(1000);
        system
    }

    fn allocate_id(&self) -> u32 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    pub fn with_group(self, name: &str, members: &[&str]) -> Self {
        let gid = self.allocate_id();
        self.groups.borrow_mut().insert(
            name.to_string(),
            GroupEntry {
                name: name.to_string(),
                gid,
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_user(self, name: &str, shell: &str) -> Self {
        self.insert_user(name, shell);
        self
    }

    pub fn with_authorized_keys(self, name: &str, contents: &str) -> Self {
        self.authorized_keys
            .borrow_mut()
            .insert(name.to_string(), contents.to_string());
        self
    }

    fn insert_user(&self, name: &str, shell: &str) {
        let id = self.allocate_id();
        self.users.borrow_mut().insert(
            name.to_string(),
            PasswdEntry {
                name: name.to_string(),
                uid: id,
                gid: id,
                home: PathBuf::from("/home").join(name),
                shell: shell.to_string(),
            },
        );
    }

    pub fn shell_of(&self, name: &str) -> Option<String> {
        self.users.borrow().get(name).map(|u| u.shell.clone())
    }

    pub fn keys_of(&self, name: &str) -> Option<String> {
        self.authorized_keys.borrow().get(name).cloned()
    }

    pub fn members_of(&self, group: &str) -> Vec<String> {
        self.groups
            .borrow()
            .get(group)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn check_user(&self, username: &str) -> SyncResult<()> {
        if self.failing_users.borrow().contains(username) {
            return Err(SyncError::local(username, "simulated failure"));
        }
        Ok(())
    }
}

impl AccountSystem for FakeSystem {
    fn passwd_entry(&self, username: &str) -> SyncResult<Option<PasswdEntry>> {
        Ok(self.users.borrow().get(username).cloned())
    }

    fn group_entry(&self, group: &str) -> SyncResult<Option<GroupEntry>> {
        Ok(self.groups.borrow().get(group).cloned())
    }

    fn create_group(&self, group: &str) -> SyncResult<()> {
        self.record(format!("create_group {group}"));
        if self.fail_group_creation.get() {
            return Err(SyncError::local(group, "groupadd failed"));
        }
        let gid = self.allocate_id();
        self.groups.borrow_mut().insert(
            group.to_string(),
            GroupEntry {
                name: group.to_string(),
                gid,
                members: Vec::new(),
            },
        );
        Ok(())
    }

    fn create_user(&self, username: &str, shell: &str, group: &str) -> SyncResult<()> {
        self.record(format!("create_user {username}"));
        self.check_user(username)?;
        let mut groups = self.groups.borrow_mut();
        let entry = groups
            .get_mut(group)
            .ok_or_else(|| SyncError::local(username, format!("no such group {group}")))?;
        entry.members.push(username.to_string());
        drop(groups);
        self.insert_user(username, shell);
        Ok(())
    }

    fn set_login_shell(&self, username: &str, shell: &str) -> SyncResult<()> {
        self.record(format!("set_shell {username} {shell}"));
        self.check_user(username)?;
        match self.users.borrow_mut().get_mut(username) {
            Some(user) => {
                user.shell = shell.to_string();
                Ok(())
            }
            None => Err(SyncError::local(username, "no such user")),
        }
    }

    fn add_user_to_group(&self, username: &str, group: &str) -> SyncResult<()> {
        self.record(format!("add_to_group {username} {group}"));
        self.check_user(username)?;
        if self.fail_next_group_add.replace(false) {
            return Err(SyncError::local(username, "/etc/group is locked"));
        }
        match self.groups.borrow_mut().get_mut(group) {
            Some(entry) => {
                entry.members.push(username.to_string());
                Ok(())
            }
            None => Err(SyncError::local(username, format!("no such group {group}"))),
        }
    }

    fn read_authorized_keys(&self, account: &PasswdEntry) -> SyncResult<Option<String>> {
        Ok(self.authorized_keys.borrow().get(&account.name).cloned())
    }

    fn write_authorized_keys(&self, account: &PasswdEntry, contents: &str) -> SyncResult<()> {
        self.record(format!("write_keys {}", account.name));
        self.check_user(&account.name)?;
        self.authorized_keys
            .borrow_mut()
            .insert(account.name.clone(), contents.to_string());
        Ok(())
    }
}
