//! Local account primitives
//!
//! Everything the reconciler needs from the operating system goes through
//! [`AccountSystem`]. [`LinuxAccounts`] talks to the shadow utilities,
//! [`DryRun`] wraps any implementation and only reports what it would change.

pub mod authorized_keys;
mod dry_run;
mod entries;
#[cfg(test)]
pub mod fake;
mod linux;

pub use dry_run::DryRun;
pub use entries::{GroupEntry, PasswdEntry};
pub use linux::LinuxAccounts;

use crate::error::SyncResult;

pub trait AccountSystem {
    fn passwd_entry(&self, username: &str) -> SyncResult<Option<PasswdEntry>>;

    fn group_entry(&self, group: &str) -> SyncResult<Option<GroupEntry>>;

    fn create_group(&self, group: &str) -> SyncResult<()>;

    /// Create a user with a home directory and the given login shell that is
    /// already a member of `group`.
    fn create_user(&self, username: &str, shell: &str, group: &str) -> SyncResult<()>;

    fn set_login_shell(&self, username: &str, shell: &str) -> SyncResult<()>;

    /// Add a supplementary group, keeping all existing memberships.
    fn add_user_to_group(&self, username: &str, group: &str) -> SyncResult<()>;

    fn read_authorized_keys(&self, account: &PasswdEntry) -> SyncResult<Option<String>>;

    /// Replace the whole authorized keys file and fix its ownership and mode.
    fn write_authorized_keys(&self, account: &PasswdEntry, contents: &str) -> SyncResult<()>;

    fn group_exists(&self, group: &str) -> SyncResult<bool> {
        Ok(self.group_entry(group)?.is_some())
    }
}

/// Partition groups into existing and missing groups
pub fn partition_groups(
    system: &dyn AccountSystem,
    groups: &[String],
) -> SyncResult<(Vec<String>, Vec<String>)> {
    let mut valid = Vec::new();
    let mut missing = Vec::new();

    for group in groups {
        if system.group_exists(group)? {
            valid.push(group.clone());
        } else {
            missing.push(group.clone());
        }
    }

    Ok((valid, missing))
}
