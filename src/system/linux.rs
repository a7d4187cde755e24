use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt, fchown};
use std::path::{Path, PathBuf};
use std::process::Output;

use duct::cmd;
use nix::libc;
use tempfile::NamedTempFile;

use crate::error::{SyncError, SyncResult};
use crate::ui::prelude::*;

use super::{AccountSystem, GroupEntry, PasswdEntry};

/// Directories searched for the shadow utilities; cron often runs with a
/// PATH that lacks the sbin directories.
const TOOL_SEARCH_PATH: &str = "/usr/sbin:/usr/bin:/sbin:/bin";

/// `getent` exit status for "key not found in database".
const GETENT_NOT_FOUND: i32 = 2;

/// [`AccountSystem`] backed by `getent`, `groupadd`, `useradd` and `usermod`.
#[derive(Debug, Clone)]
pub struct LinuxAccounts {
    getent: PathBuf,
    groupadd: PathBuf,
    useradd: PathBuf,
    usermod: PathBuf,
}

fn locate(program: &str) -> SyncResult<PathBuf> {
    which::which(program)
        .or_else(|_| which::which_in(program, Some(TOOL_SEARCH_PATH), "/"))
        .map_err(|e| SyncError::Config(format!("unable to locate {program}: {e}")))
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exit status {:?}", output.status.code())
    } else {
        stderr
    }
}

impl LinuxAccounts {
    pub fn new() -> SyncResult<Self> {
        Ok(Self {
            getent: locate("getent")?,
            groupadd: locate("groupadd")?,
            useradd: locate("useradd")?,
            usermod: locate("usermod")?,
        })
    }

    fn run(&self, subject: &str, program: &Path, args: &[&str]) -> SyncResult<Output> {
        emit(
            Level::Debug,
            "system.exec",
            &format!("{} {}", program.display(), args.join(" ")),
            None,
        );
        cmd(program, args)
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|e| SyncError::local(subject, format!("running {}: {e}", program.display())))
    }

    fn run_checked(&self, subject: &str, program: &Path, args: &[&str]) -> SyncResult<()> {
        let output = self.run(subject, program, args)?;
        if !output.status.success() {
            return Err(SyncError::local(
                subject,
                format!("{} failed: {}", program.display(), stderr_of(&output)),
            ));
        }
        Ok(())
    }

    fn getent(&self, database: &str, key: &str) -> SyncResult<Option<String>> {
        let output = self.run(key, &self.getent, &[database, key])?;
        match output.status.code() {
            Some(0) => Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned())),
            Some(GETENT_NOT_FOUND) => Ok(None),
            _ => Err(SyncError::local(
                key,
                format!("getent {database} failed: {}", stderr_of(&output)),
            )),
        }
    }
}

/// Path of an already opened file or directory that does not walk the
/// user-controlled path again.
fn fd_path(file: &File) -> PathBuf {
    PathBuf::from(format!("/proc/self/fd/{}", file.as_raw_fd()))
}

fn refuse(account: &PasswdEntry, path: &Path, reason: &str) -> SyncError {
    SyncError::local(
        &account.name,
        format!("refusing to use {}: {reason}", path.display()),
    )
}

fn open_nofollow(path: &Path, extra_flags: i32) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | extra_flags)
        .open(path)
}

/// Open `~/.ssh` without following symlinks, creating it when `create` is set.
///
/// Anything but a real directory owned by the account is refused.
fn open_ssh_dir(account: &PasswdEntry, create: bool) -> SyncResult<Option<File>> {
    let path = account.home.join(".ssh");
    let mut created = false;
    if create {
        match DirBuilder::new().mode(0o700).create(&path) {
            Ok(()) => created = true,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(SyncError::local(
                    &account.name,
                    format!("creating {}: {e}", path.display()),
                ));
            }
        }
    }

    let dir = match open_nofollow(&path, libc::O_DIRECTORY) {
        Ok(dir) => dir,
        Err(e) if e.kind() == ErrorKind::NotFound && !create => return Ok(None),
        Err(e) if matches!(e.raw_os_error(), Some(libc::ELOOP | libc::ENOTDIR)) => {
            return Err(refuse(account, &path, "not a directory"));
        }
        Err(e) => {
            return Err(SyncError::local(
                &account.name,
                format!("opening {}: {e}", path.display()),
            ));
        }
    };

    if created {
        fchown(&dir, Some(account.uid), Some(account.gid)).map_err(|e| {
            SyncError::local(&account.name, format!("chown {}: {e}", path.display()))
        })?;
    }
    let meta = dir
        .metadata()
        .map_err(|e| SyncError::local(&account.name, format!("stat {}: {e}", path.display())))?;
    if meta.uid() != account.uid {
        return Err(refuse(account, &path, "owned by another user"));
    }
    Ok(Some(dir))
}

impl AccountSystem for LinuxAccounts {
    fn passwd_entry(&self, username: &str) -> SyncResult<Option<PasswdEntry>> {
        let Some(line) = self.getent("passwd", username)? else {
            return Ok(None);
        };
        PasswdEntry::parse(&line)
            .map(Some)
            .ok_or_else(|| SyncError::local(username, format!("unparsable passwd entry {line:?}")))
    }

    fn group_entry(&self, group: &str) -> SyncResult<Option<GroupEntry>> {
        let Some(line) = self.getent("group", group)? else {
            return Ok(None);
        };
        GroupEntry::parse(&line)
            .map(Some)
            .ok_or_else(|| SyncError::local(group, format!("unparsable group entry {line:?}")))
    }

    fn create_group(&self, group: &str) -> SyncResult<()> {
        self.run_checked(group, &self.groupadd, &["--system", group])
    }

    fn create_user(&self, username: &str, shell: &str, group: &str) -> SyncResult<()> {
        self.run_checked(
            username,
            &self.useradd,
            &["-m", "-s", shell, "-G", group, username],
        )
    }

    fn set_login_shell(&self, username: &str, shell: &str) -> SyncResult<()> {
        self.run_checked(username, &self.usermod, &["-s", shell, username])
    }

    fn add_user_to_group(&self, username: &str, group: &str) -> SyncResult<()> {
        self.run_checked(username, &self.usermod, &["-a", "-G", group, username])
    }

    fn read_authorized_keys(&self, account: &PasswdEntry) -> SyncResult<Option<String>> {
        let path = account.authorized_keys_path();
        let Some(dir) = open_ssh_dir(account, false)? else {
            return Ok(None);
        };

        let mut file = match open_nofollow(&fd_path(&dir).join("authorized_keys"), 0) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.raw_os_error() == Some(libc::ELOOP) => {
                return Err(refuse(account, &path, "it is a symlink"));
            }
            Err(e) => {
                return Err(SyncError::local(
                    &account.name,
                    format!("opening {}: {e}", path.display()),
                ));
            }
        };

        let meta = file
            .metadata()
            .map_err(|e| SyncError::local(&account.name, format!("stat {}: {e}", path.display())))?;
        if !meta.is_file() {
            return Err(refuse(account, &path, "not a regular file"));
        }
        if meta.uid() != account.uid {
            return Err(refuse(account, &path, "owned by another user"));
        }

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| {
            SyncError::local(&account.name, format!("reading {}: {e}", path.display()))
        })?;
        Ok(Some(contents))
    }

    fn write_authorized_keys(&self, account: &PasswdEntry, contents: &str) -> SyncResult<()> {
        let path = account.authorized_keys_path();
        let io_err = |what: &str, e: std::io::Error| {
            SyncError::local(&account.name, format!("{what} {}: {e}", path.display()))
        };

        let dir = open_ssh_dir(account, true)?
            .ok_or_else(|| refuse(account, &path, "no .ssh directory"))?;
        dir.set_permissions(fs::Permissions::from_mode(0o700))
            .map_err(|e| io_err("chmod directory of", e))?;

        let dir_path = fd_path(&dir);
        let target = dir_path.join("authorized_keys");
        match fs::symlink_metadata(&target) {
            Ok(meta) if !meta.file_type().is_file() => {
                return Err(refuse(account, &path, "not a regular file"));
            }
            Ok(meta) if meta.uid() != account.uid => {
                return Err(refuse(account, &path, "owned by another user"));
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err("stat", e)),
        }

        let mut tmp = NamedTempFile::new_in(&dir_path).map_err(|e| io_err("staging", e))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| io_err("writing", e))?;
        let file = tmp.as_file();
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| io_err("chmod", e))?;
        fchown(file, Some(account.uid), Some(account.gid)).map_err(|e| io_err("chown", e))?;
        file.sync_all().map_err(|e| io_err("writing", e))?;
        tmp.persist(&target).map_err(|e| io_err("replacing", e.error))?;
        Ok(())
    }
}
