//! Run configuration
//!
//! Settings come from three layers: command line flags (each with an
//! environment variable fallback), an optional TOML file, and built-in
//! defaults, in that order of precedence.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::Deserialize;

use crate::azure::CloudEnvironment;
use crate::error::{SyncError, SyncResult};
use crate::ui::{LogLevel, OutputFormat};

pub const DEFAULT_USERNAME_FIELD: &str = "userPrincipalName";
pub const DEFAULT_KEY_SUFFIX: &str = ".pub";
pub const DEFAULT_MANAGED_GROUP: &str = "azure-ad-users-to-linux";
pub const DEFAULT_LOGIN_SHELL: &str = "/bin/bash";
pub const DEFAULT_DISABLED_SHELL: &str = "/sbin/nologin";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// A string that never shows up in debug output.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// What to do when one directory group cannot be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupFailurePolicy {
    /// Keep going with the other groups, skip disabling, fail at the end.
    #[default]
    Continue,
    /// Stop the run at the first failing group.
    Abort,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// TOML file with default values for any of the options below
    #[arg(long, env = "AAD_USERS_TO_LINUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// The azure tenant id
    #[arg(long, env = "AZURE_TENANT_ID")]
    pub tenant_id: Option<String>,

    /// The azure service principal client id
    #[arg(long, env = "AZURE_CLIENT_ID")]
    pub client_id: Option<String>,

    /// The azure service principal client secret
    #[arg(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// National cloud hosting the tenant
    #[arg(long, env = "AZURE_CLOUD", value_enum)]
    pub cloud: Option<CloudEnvironment>,

    /// Azure ad group ids to get users from, separated by commas or spaces
    #[arg(long = "azure-ad-groups", env = "AZURE_AD_GROUPS", value_delimiter = ',')]
    pub groups: Vec<String>,

    /// The directory field linux usernames are generated from [default: userPrincipalName]
    #[arg(long = "azure-ad-username-field", env = "AZURE_AD_USERNAME_FIELD")]
    pub username_field: Option<String>,

    /// Storage account containing the users' public ssh keys
    #[arg(long = "storage-account-name", env = "STORAGE_ACCOUNT_NAME")]
    pub storage_account: Option<String>,

    /// Blob container in the storage account holding the public ssh keys
    #[arg(long = "storage-account-container", env = "STORAGE_ACCOUNT_CONTAINER")]
    pub storage_container: Option<String>,

    /// Only consider blobs whose name starts with this prefix
    #[arg(long, env = "SSH_KEYS_PREFIX")]
    pub ssh_keys_prefix: Option<String>,

    /// Only consider blobs whose name ends with this suffix [default: .pub]
    #[arg(long, env = "SSH_KEYS_SUFFIX")]
    pub ssh_keys_suffix: Option<String>,

    /// Group identifying the accounts managed by this tool [default: azure-ad-users-to-linux]
    #[arg(long = "linux-group-name", env = "LINUX_GROUP_NAME")]
    pub managed_group: Option<String>,

    /// Additional groups to join the managed accounts to, separated by commas or spaces
    #[arg(
        long = "additional-linux-groups",
        env = "ADDITIONAL_LINUX_GROUPS",
        value_delimiter = ','
    )]
    pub additional_groups: Vec<String>,

    /// Login shell of active accounts [default: /bin/bash]
    #[arg(long, env = "LOGIN_SHELL")]
    pub login_shell: Option<String>,

    /// Login shell set on accounts no longer in the directory [default: /sbin/nologin]
    #[arg(long, env = "DISABLED_SHELL")]
    pub disabled_shell: Option<String>,

    /// Behaviour when a directory group cannot be resolved [default: continue]
    #[arg(long, env = "ON_GROUP_ERROR", value_enum)]
    pub on_group_error: Option<GroupFailurePolicy>,

    /// Timeout in seconds for every outbound HTTP request [default: 30]
    #[arg(long, env = "HTTP_TIMEOUT")]
    pub http_timeout: Option<u64>,

    /// The log level for the run [default: info]
    #[arg(long, env = "LOGLEVEL", value_enum, ignore_case = true)]
    pub log_level: Option<LogLevel>,

    /// Output format for log events [default: text]
    #[arg(long, env = "LOG_FORMAT", value_enum)]
    pub log_format: Option<OutputFormat>,
}

/// Contents of the optional TOML configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<Secret>,
    pub cloud: Option<CloudEnvironment>,
    pub groups: Vec<String>,
    pub username_field: Option<String>,
    pub storage_account: Option<String>,
    pub storage_container: Option<String>,
    pub ssh_keys_prefix: Option<String>,
    pub ssh_keys_suffix: Option<String>,
    pub managed_group: Option<String>,
    pub additional_groups: Vec<String>,
    pub login_shell: Option<String>,
    pub disabled_shell: Option<String>,
    pub on_group_error: Option<GroupFailurePolicy>,
    pub http_timeout: Option<u64>,
    pub log_level: Option<LogLevel>,
    pub log_format: Option<OutputFormat>,
}

impl FileConfig {
    pub fn load(path: &Path) -> SyncResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("reading config file {}: {e}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|e| {
            SyncError::Config(format!("parsing config file {}: {e}", path.display()))
        })
    }
}

/// Everything the reconciler needs to know about the local side.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub directory_groups: Vec<String>,
    pub username_field: String,
    pub key_prefix: Option<String>,
    pub key_suffix: String,
    pub managed_group: String,
    pub additional_groups: Vec<String>,
    pub login_shell: String,
    pub disabled_shell: String,
    pub on_group_error: GroupFailurePolicy,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Secret,
    pub cloud: CloudEnvironment,
    pub storage_account: String,
    pub storage_container: String,
    pub http_timeout: Duration,
    pub log_level: LogLevel,
    pub log_format: OutputFormat,
    pub sync: SyncOptions,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, flag: &str, env: &str) -> SyncResult<String> {
    non_empty(value).ok_or_else(|| {
        SyncError::Config(format!("missing required setting --{flag} (or {env})"))
    })
}

/// Split list values on commas and whitespace, dropping blanks and repeats.
fn clean_list(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let items = values
        .iter()
        .flat_map(|v| v.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|item| !item.is_empty());
    for item in items {
        if !out.iter().any(|o| o == item) {
            out.push(item.to_string());
        }
    }
    out
}

/// Command line values win over file values.
fn pick<T>(cli: Option<T>, file: Option<T>) -> Option<T> {
    cli.or(file)
}

fn pick_list(cli: Vec<String>, file: Vec<String>) -> Vec<String> {
    let cli = clean_list(cli);
    if cli.is_empty() { clean_list(file) } else { cli }
}

impl Settings {
    pub fn resolve(args: ConfigArgs) -> SyncResult<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    fn merge(args: ConfigArgs, file: FileConfig) -> SyncResult<Self> {
        let tenant_id = required(
            pick(args.tenant_id, file.tenant_id),
            "tenant-id",
            "AZURE_TENANT_ID",
        )?;
        let client_id = required(
            pick(args.client_id, file.client_id),
            "client-id",
            "AZURE_CLIENT_ID",
        )?;
        let client_secret = required(
            pick(args.client_secret, file.client_secret.map(|s| s.expose().to_string())),
            "client-secret",
            "AZURE_CLIENT_SECRET",
        )?;
        let storage_account = required(
            pick(args.storage_account, file.storage_account),
            "storage-account-name",
            "STORAGE_ACCOUNT_NAME",
        )?;
        let storage_container = required(
            pick(args.storage_container, file.storage_container),
            "storage-account-container",
            "STORAGE_ACCOUNT_CONTAINER",
        )?;

        let directory_groups = pick_list(args.groups, file.groups);
        if directory_groups.is_empty() {
            return Err(SyncError::Config(
                "missing required setting --azure-ad-groups (or AZURE_AD_GROUPS)".into(),
            ));
        }

        let http_timeout =
            pick(args.http_timeout, file.http_timeout).unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        if http_timeout == 0 {
            return Err(SyncError::Config(
                "--http-timeout must be at least 1 second".into(),
            ));
        }

        let sync = SyncOptions {
            directory_groups,
            username_field: non_empty(pick(args.username_field, file.username_field))
                .unwrap_or_else(|| DEFAULT_USERNAME_FIELD.to_string()),
            key_prefix: non_empty(pick(args.ssh_keys_prefix, file.ssh_keys_prefix)),
            key_suffix: non_empty(pick(args.ssh_keys_suffix, file.ssh_keys_suffix))
                .unwrap_or_else(|| DEFAULT_KEY_SUFFIX.to_string()),
            managed_group: non_empty(pick(args.managed_group, file.managed_group))
                .unwrap_or_else(|| DEFAULT_MANAGED_GROUP.to_string()),
            additional_groups: pick_list(args.additional_groups, file.additional_groups),
            login_shell: non_empty(pick(args.login_shell, file.login_shell))
                .unwrap_or_else(|| DEFAULT_LOGIN_SHELL.to_string()),
            disabled_shell: non_empty(pick(args.disabled_shell, file.disabled_shell))
                .unwrap_or_else(|| DEFAULT_DISABLED_SHELL.to_string()),
            on_group_error: pick(args.on_group_error, file.on_group_error).unwrap_or_default(),
        };

        Ok(Self {
            tenant_id,
            client_id,
            client_secret: Secret::new(client_secret),
            cloud: pick(args.cloud, file.cloud).unwrap_or_default(),
            storage_account,
            storage_container,
            http_timeout: Duration::from_secs(http_timeout),
            log_level: pick(args.log_level, file.log_level).unwrap_or(LogLevel::Info),
            log_format: pick(args.log_format, file.log_format).unwrap_or(OutputFormat::Text),
            sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ConfigArgs,
    }

    fn parse(argv: &[&str]) -> ConfigArgs {
        let mut full = vec!["test"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    const REQUIRED: &[&str] = &[
        "--tenant-id",
        "t",
        "--client-id",
        "c",
        "--client-secret",
        "s",
        "--azure-ad-groups",
        "g1,g2",
        "--storage-account-name",
        "keys",
        "--storage-account-container",
        "ssh",
    ];

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::merge(parse(REQUIRED), FileConfig::default()).unwrap();
        assert_eq!(settings.sync.directory_groups, ["g1", "g2"]);
        assert_eq!(settings.sync.username_field, DEFAULT_USERNAME_FIELD);
        assert_eq!(settings.sync.key_suffix, ".pub");
        assert_eq!(settings.sync.key_prefix, None);
        assert_eq!(settings.sync.managed_group, DEFAULT_MANAGED_GROUP);
        assert_eq!(settings.sync.disabled_shell, "/sbin/nologin");
        assert_eq!(settings.sync.on_group_error, GroupFailurePolicy::Continue);
        assert_eq!(settings.http_timeout, Duration::from_secs(30));
        assert_eq!(settings.cloud, CloudEnvironment::Global);
    }

    #[test]
    fn test_missing_required_value() {
        let err = Settings::merge(parse(&["--tenant-id", "t"]), FileConfig::default()).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.to_string().contains("--client-id"));
    }

    #[test]
    fn test_missing_groups() {
        let argv: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|a| *a != "--azure-ad-groups" && *a != "g1,g2")
            .collect();
        let err = Settings::merge(parse(&argv), FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--azure-ad-groups"));
    }

    #[test]
    fn test_file_fills_gaps_and_cli_wins() {
        let file: FileConfig = toml::from_str(
            r#"
            tenant_id = "file-tenant"
            client_id = "file-client"
            client_secret = "file-secret"
            groups = ["fg1"]
            storage_account = "filekeys"
            storage_container = "ssh"
            ssh_keys_prefix = "keys/"
            additional_groups = ["docker", "wheel"]
            on_group_error = "abort"
            cloud = "china"
            log_level = "debug"
            "#,
        )
        .unwrap();

        let settings = Settings::merge(parse(&["--tenant-id", "cli-tenant"]), file).unwrap();
        assert_eq!(settings.tenant_id, "cli-tenant");
        assert_eq!(settings.client_id, "file-client");
        assert_eq!(settings.client_secret.expose(), "file-secret");
        assert_eq!(settings.sync.directory_groups, ["fg1"]);
        assert_eq!(settings.sync.key_prefix.as_deref(), Some("keys/"));
        assert_eq!(settings.sync.additional_groups, ["docker", "wheel"]);
        assert_eq!(settings.sync.on_group_error, GroupFailurePolicy::Abort);
        assert_eq!(settings.cloud, CloudEnvironment::China);
        assert_eq!(settings.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_lists_are_trimmed_and_deduplicated() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--additional-linux-groups", "docker, wheel,,docker"]);
        let settings = Settings::merge(parse(&argv), FileConfig::default()).unwrap();
        assert_eq!(settings.sync.additional_groups, ["docker", "wheel"]);
    }

    #[test]
    fn test_space_separated_lists() {
        let argv: Vec<&str> = REQUIRED
            .iter()
            .map(|a| if *a == "g1,g2" { "g1 g2  g3" } else { *a })
            .chain(["--additional-linux-groups", "docker wheel,adm"])
            .collect();
        let settings = Settings::merge(parse(&argv), FileConfig::default()).unwrap();
        assert_eq!(settings.sync.directory_groups, ["g1", "g2", "g3"]);
        assert_eq!(settings.sync.additional_groups, ["docker", "wheel", "adm"]);
    }

    #[test]
    fn test_log_level_aliases() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--log-level", "WARNING"]);
        let settings = Settings::merge(parse(&argv), FileConfig::default()).unwrap();
        assert_eq!(settings.log_level, LogLevel::Warn);

        let file: FileConfig = toml::from_str(r#"log_level = "critical""#).unwrap();
        assert_eq!(file.log_level, Some(LogLevel::Error));
    }

    #[test]
    fn test_log_level_ignores_case() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--log-level", "DEBUG"]);
        let settings = Settings::merge(parse(&argv), FileConfig::default()).unwrap();
        assert_eq!(settings.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_unknown_file_keys_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tenant = \"typo\"").unwrap();
        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_secret_is_redacted() {
        let settings = Settings::merge(parse(REQUIRED), FileConfig::default()).unwrap();
        let debug = format!("{settings:?}");
        assert!(!debug.contains("client_secret: \"s\""));
        assert!(debug.contains("Secret(****)"));
    }
}
