mod common;

use anyhow::Result;
use common::{TestEnvironment, run_sync_command};

const CREDENTIALS: &[(&str, &str)] = &[
    ("AZURE_TENANT_ID", "00000000-0000-0000-0000-000000000000"),
    ("AZURE_CLIENT_ID", "11111111-1111-1111-1111-111111111111"),
    ("AZURE_CLIENT_SECRET", "not-a-real-secret"),
    ("STORAGE_ACCOUNT_NAME", "keystore"),
    ("STORAGE_ACCOUNT_CONTAINER", "ssh-keys"),
];

#[test]
fn test_help_lists_operator_options() -> Result<()> {
    let output = run_sync_command(&["--help"], &[])?;
    assert_eq!(output.exit_code, 0, "help failed: {}", output.stderr);
    for flag in [
        "--azure-ad-groups",
        "--storage-account-name",
        "--linux-group-name",
        "--dry-run",
    ] {
        assert!(output.stdout.contains(flag), "missing {flag} in help");
    }
    Ok(())
}

#[test]
fn test_missing_configuration_fails() -> Result<()> {
    let output = run_sync_command(&["--no-color"], &[])?;
    assert_eq!(output.exit_code, 1);
    assert!(
        output.stderr.contains("missing required setting --tenant-id"),
        "unexpected stderr: {}",
        output.stderr
    );
    Ok(())
}

#[test]
fn test_environment_fallbacks_are_read() -> Result<()> {
    let output = run_sync_command(&["--no-color"], CREDENTIALS)?;
    assert_eq!(output.exit_code, 1);
    assert!(
        output.stderr.contains("--azure-ad-groups (or AZURE_AD_GROUPS)"),
        "unexpected stderr: {}",
        output.stderr
    );
    Ok(())
}

#[test]
fn test_unknown_config_key_is_rejected() -> Result<()> {
    let env = TestEnvironment::new()?;
    let path = env.write_config("sync.toml", "tenant_id = \"t\"\nshell = \"/bin/zsh\"\n")?;

    let output = run_sync_command(&["--no-color", "--config", path.to_str().unwrap()], &[])?;

    assert_eq!(output.exit_code, 1);
    assert!(output.stderr.contains("parsing config file"), "{}", output.stderr);
    Ok(())
}

#[test]
fn test_missing_config_file_is_reported() -> Result<()> {
    let env = TestEnvironment::new()?;
    let path = env.path().join("absent.toml");

    let output = run_sync_command(&["--no-color", "--config", path.to_str().unwrap()], &[])?;

    assert_eq!(output.exit_code, 1);
    assert!(output.stderr.contains("reading config file"), "{}", output.stderr);
    Ok(())
}

#[test]
fn test_zero_timeout_is_rejected() -> Result<()> {
    let env = TestEnvironment::new()?;
    let path = env.write_config("sync.toml", "groups = [\"g-1\"]\nhttp_timeout = 0\n")?;

    let output = run_sync_command(
        &["--no-color", "--config", path.to_str().unwrap()],
        CREDENTIALS,
    )?;

    assert_eq!(output.exit_code, 1);
    assert!(output.stderr.contains("at least 1 second"), "{}", output.stderr);
    Ok(())
}

#[test]
fn test_invalid_group_policy_is_a_usage_error() -> Result<()> {
    let output = run_sync_command(&["--on-group-error", "sometimes"], CREDENTIALS)?;
    assert_eq!(output.exit_code, 2);
    assert!(output.stderr.contains("sometimes"));
    Ok(())
}

#[test]
fn test_refuses_to_run_without_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        return Ok(());
    }
    let output = run_sync_command(
        &["--no-color", "--azure-ad-groups", "g-1"],
        CREDENTIALS,
    )?;

    assert_eq!(output.exit_code, 1);
    assert!(output.stderr.contains("as root"), "{}", output.stderr);
    Ok(())
}
