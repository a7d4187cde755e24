mod azure;
mod config;
mod error;
mod sync;
mod system;
mod ui;
mod users;

use anyhow::{Context, Result};
use clap::Parser;
use sudo::RunningAs;

use crate::azure::{AzureSession, BlobContainer, GraphDirectory};
use crate::config::{ConfigArgs, Settings};
use crate::error::SyncError;
use crate::sync::{Reconciler, SyncReport};
use crate::system::{DryRun, LinuxAccounts};
use crate::ui::prelude::*;
use crate::ui::{LogLevel, OutputFormat};

/// Synchronize Azure AD group members to local Linux accounts and SSH keys
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Report what would change without touching local accounts
    #[arg(long)]
    dry_run: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

fn main() {
    let cli = Cli::parse();

    match run(cli) {
        Ok(report) if report.is_success() => {}
        Ok(_) => std::process::exit(1),
        Err(e) => {
            let message = if ui::is_debug_enabled() {
                format!("{e:?}")
            } else {
                format!("{e:#}")
            };
            emit(Level::Error, "run.failed", &message, None);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<SyncReport> {
    // Configuration errors are reported before the configured format is known.
    ui::init(OutputFormat::Text, !cli.no_color, LogLevel::Info);
    let settings = Settings::resolve(cli.config)?;
    ui::init(settings.log_format, !cli.no_color, settings.log_level);
    emit(
        Level::Debug,
        "config.resolved",
        &format!("{settings:?}"),
        None,
    );

    if !cli.dry_run && !matches!(sudo::check(), RunningAs::Root) {
        return Err(SyncError::Config(
            "local accounts can only be managed as root, use --dry-run to preview".into(),
        )
        .into());
    }

    let session = AzureSession::new(
        settings.cloud,
        &settings.tenant_id,
        &settings.client_id,
        settings.client_secret.clone(),
        settings.http_timeout,
    )?;
    let directory = GraphDirectory::connect(&session).context("connecting to Microsoft Graph")?;
    let blobs = BlobContainer::connect(
        &session,
        &settings.storage_account,
        &settings.storage_container,
    )
    .with_context(|| format!("connecting to storage account {}", settings.storage_account))?;
    let accounts = LinuxAccounts::new()?;

    let report = if cli.dry_run {
        let accounts = DryRun::new(accounts);
        Reconciler::new(&settings.sync, &directory, &blobs, &accounts).run()?
    } else {
        Reconciler::new(&settings.sync, &directory, &blobs, &accounts).run()?
    };

    let data = serde_json::to_value(&report).ok();
    if report.is_success() {
        emit(Level::Success, "sync.summary", &report.summary(), data);
    } else {
        emit(Level::Warn, "sync.summary", &report.summary(), data);
    }

    Ok(report)
}
