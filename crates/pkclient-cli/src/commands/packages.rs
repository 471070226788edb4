//! Package commands - transactions that change the system
//!
//! Provides `pkctl install`, `remove`, `update` and `refresh`. Arguments
//! without a `;` are package names and are resolved to ids first.

use anyhow::{bail, Result};
use clap::Args;
use pkclient_core::domain::package_id::{self, DELIMITER};
use pkclient_core::domain::{EventKind, Filters, TransactionFlags};
use pkclient_ipc::{Daemon, RoleRequests};
use serde_json::json;
use tracing::{debug, info};

use super::{display_package_id, print_packages, report_failure, run_session, SessionOutcome};
use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Flags shared by the modifying commands
#[derive(Debug, Args)]
pub struct ChangeFlags {
    /// Only report what would change
    #[arg(long)]
    simulate: bool,

    /// Only download the packages
    #[arg(long, conflicts_with = "simulate")]
    download_only: bool,

    /// Allow packages from untrusted sources
    #[arg(long)]
    allow_untrusted: bool,
}

impl ChangeFlags {
    fn flags(&self) -> TransactionFlags {
        let mut flags = TransactionFlags::empty();
        if !self.allow_untrusted {
            flags |= TransactionFlags::ONLY_TRUSTED;
        }
        if self.simulate {
            flags |= TransactionFlags::SIMULATE;
        }
        if self.download_only {
            flags |= TransactionFlags::ONLY_DOWNLOAD;
        }
        flags
    }
}

/// Turns package names into ids, leaving ids untouched
///
/// # Errors
/// Fails when a name matches no package under `filters`.
async fn resolve_ids(daemon: &Daemon, args: &[String], filters: Filters) -> Result<Vec<String>> {
    let (ids, names): (Vec<String>, Vec<String>) =
        args.iter().cloned().partition(|a| a.contains(DELIMITER));
    if names.is_empty() {
        return Ok(ids);
    }

    debug!(names = ?names, filters = %filters, "Resolving package names");
    let transaction = daemon.resolve(filters, names.iter().cloned());
    let outcome = run_session(&transaction, &[EventKind::Package]).await?;
    if !outcome.succeeded() {
        bail!("Failed to resolve packages: {}", outcome.failure_message());
    }

    let mut resolved = ids;
    for name in &names {
        let found = outcome
            .packages()
            .find(|p| package_id::package_name(&p.package_id) == name.as_str());
        match found {
            Some(package) => resolved.push(package.package_id.clone()),
            None => bail!("Package not found: {}", name),
        }
    }
    Ok(resolved)
}

fn report_change(
    action: &str,
    outcome: &SessionOutcome,
    format: OutputFormat,
    formatter: &dyn OutputFormatter,
) {
    if !report_failure(outcome, formatter) {
        return;
    }
    if format.is_json() {
        print_packages(outcome, formatter);
        return;
    }
    formatter.success(&format!(
        "{} finished in {:.1}s",
        action,
        f64::from(outcome.runtime) / 1000.0
    ));
    print_packages(outcome, formatter);
}

// ============================================================================
// install
// ============================================================================

#[derive(Debug, Args)]
pub struct InstallCommand {
    #[command(flatten)]
    flags: ChangeFlags,

    /// Package names or ids
    #[arg(required = true)]
    packages: Vec<String>,
}

impl InstallCommand {
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let ids = resolve_ids(daemon, &self.packages, Filters::NOT_INSTALLED | Filters::NEWEST)
            .await?;
        info!(packages = ?ids, "Installing packages");

        let transaction = daemon.install_packages(self.flags.flags(), ids);
        let outcome = run_session(
            &transaction,
            &[EventKind::Package, EventKind::EulaRequired, EventKind::RepoSignatureRequired],
        )
        .await?;
        report_change("Install", &outcome, format, &*formatter);
        Ok(())
    }
}

// ============================================================================
// remove
// ============================================================================

#[derive(Debug, Args)]
pub struct RemoveCommand {
    #[command(flatten)]
    flags: ChangeFlags,

    /// Also remove packages that depend on these
    #[arg(long)]
    allow_deps: bool,

    /// Also remove dependencies nothing else needs
    #[arg(long)]
    autoremove: bool,

    /// Package names or ids
    #[arg(required = true)]
    packages: Vec<String>,
}

impl RemoveCommand {
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let ids = resolve_ids(daemon, &self.packages, Filters::INSTALLED).await?;
        info!(packages = ?ids, allow_deps = self.allow_deps, "Removing packages");

        let transaction =
            daemon.remove_packages(self.flags.flags(), ids, self.allow_deps, self.autoremove);
        let outcome = run_session(&transaction, &[EventKind::Package]).await?;
        report_change("Remove", &outcome, format, &*formatter);
        Ok(())
    }
}

// ============================================================================
// update
// ============================================================================

#[derive(Debug, Args)]
pub struct UpdateCommand {
    #[command(flatten)]
    flags: ChangeFlags,

    /// Package ids to update; every available update when empty
    packages: Vec<String>,
}

impl UpdateCommand {
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let ids = if self.packages.is_empty() {
            let outcome = run_session(&daemon.get_updates(Filters::empty()), &[EventKind::Package])
                .await?;
            if !report_failure(&outcome, &*formatter) {
                return Ok(());
            }
            outcome.packages().map(|p| p.package_id.clone()).collect()
        } else {
            resolve_ids(daemon, &self.packages, Filters::NEWEST).await?
        };

        if ids.is_empty() {
            if format.is_json() {
                formatter.print_json(&json!({ "packages": [] }));
            } else {
                formatter.success("The system is up to date");
            }
            return Ok(());
        }

        for id in &ids {
            debug!(package = %display_package_id(id), "Queued for update");
        }

        let transaction = daemon.update_packages(self.flags.flags(), ids);
        let outcome = run_session(
            &transaction,
            &[EventKind::Package, EventKind::RequireRestart, EventKind::EulaRequired],
        )
        .await?;
        report_change("Update", &outcome, format, &*formatter);
        Ok(())
    }
}

// ============================================================================
// refresh
// ============================================================================

#[derive(Debug, Args)]
pub struct RefreshCommand {
    /// Refresh even when the metadata is still fresh
    #[arg(long)]
    force: bool,
}

impl RefreshCommand {
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let transaction = daemon.refresh_cache(self.force);
        let outcome = run_session(&transaction, &[]).await?;
        if !report_failure(&outcome, &*formatter) {
            return Ok(());
        }

        if format.is_json() {
            formatter.print_json(&json!({ "refreshed": true, "runtime_ms": outcome.runtime }));
        } else {
            formatter.success("Package metadata refreshed");
        }
        Ok(())
    }
}
