//! Daemon commands
//!
//! Provides the `pkctl daemon` CLI subcommands for inspecting the package
//! service.
//!
//! # Subcommands
//!
//! - `info`         - Show backend, distribution and capabilities
//! - `transactions` - List the transactions the service is running
//! - `authorize`    - Check whether an action would be authorized
//! - `watch`        - Print service notifications until interrupted
//! - `quit`         - Ask the service to exit when idle

use anyhow::{Context, Result};
use clap::Subcommand;
use pkclient_core::domain::Role;
use pkclient_ipc::{request::group_names, Daemon, DaemonEvent};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::output::{get_formatter, OutputFormat};

/// Inspect the package service
#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Show backend, distribution and capabilities
    Info,
    /// List running transactions
    Transactions,
    /// Check how a polkit action would be authorized
    Authorize {
        /// Action id, e.g. "org.freedesktop.packagekit.package-install"
        action_id: String,
    },
    /// Print service notifications until Ctrl-C
    Watch,
    /// Ask the service to exit once it is idle
    Quit,
}

impl DaemonCommand {
    /// Execute the selected daemon subcommand
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        match self {
            DaemonCommand::Info => daemon_info(daemon, format),
            DaemonCommand::Transactions => daemon_transactions(daemon, format).await,
            DaemonCommand::Authorize { action_id } => {
                daemon_authorize(daemon, action_id, format).await
            }
            DaemonCommand::Watch => daemon_watch(daemon, format).await,
            DaemonCommand::Quit => daemon_quit(daemon, format).await,
        }
    }
}

fn role_names(daemon: &Daemon) -> Vec<String> {
    daemon
        .roles()
        .positions()
        .map(Role::from_u32)
        .filter(|r| *r != Role::Unknown)
        .map(|r| r.to_string())
        .collect()
}

// ============================================================================
// daemon info
// ============================================================================

fn daemon_info(daemon: &Daemon, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);

    if !daemon.is_running() {
        formatter.error("The package service is not running");
        return Ok(());
    }

    let caps = daemon.capabilities();
    let roles = role_names(daemon);
    let groups = group_names(caps.groups);

    if format.is_json() {
        formatter.print_json(&json!({
            "version": caps.version().to_string(),
            "backend": {
                "name": caps.backend_name,
                "description": caps.backend_description,
                "author": caps.backend_author,
            },
            "distro_id": caps.distro_id,
            "network_state": caps.network_state.to_string(),
            "locked": caps.locked,
            "roles": roles,
            "filters": caps.filters.to_string(),
            "groups": groups,
            "mime_types": caps.mime_types,
        }));
        return Ok(());
    }

    formatter.success(&format!("PackageKit {}", caps.version()));
    formatter.field("Backend", &format!("{} ({})", caps.backend_name, caps.backend_description));
    formatter.field("Author", &caps.backend_author);
    formatter.field("Distribution", &caps.distro_id);
    formatter.field("Network", &caps.network_state.to_string());
    formatter.field("Locked", if caps.locked { "yes" } else { "no" });
    formatter.field("Filters", &caps.filters.to_string());
    formatter.field("Groups", &groups.join(", "));
    formatter.field("Roles", &roles.join(", "));
    if !caps.mime_types.is_empty() {
        formatter.field("MIME types", &caps.mime_types.join(", "));
    }
    Ok(())
}

// ============================================================================
// daemon transactions
// ============================================================================

async fn daemon_transactions(daemon: &Daemon, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);

    let tids = daemon
        .get_transaction_list()
        .await
        .context("Failed to list transactions")?;

    if format.is_json() {
        formatter.print_json(&json!({ "transactions": tids }));
    } else if tids.is_empty() {
        formatter.success("No transactions running");
    } else {
        formatter.success(&format!("{} transaction(s) running", tids.len()));
        for tid in &tids {
            formatter.info(tid);
        }
    }
    Ok(())
}

// ============================================================================
// daemon authorize
// ============================================================================

async fn daemon_authorize(daemon: &Daemon, action_id: &str, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);

    let result = daemon
        .can_authorize(action_id)
        .await
        .context("Failed to query authorization")?;

    if format.is_json() {
        formatter.print_json(&json!({ "action_id": action_id, "result": result.to_string() }));
    } else {
        formatter.field(action_id, &result.to_string());
    }
    Ok(())
}

// ============================================================================
// daemon watch
// ============================================================================

async fn daemon_watch(daemon: &Daemon, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let mut events = daemon.events();

    info!("Watching the package service, press Ctrl-C to stop");

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Dropped service notifications");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let (name, detail) = match &event {
            DaemonEvent::ServiceDown => ("service-down", String::new()),
            DaemonEvent::RunningChanged(running) => ("running", running.to_string()),
            DaemonEvent::Changed => ("changed", String::new()),
            DaemonEvent::NetworkStateChanged(network) => ("network", network.to_string()),
            DaemonEvent::TransactionListChanged(tids) => ("transactions", tids.join(" ")),
            DaemonEvent::RepoListChanged => ("repo-list-changed", String::new()),
            DaemonEvent::RestartScheduled => ("restart-scheduled", String::new()),
            DaemonEvent::UpdatesChanged => ("updates-changed", String::new()),
        };

        if format.is_json() {
            println!("{}", json!({ "event": name, "detail": detail }));
        } else {
            formatter.info(&format!("{:<20} {}", name, detail));
        }
    }
    Ok(())
}

// ============================================================================
// daemon quit
// ============================================================================

async fn daemon_quit(daemon: &Daemon, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);

    daemon
        .suggest_daemon_quit()
        .await
        .context("Failed to ask the service to quit")?;

    formatter.success("The package service will exit when idle");
    Ok(())
}
