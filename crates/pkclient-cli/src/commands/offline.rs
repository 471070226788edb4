//! Offline update commands
//!
//! Provides the `pkctl offline` CLI subcommands which:
//! 1. Show the offline state (prepared and triggered updates or upgrades)
//! 2. List the packages prepared for the next offline update
//! 3. Schedule or unschedule the offline run
//! 4. Clear the results of the last run

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use pkclient_core::domain::OfflineAction;
use pkclient_ipc::Daemon;
use serde_json::json;
use tracing::info;

use super::display_package_id;
use crate::output::{get_formatter, OutputFormat};

/// What to do once the offline run is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    Reboot,
    PowerOff,
}

impl From<ActionArg> for OfflineAction {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::Reboot => OfflineAction::Reboot,
            ActionArg::PowerOff => OfflineAction::PowerOff,
        }
    }
}

/// Manage offline updates
#[derive(Debug, Subcommand)]
pub enum OfflineCommand {
    /// Show the offline update state
    Status,
    /// List packages prepared for the next offline update
    Prepared,
    /// Schedule the prepared update for the next boot
    Trigger {
        /// Action after the update is applied
        #[arg(long, value_enum, default_value_t = ActionArg::Reboot)]
        action: ActionArg,

        /// Schedule the prepared release upgrade instead
        #[arg(long)]
        upgrade: bool,
    },
    /// Unschedule the offline run
    Cancel,
    /// Remove the results of the last offline run
    Clear,
}

impl OfflineCommand {
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let offline = daemon.offline();

        match self {
            OfflineCommand::Status => {
                let state = offline.state();
                if format.is_json() {
                    formatter.print_json(&json!({
                        "update_prepared": state.update_prepared,
                        "update_triggered": state.update_triggered,
                        "upgrade_prepared": state.upgrade_prepared,
                        "upgrade_triggered": state.upgrade_triggered,
                        "trigger_action": state.trigger_action.to_string(),
                        "prepared_upgrade": {
                            "name": state.prepared_upgrade.name,
                            "version": state.prepared_upgrade.version,
                        },
                    }));
                    return Ok(());
                }

                let yes_no = |b: bool| if b { "yes" } else { "no" };
                formatter.success("Offline updates");
                formatter.field("Update prepared", yes_no(state.update_prepared));
                formatter.field("Update triggered", yes_no(state.update_triggered));
                formatter.field("Upgrade prepared", yes_no(state.upgrade_prepared));
                formatter.field("Upgrade triggered", yes_no(state.upgrade_triggered));
                if !state.prepared_upgrade.is_empty() {
                    formatter.field(
                        "Prepared release",
                        &format!(
                            "{} {}",
                            state.prepared_upgrade.name, state.prepared_upgrade.version
                        ),
                    );
                }
                if state.update_triggered || state.upgrade_triggered {
                    formatter.field("After the run", &state.trigger_action.to_string());
                }
            }
            OfflineCommand::Prepared => {
                let package_ids = offline.get_prepared().await;
                if format.is_json() {
                    formatter.print_json(&json!({ "packages": package_ids }));
                } else if package_ids.is_empty() {
                    formatter.success("No updates prepared");
                } else {
                    formatter.success(&format!("{} update(s) prepared", package_ids.len()));
                    for id in &package_ids {
                        formatter.info(&display_package_id(id));
                    }
                }
            }
            OfflineCommand::Trigger { action, upgrade } => {
                let action = OfflineAction::from(*action);
                info!(action = %action, upgrade, "Triggering offline run");
                if *upgrade {
                    offline
                        .trigger_upgrade(action)
                        .await
                        .context("Failed to trigger the offline upgrade")?;
                    formatter.success(&format!("Upgrade scheduled, then {}", action));
                } else {
                    offline
                        .trigger(action)
                        .await
                        .context("Failed to trigger the offline update")?;
                    formatter.success(&format!("Update scheduled, then {}", action));
                }
            }
            OfflineCommand::Cancel => {
                offline
                    .cancel()
                    .await
                    .context("Failed to cancel the offline run")?;
                formatter.success("Offline run cancelled");
            }
            OfflineCommand::Clear => {
                offline
                    .clear_results()
                    .await
                    .context("Failed to clear offline results")?;
                formatter.success("Offline results cleared");
            }
        }
        Ok(())
    }
}
