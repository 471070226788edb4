//! CLI subcommands
//!
//! Every package operation runs the same way: the command builds a queued
//! transaction from the registry, names the result kinds it wants, and
//! [`run_session`] drains the event stream until the session finishes.
//! Ctrl-C asks the service to cancel the running transaction.

pub mod config;
pub mod daemon;
pub mod offline;
pub mod packages;
pub mod query;

use anyhow::{Context, Result};
use pkclient_core::domain::{
    ErrorCode, EventKind, Exit, Filters, Package, TransactionEvent,
    TransactionProperty, TransactionRecord,
};
use pkclient_ipc::Transaction;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

pub use crate::output::display_package_id;
use crate::output::OutputFormatter;

// ============================================================================
// Session runner
// ============================================================================

/// What a finished session produced
#[derive(Debug)]
pub struct SessionOutcome {
    pub exit: Exit,
    /// Run time in milliseconds as reported by the service
    pub runtime: u32,
    pub errors: Vec<(ErrorCode, String)>,
    /// Result events in arrival order
    pub results: Vec<TransactionEvent>,
}

impl SessionOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit == Exit::Success
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.results.iter().filter_map(|event| match event {
            TransactionEvent::Package(package) => Some(package),
            _ => None,
        })
    }

    /// One line describing why the session did not succeed
    pub fn failure_message(&self) -> String {
        match self.errors.last() {
            Some((code, details)) if !details.is_empty() => format!("{code}: {details}"),
            Some((code, _)) => code.to_string(),
            None => format!("transaction ended with exit code {}", self.exit),
        }
    }
}

/// Runs `transaction` to completion
///
/// # Arguments
/// * `transaction` - A queued transaction that has not been started
/// * `kinds` - Result kinds to subscribe to before the session binds
///
/// # Errors
/// Returns an error if the transaction was already started. Failures of the
/// transaction itself are reported through [`SessionOutcome`].
pub async fn run_session(transaction: &Transaction, kinds: &[EventKind]) -> Result<SessionOutcome> {
    transaction.connect_all(kinds.iter().copied());
    let mut events = transaction
        .events()
        .context("Failed to start the transaction")?;

    let mut outcome = SessionOutcome {
        exit: Exit::Unknown,
        runtime: 0,
        errors: Vec::new(),
        results: Vec::new(),
    };
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    TransactionEvent::PropertyChanged(TransactionProperty::Status(status)) => {
                        debug!(status = %status, "Transaction status");
                    }
                    TransactionEvent::PropertyChanged(TransactionProperty::Percentage(p))
                        if p <= 100 =>
                    {
                        debug!(percentage = p, "Transaction progress");
                    }
                    TransactionEvent::PropertyChanged(_) | TransactionEvent::Changed => {}
                    TransactionEvent::ErrorCode { error, details } => {
                        warn!(error = %error, details = %details, "Transaction error");
                        outcome.errors.push((error, details));
                    }
                    TransactionEvent::Finished { exit, runtime } => {
                        outcome.exit = exit;
                        outcome.runtime = runtime;
                    }
                    other => outcome.results.push(other),
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                info!("Cancelling transaction");
                if let Err(e) = transaction.cancel().await {
                    warn!(error = %e, "Failed to cancel transaction");
                }
            }
        }
    }

    debug!(exit = %outcome.exit, runtime_ms = outcome.runtime, "Transaction finished");
    Ok(outcome)
}

/// Prints the generic result of a session
///
/// Returns `false` when the session failed; the failure has been printed.
pub fn report_failure(
    outcome: &SessionOutcome,
    formatter: &dyn OutputFormatter,
) -> bool {
    if outcome.succeeded() {
        return true;
    }
    formatter.error(&outcome.failure_message());
    for event in &outcome.results {
        match event {
            TransactionEvent::EulaRequired(eula) => formatter.info(&format!(
                "License agreement {} from {} must be accepted first",
                eula.eula_id, eula.vendor_name
            )),
            TransactionEvent::RepoSignatureRequired(sig) => formatter.info(&format!(
                "Key {} of repository {} must be trusted first",
                sig.key_id, sig.repository_name
            )),
            TransactionEvent::MediaChangeRequired(media) => {
                formatter.info(&format!("Insert {}", media.media_text))
            }
            _ => {}
        }
    }
    false
}

// ============================================================================
// Rendering helpers
// ============================================================================

/// Parses a `--filter` argument such as `installed;~devel`
pub fn parse_filters(text: Option<&str>) -> Filters {
    text.map(Filters::parse).unwrap_or_else(Filters::empty)
}

/// Prints the package results of a session
pub fn print_packages(outcome: &SessionOutcome, formatter: &dyn OutputFormatter) {
    let packages: Vec<&Package> = outcome.packages().collect();
    formatter.packages(&packages);
}

pub fn record_json(record: &TransactionRecord) -> Value {
    json!({
        "tid": record.tid,
        "timespec": record.timespec.map(|t| t.to_rfc3339()),
        "succeeded": record.succeeded,
        "role": record.role.to_string(),
        "duration_ms": record.duration,
        "data": record.data,
        "uid": record.uid,
        "cmdline": record.cmdline,
    })
}
