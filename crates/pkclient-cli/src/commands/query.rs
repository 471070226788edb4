//! Query commands - read-only package transactions
//!
//! Provides `pkctl search`, `resolve`, `details`, `files`, `updates` and
//! `history`. None of them change the system, so they never ask for
//! authorization.

use anyhow::Result;
use clap::{Args, ValueEnum};
use pkclient_core::domain::{EventKind, TransactionEvent};
use pkclient_ipc::{Daemon, RoleRequests};
use serde_json::{json, Value};
use tracing::info;

use super::{
    display_package_id, parse_filters, print_packages, record_json, report_failure, run_session,
};
use crate::output::{get_formatter, OutputFormat};

// ============================================================================
// search
// ============================================================================

/// What the search terms are matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchBy {
    Name,
    Details,
    File,
    Group,
}

#[derive(Debug, Args)]
pub struct SearchCommand {
    /// Field to search
    #[arg(long, value_enum, default_value_t = SearchBy::Name)]
    by: SearchBy,

    /// Filter list, e.g. "installed;~devel"
    #[arg(long)]
    filter: Option<String>,

    /// Search terms
    #[arg(required = true)]
    terms: Vec<String>,
}

impl SearchCommand {
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let filters = parse_filters(self.filter.as_deref());

        info!(by = ?self.by, terms = ?self.terms, filters = %filters, "Searching");

        let terms = self.terms.iter().cloned();
        let transaction = match self.by {
            SearchBy::Name => daemon.search_names(filters, terms),
            SearchBy::Details => daemon.search_details(filters, terms),
            SearchBy::File => daemon.search_files(filters, terms),
            SearchBy::Group => daemon.search_groups(filters, terms),
        };

        let outcome = run_session(&transaction, &[EventKind::Package]).await?;
        if !report_failure(&outcome, &*formatter) {
            return Ok(());
        }

        if outcome.packages().next().is_none() && !format.is_json() {
            formatter.warn("No packages found");
            return Ok(());
        }
        print_packages(&outcome, &*formatter);
        Ok(())
    }
}

// ============================================================================
// resolve
// ============================================================================

#[derive(Debug, Args)]
pub struct ResolveCommand {
    /// Filter list, e.g. "installed"
    #[arg(long)]
    filter: Option<String>,

    /// Package names
    #[arg(required = true)]
    names: Vec<String>,
}

impl ResolveCommand {
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let filters = parse_filters(self.filter.as_deref());

        let transaction = daemon.resolve(filters, self.names.iter().cloned());
        let outcome = run_session(&transaction, &[EventKind::Package]).await?;
        if report_failure(&outcome, &*formatter) {
            print_packages(&outcome, &*formatter);
        }
        Ok(())
    }
}

// ============================================================================
// details
// ============================================================================

#[derive(Debug, Args)]
pub struct DetailsCommand {
    /// Package ids (name;version;arch;data)
    #[arg(required = true)]
    package_ids: Vec<String>,
}

impl DetailsCommand {
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let transaction = daemon.get_details(self.package_ids.iter().cloned());
        let outcome = run_session(&transaction, &[EventKind::Details]).await?;
        if !report_failure(&outcome, &*formatter) {
            return Ok(());
        }

        let mut records = Vec::new();
        for event in &outcome.results {
            let TransactionEvent::Details(details) = event else {
                continue;
            };
            if format.is_json() {
                records.push(json!({
                    "package_id": details.package_id,
                    "summary": details.summary,
                    "description": details.description,
                    "group": details.group.map(|g| g.to_string()),
                    "url": details.url,
                    "license": details.license,
                    "size": details.size,
                }));
                continue;
            }

            formatter.success(&display_package_id(&details.package_id));
            if let Some(summary) = &details.summary {
                formatter.field("Summary", summary);
            }
            if let Some(group) = details.group {
                formatter.field("Group", &group.to_string());
            }
            if let Some(license) = &details.license {
                formatter.field("License", license);
            }
            if let Some(url) = &details.url {
                formatter.field("URL", url);
            }
            if let Some(size) = details.size {
                formatter.field("Size", &format!("{size} bytes"));
            }
            if let Some(description) = &details.description {
                formatter.info("");
                for line in description.lines() {
                    formatter.info(line);
                }
            }
        }

        if format.is_json() {
            formatter.print_json(&json!({ "details": records }));
        }
        Ok(())
    }
}

// ============================================================================
// files
// ============================================================================

#[derive(Debug, Args)]
pub struct FilesCommand {
    /// Package ids (name;version;arch;data)
    #[arg(required = true)]
    package_ids: Vec<String>,
}

impl FilesCommand {
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let transaction = daemon.get_files(self.package_ids.iter().cloned());
        let outcome = run_session(&transaction, &[EventKind::Files]).await?;
        if !report_failure(&outcome, &*formatter) {
            return Ok(());
        }

        let mut records = Vec::new();
        for event in &outcome.results {
            let TransactionEvent::Files(files) = event else {
                continue;
            };
            if format.is_json() {
                records.push(json!({ "package_id": files.package_id, "files": files.files }));
            } else {
                formatter.success(&display_package_id(&files.package_id));
                for file in &files.files {
                    formatter.info(file);
                }
            }
        }

        if format.is_json() {
            formatter.print_json(&json!({ "files": records }));
        }
        Ok(())
    }
}

// ============================================================================
// updates
// ============================================================================

#[derive(Debug, Args)]
pub struct UpdatesCommand {
    /// Filter list, e.g. "~devel"
    #[arg(long)]
    filter: Option<String>,

    /// Also fetch update details (changelog, advisories)
    #[arg(long)]
    details: bool,
}

impl UpdatesCommand {
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let filters = parse_filters(self.filter.as_deref());

        let transaction = daemon.get_updates(filters);
        let outcome = run_session(&transaction, &[EventKind::Package]).await?;
        if !report_failure(&outcome, &*formatter) {
            return Ok(());
        }

        let ids: Vec<String> = outcome.packages().map(|p| p.package_id.clone()).collect();
        if ids.is_empty() {
            if format.is_json() {
                formatter.print_json(&json!({ "packages": [] }));
            } else {
                formatter.success("The system is up to date");
            }
            return Ok(());
        }

        if !self.details {
            print_packages(&outcome, &*formatter);
            return Ok(());
        }

        let transaction = daemon.get_update_detail(ids);
        let detail = run_session(&transaction, &[EventKind::UpdateDetail]).await?;
        if !report_failure(&detail, &*formatter) {
            return Ok(());
        }

        let mut records: Vec<Value> = Vec::new();
        for event in &detail.results {
            let TransactionEvent::UpdateDetail(update) = event else {
                continue;
            };
            if format.is_json() {
                records.push(json!({
                    "package_id": update.package_id,
                    "updates": update.updates,
                    "obsoletes": update.obsoletes,
                    "restart": update.restart.to_string(),
                    "state": update.state.to_string(),
                    "update_text": update.update_text,
                    "changelog": update.changelog,
                    "cve_urls": update.cve_urls,
                    "issued": update.issued.map(|t| t.to_rfc3339()),
                    "updated": update.updated.map(|t| t.to_rfc3339()),
                }));
                continue;
            }

            formatter.success(&display_package_id(&update.package_id));
            formatter.field("Restart", &update.restart.to_string());
            formatter.field("State", &update.state.to_string());
            if let Some(issued) = update.issued {
                formatter.field("Issued", &issued.format("%Y-%m-%d").to_string());
            }
            for cve in &update.cve_urls {
                formatter.field("CVE", cve);
            }
            for line in update.update_text.lines() {
                formatter.info(line);
            }
        }

        if format.is_json() {
            formatter.print_json(&json!({ "updates": records }));
        }
        Ok(())
    }
}

// ============================================================================
// history
// ============================================================================

#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// How many transactions to show; 0 shows all
    #[arg(short = 'n', long, default_value_t = 10)]
    count: u32,
}

impl HistoryCommand {
    pub async fn execute(&self, daemon: &Daemon, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let transaction = daemon.get_old_transactions(self.count);
        let outcome = run_session(&transaction, &[EventKind::Transaction]).await?;
        if !report_failure(&outcome, &*formatter) {
            return Ok(());
        }

        let records: Vec<_> = outcome
            .results
            .iter()
            .filter_map(|event| match event {
                TransactionEvent::Transaction(record) => Some(record),
                _ => None,
            })
            .collect();

        if format.is_json() {
            let values: Vec<Value> = records.iter().map(|r| record_json(r)).collect();
            formatter.print_json(&json!({ "transactions": values }));
            return Ok(());
        }

        for record in records {
            let replayed = daemon.replay(record);
            let when = replayed
                .timespec()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "unknown time".to_string());
            let mark = if replayed.succeeded() { "\u{2713}" } else { "\u{2717}" };

            formatter.info(&format!(
                "{} {}  {:<20} {:>6} ms  uid {}",
                mark,
                when,
                replayed.role(),
                replayed.duration(),
                replayed.uid()
            ));
            if let Some(cmdline) = replayed.cmdline().filter(|c| !c.is_empty()) {
                formatter.field("Command", cmdline);
            }
        }
        Ok(())
    }
}
