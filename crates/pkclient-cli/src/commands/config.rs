//! Config command - View and validate the client configuration
//!
//! Provides the `pkctl config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Shows the hints sent with every transaction
//! 3. Validates the configuration file and reports errors

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use pkclient_core::config::ClientConfig;
use tracing::info;

use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Display the hints sent with every transaction
    Hints,
    /// Validate the configuration file
    Validate,
}

impl ConfigCommand {
    /// Execute the config command
    pub async fn execute(
        &self,
        config_path: &Path,
        config: &ClientConfig,
        format: OutputFormat,
    ) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(config_path, config, format),
            ConfigCommand::Hints => execute_hints(config, format),
            ConfigCommand::Validate => execute_validate(config_path, format),
        }
    }
}

fn execute_show(config_path: &Path, config: &ClientConfig, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);

    info!(config_path = %config_path.display(), "Showing configuration");

    if format.is_json() {
        let json =
            serde_json::to_value(config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
        return Ok(());
    }

    formatter.success(&format!("Configuration ({})", config_path.display()));
    if !config_path.exists() {
        formatter.info("(file not found, showing defaults)");
    }
    formatter.info("");

    let yaml =
        serde_yaml::to_string(config).context("Failed to serialize configuration to YAML")?;
    for line in yaml.lines() {
        formatter.info(line);
    }
    Ok(())
}

fn execute_hints(config: &ClientConfig, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let hints = config.hint_list();

    if format.is_json() {
        formatter.print_json(&serde_json::json!({ "hints": hints }));
    } else {
        for hint in &hints {
            formatter.info(hint);
        }
    }
    Ok(())
}

fn execute_validate(config_path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);

    if !config_path.exists() {
        formatter.warn(&format!(
            "{} does not exist, defaults are used",
            config_path.display()
        ));
        return Ok(());
    }

    let config = match ClientConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            formatter.error(&format!("Cannot parse {}: {}", config_path.display(), e));
            return Ok(());
        }
    };

    let errors = config.validate();
    if format.is_json() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        formatter.print_json(&serde_json::json!({
            "path": config_path.display().to_string(),
            "valid": errors.is_empty(),
            "errors": messages,
        }));
    } else if errors.is_empty() {
        formatter.success(&format!("{} is valid", config_path.display()));
    } else {
        formatter.error(&format!("{} has {} error(s)", config_path.display(), errors.len()));
        for error in &errors {
            formatter.info(&error.to_string());
        }
    }
    Ok(())
}
