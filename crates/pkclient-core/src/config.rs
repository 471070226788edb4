//! Configuration module for the PackageKit client.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//! The library itself never reads the file; front ends load it and hand it
//! to the daemon registry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ClientConfig struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub bus: BusKind,
    pub hints: HintsConfig,
    pub timeouts: TimeoutsConfig,
    pub logging: LoggingConfig,
}

/// Which message bus the service lives on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    System,
    /// Used to talk to a test service on the session bus.
    Session,
}

/// Hints sent to every transaction created by this process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HintsConfig {
    /// Locale for translated summaries and descriptions. Taken from `LANG` when unset.
    pub locale: Option<String>,
    /// Whether the service may ask the user questions (authorization, EULAs).
    pub interactive: bool,
    /// Whether the transaction runs on behalf of an idle session.
    pub idle: bool,
    /// Raw `key=value` hints appended as-is.
    pub extra: Vec<String>,
}

/// Bus call timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Timeout of ordinary method calls, in seconds.
    pub method_call_secs: u64,
    /// Timeout of the offline upgrade trigger, which may download a whole release.
    pub offline_upgrade_trigger_secs: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ClientConfig {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`ClientConfig::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/pkclient/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("pkclient")
            .join("config.yaml")
    }

    /// Renders the hints section as the service's `key=value` list.
    pub fn hint_list(&self) -> Vec<String> {
        let mut hints = Vec::with_capacity(3 + self.hints.extra.len());
        if let Some(locale) = self.hints.effective_locale() {
            hints.push(format!("locale={locale}"));
        }
        hints.push(format!("interactive={}", self.hints.interactive));
        hints.push(format!("idle={}", self.hints.idle));
        hints.extend(self.hints.extra.iter().cloned());
        hints
    }
}

impl HintsConfig {
    /// The configured locale, or the one from `LANG`.
    pub fn effective_locale(&self) -> Option<String> {
        self.locale
            .clone()
            .or_else(|| std::env::var("LANG").ok())
            .filter(|l| !l.is_empty())
    }
}

impl TimeoutsConfig {
    pub fn method_call(&self) -> Duration {
        Duration::from_secs(self.method_call_secs)
    }

    pub fn offline_upgrade_trigger(&self) -> Duration {
        Duration::from_secs(self.offline_upgrade_trigger_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for HintsConfig {
    fn default() -> Self {
        Self {
            locale: None,
            interactive: true,
            idle: false,
            extra: Vec::new(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            method_call_secs: 25,
            offline_upgrade_trigger_secs: 24 * 60 * 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"timeouts.method_call_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl ClientConfig {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- timeouts ---
        if self.timeouts.method_call_secs == 0 {
            errors.push(ValidationError {
                field: "timeouts.method_call_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.timeouts.offline_upgrade_trigger_secs < self.timeouts.method_call_secs {
            errors.push(ValidationError {
                field: "timeouts.offline_upgrade_trigger_secs".into(),
                message: format!(
                    "must not be shorter than method_call_secs ({})",
                    self.timeouts.method_call_secs
                ),
            });
        }

        // --- hints ---
        for (i, hint) in self.hints.extra.iter().enumerate() {
            if !hint.contains('=') {
                errors.push(ValidationError {
                    field: format!("hints.extra[{i}]"),
                    message: format!("expected key=value, got '{hint}'"),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ClientConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`ClientConfig`] programmatically.
///
/// # Example
///
/// ```rust
/// use pkclient_core::config::{BusKind, ClientConfigBuilder};
///
/// let config = ClientConfigBuilder::new()
///     .bus(BusKind::Session)
///     .locale("de_DE.UTF-8")
///     .interactive(false)
///     .build();
/// assert_eq!(config.bus, BusKind::Session);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder initialised with [`ClientConfig::default`] values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bus(mut self, bus: BusKind) -> Self {
        self.config.bus = bus;
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.config.hints.locale = Some(locale.into());
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.config.hints.interactive = interactive;
        self
    }

    pub fn idle(mut self, idle: bool) -> Self {
        self.config.hints.idle = idle;
        self
    }

    pub fn extra_hint(mut self, hint: impl Into<String>) -> Self {
        self.config.hints.extra.push(hint.into());
        self
    }

    pub fn method_call_secs(mut self, seconds: u64) -> Self {
        self.config.timeouts.method_call_secs = seconds;
        self
    }

    pub fn offline_upgrade_trigger_secs(mut self, seconds: u64) -> Self {
        self.config.timeouts.offline_upgrade_trigger_secs = seconds;
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Consume the builder and return the finished [`ClientConfig`].
    pub fn build(self) -> ClientConfig {
        self.config
    }

    /// Build and validate in one step.
    pub fn build_validated(self) -> Result<ClientConfig, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}
