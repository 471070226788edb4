//! Terminal output for pkctl
//!
//! Commands never print directly. They go through an [`OutputFormatter`],
//! so `--json` turns every command into one JSON document per result while
//! the default prints aligned text.

use pkclient_core::domain::{package_id, Package};
use serde_json::{json, Value};

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

/// Trait for formatting CLI output
pub trait OutputFormatter {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    /// A `label: value` line of a record
    fn field(&self, label: &str, value: &str);
    /// Package results of a transaction, in arrival order
    fn packages(&self, packages: &[&Package]);
    fn print_json(&self, value: &Value);
}

/// Human-readable output with status marks and aligned columns
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("\u{2713} {message}");
    }
    fn error(&self, message: &str) {
        eprintln!("\u{2717} Error: {message}");
    }
    fn warn(&self, message: &str) {
        eprintln!("\u{26a0} Warning: {message}");
    }
    fn info(&self, message: &str) {
        println!("  {message}");
    }
    fn field(&self, label: &str, value: &str) {
        println!("  {}", field_line(label, value));
    }
    fn packages(&self, packages: &[&Package]) {
        for row in package_rows(packages) {
            println!("  {row}");
        }
    }
    fn print_json(&self, _value: &Value) {}
}

/// JSON output formatter
///
/// Free-form info lines and record fields are dropped; commands emit their
/// records as whole documents through [`OutputFormatter::print_json`].
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        println!("{}", json!({ "success": true, "message": message }));
    }
    fn error(&self, message: &str) {
        eprintln!("{}", json!({ "success": false, "error": message }));
    }
    fn warn(&self, message: &str) {
        eprintln!("{}", json!({ "level": "warning", "message": message }));
    }
    fn info(&self, _message: &str) {}
    fn field(&self, _label: &str, _value: &str) {}
    fn packages(&self, packages: &[&Package]) {
        let packages: Vec<Value> = packages.iter().map(|p| package_json(p)).collect();
        self.print_json(&json!({ "packages": packages }));
    }
    fn print_json(&self, value: &Value) {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Human => Box::new(HumanFormatter),
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn field_line(label: &str, value: &str) -> String {
    format!("{:<22} {}", format!("{label}:"), value)
}

/// `name-version.arch (data)` for human output
pub fn display_package_id(id: &str) -> String {
    let name = package_id::package_name(id);
    let version = package_id::package_version(id);
    let arch = package_id::package_arch(id);
    let data = package_id::package_data(id);

    let mut text = name.to_string();
    if !version.is_empty() {
        text.push('-');
        text.push_str(version);
    }
    if !arch.is_empty() {
        text.push('.');
        text.push_str(arch);
    }
    if !data.is_empty() {
        text.push_str(&format!(" ({data})"));
    }
    text
}

/// One row per package with the info and id columns padded to the widest
/// entry of the batch
pub fn package_rows(packages: &[&Package]) -> Vec<String> {
    let cells: Vec<(String, String)> = packages
        .iter()
        .map(|p| (p.info.to_string(), display_package_id(&p.package_id)))
        .collect();
    let info_width = cells.iter().map(|(info, _)| info.chars().count()).max().unwrap_or(0);
    let id_width = cells.iter().map(|(_, id)| id.chars().count()).max().unwrap_or(0);

    cells
        .iter()
        .zip(packages)
        .map(|((info, id), package)| {
            format!("{info:<info_width$}  {id:<id_width$}  {}", package.summary)
                .trim_end()
                .to_string()
        })
        .collect()
}

pub fn package_json(package: &Package) -> Value {
    json!({
        "info": package.info.to_string(),
        "package_id": package.package_id,
        "name": package_id::package_name(&package.package_id),
        "summary": package.summary,
    })
}
