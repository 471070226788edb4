//! Package identifiers
//!
//! The service names packages with a four-field composite key joined by
//! `;`: `name;version;arch;data`, e.g. `vim;9.0.1-1;x86_64;fedora`.
//! Installed packages carry `installed` (or `installed:<repo>`) as data.
//!
//! Field extraction never fails: missing trailing fields read as empty
//! strings. The data field is everything after the third delimiter, so a
//! repository tag that itself contains `;` survives a split and rejoin.

use std::fmt::{self, Display, Formatter};

/// Field delimiter of package identifiers
pub const DELIMITER: char = ';';

/// A package identifier split into its fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PackageId {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub data: String,
}

impl PackageId {
    /// Builds an identifier from its four fields
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        arch: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            arch: arch.into(),
            data: data.into(),
        }
    }

    /// Splits an identifier string; missing fields are left empty
    pub fn parse(package_id: &str) -> Self {
        let mut parts = package_id.splitn(4, DELIMITER);
        Self {
            name: parts.next().unwrap_or_default().to_string(),
            version: parts.next().unwrap_or_default().to_string(),
            arch: parts.next().unwrap_or_default().to_string(),
            data: parts.next().unwrap_or_default().to_string(),
        }
    }

    /// Whether the data field marks an installed package
    pub fn is_installed(&self) -> bool {
        self.data == "installed" || self.data.starts_with("installed:")
    }
}

impl Display for PackageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            self.name, self.version, self.arch, self.data
        )
    }
}

impl From<&str> for PackageId {
    fn from(package_id: &str) -> Self {
        Self::parse(package_id)
    }
}

fn field(package_id: &str, index: usize) -> &str {
    package_id.splitn(4, DELIMITER).nth(index).unwrap_or_default()
}

/// The name field of a package identifier
pub fn package_name(package_id: &str) -> &str {
    field(package_id, 0)
}

/// The version field of a package identifier
pub fn package_version(package_id: &str) -> &str {
    field(package_id, 1)
}

/// The architecture field of a package identifier
pub fn package_arch(package_id: &str) -> &str {
    field(package_id, 2)
}

/// The data (repository) field of a package identifier
pub fn package_data(package_id: &str) -> &str {
    field(package_id, 3)
}

/// Icon name for a package
///
/// Icons come from the desktop application cache, which this client does
/// not read, so this is always empty.
pub fn package_icon(_package_id: &str) -> String {
    String::new()
}
