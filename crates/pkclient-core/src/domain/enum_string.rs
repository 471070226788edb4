//! Conversion between enum values and the service's kebab-case strings
//!
//! The service names enum values the way its C headers do, lowercased and
//! dash separated: `RoleSearchName` travels as `search-name`,
//! `GroupDesktopKde` as `desktop-kde`. Negated filters carry a leading
//! `~`: `FilterNotInstalled` travels as `~installed`.
//!
//! The rules, applied to the full variant key (domain prefix included):
//! 1. the domain prefix is stripped on the way out and added on the way in;
//! 2. a dash goes before every upper-case letter except the first;
//! 3. a leading `~` is the `Not` prefix;
//! 4. anything that does not name a variant becomes the domain's
//!    designated unknown value.

/// An enumeration that has a string form on the wire
pub trait WireEnum: Copy + PartialEq + Sized + 'static {
    /// Prefix shared by every variant key of the domain, e.g. `"Role"`
    const PREFIX: &'static str;

    /// Whether `Not*` variants render with the `~` negation prefix
    const NEGATABLE: bool = false;

    /// Every variant paired with its full key, e.g. `("RoleSearchName", ..)`
    fn keys() -> &'static [(&'static str, Self)];

    /// The value unrecognised strings fall back to
    fn unknown() -> Self;
}

/// Renders `value` as the service's string for it
pub fn enum_to_string<E: WireEnum>(value: E) -> String {
    let Some(key) = E::keys()
        .iter()
        .find(|(_, v)| *v == value)
        .map(|(key, _)| *key)
    else {
        return String::new();
    };

    let name = key.strip_prefix(E::PREFIX).unwrap_or(key);

    if E::NEGATABLE {
        if let Some(rest) = name.strip_prefix("Not") {
            if rest.starts_with(|c: char| c.is_ascii_uppercase()) {
                return format!("~{}", dash_case(rest));
            }
        }
    }

    dash_case(name)
}

/// Parses the service's string form, falling back to the unknown value
pub fn enum_from_string<E: WireEnum>(text: &str) -> E {
    let mut real_name = String::with_capacity(E::PREFIX.len() + text.len() + 3);
    real_name.push_str(E::PREFIX);

    let mut capitalize = true;
    for c in text.chars() {
        match c {
            '-' => capitalize = true,
            '~' => {
                real_name.push_str("Not");
                capitalize = true;
            }
            _ => {
                let lower = c.to_ascii_lowercase();
                if capitalize {
                    real_name.push(lower.to_ascii_uppercase());
                } else {
                    real_name.push(lower);
                }
                capitalize = false;
            }
        }
    }

    E::keys()
        .iter()
        .find(|(key, _)| *key == real_name)
        .map(|(_, v)| *v)
        .unwrap_or_else(E::unknown)
}

fn dash_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            out.push('-');
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}
