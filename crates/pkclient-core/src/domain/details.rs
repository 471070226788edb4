//! Package detail records
//!
//! `Details` signals carry an open `a{sv}` bag so the service can add keys
//! without breaking clients. The keys this library knows about get typed
//! fields; everything else is kept in [`Details::extra`].

use std::collections::BTreeMap;

use super::enums::Group;
use super::value::WireValue;

/// Detail record for one package
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Details {
    pub package_id: String,
    pub description: Option<String>,
    pub group: Option<Group>,
    pub summary: Option<String>,
    pub url: Option<String>,
    pub license: Option<String>,
    /// Installed or download size in bytes
    pub size: Option<u64>,
    /// Keys this library does not interpret
    pub extra: BTreeMap<String, WireValue>,
}

impl Details {
    /// Builds a record from the wire property bag
    ///
    /// Known keys with an unexpected value type are moved to `extra`
    /// instead of being dropped.
    pub fn from_map(map: BTreeMap<String, WireValue>) -> Self {
        let mut details = Details::default();

        for (key, value) in map {
            let consumed = match key.as_str() {
                "package-id" => value
                    .as_str()
                    .map(|s| details.package_id = s.to_string())
                    .is_some(),
                "description" => value
                    .as_str()
                    .map(|s| details.description = Some(s.to_string()))
                    .is_some(),
                "summary" => value
                    .as_str()
                    .map(|s| details.summary = Some(s.to_string()))
                    .is_some(),
                "url" => value
                    .as_str()
                    .map(|s| details.url = Some(s.to_string()))
                    .is_some(),
                "license" => value
                    .as_str()
                    .map(|s| details.license = Some(s.to_string()))
                    .is_some(),
                "group" => value
                    .as_u32()
                    .map(|g| details.group = Some(Group::from_u32(g)))
                    .is_some(),
                "size" => value.as_u64().map(|s| details.size = Some(s)).is_some(),
                _ => false,
            };

            if !consumed {
                details.extra.insert(key, value);
            }
        }

        details
    }

    /// Looks up any key, known or not, in its wire form
    pub fn get(&self, key: &str) -> Option<WireValue> {
        match key {
            "package-id" => Some(WireValue::from(self.package_id.as_str())),
            "description" => self.description.clone().map(WireValue::from),
            "summary" => self.summary.clone().map(WireValue::from),
            "url" => self.url.clone().map(WireValue::from),
            "license" => self.license.clone().map(WireValue::from),
            "group" => self.group.map(|g| WireValue::U32(g.as_u32())),
            "size" => self.size.map(WireValue::U64),
            _ => self.extra.get(key).cloned(),
        }
    }
}
