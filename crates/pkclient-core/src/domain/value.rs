//! Bus-independent argument values
//!
//! [`WireValue`] is the currency of the [`RpcChannel`](crate::ports::RpcChannel)
//! port: method arguments, reply tuples, signal arguments and property bags
//! are all expressed with it. The IPC crate converts to and from zvariant.

use std::collections::BTreeMap;

/// A single positional argument, reply value or property value
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Bool(bool),
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    List(Vec<WireValue>),
    Map(BTreeMap<String, WireValue>),
    Struct(Vec<WireValue>),
}

impl WireValue {
    /// Builds a string list value
    pub fn str_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        WireValue::List(items.into_iter().map(|s| WireValue::Str(s.into())).collect())
    }

    /// Builds an object path value
    pub fn object_path(path: impl Into<String>) -> Self {
        WireValue::ObjectPath(path.into())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Unsigned view of any integer value that fits in `u32`
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            WireValue::U32(v) => Some(*v),
            WireValue::U64(v) => u32::try_from(*v).ok(),
            WireValue::I32(v) => u32::try_from(*v).ok(),
            WireValue::I64(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Unsigned view of any non-negative integer value
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            WireValue::U32(v) => Some(u64::from(*v)),
            WireValue::U64(v) => Some(*v),
            WireValue::I32(v) => u64::try_from(*v).ok(),
            WireValue::I64(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// String view of string and object path values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Str(s) | WireValue::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    /// List of strings; `None` if any element is not a string
    pub fn as_str_list(&self) -> Option<Vec<String>> {
        match self {
            WireValue::List(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, WireValue>> {
        match self {
            WireValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Elements of a list or the fields of a struct
    pub fn as_items(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::List(items) | WireValue::Struct(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        WireValue::Bool(v)
    }
}

impl From<u32> for WireValue {
    fn from(v: u32) -> Self {
        WireValue::U32(v)
    }
}

impl From<u64> for WireValue {
    fn from(v: u64) -> Self {
        WireValue::U64(v)
    }
}

impl From<&str> for WireValue {
    fn from(v: &str) -> Self {
        WireValue::Str(v.to_string())
    }
}

impl From<String> for WireValue {
    fn from(v: String) -> Self {
        WireValue::Str(v)
    }
}

impl From<Vec<String>> for WireValue {
    fn from(v: Vec<String>) -> Self {
        WireValue::str_list(v)
    }
}

impl From<BTreeMap<String, WireValue>> for WireValue {
    fn from(v: BTreeMap<String, WireValue>) -> Self {
        WireValue::Map(v)
    }
}
