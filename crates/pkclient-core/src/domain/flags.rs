//! Flag sets and position bitfields
//!
//! Two encodings travel on the wire:
//! - **value flags** ([`Filters`], [`TransactionFlags`]): each enum value is
//!   already a distinct bit, the set is their OR
//! - **position bitfields** ([`Bitfield`], used for supported roles and
//!   groups): bit `n` is set when the enum value `n` is a member

use std::fmt;

use bitflags::bitflags;

use super::enum_string::{enum_from_string, enum_to_string};
use super::enums::{Filter, TransactionFlag};

bitflags! {
    /// A set of [`Filter`] values
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Filters: u64 {
        const UNKNOWN = 0x0000001;
        const NONE = 0x0000002;
        const INSTALLED = 0x0000004;
        const NOT_INSTALLED = 0x0000008;
        const DEVEL = 0x0000010;
        const NOT_DEVEL = 0x0000020;
        const GUI = 0x0000040;
        const NOT_GUI = 0x0000080;
        const FREE = 0x0000100;
        const NOT_FREE = 0x0000200;
        const VISIBLE = 0x0000400;
        const NOT_VISIBLE = 0x0000800;
        const SUPPORTED = 0x0001000;
        const NOT_SUPPORTED = 0x0002000;
        const BASENAME = 0x0004000;
        const NOT_BASENAME = 0x0008000;
        const NEWEST = 0x0010000;
        const NOT_NEWEST = 0x0020000;
        const ARCH = 0x0040000;
        const NOT_ARCH = 0x0080000;
        const SOURCE = 0x0100000;
        const NOT_SOURCE = 0x0200000;
        const COLLECTIONS = 0x0400000;
        const NOT_COLLECTIONS = 0x0800000;
        const APPLICATION = 0x1000000;
        const NOT_APPLICATION = 0x2000000;
        const DOWNLOADED = 0x4000000;
        const NOT_DOWNLOADED = 0x8000000;
    }
}

impl Filters {
    /// The value sent on the wire; an empty set means "no filter"
    pub fn or_none(self) -> Self {
        if self.is_empty() {
            Filters::NONE
        } else {
            self
        }
    }

    /// The individual filters in ascending bit order
    pub fn filters(self) -> Vec<Filter> {
        Filter::ALL
            .iter()
            .copied()
            .filter(|f| self.contains(Filters::from(*f)))
            .collect()
    }

    /// Parses a `;` separated list such as `installed;~devel`
    ///
    /// Unrecognised names become [`Filter::Unknown`], matching how the
    /// service treats them.
    pub fn parse(text: &str) -> Self {
        text.split(';')
            .filter(|part| !part.is_empty())
            .map(|part| Filters::from(enum_from_string::<Filter>(part.trim())))
            .fold(Filters::empty(), |acc, f| acc | f)
    }
}

impl From<Filter> for Filters {
    fn from(filter: Filter) -> Self {
        Filters::from_bits_retain(u64::from(filter.as_u32()))
    }
}

impl fmt::Display for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.filters().into_iter().map(enum_to_string).collect();
        f.write_str(&names.join(";"))
    }
}

bitflags! {
    /// A set of [`TransactionFlag`] values
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TransactionFlags: u64 {
        const NONE = 1 << 0;
        const ONLY_TRUSTED = 1 << 1;
        const SIMULATE = 1 << 2;
        const ONLY_DOWNLOAD = 1 << 3;
        const ALLOW_REINSTALL = 1 << 4;
        const JUST_REINSTALL = 1 << 5;
        const ALLOW_DOWNGRADE = 1 << 6;
    }
}

impl TransactionFlags {
    /// The value sent on the wire; an empty set means "no flags"
    pub fn or_none(self) -> Self {
        if self.is_empty() {
            TransactionFlags::NONE
        } else {
            self
        }
    }
}

impl From<TransactionFlag> for TransactionFlags {
    fn from(flag: TransactionFlag) -> Self {
        TransactionFlags::from_bits_retain(u64::from(flag.as_u32()))
    }
}

/// Set of enum values encoded by bit position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Bitfield(u64);

impl Bitfield {
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Whether the value at `position` is a member
    pub fn contains(&self, position: u32) -> bool {
        position < 64 && self.0 & (1u64 << position) != 0
    }

    /// Adds the value at `position`; positions past 63 are ignored
    pub fn insert(&mut self, position: u32) {
        if position < 64 {
            self.0 |= 1u64 << position;
        }
    }

    /// Member positions from 1 to 63 in ascending order
    ///
    /// Position 0 is every domain's unknown value and is never reported.
    pub fn positions(&self) -> impl Iterator<Item = u32> + '_ {
        (1..64).filter(move |pos| self.contains(*pos))
    }
}

impl From<u64> for Bitfield {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

impl FromIterator<u32> for Bitfield {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut field = Bitfield::default();
        for pos in iter {
            field.insert(pos);
        }
        field
    }
}
