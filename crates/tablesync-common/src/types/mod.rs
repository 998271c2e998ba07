//! Common types used across TableSync

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{Result, TableSyncError};

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

#[allow(clippy::expect_used)]
static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles")
});

/// A validated SQL identifier (table or column name).
///
/// Table and column names are the only parts of generated SQL that cannot be
/// bound as parameters, so they are restricted to a conservative alphabet and
/// always emitted double-quoted.
///
/// # Examples
///
/// ```
/// use tablesync_common::Identifier;
///
/// let table = Identifier::parse("l21s_users").unwrap();
/// assert_eq!(table.quoted(), "\"l21s_users\"");
/// assert!(Identifier::parse("users; DROP TABLE x").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Validate and wrap a raw identifier
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() > MAX_IDENTIFIER_LEN || !IDENTIFIER_PATTERN.is_match(raw) {
            return Err(TableSyncError::InvalidIdentifier(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier wrapped in double quotes, ready to splice into SQL
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = TableSyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
