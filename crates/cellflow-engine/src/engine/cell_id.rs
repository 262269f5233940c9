//! Cell identifier parsing and formatting.
//!
//! Cells are addressed by stable, sheet-unique names (e.g. `revenue`,
//! `orders_2024`). Identifiers are plain word tokens so that references to
//! other cells can be recognized inside formula text.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// A stable, sheet-unique cell identifier.
///
/// Valid identifiers are non-empty word tokens: ASCII letters, digits and
/// underscores, not starting with a digit.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    /// Parse a cell identifier from a word token.
    /// Returns None if the input is not a valid identifier.
    pub fn parse(name: &str) -> Option<CellId> {
        if Self::is_valid(name) {
            Some(CellId(name.to_string()))
        } else {
            None
        }
    }

    /// Check whether a token would be a valid cell identifier.
    pub fn is_valid(name: &str) -> bool {
        let mut bytes = name.bytes();
        match bytes.next() {
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
            _ => return false,
        }
        bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for CellId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid cell identifier: {}", s))
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets `HashMap<CellId, _>` and friends be queried with a plain `&str`.
impl Borrow<str> for CellId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CellId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::CellId;

    #[test]
    fn test_parse_accepts_word_tokens() {
        assert!(CellId::parse("revenue").is_some());
        assert!(CellId::parse("orders_2024").is_some());
        assert!(CellId::parse("_tmp").is_some());
    }

    #[test]
    fn test_parse_rejects_invalid_tokens() {
        assert!(CellId::parse("").is_none());
        assert!(CellId::parse("1st").is_none());
        assert!(CellId::parse("a-b").is_none());
        assert!(CellId::parse("a b").is_none());
    }

    #[test]
    fn test_display_round_trips() {
        let id = CellId::parse("total").unwrap();
        assert_eq!(id.to_string(), "total");
        assert_eq!(id.as_str(), "total");
    }
}
