#![forbid(unsafe_code)]

//! Shared identifiers and the crate-wide error type.

use std::fmt;
use std::io;

use thiserror::Error;

/// Identifier of a fixed-size page inside the page cache.
///
/// `PageId(0)` is reserved for the pager's meta page and doubles as the
/// "none" encoding in on-page sibling pointers; it never names a live tree
/// node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    /// The reserved meta/none page id.
    pub const META: PageId = PageId(0);

    /// Returns true if this id can name a tree node.
    pub fn is_node(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ShaleError>;

/// Errors surfaced by the tree and its pager collaborators.
///
/// Expected conditions are plain return values, not errors: a `get` miss is
/// `Ok(None)` and deleting an absent key is `Ok(false)`. Everything here is
/// either a propagated I/O failure or a structural fault that must reach the
/// caller unretried.
#[derive(Debug, Error)]
pub enum ShaleError {
    /// I/O failure propagated unchanged from the page cache.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A page image failed decode-time invariants; fatal for that page.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// A node operation was asked to exceed page or order capacity.
    /// Reachable only through a balancer bug, never through user data.
    #[error("capacity exceeded: {0}")]
    Capacity(&'static str),
    /// API misuse, e.g. a key longer than the configured maximum.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_id_zero_is_reserved() {
        assert!(!PageId::META.is_node());
        assert!(PageId(1).is_node());
    }

    #[test]
    fn error_display_names_the_fault() {
        let err = ShaleError::Corruption("unsorted keys");
        assert_eq!(err.to_string(), "corruption detected: unsorted keys");
    }
}
