//! Shale: a disk-oriented B+ tree index.
//!
//! The tree stores order-preserving encoded keys and opaque values in
//! fixed-size pages owned by an external page cache. Lookups, ordered range
//! scans, and upsert/delete with split/merge rebalancing are provided;
//! logging, transactions, and raw file I/O belong to the surrounding engine
//! and are reached through the [`pager::PageCache`] and
//! [`btree::SmoObserver`] boundaries.

#![warn(missing_docs)]

pub mod btree;
pub mod latch;
pub mod pager;
pub mod types;
