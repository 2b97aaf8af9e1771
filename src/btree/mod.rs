#![forbid(unsafe_code)]

//! Disk-oriented B+Tree.
//!
//! Nodes live one per page behind a [`PageCache`](crate::pager::PageCache);
//! leaves hold the records and are chained for ordered scans, internal
//! nodes hold separator keys. Concurrent access uses per-page latch
//! crabbing: readers hand latches down the descent, writers hold a prefix
//! of exclusive latches until the descent proves no structural change can
//! reach it.

mod balance;
pub mod codec;
mod codecs;
mod cursor;
pub mod node;
mod smo;
mod stats;
mod tree;


pub use codecs::{KeyCodec, ValCodec};
pub use cursor::RangeScan;
pub use smo::{NoopObserver, SmoObserver};
pub use stats::{TreeStats, TreeStatsSnapshot};
pub use tree::{BTree, TreeOptions};
