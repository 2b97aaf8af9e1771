#![forbid(unsafe_code)]

//! The page-cache boundary the tree is built against.
//!
//! The tree never performs raw file I/O; it asks a [`PageCache`] for page
//! images by id and hands mutated images back. Two implementations ship with
//! the crate: an in-memory cache for tests and a single-file pager with
//! checksummed pages.

mod file;
mod memory;

pub use file::{FilePager, FilePagerOptions};
pub use memory::MemoryPager;

use crate::types::{PageId, Result};

/// Byte offset of the CRC32 slot inside every page image.
///
/// The slot is stamped on [`PageCache::write`] and verified on
/// [`PageCache::fetch`] by caches that checksum; the tree's node codec
/// leaves it zeroed.
pub const PAGE_CRC_OFFSET: usize = 4;

/// Length of the CRC32 slot.
pub const PAGE_CRC_LEN: usize = 4;

/// Page-oriented storage consumed by the tree.
///
/// `write` installs a full page image and marks the page dirty in one call;
/// durability is the implementation's business (`sync` is the only hook the
/// tree ever pulls, and only when its caller asks).
pub trait PageCache: Send + Sync + 'static {
    /// Size in bytes of every page this cache serves.
    fn page_size(&self) -> usize;

    /// Returns the current image of an allocated page. May block on I/O.
    fn fetch(&self, id: PageId) -> Result<Vec<u8>>;

    /// Allocates a fresh (zeroed) page and returns its id.
    fn allocate(&self) -> Result<PageId>;

    /// Returns a page to the cache's free pool. The caller must guarantee
    /// nothing references the page any more.
    fn free(&self, id: PageId) -> Result<()>;

    /// Installs `page` as the new image of `id` and marks it dirty.
    fn write(&self, id: PageId, page: &[u8]) -> Result<()>;

    /// Flushes dirty state to durable storage where applicable.
    fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// The root page recorded for the tree stored in this cache, if any.
    fn root_hint(&self) -> Result<Option<PageId>>;

    /// Records the tree's root page so a reopened cache can find it.
    fn set_root_hint(&self, root: PageId) -> Result<()>;
}
