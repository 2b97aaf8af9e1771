use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::{PageId, Result, ShaleError};

use super::PageCache;

/// Heap-backed page cache used by unit and property tests.
///
/// Page ids are handed out sequentially starting at 1 and recycled from a
/// free stack; images are stored as owned byte vectors.
pub struct MemoryPager {
    page_size: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    pages: HashMap<u64, Vec<u8>>,
    free: Vec<u64>,
    next: u64,
    root: u64,
}

impl MemoryPager {
    /// Creates an empty cache serving pages of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            inner: Mutex::new(Inner {
                pages: HashMap::new(),
                free: Vec::new(),
                next: 1,
                root: 0,
            }),
        }
    }

    /// Number of currently allocated pages.
    pub fn allocated_pages(&self) -> usize {
        self.inner.lock().pages.len()
    }
}

impl PageCache for MemoryPager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn fetch(&self, id: PageId) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        inner
            .pages
            .get(&id.0)
            .cloned()
            .ok_or(ShaleError::Invalid("fetch of unallocated page"))
    }

    fn allocate(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let id = inner.free.pop().unwrap_or_else(|| {
            let id = inner.next;
            inner.next += 1;
            id
        });
        inner.pages.insert(id, vec![0u8; self.page_size]);
        Ok(PageId(id))
    }

    fn free(&self, id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.pages.remove(&id.0).is_none() {
            return Err(ShaleError::Invalid("free of unallocated page"));
        }
        inner.free.push(id.0);
        Ok(())
    }

    fn write(&self, id: PageId, page: &[u8]) -> Result<()> {
        if page.len() != self.page_size {
            return Err(ShaleError::Invalid("page image length mismatch"));
        }
        let mut inner = self.inner.lock();
        match inner.pages.get_mut(&id.0) {
            Some(slot) => {
                slot.copy_from_slice(page);
                Ok(())
            }
            None => Err(ShaleError::Invalid("write to unallocated page")),
        }
    }

    fn root_hint(&self) -> Result<Option<PageId>> {
        let root = self.inner.lock().root;
        Ok(if root == 0 { None } else { Some(PageId(root)) })
    }

    fn set_root_hint(&self, root: PageId) -> Result<()> {
        self.inner.lock().root = root.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_write_fetch_roundtrip() -> Result<()> {
        let pager = MemoryPager::new(256);
        let id = pager.allocate()?;
        let mut image = vec![0u8; 256];
        image[0] = 7;
        pager.write(id, &image)?;
        assert_eq!(pager.fetch(id)?, image);
        Ok(())
    }

    #[test]
    fn freed_ids_are_recycled() -> Result<()> {
        let pager = MemoryPager::new(64);
        let a = pager.allocate()?;
        pager.free(a)?;
        let b = pager.allocate()?;
        assert_eq!(a, b);
        assert!(pager.fetch(PageId(99)).is_err());
        Ok(())
    }

    #[test]
    fn root_hint_round_trips() -> Result<()> {
        let pager = MemoryPager::new(64);
        assert!(pager.root_hint()?.is_none());
        pager.set_root_hint(PageId(3))?;
        assert_eq!(pager.root_hint()?, Some(PageId(3)));
        Ok(())
    }
}
