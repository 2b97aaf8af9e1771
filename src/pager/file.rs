use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::types::{PageId, Result, ShaleError};

use super::{PageCache, PAGE_CRC_LEN, PAGE_CRC_OFFSET};

const META_MAGIC: u16 = 0x5348;
const META_VERSION: u8 = 1;

const META_ROOT_OFFSET: usize = 8;
const META_FREE_HEAD_OFFSET: usize = 16;
const META_PAGE_COUNT_OFFSET: usize = 24;
const META_PAGE_SIZE_OFFSET: usize = 32;
const META_MIN_LEN: usize = 36;

/// Offset inside a freed page where the next free-list link is stored.
const FREE_NEXT_OFFSET: usize = 8;

/// Configuration for [`FilePager`].
#[derive(Clone, Debug)]
pub struct FilePagerOptions {
    /// Page size in bytes for a newly created file. Ignored on open.
    pub page_size: usize,
    /// Whether `sync` issues an fsync.
    pub fsync: bool,
    /// Whether `fetch` verifies the page checksum.
    pub checksum_verify_on_read: bool,
}

impl Default for FilePagerOptions {
    fn default() -> Self {
        Self {
            page_size: 4096,
            fsync: true,
            checksum_verify_on_read: true,
        }
    }
}

/// Single-file page cache: fixed-size checksummed pages, page 0 holds the
/// meta record (root page, free-list head, page count), freed pages form an
/// intrusive free list.
pub struct FilePager {
    page_size: usize,
    options: FilePagerOptions,
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    root: u64,
    free_head: u64,
    page_count: u64,
}

impl FilePager {
    /// Creates a new pager file at `path`, truncating any existing file.
    pub fn create(path: impl AsRef<Path>, options: FilePagerOptions) -> Result<Self> {
        if options.page_size < META_MIN_LEN {
            return Err(ShaleError::Invalid("page size smaller than meta record"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let pager = Self {
            page_size: options.page_size,
            options,
            inner: Mutex::new(Inner {
                file,
                root: 0,
                free_head: 0,
                page_count: 1,
            }),
        };
        {
            let mut inner = pager.inner.lock();
            pager.write_meta(&mut inner)?;
        }
        Ok(pager)
    }

    /// Opens an existing pager file, reading the page size from its meta page.
    pub fn open(path: impl AsRef<Path>, options: FilePagerOptions) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut head = vec![0u8; META_MIN_LEN];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut head)?;
        let magic = u16::from_be_bytes([head[0], head[1]]);
        if magic != META_MAGIC {
            return Err(ShaleError::Corruption("bad pager magic"));
        }
        if head[2] != META_VERSION {
            return Err(ShaleError::Corruption("unsupported pager version"));
        }
        let page_size = u32::from_be_bytes(
            head[META_PAGE_SIZE_OFFSET..META_PAGE_SIZE_OFFSET + 4]
                .try_into()
                .expect("meta slice is 4 bytes"),
        ) as usize;
        if page_size < META_MIN_LEN {
            return Err(ShaleError::Corruption("meta page size out of range"));
        }

        let mut meta = vec![0u8; page_size];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut meta)?;
        if options.checksum_verify_on_read && page_checksum(&meta) != stored_checksum(&meta) {
            return Err(ShaleError::Corruption("meta page checksum mismatch"));
        }
        let root = read_u64(&meta, META_ROOT_OFFSET);
        let free_head = read_u64(&meta, META_FREE_HEAD_OFFSET);
        let page_count = read_u64(&meta, META_PAGE_COUNT_OFFSET);
        if page_count == 0 {
            return Err(ShaleError::Corruption("meta page count zero"));
        }
        Ok(Self {
            page_size,
            options,
            inner: Mutex::new(Inner {
                file,
                root,
                free_head,
                page_count,
            }),
        })
    }

    fn write_meta(&self, inner: &mut Inner) -> Result<()> {
        let mut meta = vec![0u8; self.page_size];
        meta[0..2].copy_from_slice(&META_MAGIC.to_be_bytes());
        meta[2] = META_VERSION;
        write_u64(&mut meta, META_ROOT_OFFSET, inner.root);
        write_u64(&mut meta, META_FREE_HEAD_OFFSET, inner.free_head);
        write_u64(&mut meta, META_PAGE_COUNT_OFFSET, inner.page_count);
        meta[META_PAGE_SIZE_OFFSET..META_PAGE_SIZE_OFFSET + 4]
            .copy_from_slice(&(self.page_size as u32).to_be_bytes());
        self.write_frame(inner, 0, &mut meta)
    }

    fn write_frame(&self, inner: &mut Inner, index: u64, image: &mut [u8]) -> Result<()> {
        stamp_checksum(image);
        let offset = index
            .checked_mul(self.page_size as u64)
            .ok_or(ShaleError::Invalid("page offset overflow"))?;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(image)?;
        Ok(())
    }

    fn read_frame(&self, inner: &mut Inner, index: u64) -> Result<Vec<u8>> {
        if index >= inner.page_count {
            return Err(ShaleError::Invalid("fetch of unallocated page"));
        }
        let offset = index * self.page_size as u64;
        let mut image = vec![0u8; self.page_size];
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(&mut image)?;
        if self.options.checksum_verify_on_read && page_checksum(&image) != stored_checksum(&image)
        {
            return Err(ShaleError::Corruption("page checksum mismatch"));
        }
        Ok(image)
    }
}

impl PageCache for FilePager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn fetch(&self, id: PageId) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        self.read_frame(&mut inner, id.0)
    }

    fn allocate(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let id = if inner.free_head != 0 {
            let head = inner.free_head;
            let image = self.read_frame(&mut inner, head)?;
            inner.free_head = read_u64(&image, FREE_NEXT_OFFSET);
            head
        } else {
            let id = inner.page_count;
            inner.page_count += 1;
            id
        };
        let mut zeroed = vec![0u8; self.page_size];
        self.write_frame(&mut inner, id, &mut zeroed)?;
        self.write_meta(&mut inner)?;
        Ok(PageId(id))
    }

    fn free(&self, id: PageId) -> Result<()> {
        if !id.is_node() {
            return Err(ShaleError::Invalid("cannot free the meta page"));
        }
        let mut inner = self.inner.lock();
        if id.0 >= inner.page_count {
            return Err(ShaleError::Invalid("free of unallocated page"));
        }
        let mut image = vec![0u8; self.page_size];
        write_u64(&mut image, FREE_NEXT_OFFSET, inner.free_head);
        self.write_frame(&mut inner, id.0, &mut image)?;
        inner.free_head = id.0;
        self.write_meta(&mut inner)
    }

    fn write(&self, id: PageId, page: &[u8]) -> Result<()> {
        if page.len() != self.page_size {
            return Err(ShaleError::Invalid("page image length mismatch"));
        }
        let mut inner = self.inner.lock();
        if id.0 >= inner.page_count {
            return Err(ShaleError::Invalid("write to unallocated page"));
        }
        let mut image = page.to_vec();
        self.write_frame(&mut inner, id.0, &mut image)
    }

    fn sync(&self) -> Result<()> {
        if self.options.fsync {
            self.inner.lock().file.sync_data()?;
        }
        Ok(())
    }

    fn root_hint(&self) -> Result<Option<PageId>> {
        let root = self.inner.lock().root;
        Ok(if root == 0 { None } else { Some(PageId(root)) })
    }

    fn set_root_hint(&self, root: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.root = root.0;
        self.write_meta(&mut inner)
    }
}

fn stamp_checksum(image: &mut [u8]) {
    let crc = page_checksum(image);
    image[PAGE_CRC_OFFSET..PAGE_CRC_OFFSET + PAGE_CRC_LEN].copy_from_slice(&crc.to_be_bytes());
}

fn stored_checksum(image: &[u8]) -> u32 {
    u32::from_be_bytes(
        image[PAGE_CRC_OFFSET..PAGE_CRC_OFFSET + PAGE_CRC_LEN]
            .try_into()
            .expect("crc slice is 4 bytes"),
    )
}

/// Checksum over the page with the CRC slot itself excluded.
fn page_checksum(image: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&image[..PAGE_CRC_OFFSET]);
    hasher.update(&image[PAGE_CRC_OFFSET + PAGE_CRC_LEN..]);
    hasher.finalize()
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_be_bytes(
        buf[offset..offset + 8]
            .try_into()
            .expect("u64 slice is 8 bytes"),
    )
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_allocate_write_fetch() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("pages.db");
        let pager = FilePager::create(&path, FilePagerOptions::default())?;
        let id = pager.allocate()?;
        let mut image = vec![0u8; pager.page_size()];
        image[100] = 42;
        pager.write(id, &image)?;
        let fetched = pager.fetch(id)?;
        assert_eq!(fetched[100], 42);
        Ok(())
    }

    #[test]
    fn reopen_preserves_root_and_pages() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("pages.db");
        let id;
        {
            let pager = FilePager::create(&path, FilePagerOptions::default())?;
            id = pager.allocate()?;
            let mut image = vec![0u8; pager.page_size()];
            image[8] = 9;
            pager.write(id, &image)?;
            pager.set_root_hint(id)?;
            pager.sync()?;
        }
        let pager = FilePager::open(&path, FilePagerOptions::default())?;
        assert_eq!(pager.root_hint()?, Some(id));
        assert_eq!(pager.fetch(id)?[8], 9);
        Ok(())
    }

    #[test]
    fn free_list_recycles_pages() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("pages.db");
        let pager = FilePager::create(&path, FilePagerOptions::default())?;
        let a = pager.allocate()?;
        let b = pager.allocate()?;
        pager.free(a)?;
        pager.free(b)?;
        assert_eq!(pager.allocate()?, b);
        assert_eq!(pager.allocate()?, a);
        Ok(())
    }

    #[test]
    fn corrupted_page_is_detected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("pages.db");
        let pager = FilePager::create(&path, FilePagerOptions::default())?;
        let id = pager.allocate()?;
        let image = vec![1u8; pager.page_size()];
        pager.write(id, &image)?;
        drop(pager);

        // Flip a byte in the page body behind the pager's back.
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
            file.seek(SeekFrom::Start(id.0 * 4096 + 200))?;
            file.write_all(&[0xFF])?;
        }
        let pager = FilePager::open(&path, FilePagerOptions::default())?;
        let err = pager.fetch(id).unwrap_err();
        assert!(matches!(err, ShaleError::Corruption(_)));
        Ok(())
    }
}
