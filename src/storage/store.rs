//! # Paged File Store
//!
//! `PagedStore` turns random page access into cached, batched I/O over a
//! single backing file. It owns the file handle (or the memory mapping), the
//! page/extent cache, and the monotonic page allocator whose cursor lives in
//! the page-0 header.
//!
//! ## Write Path
//!
//! Writes are write-through: `write_page` installs the page in the cache
//! *and* writes it to the backing file before returning. The dirty flag on
//! cached entries drives `flush`, which rewrites every dirty entry and then
//! issues one durable sync, and the eviction contract, which writes back a
//! dirty entry before the cache drops it.
//!
//! ## Read Path
//!
//! `read_page` serves hits from the cache; a miss reads exactly one page
//! from the file (zero-filled past EOF; a short read is not an error),
//! installs it, and returns a copy. In extent mode the miss loads the whole
//! owning extent; an extent that lies entirely beyond EOF is materialized as
//! zero-filled pages without touching the file.
//!
//! ## Locking
//!
//! Two locks, always acquired cache-then-backing:
//!
//! - `cache: Mutex`, held briefly for lookup and recency splicing.
//! - `backing: RwLock`, shared for page reads, exclusive for writes,
//!   allocation, and flush.
//!
//! Readers therefore overlap on file I/O (positional reads need no cursor),
//! while writers and the allocator serialize.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{ensure, Result, WrapErr};
use parking_lot::{Mutex, RwLock};

use super::extent::{extent_of, offset_in_extent};
use super::headers::FileHeader;
use super::{Extent, LruCache, MmapFile, Page};
use crate::config::{
    DATA_FILE_EXTENSION, DEFAULT_CACHE_CAPACITY, EXTENT_PAGES, FILE_HEADER_SIZE, PAGE_SIZE,
};

/// Options controlling how a store is opened.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub cache_capacity: usize,
    pub memory_mapped: bool,
    pub extent_cache: bool,
}

impl StoreOptions {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            memory_mapped: false,
            extent_cache: true,
        }
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn memory_mapped(mut self, enabled: bool) -> Self {
        self.memory_mapped = enabled;
        self
    }

    pub fn extent_cache(mut self, enabled: bool) -> Self {
        self.extent_cache = enabled;
        self
    }

    /// The path with the data extension appended when none is present.
    pub fn normalized_path(&self) -> PathBuf {
        let mut path = self.path.clone();
        if path.extension().is_none() {
            path.set_extension(DATA_FILE_EXTENSION);
        }
        path
    }
}

#[derive(Debug)]
enum Backing {
    Direct { file: std::fs::File, len: u64 },
    Mapped(MmapFile),
}

impl Backing {
    fn len_bytes(&self) -> u64 {
        match self {
            Backing::Direct { len, .. } => *len,
            Backing::Mapped(m) => m.page_count() as u64 * PAGE_SIZE as u64,
        }
    }

    /// Reads page `id` into `buf`, zero-filling anything past EOF.
    fn read_into(&self, id: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        buf.fill(0);
        let offset = id as u64 * PAGE_SIZE as u64;

        match self {
            Backing::Direct { file, len } => {
                if offset >= *len {
                    return Ok(());
                }
                let avail = ((*len - offset) as usize).min(PAGE_SIZE);
                file.read_exact_at(&mut buf[..avail], offset)
                    .wrap_err_with(|| format!("failed to read page {}", id))?;
            }
            Backing::Mapped(m) => {
                if id < m.page_count() {
                    buf.copy_from_slice(m.page(id)?);
                }
            }
        }
        Ok(())
    }

    /// Writes page `id` through to the file, extending it when the page lies
    /// past the current end.
    fn write_page(&mut self, id: u32, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let offset = id as u64 * PAGE_SIZE as u64;

        match self {
            Backing::Direct { file, len } => {
                file.write_all_at(data, offset)
                    .wrap_err_with(|| format!("failed to write page {}", id))?;
                *len = (*len).max(offset + PAGE_SIZE as u64);
            }
            Backing::Mapped(m) => {
                if id >= m.page_count() {
                    m.grow(id + 1)?;
                }
                m.page_mut(id)?.copy_from_slice(data);
            }
        }
        Ok(())
    }

    /// Writeback for an entry evicted on the read path, where only the
    /// shared lock is held. Evicted pages were already written through, so
    /// the mapped backing has nothing to do and the direct backing rewrites
    /// in place (positional writes are safe under the shared lock).
    fn writeback_shared(&self, page: &Page) -> Result<()> {
        match self {
            Backing::Direct { file, .. } => file
                .write_all_at(page.data(), page.offset())
                .wrap_err_with(|| format!("failed to write back evicted page {}", page.id())),
            Backing::Mapped(_) => Ok(()),
        }
    }

    /// Extends the file to cover `count` pages.
    fn ensure_pages(&mut self, count: u32) -> Result<()> {
        let target = count as u64 * PAGE_SIZE as u64;
        match self {
            Backing::Direct { file, len } => {
                if *len < target {
                    file.set_len(target)
                        .wrap_err_with(|| format!("failed to extend data file to {} bytes", target))?;
                    *len = target;
                }
                Ok(())
            }
            Backing::Mapped(m) => m.grow(count),
        }
    }

    fn sync(&self) -> Result<()> {
        match self {
            Backing::Direct { file, .. } => file.sync_all().wrap_err("failed to sync data file"),
            Backing::Mapped(m) => m.sync(),
        }
    }
}

#[derive(Debug)]
enum CacheMode {
    Pages(LruCache<u32, Page>),
    Extents(LruCache<u32, Extent>),
}

#[derive(Debug)]
pub struct PagedStore {
    path: PathBuf,
    backing: RwLock<Backing>,
    cache: Mutex<CacheMode>,
    closed: AtomicBool,
}

impl PagedStore {
    /// Opens or creates the data file named by `options`.
    ///
    /// A new file gets a fresh header page and is fsynced before the store
    /// is returned. An existing file must carry the expected magic and
    /// version; any mismatch, a missing parent directory, or a permission
    /// failure is a fatal open error.
    pub fn open(options: StoreOptions) -> Result<Self> {
        let path = options.normalized_path();

        if !path.exists() {
            Self::initialize_file(&path)?;
        } else {
            Self::validate_header(&path)?;
        }

        let backing = if options.memory_mapped {
            Backing::Mapped(MmapFile::open(&path)?)
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .wrap_err_with(|| format!("failed to open data file '{}'", path.display()))?;
            let len = file
                .metadata()
                .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
                .len();
            Backing::Direct { file, len }
        };

        let cache = if options.extent_cache {
            CacheMode::Extents(LruCache::new(options.cache_capacity))
        } else {
            CacheMode::Pages(LruCache::new(options.cache_capacity))
        };

        Ok(Self {
            path,
            backing: RwLock::new(backing),
            cache: Mutex::new(cache),
            closed: AtomicBool::new(false),
        })
    }

    fn initialize_file(path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create data file '{}'", path.display()))?;

        let mut page0 = [0u8; PAGE_SIZE];
        let header = FileHeader::new();
        page0[..FILE_HEADER_SIZE].copy_from_slice(zerocopy::IntoBytes::as_bytes(&header));

        file.write_all_at(&page0, 0)
            .wrap_err("failed to write header page")?;
        file.sync_all().wrap_err("failed to sync new data file")
    }

    fn validate_header(path: &Path) -> Result<()> {
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("failed to open data file '{}'", path.display()))?;

        let mut header_bytes = [0u8; FILE_HEADER_SIZE];
        file.read_exact_at(&mut header_bytes, 0)
            .wrap_err_with(|| format!("corrupted header in '{}'", path.display()))?;

        FileHeader::from_bytes(&header_bytes)
            .wrap_err_with(|| format!("cannot open '{}'", path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<()> {
        ensure!(!self.closed.load(Ordering::Acquire), "store is closed");
        Ok(())
    }

    /// Returns a copy of page `id`, reading through the cache.
    pub fn read_page(&self, id: u32) -> Result<Page> {
        self.ensure_open()?;
        let mut cache = self.cache.lock();

        match &mut *cache {
            CacheMode::Pages(lru) => {
                if let Some(page) = lru.get(&id) {
                    return Ok(page.clone());
                }

                let backing = self.backing.read();
                let mut buf = [0u8; PAGE_SIZE];
                backing.read_into(id, &mut buf)?;
                let page = Page::from_bytes(id, &buf)?;

                if let Some((_, evicted)) = lru.put(id, page.clone()) {
                    if evicted.is_dirty() {
                        backing.writeback_shared(&evicted)?;
                    }
                }
                Ok(page)
            }
            CacheMode::Extents(lru) => {
                let eid = extent_of(id);
                if let Some(extent) = lru.get(&eid) {
                    return Ok(extent.page(offset_in_extent(id)).clone());
                }

                let backing = self.backing.read();
                let extent = Self::load_extent(&backing, eid)?;
                let page = extent.page(offset_in_extent(id)).clone();

                if let Some((_, evicted)) = lru.put(eid, extent) {
                    for dirty in evicted.dirty_pages() {
                        backing.writeback_shared(dirty)?;
                    }
                }
                Ok(page)
            }
        }
    }

    /// Installs `page` in the cache, marks it dirty, and writes it through
    /// to the backing file.
    pub fn write_page(&self, mut page: Page) -> Result<()> {
        self.ensure_open()?;
        page.mark_dirty();

        let mut cache = self.cache.lock();
        let mut backing = self.backing.write();

        backing.write_page(page.id(), page.data())?;

        match &mut *cache {
            CacheMode::Pages(lru) => {
                if let Some((_, evicted)) = lru.put(page.id(), page) {
                    if evicted.is_dirty() {
                        backing.write_page(evicted.id(), evicted.data())?;
                    }
                }
            }
            CacheMode::Extents(lru) => {
                let eid = extent_of(page.id());
                if lru.contains(&eid) {
                    let extent = lru
                        .get_mut(&eid)
                        .expect("entry cannot vanish under the cache lock");
                    extent.install_page(page)?;
                } else {
                    let mut extent = Self::load_extent(&backing, eid)?;
                    extent.install_page(page)?;
                    if let Some((_, evicted)) = lru.put(eid, extent) {
                        for dirty in evicted.dirty_pages() {
                            backing.write_page(dirty.id(), dirty.data())?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Consumes the allocator cursor in the header page, extends the file to
    /// cover the new page, and returns its id.
    pub fn allocate_page(&self) -> Result<u32> {
        self.ensure_open()?;
        let mut cache = self.cache.lock();
        let mut backing = self.backing.write();

        let mut buf = [0u8; PAGE_SIZE];
        backing.read_into(0, &mut buf)?;

        let id = {
            let header = FileHeader::from_bytes_mut(&mut buf)?;
            header.take_next_page_id()
        };

        backing.write_page(0, &buf)?;
        backing.ensure_pages(id + 1)?;

        // Keep any cached copy of the header page coherent with the write.
        let header_page = Page::from_bytes(0, &buf)?;
        match &mut *cache {
            CacheMode::Pages(lru) => {
                if let Some((_, evicted)) = lru.put(0, header_page) {
                    if evicted.is_dirty() {
                        backing.write_page(evicted.id(), evicted.data())?;
                    }
                }
            }
            CacheMode::Extents(lru) => {
                if let Some(extent) = lru.get_mut(&0) {
                    extent.install_page(header_page)?;
                }
            }
        }

        Ok(id)
    }

    /// Reads all 8 pages of extent `eid`; pages past EOF come back
    /// zero-filled and clean.
    pub fn read_extent(&self, eid: u32) -> Result<Extent> {
        self.ensure_open()?;
        let mut cache = self.cache.lock();

        match &mut *cache {
            CacheMode::Extents(lru) => {
                if let Some(extent) = lru.get(&eid) {
                    return Ok(extent.clone());
                }

                let backing = self.backing.read();
                let extent = Self::load_extent(&backing, eid)?;

                if let Some((_, evicted)) = lru.put(eid, extent.clone()) {
                    for dirty in evicted.dirty_pages() {
                        backing.writeback_shared(dirty)?;
                    }
                }
                Ok(extent)
            }
            CacheMode::Pages(lru) => {
                let backing = self.backing.read();
                let first = eid * EXTENT_PAGES as u32;
                let mut pages = Vec::with_capacity(EXTENT_PAGES);

                for i in 0..EXTENT_PAGES as u32 {
                    let id = first + i;
                    if let Some(page) = lru.get(&id) {
                        pages.push(page.clone());
                        continue;
                    }

                    let mut buf = [0u8; PAGE_SIZE];
                    backing.read_into(id, &mut buf)?;
                    let page = Page::from_bytes(id, &buf)?;
                    if let Some((_, evicted)) = lru.put(id, page.clone()) {
                        if evicted.is_dirty() {
                            backing.writeback_shared(&evicted)?;
                        }
                    }
                    pages.push(page);
                }

                Extent::from_pages(eid, pages)
            }
        }
    }

    /// Writes each dirty member page of `extent` at its natural offset,
    /// clears the dirty flags, and installs the cleaned extent in the cache.
    pub fn write_extent(&self, mut extent: Extent) -> Result<()> {
        self.ensure_open()?;
        let mut cache = self.cache.lock();
        let mut backing = self.backing.write();

        for page in extent.dirty_pages() {
            backing.write_page(page.id(), page.data())?;
        }
        extent.clear_dirty();

        match &mut *cache {
            CacheMode::Extents(lru) => {
                if let Some((_, evicted)) = lru.put(extent.id(), extent) {
                    for dirty in evicted.dirty_pages() {
                        backing.write_page(dirty.id(), dirty.data())?;
                    }
                }
            }
            CacheMode::Pages(lru) => {
                for page in extent.pages() {
                    if let Some((_, evicted)) = lru.put(page.id(), page.clone()) {
                        if evicted.is_dirty() {
                            backing.write_page(evicted.id(), evicted.data())?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes every dirty cached entry through, clears its dirty flag, and
    /// issues one durable sync.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        let mut cache = self.cache.lock();
        let mut backing = self.backing.write();

        let mut result = Ok(());
        match &mut *cache {
            CacheMode::Pages(lru) => {
                lru.for_each_mut(|_, page| {
                    if result.is_err() || !page.is_dirty() {
                        return;
                    }
                    match backing.write_page(page.id(), page.data()) {
                        Ok(()) => page.clear_dirty(),
                        Err(e) => result = Err(e),
                    }
                });
            }
            CacheMode::Extents(lru) => {
                lru.for_each_mut(|_, extent| {
                    if result.is_err() || !extent.is_dirty() {
                        return;
                    }
                    for i in 0..EXTENT_PAGES {
                        let page = extent.page_mut(i);
                        if !page.is_dirty() {
                            continue;
                        }
                        match backing.write_page(page.id(), page.data()) {
                            Ok(()) => page.clear_dirty(),
                            Err(e) => {
                                result = Err(e);
                                return;
                            }
                        }
                    }
                });
            }
        }
        result?;

        backing.sync()
    }

    /// Flushes, drops the cache, and marks the store closed. The file handle
    /// and any mapping are released when the store itself is dropped.
    pub fn close(&self) -> Result<()> {
        self.flush()?;
        self.cache.lock().clear_inner();
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    /// Current allocator cursor; the id the next allocation will return.
    pub fn next_page_id(&self) -> Result<u32> {
        self.ensure_open()?;
        let backing = self.backing.read();
        let mut buf = [0u8; PAGE_SIZE];
        backing.read_into(0, &mut buf)?;
        Ok(FileHeader::from_bytes(&buf)?.next_page_id())
    }

    /// Number of entries currently cached (pages or extents).
    pub fn cached_entries(&self) -> usize {
        match &*self.cache.lock() {
            CacheMode::Pages(lru) => lru.len(),
            CacheMode::Extents(lru) => lru.len(),
        }
    }

    fn load_extent(backing: &Backing, eid: u32) -> Result<Extent> {
        let first = eid * EXTENT_PAGES as u32;
        let first_offset = first as u64 * PAGE_SIZE as u64;

        // An extent wholly past EOF is new: materialize it without I/O.
        if first_offset >= backing.len_bytes() {
            return Ok(Extent::zeroed(eid));
        }

        let mut pages = Vec::with_capacity(EXTENT_PAGES);
        for i in 0..EXTENT_PAGES as u32 {
            let mut buf = [0u8; PAGE_SIZE];
            backing.read_into(first + i, &mut buf)?;
            pages.push(Page::from_bytes(first + i, &buf)?);
        }
        Extent::from_pages(eid, pages)
    }
}

impl CacheMode {
    fn clear_inner(&mut self) {
        match self {
            CacheMode::Pages(lru) => lru.clear(),
            CacheMode::Extents(lru) => lru.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &Path, name: &str, options: impl FnOnce(StoreOptions) -> StoreOptions) -> PagedStore {
        let opts = options(StoreOptions::new(dir.join(name)));
        PagedStore::open(opts).unwrap()
    }

    #[test]
    fn open_normalizes_path_and_writes_header() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), "db", |o| o);

        assert_eq!(
            store.path().extension().and_then(|e| e.to_str()),
            Some("mde")
        );
        assert!(store.path().exists());
        assert_eq!(store.next_page_id().unwrap(), 1);
    }

    #[test]
    fn reopen_validates_magic() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path(), "db", |o| o);
            store.close().unwrap();
        }

        let store = open_store(dir.path(), "db", |o| o);
        assert_eq!(store.next_page_id().unwrap(), 1);
    }

    #[test]
    fn open_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.mde");
        std::fs::write(&path, vec![0xAAu8; PAGE_SIZE]).unwrap();

        let result = PagedStore::open(StoreOptions::new(&path));
        assert!(result.is_err());
    }

    #[test]
    fn open_rejects_missing_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("db.mde");

        let result = PagedStore::open(StoreOptions::new(&path));
        assert!(result.is_err());
    }

    #[test]
    fn written_page_reads_back_identically() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), "db", |o| o);

        let id = store.allocate_page().unwrap();
        let mut page = Page::zeroed(id);
        page.data_mut()[..4].copy_from_slice(b"mndb");
        store.write_page(page.clone()).unwrap();

        let read = store.read_page(id).unwrap();
        assert_eq!(read.data(), page.data());
    }

    #[test]
    fn read_past_eof_is_zero_filled() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), "db", |o| o);

        let page = store.read_page(500).unwrap();
        assert!(page.data().iter().all(|&b| b == 0));
        assert!(!page.is_dirty());
    }

    #[test]
    fn allocate_page_is_monotonic_and_extends_the_file() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), "db", |o| o);

        assert_eq!(store.allocate_page().unwrap(), 1);
        assert_eq!(store.allocate_page().unwrap(), 2);
        assert_eq!(store.allocate_page().unwrap(), 3);
        assert_eq!(store.next_page_id().unwrap(), 4);

        let len = std::fs::metadata(store.path()).unwrap().len();
        assert!(len >= 4 * PAGE_SIZE as u64);
    }

    #[test]
    fn allocator_cursor_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path(), "db", |o| o);
            store.allocate_page().unwrap();
            store.allocate_page().unwrap();
            store.close().unwrap();
        }

        let store = open_store(dir.path(), "db", |o| o);
        assert_eq!(store.allocate_page().unwrap(), 3);
    }

    #[test]
    fn flush_persists_dirty_pages_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path(), "db", |o| o);
            let id = store.allocate_page().unwrap();
            let mut page = Page::zeroed(id);
            page.data_mut()[0] = 0x5A;
            store.write_page(page).unwrap();
            store.flush().unwrap();
        }

        let store = open_store(dir.path(), "db", |o| o);
        assert_eq!(store.read_page(1).unwrap().data()[0], 0x5A);
    }

    #[test]
    fn eviction_writes_back_dirty_pages() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), "db", |o| {
            o.cache_capacity(2).extent_cache(false)
        });

        for _ in 0..5 {
            store.allocate_page().unwrap();
        }
        for id in 1..=4u32 {
            let mut page = Page::zeroed(id);
            page.data_mut()[0] = id as u8;
            store.write_page(page).unwrap();
        }

        // Cache capacity 2 means pages 1..=2 were evicted; their bytes must
        // still come back from the file.
        for id in 1..=4u32 {
            assert_eq!(store.read_page(id).unwrap().data()[0], id as u8);
        }
    }

    #[test]
    fn extent_mode_groups_pages() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), "db", |o| o.extent_cache(true));

        for _ in 0..10 {
            store.allocate_page().unwrap();
        }
        let mut page = Page::zeroed(9);
        page.data_mut()[0] = 9;
        store.write_page(page).unwrap();

        let extent = store.read_extent(1).unwrap();
        assert_eq!(extent.id(), 1);
        assert_eq!(extent.page(offset_in_extent(9)).data()[0], 9);

        // Pages 10..16 lie past the allocator cursor: zero-filled, clean.
        assert!(extent.page(offset_in_extent(12)).data().iter().all(|&b| b == 0));
    }

    #[test]
    fn write_extent_writes_only_dirty_members() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), "db", |o| o);

        let mut extent = Extent::zeroed(2);
        extent.page_mut(3).data_mut()[0] = 0xEE;
        store.write_extent(extent).unwrap();
        store.flush().unwrap();

        let read = store.read_extent(2).unwrap();
        assert_eq!(read.page(3).data()[0], 0xEE);
        assert!(!read.is_dirty());
    }

    #[test]
    fn memory_mapped_mode_roundtrips() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path(), "db", |o| o.memory_mapped(true));
            let id = store.allocate_page().unwrap();
            let mut page = Page::zeroed(id);
            page.data_mut()[100] = 0x42;
            store.write_page(page).unwrap();
            store.flush().unwrap();
            store.close().unwrap();
        }

        let store = open_store(dir.path(), "db", |o| o);
        assert_eq!(store.read_page(1).unwrap().data()[100], 0x42);
    }

    #[test]
    fn closed_store_rejects_operations() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), "db", |o| o);
        store.close().unwrap();

        assert!(store.read_page(1).is_err());
        assert!(store.allocate_page().is_err());
    }
}
