//! # Memory-Mapped Backing File
//!
//! `MmapFile` is the backing used when a store is opened in memory-mapped
//! mode: the data file is mapped into the address space and page I/O becomes
//! slice copies instead of positional reads and writes.
//!
//! Remapping invalidates outstanding slices, so `grow` takes `&mut self` and
//! the borrow checker guarantees no page reference survives a remap. The
//! store keeps the `MmapFile` behind its reader/writer lock, which turns
//! that requirement into an exclusive lock acquisition.
//!
//! `sync` flushes the mapping, which on Unix is `msync` and carries the same
//! durability guarantee the direct-file path gets from `fsync`.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use crate::config::PAGE_SIZE;

#[derive(Debug)]
pub struct MmapFile {
    file: File,
    mmap: MmapMut,
    page_count: u32,
}

impl MmapFile {
    /// Maps an existing data file. The file must hold at least one full page
    /// (the header page), and its size must be page-aligned.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open data file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(
            file_size >= PAGE_SIZE as u64,
            "data file '{}' is too small to hold a header page ({} bytes)",
            path.display(),
            file_size
        );

        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "data file '{}' size {} is not a multiple of the page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        let page_count = (file_size / PAGE_SIZE as u64) as u32;

        // SAFETY: the mapping is private to this process in practice: the
        // engine is the single writer (other processes may open the file
        // read-only), the mmap's lifetime is tied to this struct, and all
        // access is bounds-checked against page_count.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            page_count,
        })
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn page(&self, page_no: u32) -> Result<&[u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );

        let offset = page_no as usize * PAGE_SIZE;
        Ok(&self.mmap[offset..offset + PAGE_SIZE])
    }

    pub fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        ensure!(
            page_no < self.page_count,
            "page {} out of bounds (page_count={})",
            page_no,
            self.page_count
        );

        let offset = page_no as usize * PAGE_SIZE;
        Ok(&mut self.mmap[offset..offset + PAGE_SIZE])
    }

    /// Extends the file to `new_page_count` pages and remaps. A no-op when
    /// the file is already large enough.
    pub fn grow(&mut self, new_page_count: u32) -> Result<()> {
        if new_page_count <= self.page_count {
            return Ok(());
        }

        self.mmap
            .flush()
            .wrap_err("failed to flush mapping before grow")?;

        let new_size = new_page_count as u64 * PAGE_SIZE as u64;
        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to extend data file to {} bytes", new_size))?;

        // SAFETY: grow takes &mut self, so no page slice can be live here;
        // the old mapping is dropped on reassignment after the file has been
        // extended to the new size.
        self.mmap = unsafe {
            MmapMut::map_mut(&self.file).wrap_err("failed to remap data file after grow")?
        };
        self.page_count = new_page_count;

        Ok(())
    }

    /// Durably flushes the mapping and the file metadata.
    pub fn sync(&self) -> Result<()> {
        self.mmap
            .flush()
            .wrap_err("failed to flush mapping to disk")?;
        self.file
            .sync_all()
            .wrap_err("failed to sync mapped data file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn create_file(path: &Path, pages: u32) {
        let mut file = File::create(path).unwrap();
        file.write_all(&vec![0u8; pages as usize * PAGE_SIZE]).unwrap();
        file.sync_all().unwrap();
    }

    #[test]
    fn open_rejects_undersized_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.mde");
        std::fs::write(&path, b"short").unwrap();

        assert!(MmapFile::open(&path).is_err());
    }

    #[test]
    fn page_roundtrip_through_mapping() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.mde");
        create_file(&path, 2);

        let mut mapped = MmapFile::open(&path).unwrap();
        mapped.page_mut(1).unwrap()[0] = 0xAB;
        mapped.sync().unwrap();

        let reopened = MmapFile::open(&path).unwrap();
        assert_eq!(reopened.page(1).unwrap()[0], 0xAB);
    }

    #[test]
    fn grow_extends_and_preserves_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.mde");
        create_file(&path, 1);

        let mut mapped = MmapFile::open(&path).unwrap();
        mapped.page_mut(0).unwrap()[10] = 7;

        mapped.grow(4).unwrap();
        assert_eq!(mapped.page_count(), 4);
        assert_eq!(mapped.page(0).unwrap()[10], 7);
        assert!(mapped.page(3).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn out_of_bounds_page_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.mde");
        create_file(&path, 1);

        let mapped = MmapFile::open(&path).unwrap();
        assert!(mapped.page(1).is_err());
    }
}
