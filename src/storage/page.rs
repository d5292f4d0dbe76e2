//! # Page Buffer
//!
//! A [`Page`] is a fixed 4 KiB slab of the backing file, tagged with its page
//! id and a dirty flag. Page `n` lives at file offset `n * 4096`; page 0 is
//! the header page. The cache and the store pass pages around by value;
//! cloning copies the buffer, so a page handed out by `read_page` is a
//! snapshot, not a view.

use eyre::{ensure, Result};

use crate::config::PAGE_SIZE;

#[derive(Debug, Clone)]
pub struct Page {
    id: u32,
    data: Box<[u8; PAGE_SIZE]>,
    dirty: bool,
}

impl Page {
    /// A clean, zero-filled page. Also the representation of any page read
    /// past the end of the file.
    pub fn zeroed(id: u32) -> Self {
        Self {
            id,
            data: Box::new([0u8; PAGE_SIZE]),
            dirty: false,
        }
    }

    /// Builds a clean page from up to `PAGE_SIZE` bytes, zero-padding a short
    /// buffer (the tail page of a file need not be full).
    pub fn from_bytes(id: u32, bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() <= PAGE_SIZE,
            "page {} buffer too large: {} > {}",
            id,
            bytes.len(),
            PAGE_SIZE
        );

        let mut page = Self::zeroed(id);
        page.data[..bytes.len()].copy_from_slice(bytes);
        Ok(page)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Mutable access to the buffer. Marks the page dirty: every mutation
    /// path goes through here.
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.dirty = true;
        &mut self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// File offset of the first byte of this page.
    pub fn offset(&self) -> u64 {
        self.id as u64 * PAGE_SIZE as u64
    }
}
