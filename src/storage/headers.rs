//! # Data File Header
//!
//! Page 0 of every data file begins with a 16-byte header identifying the
//! file and carrying the page allocator cursor.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Field          Description
//! ------  ----  -------------  --------------------------------------
//! 0       4     magic          0x004D4445 ("MDE"), little-endian
//! 4       4     version        Format version, currently 1
//! 8       4     next_page_id   Monotonic allocator cursor, starts at 1
//! 12      4     table_count    Reserved for a future schema catalog
//! ```
//!
//! The remaining bytes of page 0 are unused. All fields are little-endian;
//! the zerocopy `U32` wrapper handles conversion, and the struct derives the
//! zerocopy traits so it can be read in place from a page buffer.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::FILE_HEADER_SIZE;

/// "MDE" in the low three bytes.
pub const MAGIC: u32 = 0x004D_4445;

pub const CURRENT_VERSION: u32 = 1;

/// First user page id; page 0 is the header page.
pub const FIRST_USER_PAGE: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    magic: U32,
    version: U32,
    next_page_id: U32,
    table_count: U32,
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    pub fn new() -> Self {
        Self {
            magic: U32::new(MAGIC),
            version: U32::new(CURRENT_VERSION),
            next_page_id: U32::new(FIRST_USER_PAGE),
            table_count: U32::new(0),
        }
    }

    /// Parses and validates a header from the front of a page-0 buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "corrupted header: buffer too small for FileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("corrupted header: failed to parse FileHeader: {:?}", e))?;

        ensure!(
            header.magic.get() == MAGIC,
            "invalid magic {:#010x} in data file (expected {:#010x})",
            header.magic.get(),
            MAGIC
        );

        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported data file version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );

        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "corrupted header: buffer too small for FileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::mut_from_bytes(&mut bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("corrupted header: failed to parse FileHeader: {:?}", e))?;

        ensure!(
            header.magic.get() == MAGIC,
            "invalid magic {:#010x} in data file (expected {:#010x})",
            header.magic.get(),
            MAGIC
        );

        Ok(header)
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn next_page_id(&self) -> u32 {
        self.next_page_id.get()
    }

    pub fn set_next_page_id(&mut self, id: u32) {
        self.next_page_id = U32::new(id);
    }

    /// Consumes and returns the current cursor, advancing it by one.
    pub fn take_next_page_id(&mut self) -> u32 {
        let id = self.next_page_id.get();
        self.next_page_id = U32::new(id + 1);
        id
    }

    pub fn table_count(&self) -> u32 {
        self.table_count.get()
    }

    pub fn set_table_count(&mut self, count: u32) {
        self.table_count = U32::new(count);
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}
