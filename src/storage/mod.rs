//! # Storage Layer
//!
//! The storage layer turns random page access into cached, batched I/O over
//! a single backing file:
//!
//! - [`Page`]: a 4 KiB buffer tagged with its page id and a dirty flag.
//! - [`Extent`]: 8 consecutive pages addressed as one cache unit.
//! - [`LruCache`]: the bounded recency cache holding pages or extents.
//! - [`PagedStore`]: the file itself: header page, allocator, read/write
//!   of pages and extents, flush, and the optional memory-mapped mode
//!   backed by [`MmapFile`].
//!
//! Page 0 of the file is the header page ([`FileHeader`]): magic, version,
//! and the monotonic allocator cursor. User pages are dense and start at 1.
//! There is no free-page reclamation; the allocator only moves forward.

mod cache;
mod extent;
mod headers;
mod mmap;
mod page;
mod store;

pub use cache::LruCache;
pub use extent::{extent_of, offset_in_extent, Extent};
pub use headers::{FileHeader, CURRENT_VERSION, FIRST_USER_PAGE, MAGIC};
pub use mmap::MmapFile;
pub use page::Page;
pub use store::{PagedStore, StoreOptions};

pub use crate::config::{EXTENT_PAGES, EXTENT_SIZE, FILE_HEADER_SIZE, PAGE_SIZE};
