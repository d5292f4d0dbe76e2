//! # Engine Configuration Constants
//!
//! This module centralizes the layout and tuning constants for the storage
//! engine. Constants that derive from one another are co-located and guarded
//! by compile-time assertions so a change to one cannot silently invalidate
//! another.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> FILE_HEADER_SIZE (16 bytes, page 0 only)
//!       │
//!       ├─> EXTENT_PAGES (8 pages per extent)
//!       │     │
//!       │     └─> EXTENT_SIZE (derived: PAGE_SIZE * EXTENT_PAGES)
//!       │
//!       └─> WAL frame payloads are self-sized (length-prefixed), so the WAL
//!           has no dependency on PAGE_SIZE
//!
//! DEFAULT_CACHE_CAPACITY (100 entries)
//!       └─> Counted in cache entries: pages in page mode, extents in extent
//!           mode. Extent mode therefore holds 8x the bytes at equal capacity.
//! ```

// ============================================================================
// PAGE LAYOUT
// ============================================================================

/// Size of a database page in bytes. The fundamental unit of I/O and caching.
pub const PAGE_SIZE: usize = 4096;

/// Size of the file header at the start of page 0.
pub const FILE_HEADER_SIZE: usize = 16;

/// Number of consecutive pages grouped into one extent.
pub const EXTENT_PAGES: usize = 8;

/// Size of a full extent in bytes.
pub const EXTENT_SIZE: usize = PAGE_SIZE * EXTENT_PAGES;

const _: () = assert!(
    EXTENT_SIZE == PAGE_SIZE * EXTENT_PAGES,
    "EXTENT_SIZE derivation mismatch"
);

const _: () = assert!(
    FILE_HEADER_SIZE <= PAGE_SIZE,
    "file header must fit inside page 0"
);

// ============================================================================
// CACHING
// ============================================================================

/// Default capacity of the page/extent cache, counted in entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

// ============================================================================
// B+TREE
// ============================================================================

/// Smallest branching order the tree accepts. A node holds at most
/// `order - 1` keys, so anything below 3 cannot split meaningfully.
pub const MIN_BRANCHING_ORDER: usize = 3;

/// Branching order used by tables that do not request a specific one.
pub const DEFAULT_BRANCHING_ORDER: usize = 64;

const _: () = assert!(
    DEFAULT_BRANCHING_ORDER >= MIN_BRANCHING_ORDER,
    "default branching order below the minimum"
);

// ============================================================================
// FILE NAMING
// ============================================================================

/// Extension appended to data file paths that lack one.
pub const DATA_FILE_EXTENSION: &str = "mde";

/// Extension of the write-ahead log file, derived from the data file path.
pub const WAL_FILE_EXTENSION: &str = "wal";

// ============================================================================
// WAL FRAMING
// ============================================================================

/// Size of the length prefix in front of every WAL record body.
pub const WAL_FRAME_LEN_SIZE: usize = 4;

/// Upper bound on a single WAL record body. A length prefix above this is
/// treated as framing corruption and terminates the recovery scan.
pub const MAX_WAL_RECORD_SIZE: u32 = 16 * 1024 * 1024;
