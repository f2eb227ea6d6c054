use super::types::PageId;

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(-1);

/// Page reserved for the header-page record catalog
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 50;

/// Default maximum number of entries in a leaf page
pub const DEFAULT_LEAF_MAX_SIZE: i32 = 32;

/// Default maximum number of entries in an internal page
pub const DEFAULT_INTERNAL_MAX_SIZE: i32 = 32;
