use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, Result, StratumError, HEADER_PAGE_ID, PAGE_SIZE};

/// DiskManager is responsible for reading and writing pages to/from disk.
/// It manages a single database file and tracks the number of pages
/// allocated. Deallocated pages go on a free list and are handed out again
/// before the file is extended.
///
/// Page 0 is reserved for the header-page record catalog and is never
/// returned by `allocate_page`.
pub struct DiskManager {
    /// The database file, guarded for exclusive cursor access
    db_file: Mutex<File>,
    /// Path of the database file
    db_path: PathBuf,
    /// Next page ID to hand out when the free list is empty
    next_page_id: AtomicI32,
    /// Previously deallocated pages available for reuse
    free_pages: Mutex<Vec<PageId>>,
    /// Number of disk reads performed
    num_reads: AtomicU32,
    /// Number of disk writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Creates a new DiskManager for the given database file path.
    /// Opens the file if it exists, creates it otherwise. Page 0 is
    /// reserved for the header page in either case.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let pages_in_file = (file_size / PAGE_SIZE as u64) as i32;

        Ok(Self {
            db_file: Mutex::new(file),
            db_path,
            // Page 0 is the header page even when the file is brand new.
            next_page_id: AtomicI32::new(pages_in_file.max(1)),
            free_pages: Mutex::new(Vec::new()),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        })
    }

    /// Reads a page from disk into the provided buffer. A read past the
    /// end of the file yields zeroed bytes.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if !page_id.is_valid() {
            return Err(StratumError::InvalidPageId(page_id));
        }

        let byte_offset = (page_id.as_i32() as u64) * (PAGE_SIZE as u64);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;

        let mut total = 0;
        while total < PAGE_SIZE {
            let n = file.read(&mut data[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        data[total..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if !page_id.is_valid() {
            return Err(StratumError::InvalidPageId(page_id));
        }

        let byte_offset = (page_id.as_i32() as u64) * (PAGE_SIZE as u64);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a new page and returns its page ID, reusing a
    /// deallocated page when one is available.
    pub fn allocate_page(&self) -> Result<PageId> {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return Ok(page_id);
        }
        Ok(PageId::new(self.next_page_id.fetch_add(1, Ordering::SeqCst)))
    }

    /// Returns a page to the free list for later reuse.
    pub fn deallocate_page(&self, page_id: PageId) {
        if page_id == HEADER_PAGE_ID || !page_id.is_valid() {
            return;
        }
        self.free_pages.lock().push(page_id);
    }

    pub fn num_pages(&self) -> i32 {
        self.next_page_id.load(Ordering::Relaxed)
    }

    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn sync(&self) -> Result<()> {
        self.db_file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.db_file.get_mut().sync_all();
    }
}
