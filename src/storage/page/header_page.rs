use crate::common::{PageId, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// Maximum number of records the header page can hold.
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Mutable view of the header page stored at `HEADER_PAGE_ID`.
///
/// The header page is a small catalog mapping index names to their root
/// page ids: a record count followed by fixed-width records of a
/// NUL-padded 32-byte name and a little-endian i32 page id.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self) {
        self.data.fill(0);
    }

    pub fn record_count(&self) -> usize {
        read_i32(self.data, RECORD_COUNT_OFFSET) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        write_i32(self.data, RECORD_COUNT_OFFSET, count as i32);
    }

    /// Inserts a `(name, root_page_id)` record. Returns false when the
    /// name is already present or the page is full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        assert!(name.len() < NAME_SIZE, "header record name too long");
        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS || self.find_record(name).is_some() {
            return false;
        }

        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        self.data[offset..offset + NAME_SIZE].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        write_i32(self.data, offset + NAME_SIZE, root_page_id.as_i32());
        self.set_record_count(count + 1);
        true
    }

    /// Updates an existing record's root page id. Returns false when the
    /// name is not present.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match self.find_record(name) {
            Some(index) => {
                let offset = RECORDS_OFFSET + index * RECORD_SIZE;
                write_i32(self.data, offset + NAME_SIZE, root_page_id.as_i32());
                true
            }
            None => false,
        }
    }

    /// Removes a record, compacting the ones after it.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(index) = self.find_record(name) else {
            return false;
        };
        let count = self.record_count();
        let start = RECORDS_OFFSET + index * RECORD_SIZE;
        let end = RECORDS_OFFSET + count * RECORD_SIZE;
        self.data.copy_within(start + RECORD_SIZE..end, start);
        self.set_record_count(count - 1);
        true
    }

    pub fn get_record(&self, name: &str) -> Option<PageId> {
        let index = self.find_record(name)?;
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        let id = read_i32(self.data, offset + NAME_SIZE);
        Some(PageId::new(id))
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        find_record_in(self.data, name)
    }
}

/// Read-only view of the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        read_i32(self.data, RECORD_COUNT_OFFSET) as usize
    }

    pub fn get_record(&self, name: &str) -> Option<PageId> {
        let index = find_record_in(self.data, name)?;
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        let id = read_i32(self.data, offset + NAME_SIZE);
        Some(PageId::new(id))
    }
}

fn find_record_in(data: &[u8], name: &str) -> Option<usize> {
    let count = read_i32(data, RECORD_COUNT_OFFSET) as usize;
    let mut padded = [0u8; NAME_SIZE];
    padded[..name.len()].copy_from_slice(name.as_bytes());

    (0..count).find(|&i| {
        let offset = RECORDS_OFFSET + i * RECORD_SIZE;
        data[offset..offset + NAME_SIZE] == padded
    })
}

fn read_i32(data: &[u8], offset: usize) -> i32 {
    let bytes: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    i32::from_le_bytes(bytes)
}

fn write_i32(data: &mut [u8], offset: usize, value: i32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
