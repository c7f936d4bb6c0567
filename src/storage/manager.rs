use super::entity::PageId;

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("page {page_id} not found (table has {page_count} pages)")]
    PageNotFound { page_id: PageId, page_count: u32 },
    #[error("page {page_id} is corrupted: {reason}")]
    Corrupted { page_id: PageId, reason: String },
}

/// A flat sequence of fixed-size pages.
pub trait StorageManager: Send {
    // reserve the next page number; the page reads back as zeroes until written
    fn allocate_page(&mut self) -> u32;
    fn read_page_data(&mut self, page_no: u32, data: &mut [u8]) -> io::Result<()>;
    fn write_page_data(&mut self, page_no: u32, data: &[u8]) -> io::Result<()>;
    fn num_pages(&self) -> u32;
    fn sync(&mut self) -> io::Result<()>;
}
