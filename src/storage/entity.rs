use std::fmt;

use serde::{Deserialize, Serialize};

pub const PAGE_SIZE: usize = 4096;

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table#{}", self.0)
    }
}

/// Identifies one page of one table.
///
/// The pair itself is the lock resource key, so two distinct pages can never
/// share a lock no matter how large the page number or table id gets.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PageId {
    pub table: TableId,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table: TableId, page_no: u32) -> Self {
        Self { table, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table.0, self.page_no)
    }
}

/// A reference to one tuple slot on one page.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: usize) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot)
    }
}
