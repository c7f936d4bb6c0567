// File-backed storage manager
pub mod disk;

// Heap tables over a storage manager
pub mod heap;

// Table id to heap file resolution
pub mod catalog;

// NO-STEAL LRU buffer pool under strict two-phase locking
pub mod lru;

// Operators: scan, filter, insert, delete
pub mod query;

pub mod aggregate;

// Histograms and table statistics
pub mod stats;
