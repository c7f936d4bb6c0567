// Page identifiers and the raw paged byte store contract
pub mod entity;
pub mod manager;

// In-memory StorageManager
pub mod memory;
