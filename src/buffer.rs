// Cached page frames and the handles that name them
pub mod entity;
// The buffer pool contract
pub mod manager;
