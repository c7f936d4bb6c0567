pub mod buffer;
pub mod config;
pub mod database;
pub mod rdbms;
pub mod storage;
pub mod transaction;
pub mod tuple;
