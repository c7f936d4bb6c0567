use std::env;
use std::path::PathBuf;

use crate::rdbms::lru::DEFAULT_PAGES;

pub const NUM_PAGES_VAR: &str = "HEAPDB_NUM_PAGES";
pub const DATA_DIR_VAR: &str = "HEAPDB_DATA_DIR";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumPages { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Pages the buffer pool may hold at once.
    pub num_pages: usize,
    /// Where tables and the catalog live; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_pages: DEFAULT_PAGES,
            data_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_vars(
            env::var(NUM_PAGES_VAR).ok(),
            env::var_os(DATA_DIR_VAR).map(PathBuf::from),
        )
    }

    fn from_vars(num_pages: Option<String>, data_dir: Option<PathBuf>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(value) = num_pages {
            config.num_pages = match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::InvalidNumPages {
                        var: NUM_PAGES_VAR,
                        value,
                    })
                }
            };
        }
        config.data_dir = data_dir;
        Ok(config)
    }

    pub fn with_num_pages(mut self, num_pages: usize) -> Self {
        self.num_pages = num_pages;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }
}
