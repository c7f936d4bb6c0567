use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tracing::info;

use crate::buffer::manager::BufferPoolManager;
use crate::config::Config;
use crate::rdbms::{catalog::Catalog, heap::HeapFile, lru::BufferPool, stats::TableStats};
use crate::storage::entity::TableId;
use crate::transaction::{lock::LockManager, TransactionId};
use crate::tuple::TupleDesc;

/// Everything a query needs, wired together once and passed around
/// explicitly: the catalog, the lock manager and the buffer pool over them.
pub struct Database {
    catalog: Arc<Catalog>,
    locks: Arc<LockManager>,
    pool: Arc<BufferPool>,
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        if config.num_pages == 0 {
            bail!("buffer pool needs at least one page");
        }
        let catalog = Arc::new(match &config.data_dir {
            Some(dir) => Catalog::open(dir)?,
            None => Catalog::in_memory(),
        });
        let locks = Arc::new(LockManager::new());
        let pool = Arc::new(BufferPool::new(
            config.num_pages,
            catalog.clone(),
            locks.clone(),
        ));
        info!(pages = config.num_pages, dir = ?config.data_dir, "database opened");
        Ok(Self {
            catalog,
            locks,
            pool,
        })
    }

    pub fn create_table(&self, name: &str, desc: TupleDesc) -> Result<TableId> {
        Ok(self.catalog.create_table(name, desc)?)
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.catalog.table_id(name)
    }

    pub fn table(&self, table_id: TableId) -> Result<Arc<HeapFile>> {
        self.catalog
            .table(table_id)
            .ok_or_else(|| anyhow!("table {} not found", table_id))
    }

    pub fn begin(&self) -> TransactionId {
        TransactionId::new()
    }

    pub fn commit(&self, tid: TransactionId) -> Result<()> {
        Ok(self.pool.transaction_complete(tid)?)
    }

    pub fn abort(&self, tid: TransactionId) -> Result<()> {
        Ok(self.pool.complete_transaction(tid, false)?)
    }

    pub fn table_stats(&self, table_id: TableId, io_cost_per_page: f64) -> Result<TableStats> {
        let heap = self.table(table_id)?;
        Ok(TableStats::compute(self.pool.as_ref(), &heap, io_cost_per_page)?)
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }
}
