use super::entity::{Page, PageHandle};
use crate::storage::{
    self,
    entity::{PageId, RecordId, TableId},
};
use crate::transaction::{lock::LockError, Permissions, TransactionId};
use crate::tuple::{self, Tuple};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transaction lost a deadlock, or ended while it waited for a lock.
    #[error("transaction {0} aborted")]
    Aborted(TransactionId),
    #[error("no evictable page: all {0} resident pages are dirty")]
    NoEvictablePage(usize),
    #[error("table {0} not found")]
    TableNotFound(TableId),
    #[error("no tuple stored at {0}")]
    TupleNotFound(RecordId),
    #[error("page {0} has no free slot")]
    NoFreeSlot(PageId),
    #[error("tuple has no record id")]
    MissingRecordId,
    #[error("{tid} no longer holds a lock on page {page_id}")]
    StaleHandle { tid: TransactionId, page_id: PageId },
    #[error("{tid} holds page {page_id} read-only")]
    ReadOnlyAccess { tid: TransactionId, page_id: PageId },
    #[error(transparent)]
    Storage(#[from] storage::manager::Error),
    #[error(transparent)]
    Tuple(#[from] tuple::Error),
}

impl Error {
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }
}

impl From<LockError> for Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Deadlock(tid) | LockError::Withdrawn(tid) => Error::Aborted(tid),
        }
    }
}

/// Page cache shared by every transaction.
///
/// Closures passed to `read_page` and `write_page` run while the pool is
/// locked and must not call back into the pool.
pub trait BufferPoolManager: Send + Sync {
    // lock the page for tid, load it if needed and hand back a token for it
    fn fetch_page(
        &self,
        tid: TransactionId,
        page_id: PageId,
        perm: Permissions,
    ) -> Result<PageHandle, Error>;
    fn read_page<R>(&self, handle: &PageHandle, f: impl FnOnce(&Page) -> R) -> Result<R, Error>;
    // the page is marked dirty by the handle's transaction along with the change
    fn write_page<R>(
        &self,
        handle: &PageHandle,
        f: impl FnOnce(&mut Page) -> R,
    ) -> Result<R, Error>;
    // drop one lock early; breaks two-phase locking, callers beware
    fn unsafe_release_page(&self, tid: TransactionId, page_id: PageId);
    fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool;
    fn insert_tuple(
        &self,
        tid: TransactionId,
        table: TableId,
        tuple: &mut Tuple,
    ) -> Result<(), Error>;
    fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<(), Error>;
    fn complete_transaction(&self, tid: TransactionId, commit: bool) -> Result<(), Error>;
    fn transaction_complete(&self, tid: TransactionId) -> Result<(), Error> {
        self.complete_transaction(tid, true)
    }
    fn flush_pages(&self, tid: TransactionId) -> Result<(), Error>;
    fn flush_all_pages(&self) -> Result<(), Error>;
    fn discard_page(&self, page_id: PageId);
}
