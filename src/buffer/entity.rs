use std::ops::{Deref, DerefMut};

use crate::storage::entity::{PageId, PAGE_SIZE};
use crate::transaction::{Permissions, TransactionId};

/// One resident page: the raw bytes plus the bookkeeping the pool needs.
#[derive(Debug, Clone)]
pub struct Page {
    page_id: PageId,
    bytes: Box<[u8]>,
    dirtied_by: Option<TransactionId>,
    pub(crate) last_access: u64,
}

impl Page {
    pub fn new(page_id: PageId, bytes: Box<[u8]>) -> Self {
        debug_assert_eq!(bytes.len(), PAGE_SIZE);
        Self {
            page_id,
            bytes,
            dirtied_by: None,
            last_access: 0,
        }
    }

    pub fn empty(page_id: PageId) -> Self {
        Self::new(page_id, vec![0; PAGE_SIZE].into_boxed_slice())
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// The transaction whose uncommitted change this page carries, if any.
    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtied_by.is_some()
    }

    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtied_by = tid;
    }
}

impl Deref for Page {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl DerefMut for Page {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bytes
    }
}

/// Token returned by a successful fetch.
///
/// A handle names a page; it never points at one. Content is reached through
/// the pool, which resolves the handle each time, so eviction can never leave
/// a handle dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageHandle {
    pub page_id: PageId,
    pub tid: TransactionId,
    pub perm: Permissions,
}
