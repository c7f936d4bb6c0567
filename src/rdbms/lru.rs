use std::collections::hash_map::{Entry, HashMap};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{catalog::Catalog, heap::HeapFile};
use crate::buffer::{
    entity::{Page, PageHandle},
    manager::*,
};
use crate::storage::entity::{PageId, TableId};
use crate::transaction::{lock::LockManager, Permissions, TransactionId};
use crate::tuple::Tuple;

pub const DEFAULT_PAGES: usize = 50;

/// Bounded page cache with LRU replacement among clean pages.
///
/// Pages dirtied by a running transaction are never evicted and never written
/// before that transaction commits (NO-STEAL), so the stored copy of a page is
/// always its last committed image. Page access is guarded by strict
/// two-phase locking through the shared [`LockManager`].
pub struct BufferPool {
    capacity: usize,
    catalog: Arc<Catalog>,
    locks: Arc<LockManager>,
    pages: Mutex<HashMap<PageId, Page>>,
    clock: AtomicU64,
}

impl BufferPool {
    pub fn new(capacity: usize, catalog: Arc<Catalog>, locks: Arc<LockManager>) -> Self {
        Self {
            capacity,
            catalog,
            locks,
            pages: Mutex::new(HashMap::with_capacity(capacity)),
            clock: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn resident_pages(&self) -> Vec<PageId> {
        let mut page_ids: Vec<_> = self.pages.lock().keys().copied().collect();
        page_ids.sort();
        page_ids
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.pages.lock().contains_key(&page_id)
    }

    pub fn is_dirty(&self, page_id: PageId) -> bool {
        self.pages
            .lock()
            .get(&page_id)
            .map_or(false, |page| page.is_dirty())
    }

    /// The page the next eviction would pick.
    pub fn lru_victim(&self) -> Option<PageId> {
        Self::victim(&self.pages.lock())
    }

    pub fn locked_pages(&self, tid: TransactionId) -> Vec<PageId> {
        self.locks.locked_pages(tid)
    }

    fn victim(pages: &HashMap<PageId, Page>) -> Option<PageId> {
        pages
            .values()
            .filter(|page| !page.is_dirty())
            .min_by_key(|page| page.last_access)
            .map(|page| page.page_id())
    }

    fn evict_page(&self, pages: &mut HashMap<PageId, Page>) -> Result<(), Error> {
        let victim = Self::victim(pages).ok_or(Error::NoEvictablePage(pages.len()))?;
        // clean, so disk already holds this image
        pages.remove(&victim);
        debug!(page = %victim, "evicted");
        Ok(())
    }

    fn table(&self, table_id: TableId) -> Result<Arc<HeapFile>, Error> {
        self.catalog
            .table(table_id)
            .ok_or(Error::TableNotFound(table_id))
    }

    fn load(&self, page_id: PageId) -> Result<Page, Error> {
        Ok(self.table(page_id.table)?.read_page(page_id)?)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    // Brings the page in if needed. Only a load stamps it; recency otherwise
    // moves on fetch alone.
    fn resident<'a>(
        &self,
        pages: &'a mut HashMap<PageId, Page>,
        page_id: PageId,
    ) -> Result<&'a mut Page, Error> {
        if !pages.contains_key(&page_id) && pages.len() >= self.capacity {
            self.evict_page(pages)?;
        }
        match pages.entry(page_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let mut page = self.load(page_id)?;
                page.last_access = self.tick();
                Ok(entry.insert(page))
            }
        }
    }

    fn check_handle(&self, handle: &PageHandle) -> Result<(), Error> {
        if self.locks.holds_lock(handle.tid, handle.page_id) {
            Ok(())
        } else {
            Err(Error::StaleHandle {
                tid: handle.tid,
                page_id: handle.page_id,
            })
        }
    }

    fn mark_dirty(&self, tid: TransactionId, page_ids: &[PageId]) {
        let mut pages = self.pages.lock();
        for page_id in page_ids {
            if let Some(page) = pages.get_mut(page_id) {
                page.mark_dirty(Some(tid));
            }
        }
    }

    // copies of the dirty pages matching `owner` (every dirty page for None)
    fn dirty_images(
        pages: &HashMap<PageId, Page>,
        owner: Option<TransactionId>,
    ) -> BTreeMap<TableId, Vec<Page>> {
        let mut by_table: BTreeMap<TableId, Vec<Page>> = BTreeMap::new();
        let wanted = pages
            .values()
            .filter(|page| page.is_dirty())
            .filter(|page| owner.map_or(true, |tid| page.dirtied_by() == Some(tid)));
        for page in wanted {
            by_table
                .entry(page.page_id().table)
                .or_default()
                .push(page.clone());
        }
        by_table
    }

    // The I/O runs without the page table lock so other transactions keep
    // fetching meanwhile. Dirty pages cannot be evicted, so the copies stay
    // authoritative. Every page is written and every table synced before any
    // flag is cleared, so a failed flush leaves all of them dirty.
    fn write_back(&self, images: BTreeMap<TableId, Vec<Page>>) -> Result<usize, Error> {
        for (table_id, table_images) in &images {
            let heap = self.table(*table_id)?;
            for image in table_images {
                heap.write_page(image)?;
            }
            heap.sync()?;
        }

        let mut pages = self.pages.lock();
        let mut cleaned = 0;
        for image in images.values().flatten() {
            // a page changed again since the copy still needs writing
            if let Some(page) = pages.get_mut(&image.page_id()) {
                if page.dirtied_by() == image.dirtied_by() && page[..] == image[..] {
                    page.mark_dirty(None);
                    cleaned += 1;
                }
            }
        }
        Ok(cleaned)
    }

    // replace each page tid dirtied with its stored, committed image
    fn revert_pages(&self, tid: TransactionId) {
        let mut pages = self.pages.lock();
        let page_ids: Vec<_> = pages
            .values()
            .filter(|page| page.dirtied_by() == Some(tid))
            .map(Page::page_id)
            .collect();
        for page_id in page_ids {
            match self.load(page_id) {
                Ok(mut page) => {
                    page.last_access = self.tick();
                    pages.insert(page_id, page);
                }
                Err(err) => {
                    // dropping the copy is just as good: disk is unchanged
                    warn!(tx = %tid, page = %page_id, error = %err, "reread failed on abort, discarding page");
                    pages.remove(&page_id);
                }
            }
        }
    }
}

impl BufferPoolManager for BufferPool {
    fn fetch_page(
        &self,
        tid: TransactionId,
        page_id: PageId,
        perm: Permissions,
    ) -> Result<PageHandle, Error> {
        // may block; taken before the page table so waiters never stall the pool
        self.locks.lock(page_id, tid, perm.into())?;
        let mut pages = self.pages.lock();
        let page = self.resident(&mut pages, page_id)?;
        page.last_access = self.tick();
        debug!(tx = %tid, page = %page_id, %perm, "fetched");
        Ok(PageHandle { page_id, tid, perm })
    }

    fn read_page<R>(&self, handle: &PageHandle, f: impl FnOnce(&Page) -> R) -> Result<R, Error> {
        self.check_handle(handle)?;
        let mut pages = self.pages.lock();
        let page = self.resident(&mut pages, handle.page_id)?;
        Ok(f(page))
    }

    fn write_page<R>(
        &self,
        handle: &PageHandle,
        f: impl FnOnce(&mut Page) -> R,
    ) -> Result<R, Error> {
        if handle.perm != Permissions::ReadWrite {
            return Err(Error::ReadOnlyAccess {
                tid: handle.tid,
                page_id: handle.page_id,
            });
        }
        self.check_handle(handle)?;
        let mut pages = self.pages.lock();
        let page = self.resident(&mut pages, handle.page_id)?;
        let result = f(&mut *page);
        page.mark_dirty(Some(handle.tid));
        Ok(result)
    }

    fn unsafe_release_page(&self, tid: TransactionId, page_id: PageId) {
        self.locks.unlock(page_id, tid);
    }

    fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.locks.holds_lock(tid, page_id)
    }

    fn insert_tuple(
        &self,
        tid: TransactionId,
        table: TableId,
        tuple: &mut Tuple,
    ) -> Result<(), Error> {
        let heap = self.table(table)?;
        let page_ids = heap.add_tuple(self, tid, tuple)?;
        self.mark_dirty(tid, &page_ids);
        Ok(())
    }

    fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<(), Error> {
        let record_id = tuple.record_id().ok_or(Error::MissingRecordId)?;
        let heap = self.table(record_id.page_id.table)?;
        let page_ids = heap.delete_tuple(self, tid, tuple)?;
        self.mark_dirty(tid, &page_ids);
        Ok(())
    }

    fn complete_transaction(&self, tid: TransactionId, commit: bool) -> Result<(), Error> {
        if commit {
            // on failure the transaction stays open so its owner can abort it
            self.flush_pages(tid)?;
        } else {
            self.revert_pages(tid);
        }
        self.locks.release_all(tid);
        debug!(tx = %tid, commit, "transaction complete");
        Ok(())
    }

    fn flush_pages(&self, tid: TransactionId) -> Result<(), Error> {
        let images = Self::dirty_images(&self.pages.lock(), Some(tid));
        let written = self.write_back(images)?;
        debug!(tx = %tid, pages = written, "flushed");
        Ok(())
    }

    fn flush_all_pages(&self) -> Result<(), Error> {
        let images = Self::dirty_images(&self.pages.lock(), None);
        if !images.is_empty() {
            warn!("flushing uncommitted pages; running transactions can no longer abort cleanly");
        }
        self.write_back(images)?;
        Ok(())
    }

    fn discard_page(&self, page_id: PageId) {
        self.pages.lock().remove(&page_id);
    }
}
