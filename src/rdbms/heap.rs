use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{
    entity::Page,
    manager::{BufferPoolManager, Error},
};
use crate::storage::{
    self,
    entity::{PageId, RecordId, TableId, PAGE_SIZE},
    manager::StorageManager,
};
use crate::transaction::{Permissions, TransactionId};
use crate::tuple::{self, Tuple, TupleDesc};

// Slotted page layout for fixed-width tuples
pub mod page;

use page::HeapPage;

/// An unordered table: a sequence of slotted pages over one storage manager.
pub struct HeapFile {
    id: TableId,
    name: String,
    desc: TupleDesc,
    storage: Mutex<Box<dyn StorageManager>>,
}

impl HeapFile {
    pub fn new(
        id: TableId,
        name: impl Into<String>,
        desc: TupleDesc,
        storage: Box<dyn StorageManager>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            desc,
            storage: Mutex::new(storage),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn page_count(&self) -> u32 {
        self.storage.lock().num_pages()
    }

    /// Reads one page from storage.
    ///
    /// Asking for the page just past the end grows the table by one empty
    /// page; anything further out is an error.
    pub fn read_page(&self, page_id: PageId) -> Result<Page, storage::manager::Error> {
        let mut bytes = vec![0; PAGE_SIZE].into_boxed_slice();
        {
            let mut storage = self.storage.lock();
            let page_count = storage.num_pages();
            if page_id.table != self.id || page_id.page_no > page_count {
                return Err(storage::manager::Error::PageNotFound {
                    page_id,
                    page_count,
                });
            }
            if page_id.page_no == page_count {
                storage.allocate_page();
                debug!(table = %self.name, page = %page_id, "table grew by one page");
            }
            storage.read_page_data(page_id.page_no, &mut bytes)?;
        }
        self.format(page_id, &mut bytes)?;
        Ok(Page::new(page_id, bytes))
    }

    fn format(&self, page_id: PageId, bytes: &mut [u8]) -> Result<(), storage::manager::Error> {
        let tuple_width = self.desc.byte_width();
        let corrupted = |reason: String| storage::manager::Error::Corrupted { page_id, reason };
        let mut heap_page =
            HeapPage::new(bytes).ok_or_else(|| corrupted("page shorter than its header".into()))?;
        if !heap_page.is_formatted() {
            heap_page.initialize(tuple_width);
            return Ok(());
        }
        if heap_page.tuple_width() != tuple_width {
            return Err(corrupted(format!(
                "slot width {} but schema needs {}",
                heap_page.tuple_width(),
                tuple_width
            )));
        }
        // slot accessors index by slot_count, so it must match the layout
        let slot_count = page::slots_per_page(tuple_width);
        if heap_page.slot_count() != slot_count {
            return Err(corrupted(format!(
                "{} slots but a page holds {}",
                heap_page.slot_count(),
                slot_count
            )));
        }
        Ok(())
    }

    pub fn write_page(&self, page: &Page) -> Result<(), storage::manager::Error> {
        let mut storage = self.storage.lock();
        storage.write_page_data(page.page_id().page_no, page)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<(), storage::manager::Error> {
        self.storage.lock().sync()?;
        Ok(())
    }

    /// Stores `tuple` in the first page with a free slot, growing the table
    /// when every page is full. Returns the pages it modified and stamps the
    /// tuple with its new record id.
    pub fn add_tuple<T: BufferPoolManager>(
        &self,
        bufmgr: &T,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageId>, Error> {
        let mut slot_bytes = vec![0; self.desc.byte_width()];
        tuple::encode(&self.desc, tuple, &mut slot_bytes)?;

        let page_count = self.page_count();
        let mut target = None;
        for page_no in 0..page_count {
            let handle =
                bufmgr.fetch_page(tid, PageId::new(self.id, page_no), Permissions::ReadWrite)?;
            let has_room = bufmgr.read_page(&handle, |page| {
                HeapPage::new(&page[..]).map_or(false, |heap_page| heap_page.num_empty_slots() > 0)
            })?;
            if has_room {
                target = Some(handle);
                break;
            }
        }
        let handle = match target {
            Some(handle) => handle,
            None => bufmgr.fetch_page(tid, PageId::new(self.id, page_count), Permissions::ReadWrite)?,
        };

        let slot = bufmgr.write_page(&handle, |page| {
            let mut heap_page = HeapPage::new(&mut page[..])?;
            let slot = heap_page.first_empty_slot()?;
            heap_page.slot_mut(slot).copy_from_slice(&slot_bytes);
            heap_page.set_slot_used(slot, true);
            Some(slot)
        })?;
        // the exclusive lock keeps the page as we saw it
        let slot = slot.ok_or(Error::NoFreeSlot(handle.page_id))?;
        tuple.set_record_id(Some(RecordId::new(handle.page_id, slot)));
        Ok(vec![handle.page_id])
    }

    pub fn delete_tuple<T: BufferPoolManager>(
        &self,
        bufmgr: &T,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageId>, Error> {
        let record_id = tuple.record_id().ok_or(Error::MissingRecordId)?;
        if record_id.page_id.table != self.id {
            return Err(Error::TupleNotFound(record_id));
        }
        let handle = bufmgr.fetch_page(tid, record_id.page_id, Permissions::ReadWrite)?;
        let deleted = bufmgr.write_page(&handle, |page| {
            let mut heap_page = match HeapPage::new(&mut page[..]) {
                Some(heap_page) => heap_page,
                None => return false,
            };
            if !heap_page.is_slot_used(record_id.slot) {
                return false;
            }
            heap_page.set_slot_used(record_id.slot, false);
            true
        })?;
        if !deleted {
            return Err(Error::TupleNotFound(record_id));
        }
        Ok(vec![record_id.page_id])
    }

    /// Every tuple on one page, stamped with its record id.
    pub fn page_tuples<T: BufferPoolManager>(
        &self,
        bufmgr: &T,
        tid: TransactionId,
        page_no: u32,
    ) -> Result<Vec<Tuple>, Error> {
        let page_id = PageId::new(self.id, page_no);
        let handle = bufmgr.fetch_page(tid, page_id, Permissions::ReadOnly)?;
        bufmgr.read_page(&handle, |page| -> Result<Vec<Tuple>, Error> {
            let heap_page = match HeapPage::new(&page[..]) {
                Some(heap_page) => heap_page,
                None => return Ok(vec![]),
            };
            heap_page
                .used_slots()
                .map(|slot| -> Result<Tuple, Error> {
                    let mut tuple = tuple::decode(&self.desc, heap_page.slot(slot))?;
                    tuple.set_record_id(Some(RecordId::new(page_id, slot)));
                    Ok(tuple)
                })
                .collect()
        })?
    }

    pub fn iter(&self, tid: TransactionId) -> Iter<'_> {
        Iter {
            heap: self,
            tid,
            next_page_no: 0,
            buffered: Vec::new().into_iter(),
        }
    }
}

/// Page-at-a-time scan of a heap table under shared locks.
pub struct Iter<'a> {
    heap: &'a HeapFile,
    tid: TransactionId,
    next_page_no: u32,
    buffered: std::vec::IntoIter<Tuple>,
}

impl<'a> Iter<'a> {
    pub fn next<T: BufferPoolManager>(&mut self, bufmgr: &T) -> Result<Option<Tuple>, Error> {
        loop {
            if let Some(tuple) = self.buffered.next() {
                return Ok(Some(tuple));
            }
            if self.next_page_no >= self.heap.page_count() {
                return Ok(None);
            }
            let tuples = self.heap.page_tuples(bufmgr, self.tid, self.next_page_no)?;
            self.next_page_no += 1;
            self.buffered = tuples.into_iter();
        }
    }

    pub fn rewind(&mut self) {
        self.next_page_no = 0;
        self.buffered = Vec::new().into_iter();
    }
}
