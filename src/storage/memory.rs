use std::io::{self, Read, Result, Write};

use super::entity::PAGE_SIZE;
use super::manager::StorageManager;

#[derive(Debug, Default)]
pub struct MemoryManager {
    heap: Vec<Box<[u8]>>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn page(&self, page_no: u32) -> Result<&[u8]> {
        self.heap
            .get(page_no as usize)
            .map(|page| &page[..])
            .ok_or_else(|| unallocated(page_no))
    }
}

fn unallocated(page_no: u32) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("page {} is not allocated", page_no),
    )
}

impl StorageManager for MemoryManager {
    fn allocate_page(&mut self) -> u32 {
        let page_no = self.heap.len() as u32;
        self.heap.push(vec![0; PAGE_SIZE].into_boxed_slice());
        page_no
    }
    fn read_page_data(&mut self, page_no: u32, data: &mut [u8]) -> Result<()> {
        let mut row = self.page(page_no)?;
        row.read_exact(data)
    }
    fn write_page_data(&mut self, page_no: u32, data: &[u8]) -> Result<()> {
        let mut row: &mut [u8] = self
            .heap
            .get_mut(page_no as usize)
            .ok_or_else(|| unallocated(page_no))?;
        row.write_all(data)
    }
    fn num_pages(&self) -> u32 {
        self.heap.len() as u32
    }
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
