use std::fs::{File, OpenOptions};
use std::io::{prelude::*, Result, SeekFrom};
use std::path::Path;

use crate::storage::{entity::PAGE_SIZE, manager::StorageManager};

pub struct DiskManager {
    // table file, one page after another
    heap_file: File,
    // next page number to hand out
    next_page_no: u32,
}

impl DiskManager {
    pub fn new(heap_file: File) -> Result<Self> {
        let heap_file_size = heap_file.metadata()?.len();
        let next_page_no = (heap_file_size / PAGE_SIZE as u64) as u32;
        Ok(Self {
            heap_file,
            next_page_no,
        })
    }

    pub fn open(heap_file_path: impl AsRef<Path>) -> Result<Self> {
        let heap_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(heap_file_path)?;
        Self::new(heap_file)
    }
}

fn page_offset(page_no: u32) -> u64 {
    PAGE_SIZE as u64 * page_no as u64
}

impl StorageManager for DiskManager {
    fn allocate_page(&mut self) -> u32 {
        let page_no = self.next_page_no;
        self.next_page_no += 1;
        page_no
    }
    fn read_page_data(&mut self, page_no: u32, data: &mut [u8]) -> Result<()> {
        let offset = page_offset(page_no);
        // allocated but never written
        if offset >= self.heap_file.metadata()?.len() {
            data.fill(0);
            return Ok(());
        }
        self.heap_file.seek(SeekFrom::Start(offset))?;
        self.heap_file.read_exact(data)
    }
    fn write_page_data(&mut self, page_no: u32, data: &[u8]) -> Result<()> {
        let offset = page_offset(page_no);
        self.heap_file.seek(SeekFrom::Start(offset))?;
        self.heap_file.write_all(data)
    }
    fn num_pages(&self) -> u32 {
        self.next_page_no
    }
    fn sync(&mut self) -> Result<()> {
        self.heap_file.flush()?;
        self.heap_file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn page_filled_with(byte: u8) -> Vec<u8> {
        vec![byte; PAGE_SIZE]
    }

    #[test]
    fn pages_survive_reopen_in_any_write_order() {
        let (table_file, table_path) = NamedTempFile::new().unwrap().into_parts();
        let mut disk = DiskManager::new(table_file).unwrap();
        let first = disk.allocate_page();
        let second = disk.allocate_page();
        assert_eq!((first, second), (0, 1));
        // later page first: the file grows past the gap
        disk.write_page_data(second, &page_filled_with(2)).unwrap();
        disk.write_page_data(first, &page_filled_with(1)).unwrap();
        disk.sync().unwrap();
        drop(disk);
        assert_eq!(std::fs::metadata(&table_path).unwrap().len(), page_offset(2));

        let mut disk = DiskManager::open(&table_path).unwrap();
        assert_eq!(disk.num_pages(), 2);
        let mut buf = vec![0; PAGE_SIZE];
        disk.read_page_data(first, &mut buf).unwrap();
        assert_eq!(buf, page_filled_with(1));
        disk.read_page_data(second, &mut buf).unwrap();
        assert_eq!(buf, page_filled_with(2));
        assert_eq!(disk.allocate_page(), 2);
    }

    #[test]
    fn allocated_page_reads_as_zeroes_before_first_write() {
        let disk_file = tempfile::tempfile().unwrap();
        let mut disk = DiskManager::new(disk_file).unwrap();
        let page_no = disk.allocate_page();
        let mut buf = vec![0xffu8; PAGE_SIZE];
        disk.read_page_data(page_no, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }
}
