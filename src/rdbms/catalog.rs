use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bincode::Options;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    disk::DiskManager,
    heap::{page, HeapFile},
};
use crate::storage::{entity::TableId, manager::StorageManager, memory::MemoryManager};
use crate::tuple::TupleDesc;

const MANIFEST_FILE: &str = "catalog.bin";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("table {0:?} already exists")]
    DuplicateTable(String),
    #[error("invalid table name {0:?}")]
    InvalidName(String),
    #[error("table {0:?} has no columns")]
    EmptySchema(String),
    #[error("rows of table {name:?} are {width} bytes, too wide for a page")]
    RowTooWide { name: String, width: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Manifest(#[from] bincode::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct TableEntry {
    id: TableId,
    name: String,
    desc: TupleDesc,
}

#[derive(Default)]
struct Tables {
    by_id: HashMap<TableId, Arc<HeapFile>>,
    by_name: HashMap<String, TableId>,
    next_id: u32,
}

/// Resolves table ids to heap files.
///
/// With a data directory every table is a `<name>.tbl` file there and the
/// list of tables is kept in `catalog.bin`; without one tables live in memory.
pub struct Catalog {
    data_dir: Option<PathBuf>,
    tables: RwLock<Tables>,
}

impl Catalog {
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Opens the catalog stored in `data_dir`, creating the directory if needed.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, Error> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        let catalog = Self {
            data_dir: Some(data_dir.clone()),
            tables: RwLock::new(Tables::default()),
        };
        let manifest = data_dir.join(MANIFEST_FILE);
        if manifest.exists() {
            let entries: Vec<TableEntry> = bincode::options().deserialize(&fs::read(&manifest)?)?;
            let mut tables = catalog.tables.write();
            for entry in entries {
                let disk = DiskManager::open(data_dir.join(table_file(&entry.name)))?;
                tables.next_id = tables.next_id.max(entry.id.0 + 1);
                register(&mut tables, entry.id, &entry.name, entry.desc, Box::new(disk));
            }
            info!(tables = tables.by_id.len(), dir = %data_dir.display(), "catalog loaded");
        }
        Ok(catalog)
    }

    pub fn create_table(&self, name: &str, desc: TupleDesc) -> Result<TableId, Error> {
        let storage: Box<dyn StorageManager> = match &self.data_dir {
            Some(dir) => {
                validate(name, &desc)?;
                Box::new(DiskManager::open(dir.join(table_file(name)))?)
            }
            None => Box::new(MemoryManager::new()),
        };
        let table_id = self.add_table(name, desc, storage)?;
        self.save()?;
        Ok(table_id)
    }

    /// Registers a table over caller-provided storage. Not persisted on its own.
    pub fn add_table(
        &self,
        name: &str,
        desc: TupleDesc,
        storage: Box<dyn StorageManager>,
    ) -> Result<TableId, Error> {
        validate(name, &desc)?;
        let mut tables = self.tables.write();
        if tables.by_name.contains_key(name) {
            return Err(Error::DuplicateTable(name.to_owned()));
        }
        let table_id = TableId(tables.next_id);
        tables.next_id += 1;
        register(&mut tables, table_id, name, desc, storage);
        info!(table = name, id = %table_id, "table created");
        Ok(table_id)
    }

    pub fn table(&self, table_id: TableId) -> Option<Arc<HeapFile>> {
        self.tables.read().by_id.get(&table_id).cloned()
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.tables.read().by_name.get(name).copied()
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<_> = self.tables.read().by_id.keys().copied().collect();
        ids.sort();
        ids
    }

    fn save(&self) -> Result<(), Error> {
        let dir = match &self.data_dir {
            Some(dir) => dir,
            None => return Ok(()),
        };
        let entries: Vec<TableEntry> = {
            let tables = self.tables.read();
            let mut entries: Vec<_> = tables
                .by_id
                .values()
                .map(|heap| TableEntry {
                    id: heap.id(),
                    name: heap.name().to_owned(),
                    desc: heap.desc().clone(),
                })
                .collect();
            entries.sort_by_key(|entry| entry.id);
            entries
        };
        fs::write(dir.join(MANIFEST_FILE), bincode::options().serialize(&entries)?)?;
        Ok(())
    }
}

fn table_file(name: &str) -> String {
    format!("{}.tbl", name)
}

fn validate(name: &str, desc: &TupleDesc) -> Result<(), Error> {
    if name.is_empty() || name.contains(|c: char| c == '/' || c == '\\' || c == '.') {
        return Err(Error::InvalidName(name.to_owned()));
    }
    if desc.num_fields() == 0 {
        return Err(Error::EmptySchema(name.to_owned()));
    }
    // a page needs room for at least one slot; this also keeps the width
    // within the page header's u16
    let width = desc.byte_width();
    if page::slots_per_page(width) == 0 {
        return Err(Error::RowTooWide {
            name: name.to_owned(),
            width,
        });
    }
    Ok(())
}

fn register(
    tables: &mut Tables,
    table_id: TableId,
    name: &str,
    desc: TupleDesc,
    storage: Box<dyn StorageManager>,
) {
    let heap = HeapFile::new(table_id, name, desc, storage);
    tables.by_id.insert(table_id, Arc::new(heap));
    tables.by_name.insert(name.to_owned(), table_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::Type;

    #[test]
    fn ids_are_dense_and_names_unique() {
        let catalog = Catalog::in_memory();
        let desc = TupleDesc::from_types(&[Type::Int]);
        let a = catalog.create_table("a", desc.clone()).unwrap();
        let b = catalog.create_table("b", desc.clone()).unwrap();
        assert_eq!((a, b), (TableId(0), TableId(1)));
        assert_eq!(catalog.table_id("b"), Some(b));
        assert!(matches!(
            catalog.create_table("a", desc),
            Err(Error::DuplicateTable(_))
        ));
        assert!(matches!(
            catalog.create_table("c", TupleDesc::from_types(&[])),
            Err(Error::EmptySchema(_))
        ));
        assert_eq!(catalog.table(a).unwrap().name(), "a");
        assert!(catalog.table_id("c").is_none());
    }

    #[test]
    fn rows_wider_than_a_page_are_rejected() {
        let catalog = Catalog::in_memory();
        // 31 strings of 136 bytes each overflow a 4096 byte page
        let too_wide = TupleDesc::from_types(&[Type::Str; 31]);
        assert!(matches!(
            catalog.create_table("wide", too_wide),
            Err(Error::RowTooWide { width: 4216, .. })
        ));
        assert!(catalog.table_id("wide").is_none());

        // 30 of them still fit one per page
        let widest = TupleDesc::from_types(&[Type::Str; 30]);
        let table_id = catalog.create_table("widest", widest).unwrap();
        assert_eq!(page::slots_per_page(catalog.table(table_id).unwrap().desc().byte_width()), 1);
        assert!(catalog.table(TableId(9)).is_none());
    }

    #[test]
    fn manifest_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let desc = TupleDesc::new(&[Type::Int, Type::Str], &["id", "name"]);
        {
            let catalog = Catalog::open(dir.path()).unwrap();
            catalog.create_table("users", desc.clone()).unwrap();
            catalog.create_table("orders", desc.clone()).unwrap();
        }
        let catalog = Catalog::open(dir.path()).unwrap();
        assert_eq!(catalog.table_ids(), vec![TableId(0), TableId(1)]);
        let users = catalog.table(TableId(0)).unwrap();
        assert_eq!(users.name(), "users");
        assert_eq!(users.desc(), &desc);
        assert_eq!(users.desc().field_index("name"), Some(1));
        // fresh ids continue after the loaded ones
        assert_eq!(
            catalog.create_table("items", desc).unwrap(),
            TableId(2)
        );
        assert!(matches!(
            catalog.create_table("../escape", TupleDesc::from_types(&[Type::Int])),
            Err(Error::InvalidName(_))
        ));
    }
}
