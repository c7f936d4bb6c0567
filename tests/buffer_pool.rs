use std::sync::Arc;

use heapdb::buffer::manager::{BufferPoolManager, Error};
use heapdb::config::Config;
use heapdb::database::Database;
use heapdb::rdbms::lru::BufferPool;
use heapdb::storage::entity::{PageId, TableId};
use heapdb::transaction::{Permissions, TransactionId};
use heapdb::tuple::{Field, Tuple, TupleDesc, Type};

fn int_desc(columns: usize) -> TupleDesc {
    TupleDesc::from_types(&vec![Type::Int; columns])
}

fn db_with_tables(num_pages: usize, tables: usize) -> (Database, Vec<TableId>) {
    let db = Database::open(Config::default().with_num_pages(num_pages)).unwrap();
    let ids = (0..tables)
        .map(|i| db.create_table(&format!("t{}", i), int_desc(2)).unwrap())
        .collect();
    (db, ids)
}

fn scan_all(pool: &BufferPool, db: &Database, table: TableId, tid: TransactionId) -> Vec<Tuple> {
    let heap = db.table(table).unwrap();
    let mut iter = heap.iter(tid);
    let mut tuples = vec![];
    while let Some(tuple) = iter.next(pool).unwrap() {
        tuples.push(tuple);
    }
    tuples
}

#[test]
fn oldest_clean_page_is_evicted() {
    let (db, tables) = db_with_tables(2, 3);
    let pool = db.pool();
    let tid = TransactionId::new();
    let [a, b, c] = [0, 1, 2].map(|i| PageId::new(tables[i], 0));

    for page_id in [a, b, c] {
        pool.fetch_page(tid, page_id, Permissions::ReadOnly).unwrap();
    }
    assert_eq!(pool.resident_pages(), vec![b, c]);
}

#[test]
fn eviction_skips_dirty_page() {
    let (db, tables) = db_with_tables(2, 3);
    let pool = db.pool();
    let tid = TransactionId::new();
    let [a, b, c] = [0, 1, 2].map(|i| PageId::new(tables[i], 0));

    let handle = pool.fetch_page(tid, a, Permissions::ReadWrite).unwrap();
    pool.write_page(&handle, |page| page[64] ^= 0xff).unwrap();
    pool.fetch_page(tid, b, Permissions::ReadOnly).unwrap();
    pool.fetch_page(tid, c, Permissions::ReadOnly).unwrap();

    assert_eq!(pool.resident_pages(), vec![a, c]);
    assert!(pool.is_dirty(a));
}

#[test]
fn all_dirty_pool_refuses_new_pages() {
    let (db, tables) = db_with_tables(2, 3);
    let pool = db.pool();
    let tid = TransactionId::new();
    for &table in &tables[..2] {
        let handle = pool
            .fetch_page(tid, PageId::new(table, 0), Permissions::ReadWrite)
            .unwrap();
        pool.write_page(&handle, |page| page[64] = 1).unwrap();
    }
    let err = pool
        .fetch_page(tid, PageId::new(tables[2], 0), Permissions::ReadOnly)
        .unwrap_err();
    assert!(matches!(err, Error::NoEvictablePage(2)));
    assert!(!err.is_abort());
}

#[test]
fn four_hundred_rows_fill_two_pages() {
    let db = Database::open(Config::default()).unwrap();
    let table = db.create_table("wide", int_desc(5)).unwrap();
    let pool = db.pool();
    let tid = db.begin();
    for i in 0..400 {
        let mut tuple = Tuple::new((0..5).map(|c| Field::Int(i * 5 + c)).collect());
        pool.insert_tuple(tid, table, &mut tuple).unwrap();
    }
    db.commit(tid).unwrap();

    assert_eq!(db.table(table).unwrap().page_count(), 2);
    let reader = db.begin();
    let tuples = scan_all(pool, &db, table, reader);
    assert_eq!(tuples.len(), 400);
    let mut firsts: Vec<_> = tuples
        .iter()
        .map(|tuple| tuple.field(0).and_then(Field::as_int).unwrap())
        .collect();
    firsts.sort_unstable();
    assert_eq!(firsts, (0..400).map(|i| i * 5).collect::<Vec<_>>());
}

#[test]
fn commit_makes_changes_durable() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(Config::default().with_data_dir(dir.path())).unwrap();
    let table = db.create_table("t", int_desc(2)).unwrap();
    let pool = db.pool();
    let tid = db.begin();
    let mut tuple = Tuple::new(vec![Field::Int(7), Field::Int(8)]);
    pool.insert_tuple(tid, table, &mut tuple).unwrap();
    let page_id = tuple.record_id().unwrap().page_id;
    db.commit(tid).unwrap();

    assert!(!pool.is_dirty(page_id));
    let on_disk = db.table(table).unwrap().read_page(page_id).unwrap();
    let reader = db.begin();
    let handle = pool.fetch_page(reader, page_id, Permissions::ReadOnly).unwrap();
    let cached = pool.read_page(&handle, |page| page.to_vec()).unwrap();
    assert_eq!(&on_disk[..], &cached[..]);
}

#[test]
fn abort_restores_the_pre_transaction_image() {
    let (db, tables) = db_with_tables(4, 1);
    let table = tables[0];
    let pool = db.pool();

    let setup = db.begin();
    for i in 0..3 {
        let mut tuple = Tuple::new(vec![Field::Int(i), Field::Int(i)]);
        pool.insert_tuple(setup, table, &mut tuple).unwrap();
    }
    db.commit(setup).unwrap();
    let page_id = PageId::new(table, 0);
    let before = {
        let tid = db.begin();
        let handle = pool.fetch_page(tid, page_id, Permissions::ReadOnly).unwrap();
        let bytes = pool.read_page(&handle, |page| page.to_vec()).unwrap();
        db.commit(tid).unwrap();
        bytes
    };

    let doomed = db.begin();
    let victims = scan_all(pool, &db, table, doomed);
    pool.delete_tuple(doomed, &victims[1]).unwrap();
    let mut extra = Tuple::new(vec![Field::Int(99), Field::Int(99)]);
    pool.insert_tuple(doomed, table, &mut extra).unwrap();
    db.abort(doomed).unwrap();

    let tid = db.begin();
    let handle = pool.fetch_page(tid, page_id, Permissions::ReadOnly).unwrap();
    let after = pool.read_page(&handle, |page| page.to_vec()).unwrap();
    assert_eq!(before, after);
    assert_eq!(scan_all(pool, &db, table, tid).len(), 3);
}

#[test]
fn completion_releases_every_lock() {
    let (db, tables) = db_with_tables(4, 2);
    let pool = db.pool();
    for commit in [true, false] {
        let tid = db.begin();
        let touched = [PageId::new(tables[0], 0), PageId::new(tables[1], 0)];
        pool.fetch_page(tid, touched[0], Permissions::ReadOnly).unwrap();
        let handle = pool.fetch_page(tid, touched[1], Permissions::ReadWrite).unwrap();
        pool.write_page(&handle, |page| page[64] = 3).unwrap();
        assert!(touched.iter().all(|&page_id| pool.holds_lock(tid, page_id)));

        pool.complete_transaction(tid, commit).unwrap();
        assert!(touched.iter().all(|&page_id| !pool.holds_lock(tid, page_id)));
        assert!(pool.locked_pages(tid).is_empty());
    }
}

#[test]
fn deleting_twice_reports_missing_tuple() {
    let (db, tables) = db_with_tables(4, 1);
    let pool = db.pool();
    let tid = db.begin();
    let mut tuple = Tuple::new(vec![Field::Int(1), Field::Int(1)]);
    pool.insert_tuple(tid, tables[0], &mut tuple).unwrap();
    pool.delete_tuple(tid, &tuple).unwrap();
    assert!(matches!(
        pool.delete_tuple(tid, &tuple),
        Err(Error::TupleNotFound(_))
    ));
    assert!(matches!(
        pool.delete_tuple(tid, &Tuple::new(vec![Field::Int(1), Field::Int(1)])),
        Err(Error::MissingRecordId)
    ));
}

#[test]
fn page_beyond_growth_point_is_not_found() {
    let (db, tables) = db_with_tables(4, 1);
    let pool: &Arc<BufferPool> = db.pool();
    let tid = db.begin();
    let err = pool
        .fetch_page(tid, PageId::new(tables[0], 5), Permissions::ReadOnly)
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
}
