use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use heapdb::buffer::manager::{BufferPoolManager, Error};
use heapdb::config::Config;
use heapdb::database::Database;
use heapdb::storage::entity::PageId;
use heapdb::transaction::{Permissions, TransactionId};
use heapdb::tuple::{Field, Tuple, TupleDesc, Type};

fn open(num_pages: usize) -> Arc<Database> {
    Arc::new(Database::open(Config::default().with_num_pages(num_pages)).unwrap())
}

#[test]
fn crossing_writers_abort_exactly_one() {
    let db = open(8);
    let table = db
        .create_table("t", TupleDesc::from_types(&[Type::Int]))
        .unwrap();
    let pages = [PageId::new(table, 0), PageId::new(table, 1)];
    // materialize both pages first
    let setup = db.begin();
    for &page_id in &pages {
        db.pool()
            .fetch_page(setup, page_id, Permissions::ReadOnly)
            .unwrap();
    }
    db.commit(setup).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let workers: Vec<_> = (0..2)
        .map(|i| {
            let db = db.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let pool = db.pool();
                let tid = TransactionId::new();
                let (first, second) = (pages[i], pages[1 - i]);
                pool.fetch_page(tid, first, Permissions::ReadWrite).unwrap();
                barrier.wait();
                let result = pool.fetch_page(tid, second, Permissions::ReadWrite);
                let aborted = matches!(result, Err(ref err) if err.is_abort());
                if aborted {
                    pool.complete_transaction(tid, false).unwrap();
                } else {
                    result.unwrap();
                    pool.transaction_complete(tid).unwrap();
                }
                aborted
            })
        })
        .collect();
    let aborted: Vec<bool> = workers
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .collect();
    assert_eq!(aborted.iter().filter(|&&a| a).count(), 1);
}

#[test]
fn reader_waits_for_writer_commit() {
    let db = open(8);
    let table = db
        .create_table("t", TupleDesc::from_types(&[Type::Int]))
        .unwrap();
    let writer = db.begin();
    let mut tuple = Tuple::new(vec![Field::Int(42)]);
    db.pool().insert_tuple(writer, table, &mut tuple).unwrap();
    let page_id = tuple.record_id().unwrap().page_id;

    let (tx, rx) = mpsc::channel();
    let reader = {
        let db = db.clone();
        thread::spawn(move || {
            let tid = TransactionId::new();
            let heap = db.table(table).unwrap();
            let tuples = heap.page_tuples(db.pool().as_ref(), tid, page_id.page_no).unwrap();
            db.commit(tid).unwrap();
            tx.send(tuples).unwrap();
        })
    };
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    db.commit(writer).unwrap();
    let seen = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].field(0), Some(&Field::Int(42)));
    reader.join().unwrap();
}

#[test]
fn concurrent_inserters_lose_nothing() {
    let db = open(16);
    let table = db
        .create_table("t", TupleDesc::from_types(&[Type::Int, Type::Int]))
        .unwrap();
    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let db = db.clone();
            thread::spawn(move || loop {
                let tid = db.begin();
                let result = (0..50).try_for_each(|i| {
                    let mut tuple = Tuple::new(vec![Field::Int(worker), Field::Int(i)]);
                    db.pool().insert_tuple(tid, table, &mut tuple)
                });
                match result {
                    Ok(()) => {
                        db.commit(tid).unwrap();
                        break;
                    }
                    Err(Error::Aborted(_)) => db.abort(tid).unwrap(),
                    Err(err) => panic!("insert failed: {}", err),
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let tid = db.begin();
    let heap = db.table(table).unwrap();
    let mut iter = heap.iter(tid);
    let mut per_worker = [0; 4];
    while let Some(tuple) = iter.next(db.pool().as_ref()).unwrap() {
        per_worker[tuple.field(0).and_then(Field::as_int).unwrap() as usize] += 1;
    }
    assert_eq!(per_worker, [50; 4]);
}
