use anyhow::Result;
use tracing_subscriber::EnvFilter;

use heapdb::config::Config;
use heapdb::database::Database;
use heapdb::rdbms::{
    aggregate::{AggOp, Aggregate},
    lru::BufferPool,
    query::*,
};
use heapdb::tuple::{Field, Tuple, TupleDesc, Type};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // config
    let db = Database::open(Config::from_env()?)?;
    let table = match db.table_id("employees") {
        Some(table) => table,
        None => db.create_table(
            "employees",
            TupleDesc::new(&[Type::Int, Type::Str, Type::Int], &["id", "dept", "salary"]),
        )?,
    };
    let heap = db.table(table)?;
    let pool = db.pool().as_ref();

    // load
    let tid = db.begin();
    let rows = TupleList {
        tuples: vec![
            Tuple::new(vec![Field::Int(1), "eng".into(), Field::Int(120)]),
            Tuple::new(vec![Field::Int(2), "ops".into(), Field::Int(90)]),
            Tuple::new(vec![Field::Int(3), "eng".into(), Field::Int(135)]),
            Tuple::new(vec![Field::Int(4), "sales".into(), Field::Int(80)]),
        ],
    };
    let insert: Insert<BufferPool> = Insert {
        tid,
        table,
        child: &rows,
    };
    let mut exec = insert.start(pool)?;
    while let Some(count) = exec.next(pool)? {
        println!("inserted {}", count);
    }
    db.commit(tid)?;

    // query
    let tid = db.begin();
    let scan = SeqScan {
        tid,
        table: heap.clone(),
    };
    let filter: Filter<BufferPool> = Filter {
        inner_plan: &scan,
        predicate: Predicate::new(2, Op::GreaterThanOrEq, 90),
    };
    let plan: Aggregate<BufferPool> = Aggregate {
        child: &filter,
        agg_field: 2,
        group_by: Some(1),
        op: AggOp::Avg,
    };
    let mut exec = plan.start(pool)?;
    while let Some(row) = exec.next(pool)? {
        println!("{}", row);
    }
    db.commit(tid)?;

    let stats = db.table_stats(table, 1000.0)?;
    println!(
        "{} rows on {} pages, salary > 100 selects {:.2}",
        stats.num_tuples(),
        stats.num_pages(),
        stats.estimate_selectivity(2, Op::GreaterThan, &Field::Int(100))
    );
    Ok(())
}
