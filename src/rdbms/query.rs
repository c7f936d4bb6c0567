use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use super::heap::{self, HeapFile};
use crate::buffer::manager::BufferPoolManager;
use crate::storage::entity::TableId;
use crate::transaction::TransactionId;
use crate::tuple::{Field, Tuple};

pub trait Executor<T: BufferPoolManager> {
    fn next(&mut self, bufmgr: &T) -> Result<Option<Tuple>>;
}

pub type BoxExecutor<'a, T> = Box<dyn Executor<T> + 'a>;

pub trait PlanNode<T: BufferPoolManager> {
    fn start(&self, bufmgr: &T) -> Result<BoxExecutor<T>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEq,
    LessThan,
    LessThanOrEq,
    // substring match on strings, equality on ints
    Like,
}

impl Op {
    pub fn apply(self, lhs: &Field, rhs: &Field) -> bool {
        if let (Op::Like, Field::Str(lhs), Field::Str(rhs)) = (self, lhs, rhs) {
            return lhs.contains(rhs.as_str());
        }
        let ordering = match lhs.compare(rhs) {
            Some(ordering) => ordering,
            None => return false,
        };
        match self {
            Op::Equals | Op::Like => ordering == Ordering::Equal,
            Op::NotEquals => ordering != Ordering::Equal,
            Op::GreaterThan => ordering == Ordering::Greater,
            Op::GreaterThanOrEq => ordering != Ordering::Less,
            Op::LessThan => ordering == Ordering::Less,
            Op::LessThanOrEq => ordering != Ordering::Greater,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Op::Equals => "=",
            Op::NotEquals => "<>",
            Op::GreaterThan => ">",
            Op::GreaterThanOrEq => ">=",
            Op::LessThan => "<",
            Op::LessThanOrEq => "<=",
            Op::Like => "LIKE",
        };
        f.write_str(symbol)
    }
}

/// `tuple[field] op operand`
#[derive(Debug, Clone)]
pub struct Predicate {
    pub field: usize,
    pub op: Op,
    pub operand: Field,
}

impl Predicate {
    pub fn new(field: usize, op: Op, operand: impl Into<Field>) -> Self {
        Self {
            field,
            op,
            operand: operand.into(),
        }
    }

    pub fn filter(&self, tuple: &Tuple) -> bool {
        tuple
            .field(self.field)
            .map_or(false, |field| self.op.apply(field, &self.operand))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${} {} {}", self.field, self.op, self.operand)
    }
}

pub struct SeqScan {
    pub tid: TransactionId,
    pub table: Arc<HeapFile>,
}

impl<T: BufferPoolManager> PlanNode<T> for SeqScan {
    fn start(&self, _bufmgr: &T) -> Result<BoxExecutor<T>> {
        Ok(Box::new(ExecSeqScan {
            table_iter: self.table.iter(self.tid),
        }))
    }
}

pub struct ExecSeqScan<'a> {
    table_iter: heap::Iter<'a>,
}

impl<'a, T: BufferPoolManager> Executor<T> for ExecSeqScan<'a> {
    fn next(&mut self, bufmgr: &T) -> Result<Option<Tuple>> {
        Ok(self.table_iter.next(bufmgr)?)
    }
}

pub struct Filter<'a, T: BufferPoolManager> {
    pub inner_plan: &'a dyn PlanNode<T>,
    pub predicate: Predicate,
}

impl<'a, T: BufferPoolManager> PlanNode<T> for Filter<'a, T> {
    fn start(&self, bufmgr: &T) -> Result<BoxExecutor<T>> {
        let inner_iter = self.inner_plan.start(bufmgr)?;
        Ok(Box::new(ExecFilter {
            inner_iter,
            predicate: &self.predicate,
        }))
    }
}

pub struct ExecFilter<'a, T: BufferPoolManager> {
    inner_iter: BoxExecutor<'a, T>,
    predicate: &'a Predicate,
}

impl<'a, T: BufferPoolManager> Executor<T> for ExecFilter<'a, T> {
    fn next(&mut self, bufmgr: &T) -> Result<Option<Tuple>> {
        loop {
            let tuple = match self.inner_iter.next(bufmgr)? {
                Some(tuple) => tuple,
                None => return Ok(None),
            };
            if self.predicate.filter(&tuple) {
                return Ok(Some(tuple));
            }
        }
    }
}

/// Literal rows, mostly as the child of an insert.
pub struct TupleList {
    pub tuples: Vec<Tuple>,
}

impl<T: BufferPoolManager> PlanNode<T> for TupleList {
    fn start(&self, _bufmgr: &T) -> Result<BoxExecutor<T>> {
        Ok(Box::new(ExecTupleList {
            tuples: self.tuples.iter(),
        }))
    }
}

pub struct ExecTupleList<'a> {
    tuples: std::slice::Iter<'a, Tuple>,
}

impl<'a, T: BufferPoolManager> Executor<T> for ExecTupleList<'a> {
    fn next(&mut self, _bufmgr: &T) -> Result<Option<Tuple>> {
        Ok(self.tuples.next().cloned())
    }
}

/// Inserts every child row into `table`; yields a single row holding the
/// number of rows inserted.
pub struct Insert<'a, T: BufferPoolManager> {
    pub tid: TransactionId,
    pub table: TableId,
    pub child: &'a dyn PlanNode<T>,
}

impl<'a, T: BufferPoolManager> PlanNode<T> for Insert<'a, T> {
    fn start(&self, bufmgr: &T) -> Result<BoxExecutor<T>> {
        Ok(Box::new(ExecInsert {
            tid: self.tid,
            table: self.table,
            child: self.child.start(bufmgr)?,
            done: false,
        }))
    }
}

pub struct ExecInsert<'a, T: BufferPoolManager> {
    tid: TransactionId,
    table: TableId,
    child: BoxExecutor<'a, T>,
    done: bool,
}

impl<'a, T: BufferPoolManager> Executor<T> for ExecInsert<'a, T> {
    fn next(&mut self, bufmgr: &T) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        let mut count = 0;
        while let Some(mut tuple) = self.child.next(bufmgr)? {
            bufmgr.insert_tuple(self.tid, self.table, &mut tuple)?;
            count += 1;
        }
        self.done = true;
        Ok(Some(Tuple::new(vec![Field::Int(count)])))
    }
}

/// Deletes every child row (which must carry record ids); yields a single
/// row holding the number of rows deleted.
pub struct Delete<'a, T: BufferPoolManager> {
    pub tid: TransactionId,
    pub child: &'a dyn PlanNode<T>,
}

impl<'a, T: BufferPoolManager> PlanNode<T> for Delete<'a, T> {
    fn start(&self, bufmgr: &T) -> Result<BoxExecutor<T>> {
        Ok(Box::new(ExecDelete {
            tid: self.tid,
            child: self.child.start(bufmgr)?,
            done: false,
        }))
    }
}

pub struct ExecDelete<'a, T: BufferPoolManager> {
    tid: TransactionId,
    child: BoxExecutor<'a, T>,
    done: bool,
}

impl<'a, T: BufferPoolManager> Executor<T> for ExecDelete<'a, T> {
    fn next(&mut self, bufmgr: &T) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        let mut count = 0;
        while let Some(tuple) = self.child.next(bufmgr)? {
            bufmgr.delete_tuple(self.tid, &tuple)?;
            count += 1;
        }
        self.done = true;
        Ok(Some(Tuple::new(vec![Field::Int(count)])))
    }
}

/// Runs a plan to completion.
pub fn collect<T: BufferPoolManager>(plan: &dyn PlanNode<T>, bufmgr: &T) -> Result<Vec<Tuple>> {
    let mut exec = plan.start(bufmgr)?;
    let mut tuples = vec![];
    while let Some(tuple) = exec.next(bufmgr)? {
        tuples.push(tuple);
    }
    Ok(tuples)
}
