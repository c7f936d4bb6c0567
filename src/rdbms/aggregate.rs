use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;

use anyhow::{bail, Context, Result};

use super::query::{BoxExecutor, Executor, PlanNode};
use crate::buffer::manager::BufferPoolManager;
use crate::tuple::{Field, Tuple};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl fmt::Display for AggOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggOp::Min => "min",
            AggOp::Max => "max",
            AggOp::Sum => "sum",
            AggOp::Avg => "avg",
            AggOp::Count => "count",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    count: i64,
    sum: i64,
    min: Option<i32>,
    max: Option<i32>,
}

impl Accumulator {
    fn add(&mut self, value: Option<i32>) {
        self.count += 1;
        if let Some(v) = value {
            self.sum += v as i64;
            self.min = Some(self.min.map_or(v, |min| min.min(v)));
            self.max = Some(self.max.map_or(v, |max| max.max(v)));
        }
    }

    fn result(&self, op: AggOp) -> Result<i32> {
        let value = match op {
            AggOp::Count => self.count,
            AggOp::Sum => self.sum,
            AggOp::Avg => self.sum / self.count.max(1),
            AggOp::Min => self.min.unwrap_or_default() as i64,
            AggOp::Max => self.max.unwrap_or_default() as i64,
        };
        i32::try_from(value).with_context(|| format!("{} of {} overflows an int", op, value))
    }
}

/// Folds tuples into one accumulator per group, keeping groups in the order
/// they first appear. String columns only support `Count`.
pub struct Aggregator {
    agg_field: usize,
    group_by: Option<usize>,
    op: AggOp,
    groups: Vec<(Option<Field>, Accumulator)>,
    index: HashMap<Option<Field>, usize>,
}

impl Aggregator {
    pub fn new(agg_field: usize, group_by: Option<usize>, op: AggOp) -> Self {
        Self {
            agg_field,
            group_by,
            op,
            groups: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn merge(&mut self, tuple: &Tuple) -> Result<()> {
        let value = match tuple.field(self.agg_field) {
            Some(Field::Int(v)) => Some(*v),
            Some(Field::Str(_)) if self.op == AggOp::Count => None,
            Some(Field::Str(_)) => bail!("{} is not supported on strings", self.op),
            None => bail!("tuple has no field {}", self.agg_field),
        };
        let group = match self.group_by {
            Some(i) => Some(
                tuple
                    .field(i)
                    .cloned()
                    .with_context(|| format!("tuple has no field {}", i))?,
            ),
            None => None,
        };
        let slot = match self.index.get(&group) {
            Some(&slot) => slot,
            None => {
                self.groups.push((group.clone(), Accumulator::default()));
                self.index.insert(group, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        self.groups[slot].1.add(value);
        Ok(())
    }

    /// One row per group: `(group, value)`, or just `(value)` without grouping.
    pub fn results(&self) -> Result<Vec<Tuple>> {
        self.groups
            .iter()
            .map(|(group, acc)| {
                let value = Field::Int(acc.result(self.op)?);
                Ok(match group {
                    Some(group) => Tuple::new(vec![group.clone(), value]),
                    None => Tuple::new(vec![value]),
                })
            })
            .collect()
    }
}

pub struct Aggregate<'a, T: BufferPoolManager> {
    pub child: &'a dyn PlanNode<T>,
    pub agg_field: usize,
    pub group_by: Option<usize>,
    pub op: AggOp,
}

impl<'a, T: BufferPoolManager> PlanNode<T> for Aggregate<'a, T> {
    fn start(&self, bufmgr: &T) -> Result<BoxExecutor<T>> {
        let mut aggregator = Aggregator::new(self.agg_field, self.group_by, self.op);
        let mut child = self.child.start(bufmgr)?;
        while let Some(tuple) = child.next(bufmgr)? {
            aggregator.merge(&tuple)?;
        }
        Ok(Box::new(ExecAggregate {
            results: aggregator.results()?.into_iter(),
        }))
    }
}

pub struct ExecAggregate {
    results: std::vec::IntoIter<Tuple>,
}

impl<T: BufferPoolManager> Executor<T> for ExecAggregate {
    fn next(&mut self, _bufmgr: &T) -> Result<Option<Tuple>> {
        Ok(self.results.next())
    }
}
