use std::fmt;

use tracing::debug;

use super::heap::HeapFile;
use super::query::Op;
use crate::buffer::manager::{BufferPoolManager, Error};
use crate::transaction::TransactionId;
use crate::tuple::{Field, Tuple, Type};

pub const NUM_HIST_BINS: usize = 100;

/// Fixed-size equi-width histogram over one integer column.
#[derive(Debug, Clone)]
pub struct IntHistogram {
    buckets: Vec<u64>,
    min: i64,
    max: i64,
    width: f64,
    total: u64,
}

impl IntHistogram {
    /// `buckets` bins covering `min..=max`.
    pub fn new(buckets: usize, min: i32, max: i32) -> Self {
        let buckets = buckets.max(1);
        let (min, max) = (min as i64, (max as i64).max(min as i64));
        Self {
            buckets: vec![0; buckets],
            min,
            max,
            width: (max - min + 1) as f64 / buckets as f64,
            total: 0,
        }
    }

    fn bucket(&self, v: i64) -> usize {
        let b = ((v - self.min) as f64 / self.width) as usize;
        b.min(self.buckets.len() - 1)
    }

    fn left(&self, b: usize) -> f64 {
        self.min as f64 + b as f64 * self.width
    }

    /// Values outside `min..=max` are ignored.
    pub fn add_value(&mut self, v: i32) {
        let v = v as i64;
        if v < self.min || v > self.max {
            return;
        }
        let b = self.bucket(v);
        self.buckets[b] += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Estimated fraction of the added values satisfying `value op v`.
    pub fn estimate_selectivity(&self, op: Op, v: i32) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let v = v as i64;
        match op {
            Op::Equals | Op::Like => self.equals(v),
            Op::NotEquals => 1.0 - self.equals(v),
            Op::GreaterThan => self.greater_than(v),
            Op::GreaterThanOrEq => self.greater_than(v - 1),
            Op::LessThan => self.less_than(v),
            Op::LessThanOrEq => self.less_than(v + 1),
        }
    }

    fn equals(&self, v: i64) -> f64 {
        if v < self.min || v > self.max {
            return 0.0;
        }
        // a bucket narrower than one value holds at most one distinct value
        let height = self.buckets[self.bucket(v)] as f64;
        height / self.width.max(1.0) / self.total as f64
    }

    fn greater_than(&self, v: i64) -> f64 {
        if v < self.min {
            return 1.0;
        }
        if v >= self.max {
            return 0.0;
        }
        let b = self.bucket(v);
        let right = self.left(b + 1);
        let part = ((right - (v + 1) as f64) / self.width).clamp(0.0, 1.0);
        let above: u64 = self.buckets[b + 1..].iter().sum();
        (self.buckets[b] as f64 * part + above as f64) / self.total as f64
    }

    fn less_than(&self, v: i64) -> f64 {
        if v <= self.min {
            return 0.0;
        }
        if v > self.max {
            return 1.0;
        }
        let b = self.bucket(v);
        let part = ((v as f64 - self.left(b)) / self.width).clamp(0.0, 1.0);
        let below: u64 = self.buckets[..b].iter().sum();
        (self.buckets[b] as f64 * part + below as f64) / self.total as f64
    }
}

impl fmt::Display for IntHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IntHistogram[{}..={}, {} buckets, {} values]",
            self.min,
            self.max,
            self.buckets.len(),
            self.total
        )
    }
}

/// Per-table numbers a planner needs: size, scan cost and, for each integer
/// column, a histogram.
#[derive(Debug, Clone)]
pub struct TableStats {
    num_tuples: usize,
    num_pages: u32,
    io_cost_per_page: f64,
    histograms: Vec<Option<IntHistogram>>,
}

impl TableStats {
    /// Scans the table twice under a private transaction: once for each int
    /// column's range, once to fill the histograms.
    pub fn compute<T: BufferPoolManager>(
        bufmgr: &T,
        heap: &HeapFile,
        io_cost_per_page: f64,
    ) -> Result<Self, Error> {
        let tid = TransactionId::new();
        let stats = Self::scan(bufmgr, heap, tid, io_cost_per_page);
        // read-only, so aborting after a failed scan has nothing to undo
        bufmgr.complete_transaction(tid, stats.is_ok())?;
        stats
    }

    fn scan<T: BufferPoolManager>(
        bufmgr: &T,
        heap: &HeapFile,
        tid: TransactionId,
        io_cost_per_page: f64,
    ) -> Result<Self, Error> {
        let int_columns: Vec<bool> = heap.desc().types().map(|ty| ty == Type::Int).collect();
        let mut ranges: Vec<Option<(i32, i32)>> = vec![None; int_columns.len()];
        let mut num_tuples = 0;
        let mut iter = heap.iter(tid);
        while let Some(tuple) = iter.next(bufmgr)? {
            num_tuples += 1;
            for_each_int(&tuple, |i, v| {
                let range = ranges[i].get_or_insert((v, v));
                range.0 = range.0.min(v);
                range.1 = range.1.max(v);
            });
        }

        let mut histograms: Vec<Option<IntHistogram>> = int_columns
            .iter()
            .zip(&ranges)
            .map(|(&is_int, range)| {
                is_int.then(|| {
                    let (min, max) = range.unwrap_or((0, 0));
                    IntHistogram::new(NUM_HIST_BINS, min, max)
                })
            })
            .collect();
        iter.rewind();
        while let Some(tuple) = iter.next(bufmgr)? {
            for_each_int(&tuple, |i, v| {
                if let Some(histogram) = histograms[i].as_mut() {
                    histogram.add_value(v);
                }
            });
        }

        let num_pages = heap.page_count();
        debug!(table = heap.name(), tuples = num_tuples, pages = num_pages, "table stats computed");
        Ok(Self {
            num_tuples,
            num_pages,
            io_cost_per_page,
            histograms,
        })
    }

    /// Cost of reading every page of the table.
    pub fn estimate_scan_cost(&self) -> f64 {
        self.num_pages as f64 * self.io_cost_per_page
    }

    pub fn estimate_table_cardinality(&self, selectivity: f64) -> usize {
        (self.num_tuples as f64 * selectivity) as usize
    }

    /// Strings get no histogram and are estimated as matching everything.
    pub fn estimate_selectivity(&self, field: usize, op: Op, constant: &Field) -> f64 {
        match (self.histograms.get(field), constant) {
            (Some(Some(histogram)), Field::Int(v)) => histogram.estimate_selectivity(op, *v),
            _ => 1.0,
        }
    }

    pub fn num_tuples(&self) -> usize {
        self.num_tuples
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }
}

fn for_each_int(tuple: &Tuple, mut f: impl FnMut(usize, i32)) {
    for (i, field) in tuple.fields().iter().enumerate() {
        if let Field::Int(v) = field {
            f(i, *v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn one_to_ten() -> IntHistogram {
        let mut histogram = IntHistogram::new(10, 1, 10);
        for v in 1..=10 {
            histogram.add_value(v);
        }
        histogram
    }

    #[test]
    fn unit_buckets_are_exact() {
        let histogram = one_to_ten();
        assert!(close(histogram.estimate_selectivity(Op::Equals, 3), 0.1));
        assert!(close(histogram.estimate_selectivity(Op::NotEquals, 3), 0.9));
        assert!(close(histogram.estimate_selectivity(Op::GreaterThan, 5), 0.5));
        assert!(close(histogram.estimate_selectivity(Op::GreaterThanOrEq, 5), 0.6));
        assert!(close(histogram.estimate_selectivity(Op::LessThan, 5), 0.4));
        assert!(close(histogram.estimate_selectivity(Op::LessThanOrEq, 5), 0.5));
    }

    #[test]
    fn out_of_range_constants() {
        let histogram = one_to_ten();
        assert!(close(histogram.estimate_selectivity(Op::GreaterThan, -5), 1.0));
        assert!(close(histogram.estimate_selectivity(Op::GreaterThan, 10), 0.0));
        assert!(close(histogram.estimate_selectivity(Op::LessThan, 1), 0.0));
        assert!(close(histogram.estimate_selectivity(Op::LessThan, 50), 1.0));
        assert!(close(histogram.estimate_selectivity(Op::Equals, 11), 0.0));
        assert!(close(histogram.estimate_selectivity(Op::NotEquals, 11), 1.0));
    }

    #[test]
    fn wide_buckets_estimate_proportionally() {
        // 4 buckets of 25 values, 100 values spread evenly
        let mut histogram = IntHistogram::new(4, 0, 99);
        for v in 0..100 {
            histogram.add_value(v);
        }
        assert!(close(histogram.estimate_selectivity(Op::Equals, 10), 0.01));
        assert!(close(histogram.estimate_selectivity(Op::LessThan, 10), 0.10));
        assert!(close(histogram.estimate_selectivity(Op::GreaterThan, 89), 0.10));
        assert!(histogram.estimate_selectivity(Op::Equals, 10) <= 1.0);
    }

    #[test]
    fn empty_histogram_selects_nothing() {
        let histogram = IntHistogram::new(NUM_HIST_BINS, 0, 0);
        assert!(close(histogram.estimate_selectivity(Op::Equals, 0), 0.0));
    }
}
