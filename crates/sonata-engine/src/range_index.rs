//! Two-level compressed index from a node's local id to its edges.
//!
//! `node_id_to_ranges[n]` is a `[start, end)` slice of `range_to_edge_id`;
//! every entry of that slice is in turn a `[start, end)` run of raw edge
//! indices in the population.

use crate::error::{Result, Selection, StoreError};
use crate::view::View;
use std::ops::Range;

pub const NODE_TO_RANGES: &str = "node_id_to_ranges";
pub const RANGE_TO_EDGES: &str = "range_to_edge_id";

/// Read side of one `indices/*` group.
#[derive(Debug, Clone, Copy)]
pub struct RangeIndex<'a> {
    view: &'a View,
}

fn to_range(
    dataset: &str,
    row: usize,
    (start, end): (i32, i32),
    extent: usize,
) -> Result<Range<usize>> {
    let bad = |reason: String| StoreError::Decode {
        dataset: dataset.to_string(),
        selection: Selection::Index(row),
        reason,
    };
    if start < 0 || end < 0 {
        return Err(bad(format!("negative range [{}, {})", start, end)));
    }
    let (start, end) = (start as usize, end as usize);
    if start > end {
        return Err(bad(format!("inverted range [{}, {})", start, end)));
    }
    if end > extent {
        return Err(bad(format!("range [{}, {}) exceeds {} entries", start, end, extent)));
    }
    Ok(start..end)
}

impl<'a> RangeIndex<'a> {
    /// Wraps an index group; both tables must be present.
    pub fn new(view: &'a View) -> Result<Self> {
        for table in [NODE_TO_RANGES, RANGE_TO_EDGES] {
            if view.find_dataset(table).is_none() {
                return Err(StoreError::structural(format!(
                    "index group {} has no {} table",
                    view.group_ref().path(),
                    table
                )));
            }
        }
        Ok(Self { view })
    }

    /// Number of nodes the index covers.
    pub fn num_nodes(&self) -> usize {
        self.view.dataset_size(NODE_TO_RANGES).unwrap_or(0)
    }

    pub fn num_ranges(&self) -> usize {
        self.view.dataset_size(RANGE_TO_EDGES).unwrap_or(0)
    }

    fn path(&self, table: &str) -> String {
        format!("{}/{}", self.view.group_ref().path(), table)
    }

    /// Runs of raw edge indices belonging to node `local`, in stored order.
    pub fn edge_ranges(&self, local: u32) -> Result<Vec<Range<usize>>> {
        let local = local as usize;
        let pair: (i32, i32) = self.view.read_at(NODE_TO_RANGES, local)?;
        let ranges = to_range(&self.path(NODE_TO_RANGES), local, pair, self.num_ranges())?;
        if ranges.is_empty() {
            return Ok(Vec::new());
        }

        let pairs: Vec<(i32, i32)> =
            self.view
                .read_range(RANGE_TO_EDGES, ranges.start, ranges.end)?;
        // edge extents are checked by validate(); here only shape
        pairs
            .into_iter()
            .zip(ranges)
            .map(|(p, row)| to_range(&self.path(RANGE_TO_EDGES), row, p, usize::MAX))
            .collect()
    }

    /// Raw edge indices of node `local`, flattened.
    pub fn edges(&self, local: u32) -> Result<Vec<usize>> {
        Ok(self.edge_ranges(local)?.into_iter().flatten().collect())
    }

    /// Checks the whole index against a population of `num_edges` edges.
    pub fn validate(&self, num_edges: usize) -> Result<()> {
        let num_ranges = self.num_ranges();
        let node_table = self.path(NODE_TO_RANGES);
        for (row, pair) in self
            .view
            .read_all::<(i32, i32)>(NODE_TO_RANGES)?
            .into_iter()
            .enumerate()
        {
            to_range(&node_table, row, pair, num_ranges)?;
        }

        let range_table = self.path(RANGE_TO_EDGES);
        for (row, pair) in self
            .view
            .read_all::<(i32, i32)>(RANGE_TO_EDGES)?
            .into_iter()
            .enumerate()
        {
            to_range(&range_table, row, pair, num_edges)?;
        }
        Ok(())
    }
}
