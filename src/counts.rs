// Sparse region-by-gene count matrix. Entries absent from the map are zero;
// aggregation is a single-threaded fold over assignment results, so no
// locking or sharding is needed here.

use num_traits::Zero;
use std::collections::BTreeMap;
use std::ops::AddAssign;

pub struct CountMatrix<T> {
    counts: BTreeMap<(u32, u32), T>,
}

impl<T> CountMatrix<T>
where
    T: Zero + AddAssign + Copy,
{
    pub fn zeros() -> Self {
        CountMatrix {
            counts: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, region: u32, gene: u32, delta: T) {
        let count = self.counts.entry((region, gene)).or_insert(T::zero());
        *count += delta;
    }

    pub fn get(&self, region: u32, gene: u32) -> T {
        self.counts
            .get(&(region, gene))
            .copied()
            .unwrap_or(T::zero())
    }

    pub fn nnz(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Nonzero entries in (region, gene) order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, T)> + '_ {
        self.counts.iter().map(|(&(i, j), &v)| (i, j, v))
    }

    /// Region indices with at least one nonzero entry, ascending.
    pub fn regions(&self) -> Vec<u32> {
        let mut regions: Vec<u32> = self.counts.keys().map(|&(i, _)| i).collect();
        regions.dedup();
        regions
    }
}

/// Partition by the control-category naming convention: genes whose name
/// carries the prefix land in the secondary matrix, everything else in the
/// primary. Both keep the caller's region indexing.
pub fn split_by_prefix<T>(
    counts: CountMatrix<T>,
    gene_names: &[String],
    blank_prefix: &str,
) -> (CountMatrix<T>, CountMatrix<T>)
where
    T: Zero + AddAssign + Copy,
{
    let mut primary = CountMatrix::zeros();
    let mut blanks = CountMatrix::zeros();
    for (region, gene, count) in counts.iter() {
        if gene_names[gene as usize].starts_with(blank_prefix) {
            blanks.add(region, gene, count);
        } else {
            primary.add(region, gene, count);
        }
    }
    (primary, blanks)
}
