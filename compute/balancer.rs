//! Partitioning of the block-pair space into per-thread work lists.

use itertools::{Either, Itertools};

/// An unordered pair of blocks, `from <= to`. Ordering is row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPair {
    pub from: usize,
    pub to: usize,
}

impl BlockPair {
    /// The same pair with `from <= to`.
    pub fn ordered(self) -> Self {
        Self {
            from: self.from.min(self.to),
            to: self.from.max(self.to),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pairs {
    /// A contiguous run of the row-major sequence `(0,0) (0,1) .. (0,n-1) (1,1) .. (n-1,n-1)`.
    RowMajor { first: BlockPair, n_blocks: usize },
    /// A slice of an explicit selection, already in row-major order.
    Listed(Vec<BlockPair>),
}

/// The block pairs one thread computes, in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkList {
    pairs: Pairs,
    len: usize,
}

impl WorkList {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = BlockPair> + '_ {
        let (first, n_blocks) = match &self.pairs {
            Pairs::RowMajor { first, n_blocks } => (*first, *n_blocks),
            Pairs::Listed(pairs) => return Either::Right(pairs.iter().copied()),
        };
        Either::Left(std::iter::successors(Some(first), move |pair| {
            if pair.to + 1 < n_blocks {
                Some(BlockPair {
                    from: pair.from,
                    to: pair.to + 1,
                })
            } else {
                Some(BlockPair {
                    from: pair.from + 1,
                    to: pair.from + 1,
                })
            }
        })
        .take(self.len))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    lists: Vec<WorkList>,
    total_pairs: usize,
}

impl LoadBalancer {
    /// Splits the `n_blocks * (n_blocks + 1) / 2` block pairs into `threads` contiguous lists
    /// whose sizes differ by at most one.
    pub fn build(n_blocks: usize, threads: usize) -> Self {
        let total_pairs = n_blocks * (n_blocks + 1) / 2;
        let mut start = 0;
        let lists = split(total_pairs, threads)
            .map(|len| {
                let list = WorkList {
                    pairs: Pairs::RowMajor {
                        first: pair_at(start, n_blocks),
                        n_blocks,
                    },
                    len,
                };
                start += len;
                list
            })
            .collect();
        Self { lists, total_pairs }
    }

    /// Splits an explicit selection of pairs the same way. Pairs are ordered, sorted
    /// row-major and deduplicated first.
    pub fn from_pairs(pairs: impl IntoIterator<Item = BlockPair>, threads: usize) -> Self {
        let pairs: Vec<BlockPair> = pairs
            .into_iter()
            .map(BlockPair::ordered)
            .sorted_unstable()
            .dedup()
            .collect();
        let total_pairs = pairs.len();
        let mut rest = pairs.into_iter();
        let lists = split(total_pairs, threads)
            .map(|len| WorkList {
                pairs: Pairs::Listed(rest.by_ref().take(len).collect()),
                len,
            })
            .collect();
        Self { lists, total_pairs }
    }

    /// Every pair among `blocks`, each block with itself included.
    pub fn from_blocks(blocks: &[usize], threads: usize) -> Self {
        let blocks: Vec<usize> = blocks.iter().copied().sorted_unstable().dedup().collect();
        let blocks = blocks.as_slice();
        let pairs = blocks.iter().enumerate().flat_map(move |(at, &from)| {
            blocks[at..].iter().map(move |&to| BlockPair { from, to })
        });
        Self::from_pairs(pairs, threads)
    }

    pub fn lists(&self) -> &[WorkList] {
        &self.lists
    }

    pub fn total_pairs(&self) -> usize {
        self.total_pairs
    }
}

/// List sizes for `threads` lists (at least one) that differ by at most one.
fn split(total: usize, threads: usize) -> impl Iterator<Item = usize> {
    let threads = threads.max(1);
    let base = total / threads;
    let extra = total % threads;
    (0..threads).map(move |thread| base + usize::from(thread < extra))
}

/// The `linear`-th pair in row-major order; past the end it returns `(n, n)`.
fn pair_at(mut linear: usize, n_blocks: usize) -> BlockPair {
    for from in 0..n_blocks {
        let row = n_blocks - from;
        if linear < row {
            return BlockPair {
                from,
                to: from + linear,
            };
        }
        linear -= row;
    }
    BlockPair {
        from: n_blocks,
        to: n_blocks,
    }
}
