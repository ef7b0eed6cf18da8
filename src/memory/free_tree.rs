//! Block bookkeeping shared by the pool allocators
//!
//! Free blocks are kept in a tree ordered by size so a request is served by
//! the smallest cached block that fits (best fit). Blocks are whole upstream
//! allocations; they are never split or merged.

use std::collections::{BTreeMap, HashMap};

use crate::memory::PoolStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    pub addr: usize,
    pub size: usize,
    pub alignment: usize,
}

#[derive(Debug, Clone, Copy)]
struct FreeBlock {
    addr: usize,
    alignment: usize,
}

#[derive(Debug, Default)]
pub(crate) struct FreeTree {
    free: BTreeMap<usize, Vec<FreeBlock>>,
    live: HashMap<usize, Block>,
    free_bytes: usize,
    reserved_bytes: usize,
    upstream_allocations: usize,
}

impl FreeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the smallest cached block of at least `size` bytes whose address
    /// satisfies `alignment`, marking it live
    pub fn take(&mut self, size: usize, alignment: usize) -> Option<Block> {
        let mut found = None;
        for (&block_size, blocks) in self.free.range_mut(size..) {
            if let Some(pos) = blocks.iter().position(|b| b.addr % alignment == 0) {
                found = Some((block_size, blocks.swap_remove(pos)));
                break;
            }
        }
        let (size, free) = found?;
        if self.free.get(&size).map_or(false, Vec::is_empty) {
            self.free.remove(&size);
        }

        let block = Block {
            addr: free.addr,
            size,
            alignment: free.alignment,
        };
        self.free_bytes -= size;
        self.live.insert(block.addr, block);
        Some(block)
    }

    /// Record a block freshly obtained from the upstream as live
    pub fn insert_new(&mut self, block: Block) {
        self.reserved_bytes += block.size;
        self.upstream_allocations += 1;
        self.live.insert(block.addr, block);
    }

    /// Move a live block to the free tree. Returns `None` if `addr` is not live.
    pub fn give_back(&mut self, addr: usize) -> Option<Block> {
        let block = self.live.remove(&addr)?;
        self.free.entry(block.size).or_default().push(FreeBlock {
            addr: block.addr,
            alignment: block.alignment,
        });
        self.free_bytes += block.size;
        Some(block)
    }

    /// Remove every cached block; the caller returns them upstream
    pub fn drain_free(&mut self) -> Vec<Block> {
        let drained: Vec<Block> = std::mem::take(&mut self.free)
            .into_iter()
            .flat_map(|(size, blocks)| {
                blocks.into_iter().map(move |b| Block {
                    addr: b.addr,
                    size,
                    alignment: b.alignment,
                })
            })
            .collect();
        let bytes: usize = drained.iter().map(|b| b.size).sum();
        self.free_bytes -= bytes;
        self.reserved_bytes -= bytes;
        drained
    }

    /// Remove every block, cached or live
    pub fn drain_all(&mut self) -> Vec<Block> {
        let mut blocks = self.drain_free();
        let live: Vec<Block> = self.live.drain().map(|(_, b)| b).collect();
        self.reserved_bytes -= live.iter().map(|b| b.size).sum::<usize>();
        blocks.extend(live);
        blocks
    }

    pub fn live_blocks(&self) -> usize {
        self.live.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            reserved_bytes: self.reserved_bytes,
            free_bytes: self.free_bytes,
            live_blocks: self.live.len(),
            upstream_allocations: self.upstream_allocations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(addr: usize, size: usize) -> Block {
        Block {
            addr,
            size,
            alignment: 256,
        }
    }

    #[test]
    fn test_best_fit() {
        let mut tree = FreeTree::new();
        for b in [block(0x1000, 1024), block(0x4000, 512), block(0x8000, 4096)] {
            tree.insert_new(b);
            tree.give_back(b.addr).unwrap();
        }

        let taken = tree.take(600, 256).unwrap();
        assert_eq!(taken.addr, 0x1000);
        assert_eq!(taken.size, 1024);
        assert!(tree.take(8192, 256).is_none());
    }

    #[test]
    fn test_take_respects_alignment() {
        let mut tree = FreeTree::new();
        tree.insert_new(block(0x1100, 512));
        tree.give_back(0x1100).unwrap();

        assert!(tree.take(256, 0x1000).is_none());
        assert!(tree.take(256, 256).is_some());
    }

    #[test]
    fn test_stats_follow_transitions() {
        let mut tree = FreeTree::new();
        tree.insert_new(block(0x1000, 1024));
        assert_eq!(tree.stats().reserved_bytes, 1024);
        assert_eq!(tree.stats().live_blocks, 1);

        tree.give_back(0x1000).unwrap();
        assert_eq!(tree.stats().free_bytes, 1024);
        assert_eq!(tree.stats().live_blocks, 0);

        let drained = tree.drain_free();
        assert_eq!(drained.len(), 1);
        assert_eq!(tree.stats(), PoolStats {
            reserved_bytes: 0,
            free_bytes: 0,
            live_blocks: 0,
            upstream_allocations: 1,
        });
    }

    #[test]
    fn test_give_back_unknown_block() {
        let mut tree = FreeTree::new();
        assert!(tree.give_back(0xdead00).is_none());
    }

    #[test]
    fn test_drain_all_includes_live() {
        let mut tree = FreeTree::new();
        tree.insert_new(block(0x1000, 256));
        tree.insert_new(block(0x2000, 256));
        tree.give_back(0x1000).unwrap();

        assert_eq!(tree.drain_all().len(), 2);
        assert_eq!(tree.live_blocks(), 0);
        assert_eq!(tree.stats().reserved_bytes, 0);
    }
}
