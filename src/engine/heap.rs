//! Heap block bookkeeping
//!
//! The engine never sees heap contents, only the tracer's `heap_alloc`,
//! `heap_free` and `heap_write` events. This registry remembers which blocks
//! are live so that steps can say whether a free was valid and which block a
//! write landed in, and so that a pointer aliased to a heap address can be
//! marked heap-backed.
//!
//! Freed blocks are kept as tombstones until the allocator hands the same
//! address out again, which makes double frees detectable.

use crate::event::Address;
use rustc_hash::FxHashMap;
use tracing::debug;

/// State of a heap block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Allocated,
    Tombstone, // Freed, kept until the address is reused
}

/// A block reported by the tracer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapBlock {
    pub size: u64,
    pub state: BlockState,
}

/// Outcome of a `heap_free`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    Freed { size: u64 },
    DoubleFree { size: u64 },
    Unknown,
}

/// Live and freed heap blocks for one session
#[derive(Debug, Clone, Default)]
pub struct HeapRegistry {
    blocks: FxHashMap<Address, HeapBlock>,
}

impl HeapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation
    pub fn allocate(&mut self, address: Address, size: u64) {
        let previous = self.blocks.insert(
            address,
            HeapBlock {
                size,
                state: BlockState::Allocated,
            },
        );
        if previous.is_some_and(|block| block.state == BlockState::Allocated) {
            // The free for the old block was never traced
            debug!("heap block 0x{:x} reallocated without a free", address);
        }
    }

    /// Record a free (mark as tombstone)
    pub fn free(&mut self, address: Address) -> FreeOutcome {
        match self.blocks.get_mut(&address) {
            Some(block) if block.state == BlockState::Allocated => {
                block.state = BlockState::Tombstone;
                FreeOutcome::Freed { size: block.size }
            }
            Some(block) => FreeOutcome::DoubleFree { size: block.size },
            None => FreeOutcome::Unknown,
        }
    }

    /// Find the live block containing `address`: (block base, offset)
    pub fn containing_block(&self, address: Address) -> Option<(Address, u64)> {
        self.blocks
            .iter()
            .filter(|(_, block)| block.state == BlockState::Allocated)
            .find(|(&base, block)| address >= base && address - base < block.size.max(1))
            .map(|(&base, _)| (base, address - base))
    }

    /// Whether `address` falls inside a live block
    pub fn is_live(&self, address: Address) -> bool {
        self.containing_block(address).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_outcomes() {
        let mut heap = HeapRegistry::new();
        heap.allocate(0x1000, 16);
        assert!(heap.is_live(0x1000));

        assert_eq!(heap.free(0x1000), FreeOutcome::Freed { size: 16 });
        assert_eq!(heap.free(0x1000), FreeOutcome::DoubleFree { size: 16 });
        assert_eq!(heap.free(0x2000), FreeOutcome::Unknown);
        assert!(!heap.is_live(0x1000));
    }

    #[test]
    fn test_containing_block() {
        let mut heap = HeapRegistry::new();
        heap.allocate(0x1000, 8);
        heap.allocate(0x2000, 4);

        assert_eq!(heap.containing_block(0x1004), Some((0x1000, 4)));
        assert_eq!(heap.containing_block(0x2000), Some((0x2000, 0)));
        assert_eq!(heap.containing_block(0x1008), None);

        heap.free(0x2000);
        assert!(!heap.is_live(0x2000));
        assert!(heap.is_live(0x1000));
    }

    #[test]
    fn test_block_at_top_of_address_space() {
        let mut heap = HeapRegistry::new();
        heap.allocate(0xffff_ffff_ffff_fff0, 32);

        assert_eq!(
            heap.containing_block(0xffff_ffff_ffff_fff8),
            Some((0xffff_ffff_ffff_fff0, 8))
        );
        assert!(heap.is_live(u64::MAX));
    }

    #[test]
    fn test_address_reuse_after_free() {
        let mut heap = HeapRegistry::new();
        heap.allocate(0x1000, 8);
        heap.free(0x1000);
        heap.allocate(0x1000, 32);
        assert_eq!(heap.free(0x1000), FreeOutcome::Freed { size: 32 });
    }
}
