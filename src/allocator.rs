//! Handle-level façade over the tree, free lists and split/merge engine.
//!
//! [`BuddyAllocator`] only does bookkeeping: it hands out [`BlockHandle`]s and the byte range each
//! one covers. [`crate::BuddyArena`] pairs it with real memory.

use core::fmt;
use core::ops::Range;

use log::{debug, trace};

use crate::config::BuddyConfig;
use crate::engine::Engine;
use crate::error::{BuddyError, Result};
use crate::free_list::FreeListOrder;
use crate::stats::BuddyStats;
use crate::tree::{BlockState, buddy_of, children_of, first_index_of_level, level_of_block, parent_of};

/// Identifies an allocated block until it is freed. Wraps the block's tree index.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockHandle(usize);

impl BlockHandle {
  /// Rebuilds a handle from [`BlockHandle::index`]. Freeing a handle that does not name an
  /// allocated block panics.
  #[inline]
  pub const fn from_index(index: usize) -> Self {
    Self(index)
  }

  #[inline]
  pub const fn index(self) -> usize {
    self.0
  }

  #[inline]
  pub fn level(self) -> usize {
    level_of_block(self.0)
  }
}

/// Copy of the tree and free-list state, for tests and visualisers.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
  /// State of every node, indexed by tree index.
  pub states: Vec<BlockState>,
  /// Free block indices per level, in pop order.
  pub free_lists: Vec<Vec<usize>>,
}

impl Snapshot {
  /// Sorts every free list so snapshots compare equal regardless of list order.
  pub fn normalized(mut self) -> Self {
    for list in &mut self.free_lists {
      list.sort_unstable();
    }
    self
  }
}

/// A binary buddy allocator over `arena_size` bytes of address space.
#[derive(Clone, Debug)]
pub struct BuddyAllocator {
  config: BuddyConfig,
  engine: Engine,
  stats: BuddyStats,
}

impl BuddyAllocator {
  /// Creates an allocator whose whole arena is one free block.
  pub fn new(config: BuddyConfig) -> Result<Self> {
    let levels = config.levels()?;
    let mut engine = Engine::new(config.arena_size, levels, config.free_list_order)?;
    engine.logging = config.logging;
    if config.logging {
      debug!(
        "buddy arena: {} bytes, {} levels, smallest block {} bytes, {:?} free lists",
        config.arena_size, levels, config.min_block_size, config.free_list_order
      );
    }
    Ok(Self {
      engine,
      stats: BuddyStats::with_total(config.arena_size),
      config,
    })
  }

  /// Shorthand for [`BuddyAllocator::new`] with FIFO free lists.
  pub fn init(arena_size: usize, min_block_size: usize) -> Result<Self> {
    Self::new(BuddyConfig::new(arena_size, min_block_size))
  }

  #[inline]
  pub fn config(&self) -> &BuddyConfig {
    &self.config
  }

  #[inline]
  pub fn arena_size(&self) -> usize {
    self.config.arena_size
  }

  #[inline]
  pub fn min_block_size(&self) -> usize {
    self.config.min_block_size
  }

  #[inline]
  pub fn levels(&self) -> usize {
    self.engine.tree.levels()
  }

  #[inline]
  pub fn free_list_order(&self) -> FreeListOrder {
    self.engine.free.order()
  }

  /// Block size a request of `requested` bytes is served with.
  ///
  /// Zero-byte requests are `InvalidSize`; requests beyond the arena are `OutOfMemory` right away.
  pub fn block_size_for(&self, requested: usize) -> Result<usize> {
    if requested == 0 {
      return Err(BuddyError::InvalidSize { size: 0 });
    }
    if requested > self.arena_size() {
      return Err(BuddyError::OutOfMemory { requested });
    }
    Ok(requested.next_power_of_two().max(self.min_block_size()))
  }

  /// Allocates a block of at least `requested` bytes.
  pub fn allocate(&mut self, requested: usize) -> Result<BlockHandle> {
    let size = match self.block_size_for(requested) {
      Ok(size) => size,
      Err(err) => {
        if err.is_out_of_memory() {
          self.stats.failures += 1;
          if self.config.logging {
            debug!("allocation of {requested} bytes exceeds the arena");
          }
        }
        return Err(err);
      }
    };
    let level = self.engine.tree.level_of_size(size)?;
    self.allocate_level(level, requested)
  }

  /// Allocates a block of exactly `size` bytes. `size` must be a power of two between the minimum
  /// block size and the arena size.
  pub fn allocate_block(&mut self, size: usize) -> Result<BlockHandle> {
    let level = self.engine.tree.level_of_size(size)?;
    self.allocate_level(level, size)
  }

  fn allocate_level(&mut self, level: usize, requested: usize) -> Result<BlockHandle> {
    let splits = self.engine.splits;
    let Some(index) = self.engine.allocate(level) else {
      self.stats.failures += 1;
      if self.config.logging {
        debug!(
          "out of memory: {requested} bytes requested, {} of {} bytes free",
          self.stats.free(),
          self.stats.total
        );
      }
      return Err(BuddyError::OutOfMemory { requested });
    };

    let size = self.engine.tree.size_of_level(level);
    self.stats.allocations += 1;
    self.stats.allocated += size;
    self.stats.splits = self.engine.splits;
    if self.config.logging {
      trace!(
        "allocated block {index} ({size} bytes at {}) after {} splits",
        self.engine.tree.offset_of(index),
        self.engine.splits - splits
      );
    }

    #[cfg(feature = "debug-tripwire")]
    self.assert_invariants();

    Ok(BlockHandle(index))
  }

  /// Returns a block to the arena, merging it with its buddy as far up the tree as possible.
  ///
  /// # Panics
  ///
  /// If `handle` does not name a currently allocated block (double free, a handle from another
  /// arena, a forged index).
  pub fn free(&mut self, handle: BlockHandle) {
    self.release(handle);
  }

  /// [`BuddyAllocator::free`], returning the tree index of the free block the memory coalesced into.
  pub(crate) fn release(&mut self, handle: BlockHandle) -> usize {
    let index = handle.index();
    let coalesced = self.engine.free(index);

    self.stats.deallocations += 1;
    self.stats.allocated -= self.engine.tree.size_of_block(index);
    self.stats.merges = self.engine.merges;
    if self.config.logging {
      trace!("freed block {index}, coalesced into {coalesced}");
    }

    #[cfg(feature = "debug-tripwire")]
    self.assert_invariants();

    coalesced
  }

  /// `(offset, size)` of a block within the arena.
  #[inline]
  pub fn block_address(&self, handle: BlockHandle) -> (usize, usize) {
    let index = handle.index();
    (self.engine.tree.offset_of(index), self.engine.tree.size_of_block(index))
  }

  #[inline]
  pub fn block_range(&self, handle: BlockHandle) -> Range<usize> {
    let (offset, size) = self.block_address(handle);
    offset..offset + size
  }

  /// Handle of the allocated block starting at `offset`, if there is one.
  pub fn handle_at(&self, offset: usize) -> Option<BlockHandle> {
    self.engine.tree.block_at(offset).map(BlockHandle)
  }

  /// Tree index range of all blocks.
  #[inline]
  pub fn block_count(&self) -> usize {
    self.engine.tree.len()
  }

  #[inline]
  pub fn state(&self, index: usize) -> BlockState {
    self.engine.tree.state(index)
  }

  pub fn free_list(&self, level: usize) -> impl Iterator<Item = usize> + '_ {
    self.engine.free.iter(level)
  }

  /// Size of the largest block that can be allocated without freeing anything.
  pub fn largest_free_block(&self) -> Option<usize> {
    (0..self.levels())
      .find(|&level| !self.engine.free.is_empty(level))
      .map(|level| self.engine.tree.size_of_level(level))
  }

  #[inline]
  pub fn stats(&self) -> &BuddyStats {
    &self.stats
  }

  pub fn snapshot(&self) -> Snapshot {
    Snapshot {
      states: self.engine.tree.states().to_vec(),
      free_lists: self.engine.free.snapshot(),
    }
  }

  /// Checks the tree against the free lists and the arena bounds.
  ///
  /// # Panics
  ///
  /// On the first inconsistency, naming the block involved:
  /// - a split node without two used children, or a leaf with used children
  /// - a used node under a parent that is not split
  /// - a free block missing from its free list, or listed on the wrong level or twice
  /// - two free buddies that were not merged
  /// - free and allocated blocks that do not tile `[0, arena_size)` exactly
  pub fn assert_invariants(&self) {
    let tree = &self.engine.tree;
    let free = &self.engine.free;

    assert!(tree.state(0).is_used(), "root block is unused");

    let mut leaves = Vec::new();
    let mut free_blocks = 0;
    for index in 0..tree.len() {
      let state = tree.state(index);
      if !state.is_used() {
        continue;
      }
      if index != 0 {
        let parent = tree.state(parent_of(index));
        assert!(
          parent == BlockState::Split,
          "block {index} is {state:?} under a {parent:?} parent"
        );
      }

      let children = tree.has_children(index).then(|| children_of(index));
      match state {
        BlockState::Split => {
          let (left, right) = children
            .unwrap_or_else(|| panic!("block {index} is split but has no children"));
          assert!(
            tree.state(left).is_used() && tree.state(right).is_used(),
            "split block {index} has children {:?} and {:?}",
            tree.state(left),
            tree.state(right)
          );
        }
        BlockState::Free | BlockState::Allocated => {
          if let Some((left, right)) = children {
            assert!(
              !tree.state(left).is_used() && !tree.state(right).is_used(),
              "{state:?} block {index} has used children"
            );
          }
          leaves.push(index);
        }
        BlockState::Unused => unreachable!(),
      }

      if state == BlockState::Free {
        free_blocks += 1;
        let level = level_of_block(index);
        let listed = free.iter(level).filter(|&i| i == index).count();
        assert!(
          listed == 1,
          "free block {index} appears {listed} times on free list {level}"
        );
        if index != 0 {
          let buddy = buddy_of(index);
          assert!(
            tree.state(buddy) != BlockState::Free,
            "free buddies {index} and {buddy} were not merged"
          );
        }
      }
    }
    assert!(
      free.total_len() == free_blocks,
      "free lists hold {} entries for {free_blocks} free blocks",
      free.total_len()
    );

    let mut ranges: Vec<_> = leaves
      .iter()
      .map(|&index| {
        let offset = tree.offset_of(index);
        (offset, offset + tree.size_of_block(index), index)
      })
      .collect();
    ranges.sort_unstable();
    let mut end = 0;
    for (start, stop, index) in ranges {
      assert!(
        start == end,
        "block {index} starts at {start}, previous block ends at {end}"
      );
      end = stop;
    }
    assert!(
      end == tree.arena_size(),
      "blocks cover {end} of {} bytes",
      tree.arena_size()
    );
  }
}

/// One line per level listing the used blocks: `.` free, `#` allocated, `/` split.
impl fmt::Display for BuddyAllocator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let tree = &self.engine.tree;
    for level in 0..tree.levels() {
      write!(f, "{level:>2} {:>8}B |", tree.size_of_level(level))?;
      let first = first_index_of_level(level);
      for index in first..first_index_of_level(level + 1) {
        let state = tree.state(index);
        if state.is_used() {
          write!(f, " {}{index}", state.glyph())?;
        }
      }
      writeln!(f)?;
    }
    Ok(())
  }
}
