//! Implicit complete binary tree over the arena.
//!
//! Node `0` is the whole arena. Node `i` has children `2i + 1` and `2i + 2`, so a node's level,
//! size and offset all follow from its index and no links are stored. Each level halves the block
//! size of the level above it.
//!
//! ```text
//! level 0: [               0               ]  S
//! level 1: [       1       |       2       ]  S/2
//! level 2: [   3   |   4   |   5   |   6   ]  S/4
//! ```

use crate::error::{BuddyError, Result};

/// State of a single tree node.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BlockState {
  /// Not part of the current partition: some ancestor is free or allocated.
  #[default]
  Unused = 0,
  /// Available, and listed in its level's free list.
  Free = 1,
  /// Subdivided; both children are in use.
  Split = 2,
  /// Handed out to a caller.
  Allocated = 3,
}

impl BlockState {
  #[inline]
  pub const fn is_used(self) -> bool {
    !matches!(self, Self::Unused)
  }

  /// `Free` and `Allocated` nodes are the leaves of the current partition.
  #[inline]
  pub const fn is_leaf(self) -> bool {
    matches!(self, Self::Free | Self::Allocated)
  }

  pub(crate) const fn glyph(self) -> char {
    match self {
      Self::Unused => ' ',
      Self::Free => '.',
      Self::Split => '/',
      Self::Allocated => '#',
    }
  }
}

// =============================================================================
// Index arithmetic
// =============================================================================

/// `floor(log2(index + 1))`.
#[inline]
pub fn level_of_block(index: usize) -> usize {
  (usize::BITS - 1 - (index + 1).leading_zeros()) as usize
}

/// Index of the first node on `level`.
#[inline]
pub fn first_index_of_level(level: usize) -> usize {
  (1 << level) - 1
}

#[inline]
pub fn children_of(index: usize) -> (usize, usize) {
  (2 * index + 1, 2 * index + 2)
}

/// Panics in debug builds for the root.
#[inline]
pub fn parent_of(index: usize) -> usize {
  debug_assert!(index != 0, "the root block has no parent");
  (index - 1) / 2
}

/// The sibling that, together with `index`, makes up their parent. Panics in debug builds for the
/// root.
#[inline]
pub fn buddy_of(index: usize) -> usize {
  debug_assert!(index != 0, "the root block has no buddy");
  if index % 2 == 0 { index - 1 } else { index + 1 }
}

/// `len` copies of `value`, or `MetadataAlloc` if the vector cannot be allocated.
pub(crate) fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>> {
  let mut vec = Vec::new();
  vec
    .try_reserve_exact(len)
    .map_err(|source| BuddyError::MetadataAlloc { blocks: len, source })?;
  vec.resize(len, value);
  Ok(vec)
}

// =============================================================================
// Block tree
// =============================================================================

/// Authoritative state of every block in the arena.
#[derive(Clone, Debug)]
pub struct BlockTree {
  arena_size: usize,
  levels: usize,
  states: Vec<BlockState>,
}

impl BlockTree {
  /// Creates a tree with every node `Unused`. `arena_size` must be a power of two and
  /// `arena_size >> (levels - 1)` must be at least one byte; [`crate::BuddyConfig`] checks both.
  ///
  /// Fails only if the state vector cannot be allocated.
  pub fn new(arena_size: usize, levels: usize) -> Result<Self> {
    debug_assert!(arena_size.is_power_of_two());
    debug_assert!(levels >= 1 && levels < usize::BITS as usize);
    debug_assert!((arena_size >> (levels - 1)) >= 1);
    Ok(Self {
      arena_size,
      levels,
      states: try_filled(first_index_of_level(levels), BlockState::Unused)?,
    })
  }

  #[inline]
  pub fn arena_size(&self) -> usize {
    self.arena_size
  }

  #[inline]
  pub fn levels(&self) -> usize {
    self.levels
  }

  /// Number of nodes, `2^levels - 1`.
  #[inline]
  pub fn len(&self) -> usize {
    self.states.len()
  }

  #[inline]
  pub fn contains(&self, index: usize) -> bool {
    index < self.states.len()
  }

  #[inline]
  pub fn min_block_size(&self) -> usize {
    self.size_of_level(self.levels - 1)
  }

  #[inline]
  pub fn size_of_level(&self, level: usize) -> usize {
    debug_assert!(level < self.levels, "level {level} out of range");
    self.arena_size >> level
  }

  /// Level whose blocks are exactly `size` bytes.
  pub fn level_of_size(&self, size: usize) -> Result<usize> {
    if !size.is_power_of_two() || size > self.arena_size || size < self.min_block_size() {
      return Err(BuddyError::InvalidSize { size });
    }
    Ok((self.arena_size / size).trailing_zeros() as usize)
  }

  #[inline]
  pub fn size_of_block(&self, index: usize) -> usize {
    self.size_of_level(level_of_block(index))
  }

  #[inline]
  pub fn offset_of(&self, index: usize) -> usize {
    let level = level_of_block(index);
    (index - first_index_of_level(level)) * self.size_of_level(level)
  }

  /// `true` when `index` has children, i.e. it is above the smallest block level.
  #[inline]
  pub fn has_children(&self, index: usize) -> bool {
    level_of_block(index) + 1 < self.levels
  }

  #[inline]
  pub fn state(&self, index: usize) -> BlockState {
    self.states[index]
  }

  #[inline]
  pub fn set_state(&mut self, index: usize, state: BlockState) {
    self.states[index] = state;
  }

  #[inline]
  pub fn states(&self) -> &[BlockState] {
    &self.states
  }

  /// Finds the allocated block that starts at `offset` by descending through split nodes.
  pub fn block_at(&self, offset: usize) -> Option<usize> {
    if offset >= self.arena_size {
      return None;
    }

    let mut index = 0;
    loop {
      match self.states[index] {
        BlockState::Allocated if self.offset_of(index) == offset => return Some(index),
        BlockState::Split => {
          let (left, right) = children_of(index);
          let half = self.size_of_block(left);
          index = if offset - self.offset_of(index) < half { left } else { right };
        }
        _ => return None,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn levels_of_blocks() {
    assert_eq!(level_of_block(0), 0);
    assert_eq!(level_of_block(1), 1);
    assert_eq!(level_of_block(2), 1);
    assert_eq!(level_of_block(3), 2);
    assert_eq!(level_of_block(6), 2);
    assert_eq!(level_of_block(7), 3);
    assert_eq!(level_of_block(30), 4);
  }

  #[test]
  fn family() {
    assert_eq!(children_of(0), (1, 2));
    assert_eq!(children_of(2), (5, 6));
    assert_eq!(parent_of(5), 2);
    assert_eq!(parent_of(6), 2);
    assert_eq!(buddy_of(5), 6);
    assert_eq!(buddy_of(6), 5);
    for index in 1..63 {
      assert_eq!(buddy_of(buddy_of(index)), index);
      assert_eq!(parent_of(index), parent_of(buddy_of(index)));
    }
  }

  #[test]
  #[cfg(debug_assertions)]
  #[should_panic(expected = "no buddy")]
  fn root_has_no_buddy() {
    buddy_of(0);
  }

  #[test]
  fn sizes_and_offsets() {
    let tree = BlockTree::new(128, 5).unwrap();
    assert_eq!(tree.len(), 31);
    assert_eq!(tree.min_block_size(), 8);
    assert_eq!(tree.size_of_level(0), 128);
    assert_eq!(tree.size_of_level(2), 32);
    assert_eq!(tree.offset_of(0), 0);
    assert_eq!(tree.offset_of(2), 64);
    assert_eq!(tree.offset_of(5), 64);
    assert_eq!(tree.offset_of(6), 96);
    assert_eq!(tree.offset_of(30), 120);
    assert_eq!(tree.size_of_block(30), 8);
    assert!(tree.has_children(14));
    assert!(!tree.has_children(15));
  }

  #[test]
  #[cfg(target_pointer_width = "64")]
  fn unallocatable_tree_is_an_error() {
    let err = BlockTree::new(1 << 62, 63).unwrap_err();
    assert!(matches!(err, BuddyError::MetadataAlloc { blocks, .. } if blocks == (1 << 63) - 1));
  }

  #[test]
  fn level_of_size() {
    let tree = BlockTree::new(128, 5).unwrap();
    assert_eq!(tree.level_of_size(128).unwrap(), 0);
    assert_eq!(tree.level_of_size(32).unwrap(), 2);
    assert_eq!(tree.level_of_size(8).unwrap(), 4);
    for size in [0, 4, 24, 256] {
      assert!(matches!(
        tree.level_of_size(size),
        Err(BuddyError::InvalidSize { size: s }) if s == size
      ));
    }
  }

  #[test]
  fn block_at_follows_splits() {
    let mut tree = BlockTree::new(128, 5).unwrap();
    tree.set_state(0, BlockState::Split);
    tree.set_state(1, BlockState::Allocated);
    tree.set_state(2, BlockState::Split);
    tree.set_state(5, BlockState::Free);
    tree.set_state(6, BlockState::Allocated);

    assert_eq!(tree.block_at(0), Some(1));
    assert_eq!(tree.block_at(96), Some(6));
    assert_eq!(tree.block_at(64), None); // free
    assert_eq!(tree.block_at(8), None); // inside block 1, not its start
    assert_eq!(tree.block_at(128), None);
  }
}
