//! Split and merge.
//!
//! Both walks are recursive and bounded by the number of levels.

use log::trace;

use crate::error::Result;
use crate::free_list::{FreeListOrder, FreeLists};
use crate::tree::{BlockState, BlockTree, buddy_of, children_of, level_of_block, parent_of};

#[derive(Clone, Debug)]
pub(crate) struct Engine {
  pub(crate) tree: BlockTree,
  pub(crate) free: FreeLists,
  pub(crate) splits: u64,
  pub(crate) merges: u64,
  pub(crate) logging: bool,
}

impl Engine {
  /// A tree whose root is the single free block. Fails only if the metadata cannot be allocated.
  pub(crate) fn new(arena_size: usize, levels: usize, order: FreeListOrder) -> Result<Self> {
    let tree = BlockTree::new(arena_size, levels)?;
    let free = FreeLists::new(levels, tree.len(), order)?;
    let mut engine = Self {
      tree,
      free,
      splits: 0,
      merges: 0,
      logging: true,
    };
    engine.tree.set_state(0, BlockState::Free);
    engine.free.push_free(0, 0);
    Ok(engine)
  }

  /// Makes sure `level` has a free block, splitting ancestors as needed. Returns `false` when no
  /// level between the root and `level` had anything to split; nothing was modified in that case.
  fn split(&mut self, level: usize) -> bool {
    if !self.free.is_empty(level) {
      return true;
    }
    if level == 0 || !self.split(level - 1) {
      return false;
    }

    let Some(parent) = self.free.pop_free(level - 1) else {
      return false;
    };
    self.tree.set_state(parent, BlockState::Split);

    let (left, right) = children_of(parent);
    self.tree.set_state(left, BlockState::Free);
    self.tree.set_state(right, BlockState::Free);
    self.free.push_free(level, left);
    self.free.push_free(level, right);

    self.splits += 1;
    if self.logging {
      trace!("split block {parent} into {left} and {right}");
    }
    true
  }

  /// Takes a free block on `level`, or `None` when the arena has no room for one.
  pub(crate) fn allocate(&mut self, level: usize) -> Option<usize> {
    if !self.split(level) {
      return None;
    }
    let index = self.free.pop_free(level)?;
    self.tree.set_state(index, BlockState::Allocated);
    Some(index)
  }

  /// Returns an allocated block and coalesces it as far up as possible. Returns the index of the
  /// free block the memory ended up in.
  ///
  /// Panics if `index` is not an allocated block.
  pub(crate) fn free(&mut self, index: usize) -> usize {
    assert!(
      self.tree.contains(index),
      "free of block {index}: handle outside a tree of {} blocks",
      self.tree.len()
    );
    let state = self.tree.state(index);
    assert!(
      state == BlockState::Allocated,
      "free of block {index}: expected Allocated, found {state:?}"
    );

    self.tree.set_state(index, BlockState::Free);
    self.free.push_free(level_of_block(index), index);
    self.merge(index)
  }

  fn merge(&mut self, index: usize) -> usize {
    if index == 0 {
      return index;
    }

    let buddy = buddy_of(index);
    if self.tree.state(buddy) != BlockState::Free {
      return index;
    }

    let level = level_of_block(index);
    self.free.remove_free(level, index);
    self.free.remove_free(level, buddy);
    self.tree.set_state(index, BlockState::Unused);
    self.tree.set_state(buddy, BlockState::Unused);

    let parent = parent_of(index);
    self.tree.set_state(parent, BlockState::Free);
    self.free.push_free(level - 1, parent);

    self.merges += 1;
    if self.logging {
      trace!("merged block {index} with buddy {buddy} into {parent}");
    }
    self.merge(parent)
  }
}
