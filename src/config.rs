use crate::error::{BuddyError, Result};
use crate::free_list::FreeListOrder;

/// Parameters of a buddy arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BuddyConfig {
  /// Total size of the arena in bytes. Must be a power of two.
  pub arena_size: usize,
  /// Size of the smallest block handed out. Must be a power of two dividing `arena_size`.
  pub min_block_size: usize,
  /// Which end of a level's free list is popped first.
  pub free_list_order: FreeListOrder,
  /// Emit `log` records from allocation paths. [`crate::LockedArena`] turns this off, since a
  /// logger that allocates would re-enter the arena under its lock.
  pub logging: bool,
}

impl BuddyConfig {
  pub const fn new(arena_size: usize, min_block_size: usize) -> Self {
    Self {
      arena_size,
      min_block_size,
      free_list_order: FreeListOrder::Fifo,
      logging: true,
    }
  }

  pub const fn with_free_list_order(mut self, order: FreeListOrder) -> Self {
    self.free_list_order = order;
    self
  }

  pub const fn with_logging(mut self, logging: bool) -> Self {
    self.logging = logging;
    self
  }

  /// Validates the configuration and returns the number of tree levels,
  /// `log2(arena_size / min_block_size) + 1`.
  pub fn levels(&self) -> Result<usize> {
    let reject = |reason| {
      Err(BuddyError::InvalidConfiguration {
        arena_size: self.arena_size,
        min_block_size: self.min_block_size,
        reason,
      })
    };

    if !self.arena_size.is_power_of_two() {
      return reject("arena size must be a power of two");
    }
    if !self.min_block_size.is_power_of_two() {
      return reject("minimum block size must be a power of two");
    }
    if self.min_block_size > self.arena_size || self.arena_size % self.min_block_size != 0 {
      return reject("minimum block size must divide the arena size");
    }

    let levels = (self.arena_size / self.min_block_size).trailing_zeros() as usize + 1;
    // Node indices run up to `2^levels - 2`.
    if levels >= usize::BITS as usize {
      return reject("tree indices would overflow");
    }
    Ok(levels)
  }
}
