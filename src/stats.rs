use core::fmt;

/// Counters for a single arena.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BuddyStats {
  /// Size of the arena in bytes.
  pub total: usize,
  /// Bytes currently handed out, counted in whole blocks.
  pub allocated: usize,
  /// Successful allocations.
  pub allocations: u64,
  /// Blocks returned.
  pub deallocations: u64,
  /// Allocations that failed with out-of-memory.
  pub failures: u64,
  /// Blocks split into two buddies.
  pub splits: u64,
  /// Buddy pairs coalesced into their parent.
  pub merges: u64,
}

impl BuddyStats {
  pub const fn with_total(total: usize) -> Self {
    Self {
      total,
      allocated: 0,
      allocations: 0,
      deallocations: 0,
      failures: 0,
      splits: 0,
      merges: 0,
    }
  }

  /// Bytes not handed out. Fragmentation may keep a request this large from succeeding.
  #[inline]
  pub fn free(&self) -> usize {
    self.total - self.allocated
  }

  /// Allocations not yet returned.
  #[inline]
  pub fn live(&self) -> u64 {
    self.allocations - self.deallocations
  }
}

impl fmt::Display for BuddyStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Allocated: {} bytes", self.allocated)?;
    writeln!(f, "Free: {} bytes", self.free())?;
    writeln!(f, "Total: {} bytes", self.total)?;
    writeln!(
      f,
      "Allocations: {} ({} live, {} failed)",
      self.allocations,
      self.live(),
      self.failures
    )?;
    write!(f, "Splits: {}, merges: {}", self.splits, self.merges)
  }
}
