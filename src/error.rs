use std::collections::TryReserveError;
use std::io;

/// Result type for every fallible arena operation.
pub type Result<T, E = BuddyError> = core::result::Result<T, E>;

/// Recoverable errors reported to the caller.
///
/// Invariant violations (double free, freeing a handle that was never handed out, indices outside
/// the tree) are not represented here: they panic, because the tree can no longer be trusted.
#[derive(thiserror::Error, Debug)]
pub enum BuddyError {
  #[error(
    "invalid arena configuration (arena_size = {arena_size}, min_block_size = {min_block_size}): \
     {reason}"
  )]
  InvalidConfiguration {
    arena_size: usize,
    min_block_size: usize,
    reason: &'static str,
  },

  #[error("invalid block size: {size}")]
  InvalidSize { size: usize },

  #[error("out of memory: no free block can hold {requested} bytes")]
  OutOfMemory { requested: usize },

  #[error("cannot allocate metadata for {blocks} blocks")]
  MetadataAlloc {
    blocks: usize,
    #[source]
    source: TryReserveError,
  },

  #[error("failed to map {size} bytes of backing memory")]
  MapFailed {
    size: usize,
    #[source]
    source: io::Error,
  },
}

impl BuddyError {
  /// `true` for errors caused by arguments the caller can fix.
  pub fn is_invalid_input(&self) -> bool {
    matches!(
      self,
      Self::InvalidConfiguration { .. } | Self::InvalidSize { .. }
    )
  }

  pub fn is_out_of_memory(&self) -> bool {
    matches!(self, Self::OutOfMemory { .. })
  }
}
