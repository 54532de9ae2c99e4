#![allow(clippy::missing_safety_doc)]

//! Binary buddy allocator.
//!
//! A fixed arena of `arena_size` bytes (a power of two) is recursively halved into blocks, down to
//! `min_block_size`. Requests are rounded up to the next block size; a free block of that size is
//! found by splitting larger blocks, and freed blocks coalesce with their buddy back up the tree.
//!
//! - [`BuddyAllocator`] does the bookkeeping only: it returns [`BlockHandle`]s and the
//!   `(offset, size)` each one covers.
//! - [`BuddyArena`] maps real memory and hands out pointers into it.
//! - [`LockedArena`] puts a [`BuddyArena`] behind a single lock and implements
//!   [`core::alloc::GlobalAlloc`].
//!
//! ```
//! use buddy_arena::{BlockState, BuddyAllocator};
//!
//! let mut buddy = BuddyAllocator::init(128, 8)?;
//! let a = buddy.allocate(32)?;
//! let b = buddy.allocate(20)?;
//! assert_eq!(buddy.block_address(a), (0, 32));
//! assert_eq!(buddy.block_address(b), (32, 32));
//!
//! buddy.free(b);
//! buddy.free(a);
//! assert_eq!(buddy.state(0), BlockState::Free);
//! # Ok::<(), buddy_arena::BuddyError>(())
//! ```
//!
//! Recoverable failures (bad configuration, bad size, out of memory) are returned as
//! [`BuddyError`]. Freeing a block that is not allocated panics.

mod allocator;
mod arena;
mod config;
mod engine;
mod error;
mod free_list;
mod region;
mod stats;

pub mod tree;

#[cfg(feature = "c_api")]
pub mod c_api;

pub use allocator::{BlockHandle, BuddyAllocator, Snapshot};
pub use arena::{BuddyArena, LockedArena};
pub use config::BuddyConfig;
pub use error::{BuddyError, Result};
pub use free_list::{FreeListOrder, FreeLists};
pub use region::{REGION_ALIGN, Region};
pub use stats::BuddyStats;
pub use tree::{BlockState, BlockTree};

// =============================================================================
// Compile-Time Assertions
// =============================================================================

const _: () = assert!(core::mem::size_of::<BlockState>() == 1);
const _: () = assert!(core::mem::size_of::<BlockHandle>() == core::mem::size_of::<usize>());
