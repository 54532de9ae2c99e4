//! A buddy allocator paired with the memory it manages.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{NonNull, null_mut};

use log::error;
use spin::{Mutex, MutexGuard, Once};

use crate::allocator::{BlockHandle, BuddyAllocator};
use crate::config::BuddyConfig;
use crate::error::{BuddyError, Result};
use crate::region::{REGION_ALIGN, Region};

/// Owns a mapped region and hands out blocks of it.
///
/// Single-threaded; wrap it in [`LockedArena`] to share it.
#[derive(Debug)]
pub struct BuddyArena {
  buddy: BuddyAllocator,
  region: Region,
}

impl BuddyArena {
  pub fn new(config: BuddyConfig) -> Result<Self> {
    let buddy = BuddyAllocator::new(config)?;
    let region = Region::map(config.arena_size)?;
    Ok(Self { buddy, region })
  }

  /// Bookkeeping view: states, free lists, statistics.
  #[inline]
  pub fn allocator(&self) -> &BuddyAllocator {
    &self.buddy
  }

  #[inline]
  pub fn base(&self) -> NonNull<u8> {
    self.region.base()
  }

  #[inline]
  pub fn contains(&self, ptr: *const u8) -> bool {
    self.region.contains(ptr)
  }

  /// Allocates a block of at least `requested` bytes and returns the handle for it.
  pub fn allocate(&mut self, requested: usize) -> Result<BlockHandle> {
    self.buddy.allocate(requested)
  }

  /// Frees a block by handle. Panics if the handle is not allocated.
  pub fn free(&mut self, handle: BlockHandle) {
    #[cfg(feature = "release-mem")]
    {
      let coalesced = self.buddy.release(handle);
      let range = self.buddy.block_range(BlockHandle::from_index(coalesced));
      self.region.release(range);
    }

    #[cfg(not(feature = "release-mem"))]
    self.buddy.free(handle);
  }

  /// Memory covered by an allocated block.
  #[inline]
  pub fn block_ptr(&self, handle: BlockHandle) -> NonNull<[u8]> {
    self.region.slice(self.buddy.block_range(handle))
  }

  /// Allocates at least `requested` bytes and returns the whole block.
  pub fn alloc(&mut self, requested: usize) -> Result<NonNull<[u8]>> {
    let handle = self.allocate(requested)?;
    Ok(self.block_ptr(handle))
  }

  /// Allocates a block satisfying `layout`. Blocks are aligned to their size, up to
  /// [`REGION_ALIGN`]; larger alignments are rejected.
  pub fn alloc_layout(&mut self, layout: Layout) -> Result<NonNull<[u8]>> {
    if layout.align() > REGION_ALIGN {
      return Err(BuddyError::InvalidSize {
        size: layout.align(),
      });
    }
    self.alloc(layout.size().max(layout.align()).max(1))
  }

  /// Handle of the allocated block starting at `ptr`.
  pub fn handle_of(&self, ptr: NonNull<u8>) -> Option<BlockHandle> {
    if !self.region.contains(ptr.as_ptr()) {
      return None;
    }
    self.buddy.handle_at(self.region.offset_of(ptr.as_ptr()))
  }

  /// Frees the block starting at `ptr`.
  ///
  /// # Panics
  ///
  /// If `ptr` is not the start of an allocated block of this arena.
  pub fn dealloc(&mut self, ptr: NonNull<u8>) {
    let Some(handle) = self.handle_of(ptr) else {
      panic!(
        "dealloc of {:p}: not the start of an allocated block in arena at {:p}",
        ptr,
        self.region.base()
      );
    };
    self.free(handle);
  }

  /// Size of the block starting at `ptr`, or 0 if `ptr` is not an allocated block.
  pub fn usable_size(&self, ptr: NonNull<u8>) -> usize {
    self
      .handle_of(ptr)
      .map(|handle| self.buddy.block_address(handle).1)
      .unwrap_or(0)
  }
}

// =============================================================================
// Locked arena
// =============================================================================

/// A [`BuddyArena`] behind one arena-wide lock.
///
/// Splits and merges touch several levels at once, so the whole arena is locked for every
/// operation. Also usable as a [`GlobalAlloc`], including from a `static` built with
/// [`LockedArena::lazy`]; the region is mapped on first use.
///
/// The tree and free lists live on the global heap, so a `LockedArena` cannot itself be the
/// `#[global_allocator]`. It serves explicit [`GlobalAlloc`] calls and the C API. Allocation
/// paths under the lock never log, since a logger may allocate.
pub struct LockedArena {
  config: BuddyConfig,
  arena: Once<Mutex<BuddyArena>>,
}

impl LockedArena {
  /// An arena that is mapped on the first lock. An invalid `config` surfaces then, as a null
  /// [`GlobalAlloc::alloc`] or an error from [`LockedArena::try_lock`].
  pub const fn lazy(config: BuddyConfig) -> Self {
    Self {
      config: config.with_logging(false),
      arena: Once::new(),
    }
  }

  /// Validates `config` and maps the region right away.
  pub fn new(config: BuddyConfig) -> Result<Self> {
    let locked = Self::lazy(config);
    locked.try_lock()?;
    Ok(locked)
  }

  #[inline]
  pub fn config(&self) -> &BuddyConfig {
    &self.config
  }

  /// `true` once the region has been mapped.
  #[inline]
  pub fn is_mapped(&self) -> bool {
    self.arena.is_completed()
  }

  /// Locks the arena, mapping it first if needed. A failed mapping is retried on the next call.
  pub fn try_lock(&self) -> Result<MutexGuard<'_, BuddyArena>> {
    let arena = self
      .arena
      .try_call_once(|| BuddyArena::new(self.config).map(Mutex::new))?;
    Ok(arena.lock())
  }

  /// # Panics
  ///
  /// If the arena cannot be mapped.
  pub fn lock(&self) -> MutexGuard<'_, BuddyArena> {
    match self.try_lock() {
      Ok(arena) => arena,
      Err(err) => panic!("locked arena unavailable: {err}"),
    }
  }
}

unsafe impl GlobalAlloc for LockedArena {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    let Ok(mut arena) = self.try_lock() else {
      return null_mut();
    };
    arena
      .alloc_layout(layout)
      .map(|block| block.as_ptr().cast())
      .unwrap_or(null_mut())
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    let Some(ptr) = NonNull::new(ptr) else {
      return;
    };

    if let Some(arena) = self.arena.get() {
      let mut arena = arena.lock();
      if let Some(handle) = arena.handle_of(ptr) {
        arena.free(handle);
        return;
      }
    }
    // Lock released. Unwinding out of an allocator is not allowed.
    error!("dealloc of {ptr:p}: not an allocated block of this arena");
    std::process::abort();
  }
}
