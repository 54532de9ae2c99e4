//! Backing memory for an arena: one anonymous private mapping.

use core::ops::Range;
use core::ptr::{NonNull, null_mut};
use std::io;

use crate::error::{BuddyError, Result};

/// Alignment every mapping is guaranteed to have. Blocks are aligned to their own size relative to
/// the base, so blocks of at least this size are aligned to this.
pub const REGION_ALIGN: usize = 4096;

const _: () = assert!(REGION_ALIGN.is_power_of_two());

// =============================================================================
// Platform
// =============================================================================

unsafe fn os_mmap(size: usize) -> *mut u8 {
  let ptr = unsafe {
    libc::mmap(
      null_mut(),
      size,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
      -1,
      0,
    )
  };

  if ptr == libc::MAP_FAILED {
    null_mut()
  } else {
    ptr as *mut u8
  }
}

unsafe fn os_munmap(ptr: *mut u8, size: usize) {
  unsafe { libc::munmap(ptr.cast(), size) };
}

#[cfg(feature = "release-mem")]
unsafe fn os_release(ptr: *mut u8, size: usize) {
  // Pages read back as zero on next touch.
  unsafe { libc::madvise(ptr.cast(), size, libc::MADV_DONTNEED) };
}

// =============================================================================
// Region
// =============================================================================

/// An owned mapping of `len` bytes, unmapped on drop.
#[derive(Debug)]
pub struct Region {
  base: NonNull<u8>,
  len: usize,
}

// The region is plain memory owned by whoever owns the `Region`.
unsafe impl Send for Region {}

impl Region {
  pub fn map(len: usize) -> Result<Self> {
    let raw = unsafe { os_mmap(len) };
    let Some(base) = NonNull::new(raw) else {
      let source = io::Error::last_os_error();
      return Err(BuddyError::MapFailed { size: len, source });
    };
    debug_assert_eq!(base.as_ptr() as usize % REGION_ALIGN, 0);
    Ok(Self { base, len })
  }

  #[inline]
  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.len
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  #[inline]
  pub fn contains(&self, ptr: *const u8) -> bool {
    let base = self.base.as_ptr() as usize;
    let addr = ptr as usize;
    addr >= base && addr < base + self.len
  }

  /// Offset of `ptr` from the base. `ptr` must lie inside the region.
  #[inline]
  pub fn offset_of(&self, ptr: *const u8) -> usize {
    debug_assert!(self.contains(ptr));
    ptr as usize - self.base.as_ptr() as usize
  }

  /// Slice pointer covering `range`, which must lie inside the region.
  #[inline]
  pub fn slice(&self, range: Range<usize>) -> NonNull<[u8]> {
    debug_assert!(range.start <= range.end && range.end <= self.len);
    let start = unsafe { self.base.add(range.start) };
    NonNull::slice_from_raw_parts(start, range.end - range.start)
  }

  /// Hands the whole pages inside `range` back to the OS.
  #[cfg(feature = "release-mem")]
  pub fn release(&self, range: Range<usize>) {
    let start = range.start.next_multiple_of(REGION_ALIGN);
    let end = range.end - range.end % REGION_ALIGN;
    if start < end && end <= self.len {
      unsafe { os_release(self.base.as_ptr().add(start), end - start) };
    }
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    unsafe { os_munmap(self.base.as_ptr(), self.len) };
  }
}
