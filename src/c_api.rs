//! C ABI (enabled with --features c_api).
//!
//! Arenas are opaque `LockedArena` pointers created by `buddy_arena_new` and released with
//! `buddy_arena_destroy`.

use core::ptr::{NonNull, null_mut};

use log::warn;

use crate::arena::LockedArena;
use crate::config::BuddyConfig;

/// Creates an arena, or returns null if the sizes are invalid or mapping fails.
#[unsafe(no_mangle)]
pub extern "C" fn buddy_arena_new(arena_size: usize, min_block_size: usize) -> *mut LockedArena {
  match LockedArena::new(BuddyConfig::new(arena_size, min_block_size)) {
    Ok(arena) => Box::into_raw(Box::new(arena)),
    Err(err) => {
      warn!("buddy_arena_new: {err}");
      null_mut()
    }
  }
}

/// Unmaps an arena. Every pointer it handed out becomes dangling.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn buddy_arena_destroy(arena: *mut LockedArena) {
  if !arena.is_null() {
    drop(unsafe { Box::from_raw(arena) });
  }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn buddy_malloc(arena: *const LockedArena, size: usize) -> *mut u8 {
  let Some(arena) = (unsafe { arena.as_ref() }) else {
    return null_mut();
  };
  arena
    .lock()
    .alloc(size)
    .map(|block| block.as_ptr().cast())
    .unwrap_or(null_mut())
}

/// Frees a pointer returned by `buddy_malloc`. Aborts on pointers the arena did not hand out.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn buddy_free(arena: *const LockedArena, ptr: *mut u8) {
  let (Some(arena), Some(ptr)) = (unsafe { arena.as_ref() }, NonNull::new(ptr)) else {
    return;
  };

  {
    let mut arena = arena.lock();
    if let Some(handle) = arena.handle_of(ptr) {
      arena.free(handle);
      return;
    }
  }
  log::error!("buddy_free of {ptr:p}: not an allocated block of this arena");
  std::process::abort();
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn buddy_usable_size(arena: *const LockedArena, ptr: *mut u8) -> usize {
  let (Some(arena), Some(ptr)) = (unsafe { arena.as_ref() }, NonNull::new(ptr)) else {
    return 0;
  };
  arena.lock().usable_size(ptr)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn c_round_trip() {
    let arena = buddy_arena_new(1 << 16, 32);
    assert!(!arena.is_null());
    unsafe {
      let p = buddy_malloc(arena, 100);
      assert!(!p.is_null());
      assert_eq!(buddy_usable_size(arena, p), 128);
      p.write_bytes(0x5A, 128);
      buddy_free(arena, p);
      assert_eq!(buddy_usable_size(arena, p), 0);
      assert!(buddy_malloc(arena, 1 << 17).is_null());
      buddy_arena_destroy(arena);
    }
  }

  #[test]
  fn null_arguments() {
    assert!(buddy_arena_new(100, 8).is_null());
    unsafe {
      assert!(buddy_malloc(null_mut(), 8).is_null());
      buddy_free(null_mut(), null_mut());
      assert_eq!(buddy_usable_size(null_mut(), null_mut()), 0);
      buddy_arena_destroy(null_mut());
    }
  }
}
