use buddy_arena::{BlockHandle, BlockState, BuddyAllocator, BuddyConfig, BuddyError, FreeListOrder};

fn init_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}

/// 128-byte arena, 8-byte blocks, 5 levels.
#[test]
fn whole_arena_then_two_buddies() {
  init_logger();
  let mut buddy = BuddyAllocator::init(128, 8).unwrap();
  assert_eq!(buddy.levels(), 5);

  let whole = buddy.allocate(128).unwrap();
  assert_eq!(whole.index(), 0);
  assert_eq!(buddy.block_address(whole), (0, 128));

  let err = buddy.allocate(8).unwrap_err();
  assert!(matches!(err, BuddyError::OutOfMemory { requested: 8 }));
  buddy.assert_invariants();

  buddy.free(whole);
  assert_eq!(buddy.state(0), BlockState::Free);

  let a = buddy.allocate(32).unwrap();
  let b = buddy.allocate(32).unwrap();
  assert_eq!(a.level(), 2);
  assert_eq!(b.level(), 2);
  assert_ne!(a, b);
  buddy.assert_invariants();

  buddy.free(b);
  buddy.free(a);
  assert_eq!(buddy.state(0), BlockState::Free);
  assert!((1..buddy.block_count()).all(|i| buddy.state(i) == BlockState::Unused));
  assert_eq!(buddy.free_list(0).collect::<Vec<_>>(), vec![0]);
}

#[test]
fn two_buddies_freed_in_the_other_order() {
  let mut buddy = BuddyAllocator::init(128, 8).unwrap();
  let a = buddy.allocate(32).unwrap();
  let b = buddy.allocate(32).unwrap();
  buddy.free(a);
  buddy.free(b);
  assert_eq!(buddy.state(0), BlockState::Free);
  buddy.assert_invariants();
}

#[test]
fn exactly_arena_over_min_block_allocations_fit() {
  for order in [FreeListOrder::Fifo, FreeListOrder::Lifo] {
    let cfg = BuddyConfig::new(1024, 16).with_free_list_order(order);
    let mut buddy = BuddyAllocator::new(cfg).unwrap();

    let handles: Vec<_> = (0..1024 / 16).map(|_| buddy.allocate(16).unwrap()).collect();
    assert!(buddy.allocate(16).unwrap_err().is_out_of_memory());
    assert_eq!(buddy.largest_free_block(), None);
    assert_eq!(buddy.stats().free(), 0);
    buddy.assert_invariants();

    let mut offsets: Vec<_> = handles.iter().map(|&h| buddy.block_address(h).0).collect();
    offsets.sort_unstable();
    assert_eq!(offsets, (0..1024).step_by(16).collect::<Vec<_>>());

    for handle in handles {
      buddy.free(handle);
    }
    assert_eq!(buddy.largest_free_block(), Some(1024));
  }
}

#[test]
fn small_requests_round_up_to_min_block() {
  let mut buddy = BuddyAllocator::init(256, 32).unwrap();
  let h = buddy.allocate(1).unwrap();
  assert_eq!(buddy.block_address(h).1, 32);
}

#[test]
fn zero_and_oversize_requests() {
  let mut buddy = BuddyAllocator::init(256, 32).unwrap();
  assert!(matches!(buddy.allocate(0), Err(BuddyError::InvalidSize { size: 0 })));
  assert!(matches!(
    buddy.allocate(257),
    Err(BuddyError::OutOfMemory { requested: 257 })
  ));
  assert!(buddy.allocate(usize::MAX).unwrap_err().is_out_of_memory());
  assert_eq!(buddy.state(0), BlockState::Free);
  assert_eq!(buddy.stats().splits, 0);
}

#[test]
fn fragmentation_blocks_large_requests() {
  let mut buddy = BuddyAllocator::init(128, 8).unwrap();
  let quarters: Vec<_> = (0..4).map(|_| buddy.allocate(32).unwrap()).collect();
  buddy.free(quarters[0]);
  buddy.free(quarters[2]);

  // 64 bytes free, but no two free quarters are buddies.
  assert_eq!(buddy.stats().free(), 64);
  assert!(buddy.allocate(64).unwrap_err().is_out_of_memory());
  assert_eq!(buddy.largest_free_block(), Some(32));

  buddy.free(quarters[1]);
  let half = buddy.allocate(64).unwrap();
  assert_eq!(buddy.block_address(half), (0, 64));
}

#[test]
fn mixed_sizes_tile_the_arena() {
  let mut buddy = BuddyAllocator::init(1 << 12, 16).unwrap();
  let sizes = [16, 700, 32, 2000, 48, 128, 16, 256];
  let handles: Vec<_> = sizes.iter().map(|&s| buddy.allocate(s).unwrap()).collect();
  buddy.assert_invariants();

  for (&size, &handle) in sizes.iter().zip(&handles) {
    let (offset, block) = buddy.block_address(handle);
    assert!(block >= size);
    assert_eq!(offset % block, 0, "blocks are aligned to their size");
    assert_eq!(buddy.handle_at(offset), Some(handle));
  }

  for handle in handles.into_iter().rev() {
    buddy.free(handle);
    buddy.assert_invariants();
  }
  assert_eq!(buddy.state(0), BlockState::Free);
}

#[test]
#[should_panic(expected = "expected Allocated")]
fn double_free_panics() {
  let mut buddy = BuddyAllocator::init(128, 8).unwrap();
  let a = buddy.allocate(8).unwrap();
  let _b = buddy.allocate(8).unwrap();
  buddy.free(a);
  buddy.free(a);
}

#[test]
#[should_panic(expected = "outside a tree")]
fn forged_handle_panics() {
  let mut buddy = BuddyAllocator::init(128, 8).unwrap();
  buddy.free(BlockHandle::from_index(1000));
}
