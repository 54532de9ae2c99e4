#![cfg(feature = "serde")]

use buddy_arena::{BlockState, BuddyAllocator, BuddyStats, Snapshot};

#[test]
fn snapshot_serializes_for_visualisers() {
  let mut buddy = BuddyAllocator::init(64, 16).unwrap();
  buddy.allocate(16).unwrap();

  let json = serde_json::to_value(buddy.snapshot()).unwrap();
  assert_eq!(json["states"][0], "Split");
  assert_eq!(json["states"][3], "Allocated");
  assert_eq!(json["free_lists"], serde_json::json!([[], [2], [4]]));

  let back: Snapshot = serde_json::from_value(json).unwrap();
  assert_eq!(back, buddy.snapshot());
  assert_eq!(back.states[4], BlockState::Free);
}

#[test]
fn stats_serialize() {
  let mut buddy = BuddyAllocator::init(64, 16).unwrap();
  let h = buddy.allocate(20).unwrap();
  buddy.free(h);

  let json = serde_json::to_string(buddy.stats()).unwrap();
  let stats: BuddyStats = serde_json::from_str(&json).unwrap();
  assert_eq!(&stats, buddy.stats());
  assert_eq!(stats.merges, 1);
}
