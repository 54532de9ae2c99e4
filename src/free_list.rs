//! Per-level free lists, threaded through a link table indexed by tree index.
//!
//! Every block can be on at most one list, so one `prev`/`next` pair per block is enough, the same
//! way an intrusive list stores its links inside the free blocks themselves. Push, pop and removal
//! of an arbitrary block are all O(1).

use crate::error::Result;
use crate::tree::try_filled;

/// Which end of a level's free list `pop_free` takes from. Only locality differs.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FreeListOrder {
  /// Oldest free block first.
  #[default]
  Fifo,
  /// Most recently freed block first.
  Lifo,
}

/// `prev` of a block that is on no list.
const UNLISTED: usize = usize::MAX;
/// `prev` of a list head, `next` of a list tail, and the head/tail of an empty list.
const END: usize = usize::MAX - 1;

#[derive(Clone, Copy, Debug)]
struct Link {
  prev: usize,
  next: usize,
}

const UNLINKED: Link = Link {
  prev: UNLISTED,
  next: END,
};

#[derive(Clone, Copy, Debug)]
struct List {
  head: usize,
  tail: usize,
  len: usize,
}

const EMPTY: List = List {
  head: END,
  tail: END,
  len: 0,
};

/// One list of free block indices per tree level.
///
/// Keeping block states in sync is the engine's job; these lists only hold indices.
#[derive(Clone, Debug)]
pub struct FreeLists {
  lists: Vec<List>,
  links: Vec<Link>,
  order: FreeListOrder,
  /// Links rewritten, for checking that list operations stay constant-time.
  #[cfg(test)]
  pub(crate) steps: usize,
}

impl FreeLists {
  /// Empty lists for a tree of `levels` levels and `blocks` nodes.
  pub fn new(levels: usize, blocks: usize, order: FreeListOrder) -> Result<Self> {
    Ok(Self {
      lists: vec![EMPTY; levels],
      links: try_filled(blocks, UNLINKED)?,
      order,
      #[cfg(test)]
      steps: 0,
    })
  }

  #[inline]
  pub fn order(&self) -> FreeListOrder {
    self.order
  }

  #[inline]
  pub fn levels(&self) -> usize {
    self.lists.len()
  }

  /// `true` if `index` is on any free list.
  #[inline]
  pub fn contains(&self, index: usize) -> bool {
    self.links[index].prev != UNLISTED
  }

  /// Appends `index` at the tail of `level`'s list.
  pub fn push_free(&mut self, level: usize, index: usize) {
    debug_assert!(
      !self.contains(index),
      "block {index} pushed twice onto a free list (level {level})"
    );

    let tail = self.lists[level].tail;
    self.links[index] = Link {
      prev: END,
      next: END,
    };
    if tail == END {
      self.lists[level].head = index;
    } else {
      self.links[index].prev = tail;
      self.links[tail].next = index;
    }
    self.lists[level].tail = index;
    self.lists[level].len += 1;
    self.step();
  }

  pub fn pop_free(&mut self, level: usize) -> Option<usize> {
    let list = self.lists[level];
    let index = match self.order {
      FreeListOrder::Fifo => list.head,
      FreeListOrder::Lifo => list.tail,
    };
    if index == END {
      return None;
    }
    self.unlink(level, index);
    Some(index)
  }

  /// Removes a specific block from `level`'s list.
  pub fn remove_free(&mut self, level: usize, index: usize) {
    debug_assert!(
      self.contains(index),
      "block {index} missing from free list {level}"
    );
    if self.contains(index) {
      self.unlink(level, index);
    }
  }

  fn unlink(&mut self, level: usize, index: usize) {
    let Link { prev, next } = self.links[index];
    let list = &mut self.lists[level];
    if prev == END {
      debug_assert_eq!(list.head, index, "block {index} is not on free list {level}");
      list.head = next;
    } else {
      self.links[prev].next = next;
    }
    if next == END {
      debug_assert_eq!(list.tail, index, "block {index} is not on free list {level}");
      list.tail = prev;
    } else {
      self.links[next].prev = prev;
    }
    list.len -= 1;
    self.links[index] = UNLINKED;
    self.step();
  }

  #[inline(always)]
  fn step(&mut self) {
    #[cfg(test)]
    {
      self.steps += 1;
    }
  }

  #[inline]
  pub fn is_empty(&self, level: usize) -> bool {
    self.lists[level].len == 0
  }

  #[inline]
  pub fn len(&self, level: usize) -> usize {
    self.lists[level].len
  }

  /// Free blocks across all levels.
  pub fn total_len(&self) -> usize {
    self.lists.iter().map(|list| list.len).sum()
  }

  /// Blocks on `level`'s list, head to tail.
  pub fn iter(&self, level: usize) -> impl Iterator<Item = usize> + '_ {
    let head = self.lists[level].head;
    std::iter::successors((head != END).then_some(head), move |&index| {
      let next = self.links[index].next;
      (next != END).then_some(next)
    })
  }

  /// Copy of every list in pop order.
  pub fn snapshot(&self) -> Vec<Vec<usize>> {
    (0..self.levels())
      .map(|level| {
        let list: Vec<_> = self.iter(level).collect();
        match self.order {
          FreeListOrder::Fifo => list,
          FreeListOrder::Lifo => list.into_iter().rev().collect(),
        }
      })
      .collect()
  }
}
