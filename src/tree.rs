//! Size-ordered red-black tree threaded through the free blocks.
//!
//! The tree owns no memory. Its nodes are the free blocks themselves, and
//! it is anchored on two sentinels:
//!
//! ```text
//!   anchor (prologue)          nil (epilogue)
//!   ┌──────────────┐          ┌──────────────┐
//!   │ right ─► root│          │ black, alloc │ ◄── every absent link
//!   └──────────────┘          └──────────────┘
//! ```
//!
//! Sizes are not unique. Equal sizes are inserted to the right; rotations
//! may later move an equal size to the left, so the order guarantee is that
//! an in-order walk never decreases.

use crate::{
  block::{Block, Color, Side},
  error::Corruption,
};

/// Nodes deeper than this can only come from a cycle in the links.
const MAX_DEPTH: usize = 2 * usize::BITS as usize;

#[derive(Clone, Copy, Debug)]
pub struct FreeTree {
  anchor: Block,
  nil: Block,
}

impl FreeTree {
  /// Wires an empty tree onto the two sentinels.
  ///
  /// # Safety
  ///
  /// Both sentinels must be packed, allocated blocks of at least
  /// [`MIN_BLOCK_SIZE`](crate::block::MIN_BLOCK_SIZE) bytes, `nil` black.
  pub unsafe fn new(
    anchor: Block,
    nil: Block,
  ) -> Self {
    unsafe {
      anchor.set_left(nil);
      anchor.set_right(nil);
      anchor.set_parent(nil);
      nil.set_left(nil);
      nil.set_right(nil);
      nil.set_parent(nil);
    }

    Self { anchor, nil }
  }

  pub fn nil(&self) -> Block {
    self.nil
  }

  /// # Safety
  ///
  /// The sentinels must still be intact.
  pub unsafe fn root(&self) -> Block {
    unsafe { self.anchor.right() }
  }

  unsafe fn set_root(
    &mut self,
    node: Block,
  ) {
    unsafe { self.anchor.set_right(node) }
  }

  /// # Safety
  ///
  /// The sentinels must still be intact.
  pub unsafe fn is_empty(&self) -> bool {
    unsafe { self.root() == self.nil }
  }

  /// Best fit: the smallest free block of at least `size` bytes, or nil.
  ///
  /// # Safety
  ///
  /// Every node reachable from the root must be a valid free block.
  pub unsafe fn search(
    &self,
    size: usize,
  ) -> Block {
    unsafe {
      let mut best = self.nil;
      let mut node = self.root();

      while node != self.nil {
        if node.size() < size {
          // Everything on the left is no larger than this node.
          node = node.right();
        } else {
          best = node;
          node = node.left();
        }
      }

      best
    }
  }

  /// Links a free block into the tree and rebalances.
  ///
  /// # Safety
  ///
  /// `node` must be a packed free block not already in the tree.
  pub unsafe fn insert(
    &mut self,
    node: Block,
  ) {
    unsafe {
      let size = node.size();
      node.set_left(self.nil);
      node.set_right(self.nil);

      let mut parent = self.nil;
      let mut current = self.root();
      while current != self.nil {
        parent = current;
        current = if size < current.size() {
          current.left()
        } else {
          current.right()
        };
      }

      node.set_parent(parent);

      if parent == self.nil {
        self.set_root(node);
        node.set_color(Color::Black);
        return;
      }

      let side = if size < parent.size() { Side::Left } else { Side::Right };
      parent.set_child(side, node);
      node.set_color(Color::Red);

      self.insert_fixup(node);
    }
  }

  unsafe fn insert_fixup(
    &mut self,
    node: Block,
  ) {
    unsafe {
      let mut node = node;

      // The root's parent is nil, which is black, so this stops at the root.
      while node.parent().is_red() {
        let mut parent = node.parent();
        let grandparent = parent.parent();
        let side = self.side_of(grandparent, parent);
        let uncle = grandparent.child(side.opposite());

        if uncle.is_red() {
          parent.set_color(Color::Black);
          uncle.set_color(Color::Black);
          grandparent.set_color(Color::Red);
          node = grandparent;
          continue;
        }

        if node == parent.child(side.opposite()) {
          // Inner grandchild: turn it into an outer one first.
          self.rotate(parent, side);
          node = parent;
          parent = node.parent();
        }

        parent.set_color(Color::Black);
        grandparent.set_color(Color::Red);
        self.rotate(grandparent, side.opposite());
      }

      self.root().set_color(Color::Black);
    }
  }

  /// Unlinks a free block from the tree and rebalances.
  ///
  /// # Safety
  ///
  /// `node` must currently be in the tree.
  pub unsafe fn remove(
    &mut self,
    node: Block,
  ) {
    unsafe {
      let nil = self.nil;
      let mut removed_color = node.color();
      let replacement;

      if node.left() == nil {
        replacement = node.right();
        self.transplant(node, replacement);
      } else if node.right() == nil {
        replacement = node.left();
        self.transplant(node, replacement);
      } else {
        let successor = self.minimum(node.right());
        removed_color = successor.color();
        replacement = successor.right();

        if successor.parent() == node {
          // May write nil's parent; the fixup reads it back.
          replacement.set_parent(successor);
        } else {
          self.transplant(successor, replacement);
          successor.set_right(node.right());
          successor.right().set_parent(successor);
        }

        self.transplant(node, successor);
        successor.set_left(node.left());
        successor.left().set_parent(successor);
        successor.set_color(node.color());
      }

      if removed_color == Color::Black {
        self.remove_fixup(replacement);
      }
    }
  }

  unsafe fn remove_fixup(
    &mut self,
    node: Block,
  ) {
    unsafe {
      let mut node = node;

      while node != self.root() && !node.is_red() {
        let parent = node.parent();
        let side = if node == parent.left() { Side::Left } else { Side::Right };
        let other = side.opposite();
        let mut sibling = parent.child(other);

        if sibling.is_red() {
          sibling.set_color(Color::Black);
          parent.set_color(Color::Red);
          self.rotate(parent, side);
          sibling = parent.child(other);
        }

        if !sibling.child(side).is_red() && !sibling.child(other).is_red() {
          sibling.set_color(Color::Red);
          node = parent;
          continue;
        }

        if !sibling.child(other).is_red() {
          sibling.child(side).set_color(Color::Black);
          sibling.set_color(Color::Red);
          self.rotate(sibling, other);
          sibling = parent.child(other);
        }

        sibling.set_color(parent.color());
        parent.set_color(Color::Black);
        sibling.child(other).set_color(Color::Black);
        self.rotate(parent, side);
        node = self.root();
      }

      node.set_color(Color::Black);
    }
  }

  /// Rotates `node` down towards `side`; its child on the other side takes
  /// its place.
  unsafe fn rotate(
    &mut self,
    node: Block,
    side: Side,
  ) {
    unsafe {
      let other = side.opposite();
      let pivot = node.child(other);
      let inner = pivot.child(side);

      node.set_child(other, inner);
      if inner != self.nil {
        inner.set_parent(node);
      }

      let parent = node.parent();
      pivot.set_parent(parent);
      self.replace_child(parent, node, pivot);

      pivot.set_child(side, node);
      node.set_parent(pivot);
    }
  }

  /// Puts `new` where `old` hangs off `parent`, updating the root when
  /// `parent` is nil.
  unsafe fn replace_child(
    &mut self,
    parent: Block,
    old: Block,
    new: Block,
  ) {
    unsafe {
      if parent == self.nil {
        self.set_root(new);
      } else if parent.left() == old {
        parent.set_left(new);
      } else {
        parent.set_right(new);
      }
    }
  }

  unsafe fn transplant(
    &mut self,
    old: Block,
    new: Block,
  ) {
    unsafe {
      let parent = old.parent();
      self.replace_child(parent, old, new);
      new.set_parent(parent);
    }
  }

  unsafe fn side_of(
    &self,
    parent: Block,
    child: Block,
  ) -> Side {
    if unsafe { parent.left() } == child {
      Side::Left
    } else {
      Side::Right
    }
  }

  /// # Safety
  ///
  /// `node` must be in the tree.
  pub unsafe fn minimum(
    &self,
    node: Block,
  ) -> Block {
    unsafe {
      let mut node = node;
      while node.left() != self.nil {
        node = node.left();
      }
      node
    }
  }

  /// The smallest free block, or nil when the tree is empty.
  ///
  /// # Safety
  ///
  /// Every node reachable from the root must be a valid free block.
  pub unsafe fn first(&self) -> Block {
    unsafe {
      let root = self.root();
      if root == self.nil {
        self.nil
      } else {
        self.minimum(root)
      }
    }
  }

  /// The in-order successor of `node`, or nil after the last one.
  ///
  /// # Safety
  ///
  /// `node` must be in the tree.
  pub unsafe fn successor(
    &self,
    node: Block,
  ) -> Block {
    unsafe {
      if node.right() != self.nil {
        return self.minimum(node.right());
      }

      let mut node = node;
      let mut parent = node.parent();
      while parent != self.nil && node == parent.right() {
        node = parent;
        parent = parent.parent();
      }
      parent
    }
  }

  /// Free blocks in non-decreasing size order.
  ///
  /// # Safety
  ///
  /// The tree must not be modified while the iterator is alive.
  pub unsafe fn iter(&self) -> Iter {
    Iter {
      tree: *self,
      next: unsafe { self.first() },
    }
  }

  /// Verifies links, colors, balance and order. Returns the node count.
  ///
  /// # Safety
  ///
  /// Every link reachable from the root must point at readable memory.
  pub unsafe fn validate(&self) -> Result<usize, (Block, Corruption)> {
    unsafe {
      let root = self.root();
      if root == self.nil {
        return Ok(0);
      }
      if root.is_red() {
        return Err((root, Corruption::RedRoot));
      }

      let (_, count) = self.validate_subtree(root, self.nil, 0)?;

      let mut previous = 0;
      for node in self.iter().take(count) {
        let size = node.size();
        if size < previous {
          return Err((node, Corruption::OrderViolation));
        }
        previous = size;
      }

      Ok(count)
    }
  }

  /// Returns the black height and node count of the subtree.
  unsafe fn validate_subtree(
    &self,
    node: Block,
    parent: Block,
    depth: usize,
  ) -> Result<(usize, usize), (Block, Corruption)> {
    unsafe {
      if node == self.nil {
        return Ok((1, 0));
      }
      if depth > MAX_DEPTH || node.parent() != parent {
        return Err((node, Corruption::BrokenLink));
      }
      if !node.tags_match() {
        return Err((node, Corruption::TagMismatch));
      }
      if node.is_allocated() {
        return Err((node, Corruption::AllocatedInTree));
      }

      let left = node.left();
      let right = node.right();
      if node.is_red() && (left.is_red() || right.is_red()) {
        return Err((node, Corruption::RedRed));
      }

      let (left_height, left_count) = self.validate_subtree(left, node, depth + 1)?;
      let (right_height, right_count) = self.validate_subtree(right, node, depth + 1)?;
      if left_height != right_height {
        return Err((node, Corruption::BlackHeight));
      }

      let own = if node.is_red() { 0 } else { 1 };
      Ok((left_height + own, left_count + right_count + 1))
    }
  }
}

pub struct Iter {
  tree: FreeTree,
  next: Block,
}

impl Iterator for Iter {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    if self.next == self.tree.nil {
      return None;
    }

    let current = self.next;
    self.next = unsafe { self.tree.successor(current) };
    Some(current)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::{MIN_BLOCK_SIZE, State, WORD_SIZE};

  /// Backing words for a tree plus loose free blocks at fixed offsets.
  struct Arena {
    words: Vec<usize>,
    used: usize,
  }

  impl Arena {
    fn new(words: usize) -> Self {
      Self {
        words: vec![0; words],
        used: 0,
      }
    }

    fn block(
      &mut self,
      size: usize,
      state: State,
      color: Color,
    ) -> Block {
      let words = size / WORD_SIZE;
      assert!(self.used + words <= self.words.len());

      let block = Block::from_addr(unsafe { self.words.as_mut_ptr().add(self.used) }.cast());
      self.used += words;
      unsafe { block.pack(size, state, color) };
      block
    }

    fn tree(&mut self) -> FreeTree {
      let anchor = self.block(MIN_BLOCK_SIZE, State::Allocated, Color::Red);
      let nil = self.block(MIN_BLOCK_SIZE, State::Allocated, Color::Black);
      unsafe { FreeTree::new(anchor, nil) }
    }

    fn free(
      &mut self,
      size: usize,
    ) -> Block {
      self.block(size, State::Free, Color::Red)
    }
  }

  fn sizes(tree: &FreeTree) -> Vec<usize> {
    unsafe { tree.iter().map(|b| b.size()).collect() }
  }

  #[test]
  fn test_empty_tree() {
    let mut arena = Arena::new(64);
    let tree = arena.tree();

    unsafe {
      assert!(tree.is_empty());
      assert_eq!(tree.search(40), tree.nil());
      assert_eq!(tree.first(), tree.nil());
      assert_eq!(tree.validate(), Ok(0));
    }
  }

  #[test]
  fn test_first_insert_becomes_black_root() {
    let mut arena = Arena::new(64);
    let mut tree = arena.tree();
    let node = arena.free(64);

    unsafe {
      tree.insert(node);
      assert_eq!(tree.root(), node);
      assert_eq!(node.color(), Color::Black);
      assert_eq!(node.left(), tree.nil());
      assert_eq!(node.right(), tree.nil());
      assert_eq!(node.parent(), tree.nil());
      assert!(node.is_free());
    }
  }

  #[test]
  fn test_ascending_inserts_stay_balanced() {
    let mut arena = Arena::new(4096);
    let mut tree = arena.tree();

    for i in 0..40 {
      let node = arena.free(MIN_BLOCK_SIZE + i * 8);
      unsafe {
        tree.insert(node);
        tree.validate().unwrap();
      }
    }

    let expected: Vec<usize> = (0..40).map(|i| MIN_BLOCK_SIZE + i * 8).collect();
    assert_eq!(sizes(&tree), expected);
  }

  #[test]
  fn test_duplicates_are_kept_in_order() {
    let mut arena = Arena::new(1024);
    let mut tree = arena.tree();

    for size in [64, 48, 64, 64, 40, 48, 64] {
      let node = arena.free(size);
      unsafe { tree.insert(node) };
    }

    unsafe { assert_eq!(tree.validate(), Ok(7)) };
    assert_eq!(sizes(&tree), vec![40, 48, 48, 64, 64, 64, 64]);
  }

  #[test]
  fn test_search_is_best_fit() {
    let mut arena = Arena::new(2048);
    let mut tree = arena.tree();

    for size in [120, 48, 200, 64, 96, 56] {
      let node = arena.free(size);
      unsafe { tree.insert(node) };
    }

    unsafe {
      assert_eq!(tree.search(40).size(), 48);
      assert_eq!(tree.search(48).size(), 48);
      assert_eq!(tree.search(57).size(), 64);
      assert_eq!(tree.search(97).size(), 120);
      assert_eq!(tree.search(200).size(), 200);
      assert_eq!(tree.search(201), tree.nil());
    }
  }

  #[test]
  fn test_remove_down_to_empty() {
    let mut arena = Arena::new(2048);
    let mut tree = arena.tree();

    let nodes: Vec<Block> = [80, 40, 120, 56, 104, 160, 48]
      .into_iter()
      .map(|size| arena.free(size))
      .collect();
    for node in &nodes {
      unsafe { tree.insert(*node) };
    }

    unsafe {
      tree.remove(nodes[6]);
      tree.validate().unwrap();
      assert_eq!(sizes(&tree), vec![40, 56, 80, 104, 120, 160]);

      // root with two children
      let root = tree.root();
      let root_size = root.size();
      tree.remove(root);
      tree.validate().unwrap();
      assert!(!sizes(&tree).contains(&root_size));

      while !tree.is_empty() {
        tree.remove(tree.root());
        tree.validate().unwrap();
      }
    }

    assert!(sizes(&tree).is_empty());
  }

  #[test]
  fn test_remove_one_of_equal_sizes() {
    let mut arena = Arena::new(1024);
    let mut tree = arena.tree();

    let nodes: Vec<Block> = (0..6).map(|_| arena.free(64)).collect();
    for node in &nodes {
      unsafe { tree.insert(*node) };
    }

    unsafe {
      tree.remove(nodes[3]);
      assert_eq!(tree.validate(), Ok(5));
      assert!(tree.iter().all(|b| b != nodes[3]));
      assert!(nodes.contains(&tree.search(64)));
    }
  }

  #[test]
  fn test_interleaved_insert_and_remove() {
    let mut arena = Arena::new(16384);
    let mut tree = arena.tree();
    let mut live = Vec::new();

    // Deterministic shuffle of sizes.
    let mut seed = 0x2545_f491_u64;
    for round in 0..200 {
      seed ^= seed << 13;
      seed ^= seed >> 7;
      seed ^= seed << 17;

      if round % 3 == 2 && !live.is_empty() {
        let victim: Block = live.swap_remove(seed as usize % live.len());
        unsafe { tree.remove(victim) };
      } else {
        let size = MIN_BLOCK_SIZE + (seed as usize % 12) * 8;
        let node = arena.free(size);
        unsafe { tree.insert(node) };
        live.push(node);
      }

      unsafe { assert_eq!(tree.validate(), Ok(live.len())) };
    }
  }

  #[test]
  fn test_validate_detects_allocated_node() {
    let mut arena = Arena::new(256);
    let mut tree = arena.tree();
    let a = arena.free(64);
    let b = arena.free(80);

    unsafe {
      tree.insert(a);
      tree.insert(b);
      b.pack(80, State::Allocated, Color::Red);
      assert_eq!(tree.validate(), Err((b, Corruption::AllocatedInTree)));
    }
  }

  #[test]
  fn test_validate_detects_order_violation() {
    let mut arena = Arena::new(256);
    let mut tree = arena.tree();
    let a = arena.free(64);
    let b = arena.free(80);

    unsafe {
      tree.insert(a);
      tree.insert(b);
      // Shrink the right child below its parent without relinking.
      b.pack(48, State::Free, Color::Red);
      assert_eq!(tree.validate(), Err((b, Corruption::OrderViolation)));
    }
  }
}
