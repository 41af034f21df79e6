use std::{fmt, mem};

/// Size of one heap word. Boundary tags and tree links are one word each.
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// Bytes taken by the header and footer tags together.
pub const TAG_OVERHEAD: usize = 2 * WORD_SIZE;

/// Smallest block that can still carry the three tree links once freed.
pub const MIN_BLOCK_SIZE: usize = TAG_OVERHEAD + 3 * WORD_SIZE;

const FREE_BIT: usize = 0x1;
const BLACK_BIT: usize = 0x2;
const FLAG_MASK: usize = 0x7;

const LEFT_OFFSET: usize = WORD_SIZE;
const RIGHT_OFFSET: usize = 2 * WORD_SIZE;
const PARENT_OFFSET: usize = 3 * WORD_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
  Allocated,
  Free,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
  Red,
  Black,
}

/// Which child of a tree node. Rotation and rebalancing are written once
/// against a `Side` and its mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
  Left,
  Right,
}

impl Side {
  pub fn opposite(self) -> Self {
    match self {
      Side::Left => Side::Right,
      Side::Right => Side::Left,
    }
  }

  fn offset(self) -> usize {
    match self {
      Side::Left => LEFT_OFFSET,
      Side::Right => RIGHT_OFFSET,
    }
  }
}

/// A block as seen through its header.
///
/// The tree links physically overlap the payload, so they only exist in the
/// `Free` variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockView {
  Allocated {
    size: usize,
    payload: *mut u8,
  },
  Free {
    size: usize,
    color: Color,
    left: Block,
    right: Block,
    parent: Block,
  },
}

/// Handle to a block inside the heap, pointing at its header tag.
///
/// ```text
///   Allocated block:                 Free block:
///   ┌─────────────────────┐          ┌─────────────────────┐
///   │ size | color | a/f  │ header   │ size | color | a/f  │
///   ├─────────────────────┤ ◄─ ptr   ├─────────────────────┤
///   │                     │          │ left                │
///   │      payload        │          │ right               │
///   │                     │          │ parent              │
///   │                     │          │ ...                 │
///   ├─────────────────────┤          ├─────────────────────┤
///   │ size | color | a/f  │ footer   │ size | color | a/f  │
///   └─────────────────────┘          └─────────────────────┘
/// ```
///
/// Every accessor is plain address arithmetic. Nothing here checks that the
/// handle points at a real block; that is the consistency checker's job.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(*mut u8);

impl fmt::Debug for Block {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "Block({:p})", self.0)
  }
}

impl Block {
  pub fn from_addr(addr: *mut u8) -> Self {
    Self(addr)
  }

  /// Recovers the block from a pointer previously returned to a caller.
  pub fn from_payload(payload: *mut u8) -> Self {
    Self(payload.wrapping_sub(WORD_SIZE))
  }

  pub fn addr(self) -> *mut u8 {
    self.0
  }

  /// The address handed out to callers, right after the header tag.
  pub fn payload(self) -> *mut u8 {
    self.0.wrapping_add(WORD_SIZE)
  }

  /// Writes matching header and footer tags.
  ///
  /// # Safety
  ///
  /// `size` bytes starting at the block must be writable.
  pub unsafe fn pack(
    self,
    size: usize,
    state: State,
    color: Color,
  ) {
    let mut tag = size & !FLAG_MASK;
    if state == State::Free {
      tag |= FREE_BIT;
    }
    if color == Color::Black {
      tag |= BLACK_BIT;
    }

    unsafe {
      self.0.cast::<usize>().write(tag);
      self.0.add(size - WORD_SIZE).cast::<usize>().write(tag);
    }
  }

  /// Zeroes the header tag. The block then decodes as size zero and is
  /// rejected by every lookup that validates a pointer.
  ///
  /// # Safety
  ///
  /// The header word must be writable.
  pub unsafe fn erase(self) {
    unsafe { self.0.cast::<usize>().write(0) }
  }

  /// # Safety
  ///
  /// The header word must be readable.
  pub unsafe fn header(self) -> usize {
    unsafe { self.0.cast::<usize>().read() }
  }

  /// # Safety
  ///
  /// The header and the word it points to as footer must be readable.
  pub unsafe fn footer(self) -> usize {
    unsafe { self.0.add(self.size() - WORD_SIZE).cast::<usize>().read() }
  }

  /// # Safety
  ///
  /// The header word must be readable.
  pub unsafe fn size(self) -> usize {
    unsafe { self.header() & !FLAG_MASK }
  }

  /// # Safety
  ///
  /// The header word must be readable.
  pub unsafe fn is_free(self) -> bool {
    unsafe { self.header() & FREE_BIT != 0 }
  }

  /// # Safety
  ///
  /// The header word must be readable.
  pub unsafe fn is_allocated(self) -> bool {
    unsafe { !self.is_free() }
  }

  /// # Safety
  ///
  /// The header word must be readable.
  pub unsafe fn color(self) -> Color {
    if unsafe { self.header() } & BLACK_BIT != 0 {
      Color::Black
    } else {
      Color::Red
    }
  }

  /// # Safety
  ///
  /// The block must carry valid tags.
  pub unsafe fn is_red(self) -> bool {
    unsafe { self.color() == Color::Red }
  }

  /// Recolors both tags, keeping size and state.
  ///
  /// # Safety
  ///
  /// The block must carry valid tags.
  pub unsafe fn set_color(
    self,
    color: Color,
  ) {
    unsafe {
      let state = if self.is_free() { State::Free } else { State::Allocated };
      self.pack(self.size(), state, color);
    }
  }

  /// # Safety
  ///
  /// The block's whole extent must be readable.
  pub unsafe fn tags_match(self) -> bool {
    unsafe { self.header() == self.footer() }
  }

  unsafe fn link(
    self,
    offset: usize,
  ) -> Block {
    unsafe { Block(self.0.add(offset).cast::<*mut u8>().read()) }
  }

  unsafe fn set_link(
    self,
    offset: usize,
    target: Block,
  ) {
    unsafe { self.0.add(offset).cast::<*mut u8>().write(target.0) }
  }

  /// # Safety
  ///
  /// The block must be free or a sentinel.
  pub unsafe fn left(self) -> Block {
    unsafe { self.link(LEFT_OFFSET) }
  }

  /// # Safety
  ///
  /// The block must be free or a sentinel.
  pub unsafe fn right(self) -> Block {
    unsafe { self.link(RIGHT_OFFSET) }
  }

  /// # Safety
  ///
  /// The block must be free or a sentinel.
  pub unsafe fn parent(self) -> Block {
    unsafe { self.link(PARENT_OFFSET) }
  }

  /// # Safety
  ///
  /// The block must be at least [`MIN_BLOCK_SIZE`] bytes.
  pub unsafe fn set_left(
    self,
    node: Block,
  ) {
    unsafe { self.set_link(LEFT_OFFSET, node) }
  }

  /// # Safety
  ///
  /// The block must be at least [`MIN_BLOCK_SIZE`] bytes.
  pub unsafe fn set_right(
    self,
    node: Block,
  ) {
    unsafe { self.set_link(RIGHT_OFFSET, node) }
  }

  /// # Safety
  ///
  /// The block must be at least [`MIN_BLOCK_SIZE`] bytes.
  pub unsafe fn set_parent(
    self,
    node: Block,
  ) {
    unsafe { self.set_link(PARENT_OFFSET, node) }
  }

  /// # Safety
  ///
  /// The block must be free or a sentinel.
  pub unsafe fn child(
    self,
    side: Side,
  ) -> Block {
    unsafe { self.link(side.offset()) }
  }

  /// # Safety
  ///
  /// The block must be at least [`MIN_BLOCK_SIZE`] bytes.
  pub unsafe fn set_child(
    self,
    side: Side,
    node: Block,
  ) {
    unsafe { self.set_link(side.offset(), node) }
  }

  /// Decodes the block, reading the tree links only when it is free.
  ///
  /// # Safety
  ///
  /// The block must carry valid tags.
  pub unsafe fn view(self) -> BlockView {
    unsafe {
      if self.is_free() {
        BlockView::Free {
          size: self.size(),
          color: self.color(),
          left: self.left(),
          right: self.right(),
          parent: self.parent(),
        }
      } else {
        BlockView::Allocated {
          size: self.size(),
          payload: self.payload(),
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scratch(words: usize) -> Vec<usize> {
    vec![0usize; words]
  }

  #[test]
  fn test_pack_writes_both_tags() {
    let mut buf = scratch(8);
    let block = Block::from_addr(buf.as_mut_ptr().cast());

    unsafe {
      block.pack(64, State::Free, Color::Black);

      assert_eq!(block.size(), 64);
      assert!(block.is_free());
      assert_eq!(block.color(), Color::Black);
      assert!(block.tags_match());
      assert_eq!(block.header(), 64 | FREE_BIT | BLACK_BIT);
    }
    assert_eq!(buf[0], buf[7]);
  }

  #[test]
  fn test_erase_clears_header_only() {
    let mut buf = scratch(8);
    let block = Block::from_addr(buf.as_mut_ptr().cast());

    unsafe {
      block.pack(64, State::Allocated, Color::Red);
      block.erase();

      assert_eq!(block.size(), 0);
      assert!(!block.is_free());
    }
    assert_eq!(buf[0], 0);
    assert_eq!(buf[7], 64);
  }

  #[test]
  fn test_allocated_red_is_plain_size() {
    let mut buf = scratch(6);
    let block = Block::from_addr(buf.as_mut_ptr().cast());

    unsafe {
      block.pack(48, State::Allocated, Color::Red);
      assert!(block.is_allocated());
      assert_eq!(block.header(), 48);
    }
  }

  #[test]
  fn test_set_color_keeps_size_and_state() {
    let mut buf = scratch(5);
    let block = Block::from_addr(buf.as_mut_ptr().cast());

    unsafe {
      block.pack(40, State::Free, Color::Red);
      block.set_color(Color::Black);
      assert_eq!(block.size(), 40);
      assert!(block.is_free());
      assert!(!block.is_red());
      assert!(block.tags_match());
    }
  }

  #[test]
  fn test_payload_round_trip() {
    let mut buf = scratch(5);
    let block = Block::from_addr(buf.as_mut_ptr().cast());

    assert_eq!(block.payload() as usize - block.addr() as usize, WORD_SIZE);
    assert_eq!(Block::from_payload(block.payload()), block);
  }

  #[test]
  fn test_links_overlap_payload() {
    let mut a = scratch(5);
    let mut b = scratch(5);
    let mut c = scratch(5);
    let node = Block::from_addr(a.as_mut_ptr().cast());
    let left = Block::from_addr(b.as_mut_ptr().cast());
    let right = Block::from_addr(c.as_mut_ptr().cast());

    unsafe {
      node.pack(MIN_BLOCK_SIZE, State::Free, Color::Red);
      node.set_left(left);
      node.set_child(Side::Right, right);
      node.set_parent(left);

      assert_eq!(node.child(Side::Left), left);
      assert_eq!(node.right(), right);
      assert_eq!(node.parent(), left);
      assert!(node.tags_match());
      assert_eq!(node.payload().cast::<*mut u8>().read(), left.addr());
    }
  }

  #[test]
  fn test_view_hides_links_of_allocated_block() {
    let mut buf = scratch(5);
    let block = Block::from_addr(buf.as_mut_ptr().cast());

    unsafe {
      block.pack(MIN_BLOCK_SIZE, State::Allocated, Color::Red);
      assert_eq!(
        block.view(),
        BlockView::Allocated {
          size: MIN_BLOCK_SIZE,
          payload: block.payload(),
        }
      );

      block.pack(MIN_BLOCK_SIZE, State::Free, Color::Black);
      block.set_left(block);
      block.set_right(block);
      block.set_parent(block);
      assert!(matches!(
        block.view(),
        BlockView::Free { color: Color::Black, left, .. } if left == block
      ));
    }
  }

  #[test]
  fn test_side_opposite() {
    assert_eq!(Side::Left.opposite(), Side::Right);
    assert_eq!(Side::Right.opposite(), Side::Left);
  }
}
