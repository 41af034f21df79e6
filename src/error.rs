use std::{error, fmt};

/// What the consistency checker found wrong with a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Corruption {
  OutOfBounds,
  Misaligned,
  Undersized,
  TagMismatch,
  AdjacentFree,
  AllocatedInTree,
  BrokenLink,
  OrderViolation,
  RedRoot,
  RedRed,
  BlackHeight,
  CountMismatch { linear: usize, indexed: usize },
  FreeSentinel,
}

impl fmt::Display for Corruption {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Corruption::OutOfBounds => f.write_str("block lies outside the heap"),
      Corruption::Misaligned => f.write_str("block is misaligned"),
      Corruption::Undersized => f.write_str("block is smaller than the minimum block size"),
      Corruption::TagMismatch => f.write_str("header and footer tags differ"),
      Corruption::AdjacentFree => f.write_str("two adjacent free blocks were not coalesced"),
      Corruption::AllocatedInTree => f.write_str("allocated block linked into the free tree"),
      Corruption::BrokenLink => f.write_str("tree child and parent links disagree"),
      Corruption::OrderViolation => f.write_str("free tree is out of size order"),
      Corruption::RedRoot => f.write_str("free tree root is red"),
      Corruption::RedRed => f.write_str("red node has a red child"),
      Corruption::BlackHeight => f.write_str("black heights of sibling subtrees differ"),
      Corruption::CountMismatch { linear, indexed } => write!(
        f,
        "heap walk found {linear} free blocks but the tree holds {indexed}"
      ),
      Corruption::FreeSentinel => f.write_str("sentinel block is marked free"),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
  /// The heap source refused to grow, or the request cannot be represented.
  HeapExhausted { requested: usize },
  /// Something other than this allocator moved the heap break.
  Discontiguous { expected: usize, found: usize },
  /// The pointer does not name a live allocation of this heap.
  InvalidPointer { addr: usize },
  /// Reported by the consistency checker only.
  CorruptBlock { addr: usize, reason: Corruption },
}

impl fmt::Display for AllocError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      AllocError::HeapExhausted { requested } => {
        write!(f, "heap exhausted while requesting {requested} bytes")
      }
      AllocError::Discontiguous { expected, found } => write!(
        f,
        "heap break moved: expected {expected:#x}, found {found:#x}"
      ),
      AllocError::InvalidPointer { addr } => {
        write!(f, "{addr:#x} is not a live allocation")
      }
      AllocError::CorruptBlock { addr, reason } => {
        write!(f, "corrupt block at {addr:#x}: {reason}")
      }
    }
  }
}

impl error::Error for AllocError {}
