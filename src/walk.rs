//! Neighbor lookups through boundary tags.

use crate::block::{Block, WORD_SIZE};

/// The block physically preceding `block`, found through its footer tag.
///
/// # Safety
///
/// `block` must not be the first block of the heap.
pub unsafe fn before(block: Block) -> Block {
  unsafe {
    let footer = Block::from_addr(block.addr().sub(WORD_SIZE));
    // A footer decodes like a header: same size and bits.
    Block::from_addr(block.addr().sub(footer.size()))
  }
}

/// The block physically following `block`.
///
/// # Safety
///
/// `block` must carry a valid header. The result may be the heap break.
pub unsafe fn after(block: Block) -> Block {
  unsafe { Block::from_addr(block.addr().add(block.size())) }
}

/// Linear walk over consecutive blocks, stopping at `end` or right after a
/// zero-sized header.
pub struct Blocks {
  current: *mut u8,
  end: *mut u8,
}

impl Blocks {
  /// # Safety
  ///
  /// Every block from `start` up to `end` must carry a readable header.
  pub unsafe fn new(
    start: Block,
    end: *mut u8,
  ) -> Self {
    Self {
      current: start.addr(),
      end,
    }
  }
}

impl Iterator for Blocks {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    if self.current >= self.end {
      return None;
    }

    let block = Block::from_addr(self.current);
    let size = unsafe { block.size() };
    if size == 0 {
      self.current = self.end;
    } else {
      self.current = self.current.wrapping_add(size);
    }

    Some(block)
  }
}
