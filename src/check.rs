use std::{fmt::Write, process};

use crate::{
  align::is_aligned,
  allocator::TreeAllocator,
  block::{Block, BlockView, MIN_BLOCK_SIZE, WORD_SIZE},
  config::CheckLevel,
  error::{AllocError, Corruption},
  heap::HeapSource,
  walk,
};

/// What a linear walk over the heap found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes between the heap's low end and its break, sentinels included.
  pub heap_size: usize,
  pub blocks: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub largest_free: usize,
}

impl<H: HeapSource> TreeAllocator<H> {
  /// Walks the heap and, at [`CheckLevel::Full`], the free tree.
  ///
  /// [`CheckLevel::Off`] still performs the linear walk; it only skips the
  /// tree.
  pub fn check(
    &self,
    level: CheckLevel,
  ) -> Result<HeapStats, AllocError> {
    let high = self.heap.high() as usize;
    let corrupt = |block: Block, reason| AllocError::CorruptBlock {
      addr: block.addr() as usize,
      reason,
    };

    for sentinel in [self.prologue, self.tree.nil()] {
      unsafe {
        if !sentinel.tags_match() {
          return Err(corrupt(sentinel, Corruption::TagMismatch));
        }
        if sentinel.is_free() {
          return Err(corrupt(sentinel, Corruption::FreeSentinel));
        }
      }
    }

    let mut stats = HeapStats {
      heap_size: self.heap.size(),
      ..HeapStats::default()
    };
    let mut previous_free = false;
    let mut addr = self.first_block().addr() as usize;

    log::trace!("check: walking {:#x}..{high:#x}", addr);

    while addr < high {
      let block = Block::from_addr(addr as *mut u8);
      if !is_aligned(addr) {
        return Err(corrupt(block, Corruption::Misaligned));
      }
      if high - addr < MIN_BLOCK_SIZE {
        return Err(corrupt(block, Corruption::OutOfBounds));
      }

      let size = unsafe { block.size() };
      if size < MIN_BLOCK_SIZE {
        return Err(corrupt(block, Corruption::Undersized));
      }
      if size > high - addr {
        return Err(corrupt(block, Corruption::OutOfBounds));
      }
      if !unsafe { block.tags_match() } {
        return Err(corrupt(block, Corruption::TagMismatch));
      }

      let free = unsafe { block.is_free() };
      if free {
        if previous_free {
          return Err(corrupt(block, Corruption::AdjacentFree));
        }
        stats.free_blocks += 1;
        stats.free_bytes += size;
        stats.largest_free = stats.largest_free.max(size);
      } else {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += size;
      }
      stats.blocks += 1;
      previous_free = free;

      log::trace!("check: {:p} ({}, {size:#x})", block.addr(), if free { 'f' } else { 'a' });
      addr += size;
    }

    if level == CheckLevel::Full {
      let indexed = unsafe { self.tree.validate() }.map_err(|(block, reason)| corrupt(block, reason))?;
      if indexed != stats.free_blocks {
        let root = unsafe { self.tree.root() };
        return Err(corrupt(
          root,
          Corruption::CountMismatch {
            linear: stats.free_blocks,
            indexed,
          },
        ));
      }
    }

    Ok(stats)
  }

  /// Walks the heap without validating anything.
  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_size: self.heap.size(),
      ..HeapStats::default()
    };

    for block in self.blocks() {
      let size = unsafe { block.size() };
      stats.blocks += 1;
      if unsafe { block.is_free() } {
        stats.free_blocks += 1;
        stats.free_bytes += size;
        stats.largest_free = stats.largest_free.max(size);
      } else {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += size;
      }
    }

    stats
  }

  /// Runs [`check`](Self::check) and treats any finding as fatal: prints
  /// the offending block and the heap bounds, tears the heap down and
  /// exits the process.
  pub fn check_or_exit(
    &mut self,
    level: CheckLevel,
  ) {
    let Err(err) = self.check(level) else {
      return;
    };

    log::error!("heap check failed: {err}");
    eprintln!("\n{err}");
    if let AllocError::CorruptBlock { addr, .. } = err {
      eprintln!("{}", self.block_status(Block::from_addr(addr as *mut u8)));
    }
    eprintln!(
      "--Exit summary--\nheap area: {:p} to {:p}\nheap size: {:#x}",
      self.heap.low(),
      self.heap.high(),
      self.heap.size()
    );

    self.heap.teardown();
    process::exit(1);
  }

  /// Describes one block for diagnostics, reading only what its tags say
  /// can be read.
  pub fn block_status(
    &self,
    block: Block,
  ) -> String {
    let addr = block.addr() as usize;
    let low = self.heap.low() as usize;
    let high = self.heap.high() as usize;

    if addr < low || addr >= high || high - addr < MIN_BLOCK_SIZE || !is_aligned(addr) {
      return format!("block status: pointer invalid, {:p}", block.addr());
    }

    unsafe {
      let size = block.size();
      if size < MIN_BLOCK_SIZE || size > high - addr {
        return format!("block status: size invalid, {:p} ({size:#x})", block.addr());
      }
      if !block.tags_match() {
        return format!(
          "block status: header invalid, {:p} (header {:#x}, footer {:#x})",
          block.addr(),
          block.header(),
          block.footer()
        );
      }

      let mut status = match block.view() {
        BlockView::Allocated { .. } => format!("block status: allocated block {:p}", block.addr()),
        BlockView::Free {
          color,
          left,
          right,
          parent,
          ..
        } => format!(
          "block status: free block {:p} ({color:?}), left: {:p} right: {:p} parent: {:p}",
          block.addr(),
          left.addr(),
          right.addr(),
          parent.addr()
        ),
      };

      let before = if addr >= low + WORD_SIZE && block != self.prologue {
        walk::before(block).addr()
      } else {
        std::ptr::null_mut()
      };
      let _ = write!(
        status,
        "\nsize: {size:#x}, before: {:p} after: {:p}",
        before,
        walk::after(block).addr()
      );
      status
    }
  }
}
