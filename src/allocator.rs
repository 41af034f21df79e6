use std::ptr::{self, NonNull};

use crate::{
  align::{checked_align, is_aligned},
  block::{Block, Color, MIN_BLOCK_SIZE, State, TAG_OVERHEAD},
  config::{CheckLevel, Config},
  error::AllocError,
  heap::HeapSource,
  tree::FreeTree,
  walk::{self, Blocks},
};

/// Size of each of the two sentinel blocks laid down by
/// [`TreeAllocator::new`]. They carry tree links, so they need a full
/// minimum block.
pub const SENTINEL_SIZE: usize = MIN_BLOCK_SIZE;

/// Total block size needed to serve a request of `request` payload bytes,
/// or `None` if it does not fit in a `usize`.
pub fn block_size(request: usize) -> Option<usize> {
  let with_tags = request.checked_add(TAG_OVERHEAD)?;
  checked_align(with_tags).map(|size| size.max(MIN_BLOCK_SIZE))
}

/// Best-fit allocator over a single growable heap.
///
/// ```text
///   ┌──────────┬──────────┬────────┬────────┬────────┬─────────
///   │ prologue │   nil    │ alloc  │  free  │ alloc  │  ...   ▶ break
///   │ root ──┐ │ (black)  │        │        │        │
///   └────────┼─┴──────────┴────────┴────────┴────────┴─────────
///            └──────────────────────────▲
///                      free tree root
/// ```
///
/// All state lives in the heap bytes and in this value; several allocators
/// can run side by side over different [`HeapSource`]s.
pub struct TreeAllocator<H: HeapSource> {
  pub(crate) heap: H,
  pub(crate) tree: FreeTree,
  pub(crate) prologue: Block,
  pub(crate) config: Config,
}

impl<H: HeapSource> TreeAllocator<H> {
  /// Lays down the prologue and nil sentinels at the start of `heap` and
  /// wires an empty free tree onto them.
  pub fn new(
    mut heap: H,
    config: Config,
  ) -> Result<Self, AllocError> {
    let start = heap.grow(2 * SENTINEL_SIZE)?;
    let prologue = Block::from_addr(start.as_ptr());

    let tree = unsafe {
      prologue.pack(SENTINEL_SIZE, State::Allocated, Color::Red);
      let nil = walk::after(prologue);
      nil.pack(SENTINEL_SIZE, State::Allocated, Color::Black);
      FreeTree::new(prologue, nil)
    };

    log::debug!(
      "TreeAllocator::new(): prologue at {:p}, check level {:?}",
      prologue.addr(),
      config.check
    );

    Ok(Self {
      heap,
      tree,
      prologue,
      config,
    })
  }

  pub fn config(&self) -> Config {
    self.config
  }

  pub fn heap(&self) -> &H {
    &self.heap
  }

  /// First block after the sentinels. Equal to the break while nothing
  /// has been allocated.
  pub fn first_block(&self) -> Block {
    Block::from_addr(self.tree.nil().addr().wrapping_add(SENTINEL_SIZE))
  }

  /// Free blocks in non-decreasing size order.
  pub fn free_blocks(&self) -> impl Iterator<Item = Block> + '_ {
    unsafe { self.tree.iter() }
  }

  /// Every block between the sentinels and the break, in address order.
  pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
    unsafe { Blocks::new(self.first_block(), self.heap.high()) }
  }

  /// Returns an 8-byte aligned pointer to at least `size` usable bytes.
  ///
  /// Reuses the best-fitting free block when there is one, splitting off
  /// the tail if it is large enough to stand alone; otherwise grows the
  /// heap by exactly the block size.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let needed = block_size(size).ok_or(AllocError::HeapExhausted { requested: size })?;

    let block = match unsafe { self.take_fit(needed) } {
      Some(block) => block,
      None => self.extend(needed)?,
    };

    log::trace!(
      "allocate({size}) -> {:p} (block {:#x})",
      block.payload(),
      needed
    );
    self.verify();

    NonNull::new(block.payload()).ok_or(AllocError::HeapExhausted { requested: size })
  }

  /// Pulls the best fit for `needed` out of the tree and marks it
  /// allocated. A tail of at least a minimum block goes back in the tree.
  unsafe fn take_fit(
    &mut self,
    needed: usize,
  ) -> Option<Block> {
    unsafe {
      let fit = self.tree.search(needed);
      if fit == self.tree.nil() {
        return None;
      }

      self.tree.remove(fit);
      let size = fit.size();

      if size - needed < MIN_BLOCK_SIZE {
        fit.pack(size, State::Allocated, Color::Red);
      } else {
        fit.pack(needed, State::Allocated, Color::Red);
        let rest = walk::after(fit);
        rest.pack(size - needed, State::Free, Color::Red);
        // The tail is a new node with a new size.
        self.tree.insert(rest);
      }

      Some(fit)
    }
  }

  fn extend(
    &mut self,
    needed: usize,
  ) -> Result<Block, AllocError> {
    let start = self.heap.grow(needed).inspect_err(|err| {
      log::debug!("allocate: cannot grow heap by {needed:#x}: {err}");
    })?;

    let block = Block::from_addr(start.as_ptr());
    unsafe { block.pack(needed, State::Allocated, Color::Red) };

    log::debug!(
      "grew heap by {needed:#x} at {:p}, heap size now {:#x}",
      start,
      self.heap.size()
    );
    Ok(block)
  }

  /// Returns a block to the free tree, merging it with free neighbors.
  ///
  /// Anything that is not a live allocation of this heap (null, foreign,
  /// misaligned, already released) is ignored. A second release of the same
  /// pointer is therefore harmless until the block is handed out again.
  pub fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(block) = self.live_block(ptr) else {
      if !ptr.is_null() {
        log::warn!("release({:p}): not a live allocation, ignored", ptr);
      }
      return;
    };

    let merged = unsafe { self.coalesce(block) };
    log::trace!(
      "release({:p}) -> free block {:p} ({:#x})",
      ptr,
      merged.addr(),
      unsafe { merged.size() }
    );
    self.verify();
  }

  unsafe fn coalesce(
    &mut self,
    block: Block,
  ) -> Block {
    unsafe {
      let mut start = block;
      let mut size = block.size();

      // The nil sentinel precedes the first block, so `before` always
      // lands on a real block header.
      let previous = walk::before(block);
      if previous.is_free() {
        self.tree.remove(previous);
        size += previous.size();
        start = previous;
      }

      let next = walk::after(block);
      if next.addr() < self.heap.high() && next.is_free() {
        self.tree.remove(next);
        size += next.size();
        next.erase();
      }

      // Absorbed headers must not decode as live blocks any more.
      if start != block {
        block.erase();
      }

      start.pack(size, State::Free, Color::Red);
      self.tree.insert(start);
      start
    }
  }

  /// Moves an allocation into a block of `size` bytes, keeping the first
  /// `min(size, old size)` bytes. A null `ptr` is a plain allocation.
  ///
  /// On failure the original allocation is left untouched.
  pub fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if ptr.is_null() {
      return self.allocate(size);
    }

    let Some(old) = self.live_block(ptr) else {
      return Err(AllocError::InvalidPointer { addr: ptr as usize });
    };
    let old_payload = unsafe { old.size() } - TAG_OVERHEAD;

    let new = self.allocate(size)?;
    unsafe { ptr::copy_nonoverlapping(ptr, new.as_ptr(), size.min(old_payload)) };
    self.release(ptr);

    log::trace!("resize({:p}, {size}) -> {:p}", ptr, new);
    Ok(new)
  }

  /// Usable bytes behind a live allocation.
  pub fn payload_size(
    &self,
    ptr: *mut u8,
  ) -> Option<usize> {
    self
      .live_block(ptr)
      .map(|block| unsafe { block.size() } - TAG_OVERHEAD)
  }

  /// Maps a caller pointer back to its block if, and only if, it is the
  /// payload of a currently allocated block inside this heap.
  fn live_block(
    &self,
    ptr: *mut u8,
  ) -> Option<Block> {
    let addr = ptr as usize;
    let high = self.heap.high() as usize;
    if addr < self.first_block().payload() as usize || addr >= high || !is_aligned(addr) {
      return None;
    }

    let block = Block::from_payload(ptr);
    unsafe {
      let size = block.size();
      if size < MIN_BLOCK_SIZE || size > high - block.addr() as usize {
        return None;
      }
      if !block.tags_match() || !block.is_allocated() {
        return None;
      }
    }

    Some(block)
  }

  fn verify(&mut self) {
    if self.config.check != CheckLevel::Off {
      self.check_or_exit(self.config.check);
    }
  }
}
