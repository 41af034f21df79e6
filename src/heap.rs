use std::{
  alloc::{self, Layout},
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};

use crate::{align::ALIGNMENT, error::AllocError};

/// Default capacity of a [`MemHeap`]: 20 MiB.
pub const DEFAULT_CAPACITY: usize = 20 * (1 << 20);

/// A region that only ever grows at its high end.
///
/// Consecutive successful calls to [`grow`](HeapSource::grow) must return
/// adjacent regions; the allocator relies on the new bytes starting exactly
/// where the previous call ended.
pub trait HeapSource {
  /// Extends the heap by `delta` bytes and returns the start of the new
  /// bytes.
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<NonNull<u8>, AllocError>;

  /// First byte of the heap.
  fn low(&self) -> *mut u8;

  /// The current break: one past the last byte of the heap.
  fn high(&self) -> *mut u8;

  fn size(&self) -> usize {
    self.high() as usize - self.low() as usize
  }

  /// Gives the memory back. Only used by fatal diagnostics.
  fn teardown(&mut self);
}

/// A bounded heap carved out of one block from the system allocator.
///
/// Independent instances never share memory, which makes them suitable for
/// tests and for running several allocators side by side.
pub struct MemHeap {
  base: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

impl MemHeap {
  pub fn new() -> Self {
    Self::with_capacity(DEFAULT_CAPACITY)
  }

  /// Reserves `capacity` bytes (rounded up to the alignment unit).
  pub fn with_capacity(capacity: usize) -> Self {
    let capacity = crate::align!(capacity.max(ALIGNMENT));
    let layout = Self::layout(capacity);
    let base = unsafe { alloc::alloc_zeroed(layout) };
    let Some(base) = NonNull::new(base) else {
      alloc::handle_alloc_error(layout);
    };

    log::debug!("MemHeap::with_capacity({capacity:#x}) at {:p}", base);

    Self {
      base,
      capacity,
      brk: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  fn layout(capacity: usize) -> Layout {
    match Layout::from_size_align(capacity, ALIGNMENT) {
      Ok(layout) => layout,
      Err(_) => alloc::handle_alloc_error(Layout::new::<u8>()),
    }
  }
}

impl Default for MemHeap {
  fn default() -> Self {
    Self::new()
  }
}

impl HeapSource for MemHeap {
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let exhausted = AllocError::HeapExhausted { requested: delta };
    let new_brk = self.brk.checked_add(delta).ok_or(exhausted)?;
    if new_brk > self.capacity {
      log::debug!(
        "MemHeap::grow({delta:#x}): out of memory, break {:#x} of {:#x}",
        self.brk,
        self.capacity
      );
      return Err(exhausted);
    }

    let start = unsafe { self.base.add(self.brk) };
    self.brk = new_brk;
    Ok(start)
  }

  fn low(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  fn high(&self) -> *mut u8 {
    self.base.as_ptr().wrapping_add(self.brk)
  }

  fn teardown(&mut self) {
    self.brk = 0;
  }
}

impl Drop for MemHeap {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), Self::layout(self.capacity)) };
  }
}

/// The process heap, grown by moving the program break with `sbrk(2)`.
///
/// ```text
///   High Address ┌─────────────────────┐
///                │       Stack         │ ↓
///                │                     │
///                │       Heap          │ ↑ sbrk(delta)
///                ├─────────────────────┤ ← program break
///                │   Data / Text       │
///   Low Address  └─────────────────────┘
/// ```
///
/// Anything else in the process that moves the break (the C library's
/// `malloc` among them) breaks contiguity; `grow` notices and refuses.
pub struct SbrkHeap {
  low: *mut u8,
  high: *mut u8,
}

impl SbrkHeap {
  /// Starts a heap at the current program break, aligned up to the
  /// alignment unit.
  pub fn new() -> Result<Self, AllocError> {
    let current = unsafe { sbrk(0) } as *mut u8;
    if current as usize == usize::MAX {
      return Err(AllocError::HeapExhausted { requested: 0 });
    }

    let padding = crate::align!(current as usize) - current as usize;
    if padding > 0 {
      let address = unsafe { sbrk(padding as intptr_t) };
      if address == usize::MAX as *mut c_void {
        return Err(AllocError::HeapExhausted { requested: padding });
      }
    }

    let low = current.wrapping_add(padding);
    log::debug!("SbrkHeap::new(): program break at {:p}", low);

    Ok(Self { low, high: low })
  }

  /// The live program break as the kernel reports it.
  pub fn program_break() -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }
}

impl HeapSource for SbrkHeap {
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let Ok(increment) = intptr_t::try_from(delta) else {
      return Err(AllocError::HeapExhausted { requested: delta });
    };

    let current = Self::program_break();
    if current != self.high {
      return Err(AllocError::Discontiguous {
        expected: self.high as usize,
        found: current as usize,
      });
    }

    let address = unsafe { sbrk(increment) };
    if address == usize::MAX as *mut c_void {
      return Err(AllocError::HeapExhausted { requested: delta });
    }

    let start = address as *mut u8;
    self.high = start.wrapping_add(delta);
    NonNull::new(start).ok_or(AllocError::HeapExhausted { requested: delta })
  }

  fn low(&self) -> *mut u8 {
    self.low
  }

  fn high(&self) -> *mut u8 {
    self.high
  }

  fn teardown(&mut self) {
    let size = self.size();
    if size == 0 || Self::program_break() != self.high {
      return;
    }

    let Ok(decrement) = intptr_t::try_from(size) else {
      return;
    };
    unsafe { sbrk(-decrement) };
    self.high = self.low;
  }
}
