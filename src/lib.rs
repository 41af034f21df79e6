//! # rballocator - A Best-Fit Boundary-Tag Allocator
//!
//! This crate provides a general-purpose allocator over a single contiguous
//! heap that only grows at its high end. Free blocks are indexed by a
//! **red-black tree threaded through the free blocks themselves**, so the
//! allocator needs no metadata outside the heap it manages.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              HEAP                                    │
//!   │                                                                      │
//!   │  ┌──────────┬──────────┬───────┬──────────┬───────┬──────────────┐   │
//!   │  │ prologue │   nil    │  A1   │   free   │  A2   │     free     │   │
//!   │  └──────────┴──────────┴───────┴──────────┴───────┴──────────────┘   │
//!   │       │                            ▲                    ▲        ▲   │
//!   │       │  root                      │                    │        │   │
//!   │       └───────────────────► (tree node) ◄──────── (tree node)  break │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   allocate: best fit from the tree, split if the tail can stand alone,
//!             otherwise grow the heap.     O(log n)
//!   release:  merge with free neighbors, put the result in the tree.
//!                                           O(log n)
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rballocator
//!   ├── align      - Alignment macro (align!) and helpers
//!   ├── block      - Boundary tag and tree link codec
//!   ├── walk       - Neighbor lookups and linear heap walks
//!   ├── tree       - Red-black free tree
//!   ├── heap       - Heap growth sources (sbrk, fixed region)
//!   ├── allocator  - TreeAllocator: allocate / release / resize
//!   ├── check      - Consistency checker and heap statistics
//!   ├── config     - Check level configuration
//!   └── error      - AllocError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rballocator::{Config, MemHeap, TreeAllocator};
//!
//! let mut allocator = TreeAllocator::new(MemHeap::new(), Config::default()).unwrap();
//!
//! let ptr = allocator.allocate(100).unwrap().as_ptr();
//! unsafe { ptr.cast::<u64>().write(42) };
//!
//! let ptr = allocator.resize(ptr, 400).unwrap().as_ptr();
//! assert_eq!(unsafe { ptr.cast::<u64>().read() }, 42);
//!
//! allocator.release(ptr);
//! assert_eq!(allocator.stats().allocated_blocks, 0);
//! ```
//!
//! ## How It Works
//!
//! Every block carries its size and state twice, in a header and a footer,
//! so the block before any block can be found by reading the word in front
//! of it:
//!
//! ```text
//!   ┌────────┬──────────────────────────────┬────────┐
//!   │ header │          payload             │ footer │
//!   │ size|c|f│                              │ size|c|f│
//!   └────────┴──────────────────────────────┴────────┘
//!             ▲
//!             └── pointer returned to the caller
//!
//!   f: free bit    c: color bit (black)    size: multiple of 8
//! ```
//!
//! Once a block is free, the first three payload words hold its `left`,
//! `right` and `parent` tree links. The nil sentinel stands in for every
//! absent link, which keeps the tree code free of null checks.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: every operation takes `&mut self`
//! - **No shrinking**: memory is never handed back to the operating system
//! - **Adjacent coalescing only**: no compaction
//!
//! ## Safety
//!
//! [`TreeAllocator`] hands out raw pointers. Reading or writing past the
//! usable size of an allocation corrupts neighboring tags; the consistency
//! checker ([`CheckLevel`]) is there to catch that early.

pub mod align;
mod allocator;
pub mod block;
mod check;
mod config;
mod error;
mod heap;
pub mod tree;
pub mod walk;

pub use allocator::{SENTINEL_SIZE, TreeAllocator, block_size};
pub use check::HeapStats;
pub use config::{CHECK_ENV, CheckLevel, Config};
pub use error::{AllocError, Corruption};
pub use heap::{DEFAULT_CAPACITY, HeapSource, MemHeap, SbrkHeap};
