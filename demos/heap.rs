use std::{env, io::Read};

use rballocator::{Config, SbrkHeap, TreeAllocator};

/// Waits until the user presses ENTER when running with `--step`.
/// Useful when you want to inspect memory state with tools like `pmap` or
/// `gdb` while the program break moves.
fn pause(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    SbrkHeap::program_break(),
  );
}

fn print_free_tree(allocator: &TreeAllocator<SbrkHeap>) {
  let sizes: Vec<usize> = allocator
    .free_blocks()
    .map(|block| unsafe { block.size() })
    .collect();
  println!("    free tree (in order): {:?}", sizes);
}

fn main() {
  env_logger::init();
  let step = env::args().any(|arg| arg == "--step");

  print_program_break("start");

  let heap = match SbrkHeap::new() {
    Ok(heap) => heap,
    Err(err) => {
      eprintln!("cannot start heap: {err}");
      return;
    }
  };
  let config = Config::from_env();
  let mut allocator = match TreeAllocator::new(heap, config) {
    Ok(allocator) => allocator,
    Err(err) => {
      eprintln!("cannot lay down sentinels: {err}");
      return;
    }
  };
  pause(step);

  // --------------------------------------------------------------------
  // 1) Three neighbors, A B C, each grown straight from the break.
  // --------------------------------------------------------------------
  let mut blocks = Vec::new();
  for (name, size) in [("A", 100), ("B", 200), ("C", 24)] {
    match allocator.allocate(size) {
      Ok(ptr) => {
        println!("[1] {name}: {size} bytes at {:p}", ptr);
        blocks.push(ptr.as_ptr());
      }
      Err(err) => {
        // The C library may have moved the break in between.
        eprintln!("[1] {name}: {err}");
        return;
      }
    }
  }
  print_program_break("after A B C");
  pause(step);

  // --------------------------------------------------------------------
  // 2) Release A, then ask for slightly less: A's block is reused.
  // --------------------------------------------------------------------
  allocator.release(blocks[0]);
  print_free_tree(&allocator);
  if let Ok(ptr) = allocator.allocate(90) {
    println!(
      "[2] 90 bytes at {:p}, reused A? {}",
      ptr,
      ptr.as_ptr() == blocks[0]
    );
    blocks[0] = ptr.as_ptr();
  }
  pause(step);

  // --------------------------------------------------------------------
  // 3) Release B, C, then A: the three merge into one free block.
  // --------------------------------------------------------------------
  for (name, ptr) in ["B", "C", "A"].iter().zip([blocks[1], blocks[2], blocks[0]]) {
    allocator.release(ptr);
    println!("[3] released {name}");
    print_free_tree(&allocator);
  }

  let stats = allocator.stats();
  println!(
    "\n[4] {} blocks, {} free ({} bytes), heap size {:#x}",
    stats.blocks, stats.free_blocks, stats.free_bytes, stats.heap_size
  );
  print_program_break("end");
}
