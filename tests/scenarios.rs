use rballocator::{CheckLevel, Config, HeapSource, MemHeap, TreeAllocator};

fn allocator() -> TreeAllocator<MemHeap> {
  let _ = env_logger::builder().is_test(true).try_init();
  TreeAllocator::new(
    MemHeap::with_capacity(1 << 20),
    Config::default().with_check(CheckLevel::Full),
  )
  .unwrap()
}

fn free_sizes(allocator: &TreeAllocator<MemHeap>) -> Vec<usize> {
  allocator
    .free_blocks()
    .map(|block| unsafe { block.size() })
    .collect()
}

#[test]
fn best_fit_reuses_released_block() {
  let mut allocator = allocator();

  let p1 = allocator.allocate(100).unwrap();
  let _p2 = allocator.allocate(200).unwrap();
  allocator.release(p1.as_ptr());

  let size = allocator.heap().size();
  let p3 = allocator.allocate(90).unwrap();

  assert_eq!(p3, p1);
  assert_eq!(allocator.heap().size(), size);
}

#[test]
fn same_size_comes_back_at_same_address() {
  let mut allocator = allocator();

  let first = allocator.allocate(24).unwrap();
  allocator.release(first.as_ptr());
  let second = allocator.allocate(24).unwrap();

  assert_eq!(first, second);
  assert!(free_sizes(&allocator).is_empty());
}

#[test]
fn release_middle_then_right_then_left_merges_all_three() {
  let mut allocator = allocator();

  let a = allocator.allocate(40).unwrap();
  let b = allocator.allocate(40).unwrap();
  let c = allocator.allocate(40).unwrap();
  let _fence = allocator.allocate(40).unwrap();

  allocator.release(b.as_ptr());
  allocator.release(c.as_ptr());
  assert_eq!(free_sizes(&allocator), vec![112]);

  allocator.release(a.as_ptr());
  assert_eq!(free_sizes(&allocator), vec![168]);

  let merged = allocator.free_blocks().next().unwrap();
  assert_eq!(merged.payload(), a.as_ptr());
  assert_eq!(allocator.check(CheckLevel::Full).unwrap().free_blocks, 1);
}

#[test]
fn adjacent_releases_merge_in_either_order() {
  for left_first in [true, false] {
    let mut allocator = allocator();
    let a = allocator.allocate(64).unwrap();
    let b = allocator.allocate(64).unwrap();
    let _fence = allocator.allocate(8).unwrap();

    if left_first {
      allocator.release(a.as_ptr());
      allocator.release(b.as_ptr());
    } else {
      allocator.release(b.as_ptr());
      allocator.release(a.as_ptr());
    }

    assert_eq!(free_sizes(&allocator), vec![160]);
  }
}

#[test]
fn payload_is_usable_without_touching_tags() {
  let mut allocator = allocator();
  let mut live = Vec::new();

  for size in 1..=64usize {
    let ptr = allocator.allocate(size).unwrap();
    assert_eq!(ptr.as_ptr() as usize % 8, 0);
    unsafe { ptr.as_ptr().write_bytes(size as u8, size) };
    live.push((ptr, size));
  }

  allocator.check(CheckLevel::Full).unwrap();

  for (ptr, size) in live {
    let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
    assert!(bytes.iter().all(|&b| b == size as u8));
    allocator.release(ptr.as_ptr());
  }

  assert_eq!(allocator.stats().free_blocks, 1);
}

#[test]
fn released_tail_is_reused_before_growing() {
  let mut allocator = allocator();

  let big = allocator.allocate(1000).unwrap();
  let _fence = allocator.allocate(8).unwrap();
  allocator.release(big.as_ptr());
  let size = allocator.heap().size();

  let mut pieces = Vec::new();
  for _ in 0..10 {
    pieces.push(allocator.allocate(64).unwrap());
  }

  assert_eq!(allocator.heap().size(), size);
  for pair in pieces.windows(2) {
    assert_eq!(pair[1].as_ptr() as usize - pair[0].as_ptr() as usize, 80);
  }
}

#[test]
fn independent_allocators_do_not_share_state() {
  let mut one = allocator();
  let mut two = allocator();

  let a = one.allocate(32).unwrap();
  let b = two.allocate(32).unwrap();
  assert_ne!(a, b);

  one.release(b.as_ptr());
  assert_eq!(two.payload_size(b.as_ptr()), Some(32));
  assert_eq!(one.payload_size(a.as_ptr()), Some(32));
}
