/// Every block size and every payload address is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Rounds the given size up to the allocator's alignment unit.
///
/// # Examples
///
/// ```rust
/// use rballocator::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(0), 0);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Same as [`align!`] but returns `None` instead of wrapping around.
pub fn checked_align(value: usize) -> Option<usize> {
  value
    .checked_add(ALIGNMENT - 1)
    .map(|v| v & !(ALIGNMENT - 1))
}

pub fn is_aligned(addr: usize) -> bool {
  addr & (ALIGNMENT - 1) == 0
}
