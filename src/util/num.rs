/// Round `n` up to a multiple of `align`, which must be a power of two.
/// `None` if that overflows.
pub fn align_up(n: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    Some(n.checked_add(align - 1)? & !(align - 1))
}
