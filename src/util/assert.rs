/// Test if `ptr` is aligned to a multiple of `align`
pub fn aligned_to<T>(ptr: *const T, align: usize) -> bool {
    ptr as usize % align == 0
}

/// Test if `ptr` lies in `[start, start + len)`
pub fn within<T>(ptr: *const T, start: *const u8, len: usize) -> bool {
    let (ptr, start) = (ptr as usize, start as usize);
    ptr >= start && ptr - start < len
}
