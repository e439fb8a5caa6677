//! Batch chunking for transactional writes.

/// Split `items` into ordered chunks of `chunk_size`; the last may be shorter.
///
/// # Panics
/// Panics if `chunk_size` is zero.
pub fn get_batches<T>(items: &[T], chunk_size: usize) -> Vec<&[T]> {
    assert!(chunk_size >= 1, "chunk_size must be at least 1");
    items.chunks(chunk_size).collect()
}
