//! Helpers that split a payload into the buffers a network reader would see.

/// Split `payload` into `parts` approximately equal-sized chunks.
///
/// Chunks are raw bytes and may cut through a UTF-8 sequence.
///
/// # Panics
///
/// Panics if `parts` is zero.
#[must_use]
pub fn produce_chunks(payload: &[u8], parts: usize) -> Vec<&[u8]> {
    assert!(parts > 0);
    let chunk_size = payload.len().div_ceil(parts).max(1);
    payload.chunks(chunk_size).collect()
}

/// Split `payload` into chunks whose sizes are derived from `seed`.
///
/// Every chunk is at least one byte long and the same seed always yields the
/// same split.
#[must_use]
pub fn split_with_seed(payload: &[u8], seed: u64) -> Vec<&[u8]> {
    let mut chunks = Vec::new();
    let mut state = seed | 1;
    let mut rest = payload;
    while !rest.is_empty() {
        // xorshift64
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let size = usize::try_from(state % rest.len() as u64).unwrap_or(0) + 1;
        let (chunk, tail) = rest.split_at(size);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}
