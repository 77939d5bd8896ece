//! The string compression boundary.
//!
//! The builder hands long strings (and, with
//! [`UsageMode::COMPRESS_SMALL_STRINGS`](crate::UsageMode::COMPRESS_SMALL_STRINGS),
//! short ones) to a [`StringCompressor`] and keeps the result only when it
//! saves enough space. The reader needs the same compressor to expand them.

/// Compresses and expands string bodies.
pub trait StringCompressor {
    /// Appends the compressed form of `input` to `out`.
    ///
    /// Returns `false` if the result would exceed `max_output` bytes; `out`
    /// may then hold partial output, which the caller discards.
    fn compress(&mut self, input: &[u8], max_output: usize, out: &mut Vec<u8>) -> bool;

    /// Appends the `len` bytes `input` was compressed from to `out`.
    ///
    /// Returns `false` for input this compressor did not produce.
    fn decompress(&self, input: &[u8], len: usize, out: &mut Vec<u8>) -> bool;
}

/// Byte-oriented run-length encoding as `(run, byte)` pairs.
///
/// Pays off only for strings with long runs, such as padding or repeated
/// separators.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLengthCompressor;

impl StringCompressor for RunLengthCompressor {
    fn compress(&mut self, input: &[u8], max_output: usize, out: &mut Vec<u8>) -> bool {
        let start = out.len();
        let mut rest = input;
        while let Some(&b) = rest.first() {
            let run = rest.iter().take(usize::from(u8::MAX)).take_while(|&&x| x == b).count();
            if out.len() - start + 2 > max_output {
                return false;
            }
            out.push(run as u8);
            out.push(b);
            rest = &rest[run..];
        }
        true
    }

    fn decompress(&self, input: &[u8], len: usize, out: &mut Vec<u8>) -> bool {
        if input.len() % 2 != 0 {
            return false;
        }
        let start = out.len();
        for pair in input.chunks_exact(2) {
            if pair[0] == 0 {
                return false;
            }
            out.extend(core::iter::repeat_n(pair[1], usize::from(pair[0])));
        }
        out.len() - start == len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_collapse_to_pairs() {
        let input = [b'a'; 300];
        let mut out = Vec::new();
        assert!(RunLengthCompressor.compress(&input, 16, &mut out));
        assert_eq!(out, [255, b'a', 45, b'a']);

        let mut back = Vec::new();
        assert!(RunLengthCompressor.decompress(&out, 300, &mut back));
        assert_eq!(back, input);
    }

    #[test]
    fn gives_up_past_the_output_limit() {
        let mut out = Vec::new();
        assert!(!RunLengthCompressor.compress(b"abcdef", 8, &mut out));
    }

    #[test]
    fn rejects_foreign_input() {
        let mut out = Vec::new();
        assert!(!RunLengthCompressor.decompress(&[3, b'x', 1], 4, &mut out));
        assert!(!RunLengthCompressor.decompress(&[3, b'x'], 4, &mut out));
    }
}
