use bitflags::bitflags;

/// Sizing and pooling knobs for an [`Context`](crate::Context).
///
/// # Examples
///
/// ```rust
/// use blitjson::{Context, ContextOptions};
///
/// let ctx = Context::new(ContextOptions {
///     initial_size: 4 * 1024,
///     ..Default::default()
/// });
/// assert_eq!(ctx.generation().get(), 0);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    /// Initial backing storage of the short-lived arena, in bytes.
    ///
    /// # Default
    ///
    /// 64 KiB
    pub initial_size: usize,

    /// Initial backing storage of the long-lived arena that holds interned
    /// field names.
    ///
    /// # Default
    ///
    /// 16 KiB
    pub long_lived_size: usize,

    /// When the long-lived arena has handed out more than this many bytes,
    /// the next reset retires it together with the field-name cache.
    ///
    /// Documents with unbounded sets of property names would otherwise grow
    /// the cache forever.
    ///
    /// # Default
    ///
    /// Same as `initial_size`.
    pub long_lived_growth_threshold: usize,

    /// Hard limit for either arena. Requests beyond it fail with
    /// [`MemoryError::Exhausted`](crate::MemoryError::Exhausted).
    ///
    /// # Default
    ///
    /// 1 GiB
    pub max_arena_size: usize,

    /// Number of disposed string wrappers kept for reuse.
    ///
    /// # Default
    ///
    /// 25 000
    pub max_pooled_strings: usize,

    /// Initial size of a tokenizer's string accumulation buffer. The buffer
    /// grows in place or relocates when a longer string arrives.
    ///
    /// # Default
    ///
    /// 256 bytes
    pub write_buffer_size: usize,

    /// Refill chunk used by [`Context::read_object`](crate::Context::read_object).
    ///
    /// # Default
    ///
    /// 4 KiB
    pub stream_buffer_size: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        let initial_size = 64 * 1024;
        Self {
            initial_size,
            long_lived_size: 16 * 1024,
            long_lived_growth_threshold: initial_size,
            max_arena_size: 1 << 30,
            max_pooled_strings: 25_000,
            write_buffer_size: 256,
            stream_buffer_size: 4096,
        }
    }
}

bitflags! {
    /// How the document builder writes values.
    ///
    /// `UsageMode::empty()` writes every value verbatim.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct UsageMode: u8 {
        /// Reject floating point literals that do not parse as `f64` while
        /// building instead of when the value is read.
        const VALIDATE_DOUBLE = 0b0001;
        /// Offer strings longer than the small-string threshold to the
        /// configured compressor.
        const COMPRESS_STRINGS = 0b0010;
        /// Offer strings up to the small-string threshold to the configured
        /// compressor.
        const COMPRESS_SMALL_STRINGS = 0b0100;
        /// The combination used for documents headed to storage.
        const TO_DISK = Self::VALIDATE_DOUBLE.bits() | Self::COMPRESS_STRINGS.bits();
    }
}
