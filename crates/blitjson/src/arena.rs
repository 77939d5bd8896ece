//! Generation-tagged bump allocation.
//!
//! An [`Arena`] hands out [`MemoryBlock`] handles instead of pointers. A
//! handle is an offset and a length into the arena's backing storage plus the
//! [`Generation`] the arena was in when the block was cut. Every access goes
//! through the arena, which compares the handle's generation with its own;
//! once [`Arena::reset`] advances the generation, every older handle is
//! rejected with [`MemoryError::UseAfterFree`] without the arena having to
//! visit the blocks it gave out.
//!
//! Because handles are offsets, growing the backing storage never invalidates
//! them.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, trace};

use crate::error::MemoryError;

/// A monotonically increasing epoch counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// The generation of a freshly created context.
    pub const INITIAL: Generation = Generation(0);

    /// The generation that follows this one.
    #[must_use]
    pub fn next(self) -> Generation {
        Generation(self.0.wrapping_add(1))
    }

    /// The raw counter value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which arena of a context a block was handed out by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Per-operation memory, reclaimed by every context reset.
    ShortLived,
    /// Memory that survives resets, such as interned field names.
    LongLived,
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lifetime::ShortLived => "short-lived",
            Lifetime::LongLived => "long-lived",
        })
    }
}

/// A handle to a run of bytes inside an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryBlock {
    offset: usize,
    len: usize,
    generation: Generation,
    lifetime: Lifetime,
}

impl MemoryBlock {
    /// Offset of the first byte inside the arena.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Size of the block in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the block holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte of the block.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Generation the block was allocated in.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The arena the block belongs to.
    #[must_use]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// A sub-range of this block with the same generation.
    ///
    /// Returns `None` if the range does not fit inside the block.
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> Option<MemoryBlock> {
        let end = start.checked_add(len)?;
        (end <= self.len).then_some(MemoryBlock {
            offset: self.offset + start,
            len,
            ..*self
        })
    }
}

/// A bump allocator over a growable byte buffer.
#[derive(Debug)]
pub struct Arena {
    buffer: Vec<u8>,
    used: usize,
    generation: Generation,
    lifetime: Lifetime,
    initial_size: usize,
    max_size: usize,
    avoid_over_allocation: bool,
    /// Freed blocks keyed by length, reused within the current generation.
    free: BTreeMap<usize, Vec<usize>>,
}

impl Arena {
    /// Creates an arena that starts at `generation` with `initial_size` bytes
    /// of backing storage and refuses to grow past `max_size`.
    #[must_use]
    pub fn new(lifetime: Lifetime, initial_size: usize, max_size: usize, generation: Generation) -> Self {
        let initial_size = initial_size.min(max_size);
        Self {
            buffer: vec![0; initial_size],
            used: 0,
            generation,
            lifetime,
            initial_size,
            max_size,
            avoid_over_allocation: false,
            free: BTreeMap::new(),
        }
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Bytes handed out since the last reset, including freed blocks that
    /// were not at the end of the bump region.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.used
    }

    /// Size of the backing storage.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Whether growth and reset keep the backing storage tight.
    #[must_use]
    pub fn avoids_over_allocation(&self) -> bool {
        self.avoid_over_allocation
    }

    /// Switches the avoid-over-allocation mode.
    ///
    /// While enabled the backing storage grows only by what a request needs,
    /// and a reset shrinks it back to the initial size.
    pub fn set_avoid_over_allocation(&mut self, enabled: bool) {
        self.avoid_over_allocation = enabled;
    }

    /// Hands out a block of at least `size` bytes.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Exhausted`] if the arena would have to grow past its
    /// limit.
    pub fn allocate(&mut self, size: usize) -> Result<MemoryBlock, MemoryError> {
        if let Some(block) = self.take_free(size) {
            return Ok(block);
        }

        let end = self.used.checked_add(size).ok_or(MemoryError::Exhausted {
            requested: usize::MAX,
            limit: self.max_size,
        })?;
        self.ensure_capacity(end)?;
        let block = MemoryBlock {
            offset: self.used,
            len: size,
            generation: self.generation,
            lifetime: self.lifetime,
        };
        self.used = end;
        Ok(block)
    }

    /// Extends `block` by `extra` bytes in place.
    ///
    /// Only the most recently allocated block can grow. Returns `Ok(false)`
    /// when the block cannot be extended; the caller then allocates a new
    /// block and copies.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UseAfterFree`] for a block of an older generation and
    /// [`MemoryError::Exhausted`] if the arena limit is reached.
    pub fn grow(&mut self, block: &mut MemoryBlock, extra: usize) -> Result<bool, MemoryError> {
        self.validate(block)?;
        if block.end() != self.used {
            return Ok(false);
        }
        let Some(end) = self.used.checked_add(extra) else {
            return Ok(false);
        };
        if end > self.max_size {
            return Ok(false);
        }
        self.ensure_capacity(end)?;
        self.used = end;
        block.len += extra;
        Ok(true)
    }

    /// Gives a block back to the arena.
    ///
    /// The most recently allocated block rolls the bump pointer back; any
    /// other block is kept on a free list for the rest of the generation.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UseAfterFree`] if the arena was reset since the block
    /// was allocated and [`MemoryError::AlreadyReleased`] if it overlaps a
    /// block that is already on the free list.
    pub fn release(&mut self, block: MemoryBlock) -> Result<(), MemoryError> {
        self.validate(&block)?;
        if block.is_empty() {
            return Ok(());
        }
        if self.is_free(&block) {
            return Err(MemoryError::AlreadyReleased {
                offset: block.offset,
                len: block.len,
            });
        }
        if block.end() == self.used {
            self.used = block.offset;
        } else {
            self.free.entry(block.len).or_default().push(block.offset);
        }
        Ok(())
    }

    /// Reads the bytes of a block.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UseAfterFree`] for a stale block.
    pub fn bytes(&self, block: &MemoryBlock) -> Result<&[u8], MemoryError> {
        self.validate(block)?;
        Ok(&self.buffer[block.offset..block.end()])
    }

    /// Mutable access to the bytes of a block.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UseAfterFree`] for a stale block.
    pub fn bytes_mut(&mut self, block: &MemoryBlock) -> Result<&mut [u8], MemoryError> {
        self.validate(block)?;
        Ok(&mut self.buffer[block.offset..block.end()])
    }

    /// Copies the first `len` bytes of `src` to the start of `dst`.
    ///
    /// # Errors
    ///
    /// Fails if either block is stale or `len` exceeds one of them.
    pub fn copy(&mut self, src: &MemoryBlock, dst: &MemoryBlock, len: usize) -> Result<(), MemoryError> {
        self.validate(src)?;
        self.validate(dst)?;
        if len > src.len || len > dst.len {
            return Err(MemoryError::OutOfRange {
                offset: src.offset,
                len,
                used: self.used,
            });
        }
        self.buffer.copy_within(src.offset..src.offset + len, dst.offset);
        Ok(())
    }

    /// Reclaims every block at once by moving to the next generation.
    pub fn reset(&mut self) {
        self.generation = self.generation.next();
        self.used = 0;
        self.free.clear();
        if self.avoid_over_allocation && self.buffer.len() > self.initial_size {
            debug!(
                lifetime = %self.lifetime,
                from = self.buffer.len(),
                to = self.initial_size,
                "shrinking arena"
            );
            self.buffer.truncate(self.initial_size);
            self.buffer.shrink_to_fit();
        }
    }

    fn validate(&self, block: &MemoryBlock) -> Result<(), MemoryError> {
        if block.generation != self.generation || block.lifetime != self.lifetime {
            debug!(
                lifetime = %block.lifetime,
                block = %block.generation,
                current = %self.generation,
                "rejected stale memory block"
            );
            return Err(MemoryError::UseAfterFree {
                lifetime: block.lifetime,
                block: block.generation,
                current: self.generation,
            });
        }
        if !block.is_empty() && block.end() > self.used {
            return Err(MemoryError::OutOfRange {
                offset: block.offset,
                len: block.len,
                used: self.used,
            });
        }
        Ok(())
    }

    fn is_free(&self, block: &MemoryBlock) -> bool {
        self.free.iter().any(|(&len, offsets)| {
            offsets
                .iter()
                .any(|&offset| offset < block.end() && block.offset < offset + len)
        })
    }

    fn take_free(&mut self, size: usize) -> Option<MemoryBlock> {
        if size == 0 {
            return None;
        }
        let len = *self.free.range(size..=size.saturating_mul(2)).next()?.0;
        let offsets = self.free.get_mut(&len)?;
        let offset = offsets.pop()?;
        if offsets.is_empty() {
            self.free.remove(&len);
        }
        Some(MemoryBlock {
            offset,
            len,
            generation: self.generation,
            lifetime: self.lifetime,
        })
    }

    fn ensure_capacity(&mut self, end: usize) -> Result<(), MemoryError> {
        if end <= self.buffer.len() {
            return Ok(());
        }
        if end > self.max_size {
            return Err(MemoryError::Exhausted {
                requested: end,
                limit: self.max_size,
            });
        }
        let target = if self.avoid_over_allocation {
            end
        } else {
            end.max(self.buffer.len().saturating_mul(2)).min(self.max_size)
        };
        trace!(lifetime = %self.lifetime, from = self.buffer.len(), to = target, "growing arena");
        self.buffer.resize(target, 0);
        Ok(())
    }
}
