//! The per-operation context.
//!
//! A [`Context`] owns two arenas. The short-lived arena holds everything an
//! operation needs while it runs: tokenizer buffers, copied strings, scratch
//! space. The long-lived arena holds interned field names, which repeat
//! across documents and stay valid while the context is reused.
//!
//! The context is recycled with [`Context::reset`] at the end of every
//! operation. A reset reclaims the short-lived arena by advancing the
//! generation, so every block handed out before the reset is rejected from
//! then on. When the long-lived arena has grown past
//! [`ContextOptions::long_lived_growth_threshold`] (or the caller forces it)
//! the reset also retires it together with the field-name cache, and
//! [`Context::renew`] creates a fresh one before the next operation.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use tracing::{debug, trace};

use crate::arena::{Arena, Generation, Lifetime, MemoryBlock};
use crate::builder::{PropertyTag, WriteToken};
use crate::error::{ContextError, MemoryError};
use crate::escape::find_escape_positions;
use crate::lazy_string::{LazyStr, LazyString};
use crate::options::ContextOptions;

const MAX_POOLED_LISTS: usize = 256;

/// Handle to an interned field name.
///
/// Handles stay valid across resets until the long-lived arena is retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId {
    index: u32,
    epoch: Generation,
}

impl FieldId {
    /// Position of the name in the context's cache.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Recycled `Vec`s for the document builder's frames.
#[derive(Debug)]
pub(crate) struct ListPool<T> {
    free: Vec<Vec<T>>,
}

impl<T> Default for ListPool<T> {
    fn default() -> Self {
        Self { free: Vec::new() }
    }
}

impl<T> ListPool<T> {
    pub(crate) fn rent(&mut self) -> Vec<T> {
        self.free.pop().unwrap_or_default()
    }

    pub(crate) fn give_back(&mut self, mut list: Vec<T>) {
        if list.capacity() == 0 || self.free.len() >= MAX_POOLED_LISTS {
            return;
        }
        list.clear();
        self.free.push(list);
    }

    fn clear(&mut self) {
        self.free.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.free.len()
    }
}

/// Memory, caches and pools for a sequence of operations on one thread.
#[derive(Debug)]
pub struct Context {
    options: ContextOptions,
    short_lived: Arena,
    long_lived: Option<Arena>,
    field_names: Vec<LazyString>,
    field_index: HashMap<Box<[u8]>, u32>,
    string_pool: Vec<LazyString>,
    pub(crate) property_lists: ListPool<PropertyTag>,
    pub(crate) element_lists: ListPool<WriteToken>,
    disposed: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(ContextOptions::default())
    }
}

impl Context {
    /// Creates a context with both arenas ready.
    #[must_use]
    pub fn new(options: ContextOptions) -> Self {
        let generation = Generation::INITIAL;
        Self {
            short_lived: Arena::new(
                Lifetime::ShortLived,
                options.initial_size,
                options.max_arena_size,
                generation,
            ),
            long_lived: Some(Arena::new(
                Lifetime::LongLived,
                options.long_lived_size,
                options.max_arena_size,
                generation,
            )),
            options,
            field_names: Vec::new(),
            field_index: HashMap::new(),
            string_pool: Vec::new(),
            property_lists: ListPool::default(),
            element_lists: ListPool::default(),
            disposed: false,
        }
    }

    /// The options the context was created with.
    #[must_use]
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// The current generation. Every reset advances it.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.short_lived.generation()
    }

    /// Whether [`dispose`](Self::dispose) was called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Bytes handed out by the short-lived arena in this generation.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.short_lived.allocated()
    }

    /// Bytes handed out by the long-lived arena, or `None` while it is
    /// retired.
    #[must_use]
    pub fn long_lived_allocated(&self) -> Option<usize> {
        self.long_lived.as_ref().map(Arena::allocated)
    }

    /// Number of interned field names.
    #[must_use]
    pub fn cached_field_names(&self) -> usize {
        self.field_names.len()
    }

    /// Number of disposed string wrappers waiting for reuse.
    #[must_use]
    pub fn pooled_strings(&self) -> usize {
        self.string_pool.len()
    }

    fn ensure_not_disposed(&self) -> Result<(), ContextError> {
        if self.disposed {
            Err(ContextError::Disposed)
        } else {
            Ok(())
        }
    }

    fn long_lived_mut(&mut self) -> Result<&mut Arena, ContextError> {
        self.long_lived.as_mut().ok_or(ContextError::LongLivedRetired)
    }

    fn arena_for(&self, block: &MemoryBlock) -> Result<&Arena, ContextError> {
        match block.lifetime() {
            Lifetime::ShortLived => Ok(&self.short_lived),
            Lifetime::LongLived => self.long_lived.as_ref().ok_or_else(|| self.retired(block)),
        }
    }

    fn arena_for_mut(&mut self, block: &MemoryBlock) -> Result<&mut Arena, ContextError> {
        match block.lifetime() {
            Lifetime::ShortLived => Ok(&mut self.short_lived),
            Lifetime::LongLived => {
                let err = self.retired(block);
                self.long_lived.as_mut().ok_or(err)
            }
        }
    }

    fn retired(&self, block: &MemoryBlock) -> ContextError {
        ContextError::Memory(MemoryError::UseAfterFree {
            lifetime: Lifetime::LongLived,
            block: block.generation(),
            current: self.generation(),
        })
    }

    // --------------------------------------------------------------------------------------------
    // Memory
    // --------------------------------------------------------------------------------------------

    /// Allocates per-operation memory, valid until the next reset.
    ///
    /// # Errors
    ///
    /// [`ContextError::Disposed`] or arena exhaustion.
    pub fn get_memory(&mut self, size: usize) -> Result<MemoryBlock, ContextError> {
        self.ensure_not_disposed()?;
        Ok(self.short_lived.allocate(size)?)
    }

    /// Allocates memory that survives resets until the long-lived arena is
    /// retired.
    ///
    /// # Errors
    ///
    /// [`ContextError::LongLivedRetired`] between a retiring reset and
    /// [`renew`](Self::renew).
    pub fn get_long_lived_memory(&mut self, size: usize) -> Result<MemoryBlock, ContextError> {
        self.ensure_not_disposed()?;
        Ok(self.long_lived_mut()?.allocate(size)?)
    }

    /// Extends `block` in place if it is the last allocation of its arena.
    ///
    /// # Errors
    ///
    /// Fails for stale blocks.
    pub fn grow_memory(&mut self, block: &mut MemoryBlock, extra: usize) -> Result<bool, ContextError> {
        self.ensure_not_disposed()?;
        Ok(self.arena_for_mut(block)?.grow(block, extra)?)
    }

    /// Gives a block back to the arena it came from.
    ///
    /// # Errors
    ///
    /// [`MemoryError::UseAfterFree`] if the block's generation has passed.
    pub fn return_memory(&mut self, block: MemoryBlock) -> Result<(), ContextError> {
        self.ensure_not_disposed()?;
        Ok(self.arena_for_mut(&block)?.release(block)?)
    }

    /// Reads a block.
    ///
    /// # Errors
    ///
    /// Fails for stale blocks.
    pub fn memory(&self, block: &MemoryBlock) -> Result<&[u8], ContextError> {
        self.ensure_not_disposed()?;
        Ok(self.arena_for(block)?.bytes(block)?)
    }

    /// Writes to a block.
    ///
    /// # Errors
    ///
    /// Fails for stale blocks.
    pub fn memory_mut(&mut self, block: &MemoryBlock) -> Result<&mut [u8], ContextError> {
        self.ensure_not_disposed()?;
        Ok(self.arena_for_mut(block)?.bytes_mut(block)?)
    }

    /// Copies the first `len` bytes of `src` into `dst`. Both blocks must
    /// come from the same arena.
    ///
    /// # Errors
    ///
    /// Fails for stale blocks or blocks of different arenas.
    pub fn copy_memory(&mut self, src: &MemoryBlock, dst: &MemoryBlock, len: usize) -> Result<(), ContextError> {
        self.ensure_not_disposed()?;
        if src.lifetime() != dst.lifetime() {
            let current = self.generation();
            return Err(ContextError::Memory(MemoryError::UseAfterFree {
                lifetime: dst.lifetime(),
                block: dst.generation(),
                current,
            }));
        }
        Ok(self.arena_for_mut(src)?.copy(src, dst, len)?)
    }

    // --------------------------------------------------------------------------------------------
    // Strings
    // --------------------------------------------------------------------------------------------

    fn pooled_string(&mut self, text: Option<&str>, span: MemoryBlock, owns_memory: bool) -> LazyString {
        match self.string_pool.pop() {
            Some(mut s) => {
                s.renew(text, span, owns_memory);
                s
            }
            None => {
                let s = LazyString::new(span, owns_memory);
                if let Some(text) = text {
                    let _ = s.decoded.set(text.to_owned());
                }
                s
            }
        }
    }

    /// Copies `text` into short-lived memory and wraps it.
    ///
    /// # Errors
    ///
    /// [`ContextError::Disposed`] or arena exhaustion.
    pub fn get_lazy_string(&mut self, text: &str) -> Result<LazyString, ContextError> {
        let block = self.get_memory(text.len())?;
        self.short_lived.bytes_mut(&block)?.copy_from_slice(text.as_bytes());
        let mut s = self.pooled_string(Some(text), block, true);
        find_escape_positions(text.as_bytes(), &mut s.escape_positions);
        Ok(s)
    }

    /// Wraps a block the caller filled. Disposing the string returns the
    /// block.
    pub fn wrap_memory(&mut self, block: MemoryBlock) -> LazyString {
        self.pooled_string(None, block, true)
    }

    /// Copies `len` bytes out of `src` into a new short-lived string with the
    /// given escape positions.
    pub(crate) fn copy_to_lazy_string(
        &mut self,
        src: &MemoryBlock,
        len: usize,
        escape_positions: &[usize],
    ) -> Result<LazyString, ContextError> {
        let block = self.get_memory(len)?;
        self.copy_memory(src, &block, len)?;
        let mut s = self.pooled_string(None, block, true);
        s.escape_positions.extend_from_slice(escape_positions);
        Ok(s)
    }

    /// Disposes `string` if needed and keeps the wrapper for reuse.
    ///
    /// # Errors
    ///
    /// The disposal errors of [`LazyString::dispose`].
    pub fn release_lazy_string(&mut self, mut string: LazyString) -> Result<(), ContextError> {
        if !string.is_disposed() {
            string.dispose(self)?;
        }
        if self.string_pool.len() < self.options.max_pooled_strings {
            self.string_pool.push(string);
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Field names
    // --------------------------------------------------------------------------------------------

    /// Interns a field name, returning a view of the cached copy.
    ///
    /// # Errors
    ///
    /// [`ContextError::LongLivedRetired`] between a retiring reset and
    /// [`renew`](Self::renew).
    pub fn intern_field_name(&mut self, text: &str) -> Result<LazyStr<'_>, ContextError> {
        let id = self.intern_field_id(text.as_bytes())?;
        let name = &self.field_names[id.index as usize];
        if name.decoded.get().is_none() {
            let _ = name.decoded.set(text.to_owned());
        }
        self.field_name(id)
    }

    /// Interns a field name given as UTF-8 bytes.
    ///
    /// # Errors
    ///
    /// [`ContextError::LongLivedRetired`] between a retiring reset and
    /// [`renew`](Self::renew).
    pub fn intern_field_id(&mut self, name: &[u8]) -> Result<FieldId, ContextError> {
        self.ensure_not_disposed()?;
        let arena = self.long_lived.as_mut().ok_or(ContextError::LongLivedRetired)?;
        let epoch = arena.generation();
        if let Some(&index) = self.field_index.get(name) {
            return Ok(FieldId { index, epoch });
        }

        let index = u32::try_from(self.field_names.len()).map_err(|_| MemoryError::Exhausted {
            requested: self.field_names.len(),
            limit: u32::MAX as usize,
        })?;
        let block = arena.allocate(name.len())?;
        arena.bytes_mut(&block)?.copy_from_slice(name);
        trace!(index, len = name.len(), "interned field name");

        let mut string = LazyString::new(block, false);
        find_escape_positions(name, &mut string.escape_positions);
        self.field_names.push(string);
        self.field_index.insert(name.into(), index);
        Ok(FieldId { index, epoch })
    }

    /// A view of an interned field name.
    ///
    /// # Errors
    ///
    /// [`ContextError::StaleFieldName`] for handles from a retired cache.
    pub fn field_name(&self, id: FieldId) -> Result<LazyStr<'_>, ContextError> {
        let arena = self.long_lived.as_ref().ok_or(ContextError::LongLivedRetired)?;
        let name = self
            .field_names
            .get(id.index as usize)
            .filter(|_| arena.generation() == id.epoch)
            .ok_or(ContextError::StaleFieldName { index: id.index })?;
        name.bind(self)
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Ends an operation.
    ///
    /// Reclaims all short-lived memory by advancing the generation and clears
    /// the list pools. The long-lived arena and the field-name cache are
    /// retired when they have grown past the configured threshold or when
    /// `force_release_long_lived` is set; call [`renew`](Self::renew) before
    /// the next operation needs them.
    ///
    /// # Errors
    ///
    /// [`ContextError::Disposed`].
    pub fn reset(&mut self, force_release_long_lived: bool) -> Result<(), ContextError> {
        self.ensure_not_disposed()?;
        let threshold = self.options.long_lived_growth_threshold;
        let retire = self
            .long_lived
            .as_ref()
            .is_some_and(|arena| force_release_long_lived || arena.allocated() > threshold);
        if retire {
            debug!(
                names = self.field_names.len(),
                allocated = self.long_lived_allocated(),
                forced = force_release_long_lived,
                "retiring long-lived arena"
            );
            self.long_lived = None;
            self.field_names.clear();
            self.field_index.clear();
        }

        self.short_lived.reset();
        self.property_lists.clear();
        self.element_lists.clear();
        debug!(generation = %self.generation(), retired = retire, "context reset");
        Ok(())
    }

    /// Prepares the context for the next operation, re-creating a retired
    /// long-lived arena.
    ///
    /// # Errors
    ///
    /// [`ContextError::Disposed`].
    pub fn renew(&mut self) -> Result<(), ContextError> {
        self.ensure_not_disposed()?;
        if self.long_lived.is_none() {
            debug!(generation = %self.generation(), "renewing long-lived arena");
            self.long_lived = Some(Arena::new(
                Lifetime::LongLived,
                self.options.long_lived_size,
                self.options.max_arena_size,
                self.generation(),
            ));
        }
        Ok(())
    }

    /// Releases all memory. Every later call fails with
    /// [`ContextError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let next = self.generation().next();
        self.short_lived = Arena::new(Lifetime::ShortLived, 0, 0, next);
        self.long_lived = None;
        self.field_names = Vec::new();
        self.field_index = HashMap::new();
        self.string_pool = Vec::new();
        self.property_lists.clear();
        self.element_lists.clear();
        self.disposed = true;
    }

    /// Switches both arenas to avoid-over-allocation mode until the returned
    /// scope is dropped.
    pub fn avoid_over_allocation(&mut self) -> AvoidOverAllocationScope<'_> {
        let previous = self.short_lived.avoids_over_allocation();
        self.set_avoid_over_allocation(true);
        AvoidOverAllocationScope { ctx: self, previous }
    }

    fn set_avoid_over_allocation(&mut self, enabled: bool) {
        self.short_lived.set_avoid_over_allocation(enabled);
        if let Some(arena) = self.long_lived.as_mut() {
            arena.set_avoid_over_allocation(enabled);
        }
    }
}

/// Keeps a [`Context`] in avoid-over-allocation mode while alive.
///
/// Dereferences to the context.
pub struct AvoidOverAllocationScope<'a> {
    ctx: &'a mut Context,
    previous: bool,
}

impl Deref for AvoidOverAllocationScope<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for AvoidOverAllocationScope<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for AvoidOverAllocationScope<'_> {
    fn drop(&mut self) {
        self.ctx.set_avoid_over_allocation(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Context {
        Context::new(ContextOptions {
            initial_size: 128,
            long_lived_size: 64,
            long_lived_growth_threshold: 64,
            ..Default::default()
        })
    }

    #[test]
    fn blocks_are_stamped_with_the_current_generation() {
        let mut ctx = small();
        let block = ctx.get_memory(8).unwrap();
        assert_eq!(block.generation(), ctx.generation());
        ctx.reset(false).unwrap();
        assert_eq!(ctx.generation(), Generation::INITIAL.next());
        assert!(matches!(
            ctx.return_memory(block),
            Err(ContextError::Memory(MemoryError::UseAfterFree { .. }))
        ));
    }

    #[test]
    fn interning_returns_the_cached_copy() {
        let mut ctx = small();
        let first = ctx.intern_field_id(b"Name").unwrap();
        let allocated = ctx.long_lived_allocated();
        let second = ctx.intern_field_id(b"Name").unwrap();
        assert_eq!(first, second);
        assert_eq!(ctx.long_lived_allocated(), allocated);
        assert_eq!(ctx.cached_field_names(), 1);
        assert_eq!(ctx.intern_field_name("Name").unwrap(), "Name");
    }

    #[test]
    fn field_names_survive_a_plain_reset() {
        let mut ctx = small();
        let id = ctx.intern_field_id(b"Id").unwrap();
        ctx.reset(false).unwrap();
        ctx.renew().unwrap();
        assert_eq!(ctx.field_name(id).unwrap(), "Id");
        assert_eq!(ctx.intern_field_id(b"Id").unwrap(), id);
    }

    #[test]
    fn forced_reset_retires_long_lived_memory() {
        let mut ctx = small();
        let id = ctx.intern_field_id(b"Id").unwrap();
        let block = ctx.get_long_lived_memory(4).unwrap();
        ctx.reset(true).unwrap();

        assert_eq!(ctx.get_long_lived_memory(4), Err(ContextError::LongLivedRetired));
        assert_eq!(ctx.intern_field_id(b"Id"), Err(ContextError::LongLivedRetired));

        ctx.renew().unwrap();
        assert_eq!(ctx.cached_field_names(), 0);
        assert_eq!(ctx.field_name(id).unwrap_err(), ContextError::StaleFieldName { index: 0 });
        assert!(matches!(
            ctx.memory(&block),
            Err(ContextError::Memory(MemoryError::UseAfterFree { .. }))
        ));
        let fresh = ctx.intern_field_id(b"Id").unwrap();
        assert_ne!(fresh, id);
    }

    #[test]
    fn long_lived_arena_retires_past_threshold() {
        let mut ctx = small();
        for i in 0..20 {
            ctx.intern_field_id(format!("property-{i}").as_bytes()).unwrap();
        }
        ctx.reset(false).unwrap();
        assert_eq!(ctx.long_lived_allocated(), None);
        ctx.renew().unwrap();
        assert_eq!(ctx.long_lived_allocated(), Some(0));
    }

    #[test]
    fn disposed_context_fails_fast() {
        let mut ctx = small();
        let block = ctx.get_memory(4).unwrap();
        ctx.dispose();
        assert_eq!(ctx.get_memory(4), Err(ContextError::Disposed));
        assert_eq!(ctx.memory(&block), Err(ContextError::Disposed));
        assert_eq!(ctx.intern_field_id(b"x"), Err(ContextError::Disposed));
        assert_eq!(ctx.reset(false), Err(ContextError::Disposed));
        assert_eq!(ctx.renew(), Err(ContextError::Disposed));
        assert!(ctx.is_disposed());
    }

    #[test]
    fn avoid_over_allocation_scope_restores_mode() {
        let mut ctx = small();
        {
            let mut scope = ctx.avoid_over_allocation();
            scope.get_memory(1000).unwrap();
            assert_eq!(scope.short_lived.capacity(), 1000);
            scope.reset(false).unwrap();
            assert_eq!(scope.short_lived.capacity(), 128);
        }
        assert!(!ctx.short_lived.avoids_over_allocation());
    }

    #[test]
    fn list_pools_are_cleared_on_reset() {
        let mut ctx = small();
        let mut list = ctx.property_lists.rent();
        list.reserve(4);
        ctx.property_lists.give_back(list);
        assert_eq!(ctx.property_lists.len(), 1);
        ctx.reset(false).unwrap();
        assert_eq!(ctx.property_lists.len(), 0);
    }
}
