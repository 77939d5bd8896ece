//! The tokenizer's string accumulation buffer.

use tracing::debug;

use crate::arena::MemoryBlock;
use crate::context::Context;
use crate::error::ContextError;

/// A growable byte buffer backed by short-lived context memory.
///
/// Grows in place while it is the last allocation of the arena, otherwise
/// moves to a block twice the size.
#[derive(Debug, Default)]
pub(crate) struct WriteBuffer {
    block: Option<MemoryBlock>,
    len: usize,
}

impl WriteBuffer {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }

    pub(crate) fn block(&self) -> Option<MemoryBlock> {
        self.block
    }

    pub(crate) fn write(&mut self, ctx: &mut Context, bytes: &[u8]) -> Result<(), ContextError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let block = self.reserve(ctx, bytes.len())?;
        let start = self.len;
        ctx.memory_mut(&block)?[start..start + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    pub(crate) fn write_byte(&mut self, ctx: &mut Context, b: u8) -> Result<(), ContextError> {
        self.write(ctx, &[b])
    }

    /// The bytes written since the last clear.
    pub(crate) fn bytes<'c>(&self, ctx: &'c Context) -> Result<&'c [u8], ContextError> {
        match self.block.and_then(|block| block.slice(0, self.len)) {
            Some(used) => ctx.memory(&used),
            None => Ok(&[]),
        }
    }

    /// Drops a block that belongs to an older generation of `ctx`.
    pub(crate) fn renew(&mut self, ctx: &Context) {
        if self.block.is_some_and(|block| block.generation() != ctx.generation()) {
            self.block = None;
        }
        self.len = 0;
    }

    /// Hands the block back to `ctx` if it is still current.
    pub(crate) fn dispose(&mut self, ctx: &mut Context) -> Result<(), ContextError> {
        self.len = 0;
        match self.block.take() {
            Some(block) if block.generation() == ctx.generation() => ctx.return_memory(block),
            _ => Ok(()),
        }
    }

    fn reserve(&mut self, ctx: &mut Context, extra: usize) -> Result<MemoryBlock, ContextError> {
        let needed = self.len + extra;
        let Some(mut block) = self.block else {
            let block = ctx.get_memory(needed.max(ctx.options().write_buffer_size))?;
            self.block = Some(block);
            return Ok(block);
        };
        if needed <= block.len() {
            return Ok(block);
        }

        let target = needed.max(block.len() * 2);
        let extra = target - block.len();
        if ctx.grow_memory(&mut block, extra)? {
            self.block = Some(block);
            return Ok(block);
        }

        let moved = ctx.get_memory(target)?;
        ctx.copy_memory(&block, &moved, self.len)?;
        ctx.return_memory(block)?;
        debug!(from = block.len(), to = target, "relocated tokenizer write buffer");
        self.block = Some(moved);
        Ok(moved)
    }
}
