//! Stack arena: first-fit block carving from one static pool
//!
//! Blocks are kept in a chain ordered by address. Allocation walks the chain
//! looking for the first gap between neighbours wide enough for a header plus
//! the stack; failing that it extends at the top, where a trailing sentinel
//! header marks the end of the used region. Freeing unlinks, and pulls the
//! sentinel down when the highest block goes; interior holes are
//! rediscovered later by comparing neighbour addresses.
//!
//! Block descriptors live in a fixed side table addressed by [`BlockId`]; the
//! header bytes reserved in the pool hold guard words instead.
//!
//! Author: Moroya Sakamoto

use crate::config::{BLOCK_HEADER_SIZE, MAX_TASKS, STACK_ALIGN, WORD_SIZE};
use crate::error::{KernelError, Result};
use crate::log::ktrace;

/// Pattern written into every block header
pub const STACK_GUARD: usize = 0xDEAD_BEEF;

/// Maximum live blocks (one stack per task)
pub const MAX_BLOCKS: usize = MAX_TASKS;

/// Handle to a live block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockId(u8);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Memory block descriptor
///
/// Occupies `[offset, offset + BLOCK_HEADER_SIZE + size)` bytes of the pool.
#[derive(Debug, Clone, Copy)]
pub struct MemBlock {
    /// Byte offset of the header from the pool base
    pub offset: usize,
    /// Usable stack bytes above the header
    pub size: usize,
    prev: Option<BlockId>,
    next: Option<BlockId>,
}

impl MemBlock {
    /// First byte past this block
    pub fn end(&self) -> usize {
        self.offset + BLOCK_HEADER_SIZE + self.size
    }

    /// Byte offset of the lowest stack byte
    pub fn stack_offset(&self) -> usize {
        self.offset + BLOCK_HEADER_SIZE
    }
}

/// Round `size` up to the stack granularity
pub const fn align_up(size: usize) -> usize {
    (size + STACK_ALIGN - 1) / STACK_ALIGN * STACK_ALIGN
}

/// Stack pool storage, aligned for exception frames
#[repr(C, align(8))]
struct Pool<const WORDS: usize>([usize; WORDS]);

/// First-fit stack arena over a `WORDS`-word pool
pub struct Arena<const WORDS: usize> {
    pool: Pool<WORDS>,
    blocks: [Option<MemBlock>; MAX_BLOCKS],
    head: Option<BlockId>,
    tail: Option<BlockId>,
    /// Byte offset of the trailing sentinel header (end of the highest block)
    top: usize,
}

impl<const WORDS: usize> Arena<WORDS> {
    const POOL_BYTES: usize = WORDS * WORD_SIZE;

    pub const fn new() -> Self {
        Self {
            pool: Pool([0; WORDS]),
            blocks: [None; MAX_BLOCKS],
            head: None,
            tail: None,
            top: 0,
        }
    }

    /// Carve a block of at least `size` stack bytes
    pub fn allocate(&mut self, size: usize) -> Result<BlockId> {
        let size = align_up(size);
        let slot = self
            .blocks
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::OutOfMemory)?;
        let id = BlockId(slot as u8);

        let Some((offset, prev, next)) = self.find_gap(BLOCK_HEADER_SIZE + size) else {
            ktrace!("arena: no gap for {=usize} bytes", size);
            return Err(KernelError::OutOfMemory);
        };
        self.link(id, offset, size, prev, next);
        if next.is_none() {
            self.top = offset + BLOCK_HEADER_SIZE + size;
        }
        Ok(id)
    }

    /// Would `allocate(size)` succeed right now?
    pub fn fits(&self, size: usize) -> bool {
        self.blocks.iter().any(Option::is_none)
            && self.find_gap(BLOCK_HEADER_SIZE + align_up(size)).is_some()
    }

    /// Return a block to the arena
    pub fn free(&mut self, id: BlockId) {
        let Some(block) = self.blocks[id.index()].take() else {
            return;
        };
        match block.prev {
            Some(p) => self.get_mut(p).next = block.next,
            None => self.head = block.next,
        }
        match block.next {
            Some(n) => self.get_mut(n).prev = block.prev,
            None => {
                self.tail = block.prev;
                // The sentinel follows the highest live block down
                self.top = block.prev.map_or(0, |p| self.get(p).end());
            }
        }
    }

    /// First gap of `need` bytes: offset plus the neighbours to link between
    ///
    /// Interior gaps are tried in address order; above the highest block the
    /// pool must also keep room for the trailing sentinel header.
    fn find_gap(&self, need: usize) -> Option<(usize, Option<BlockId>, Option<BlockId>)> {
        let mut cursor = 0;
        let mut prev = None;
        let mut walk = self.head;
        while let Some(b) = walk {
            let block = self.get(b);
            if block.offset - cursor >= need {
                return Some((cursor, prev, Some(b)));
            }
            cursor = block.end();
            prev = Some(b);
            walk = block.next;
        }
        debug_assert_eq!(cursor, self.top);
        (self.top + need + BLOCK_HEADER_SIZE <= Self::POOL_BYTES).then_some((self.top, prev, None))
    }

    /// Descriptor of a live block
    pub fn block(&self, id: BlockId) -> Option<&MemBlock> {
        self.blocks.get(id.index()).and_then(Option::as_ref)
    }

    /// Stack words of a live block, lowest address first
    pub fn stack_mut(&mut self, id: BlockId) -> Option<&mut [usize]> {
        let block = *self.block(id)?;
        let lo = block.stack_offset() / WORD_SIZE;
        let hi = block.end() / WORD_SIZE;
        Some(&mut self.pool.0[lo..hi])
    }

    /// Address one past the highest stack byte (stacks grow down)
    pub fn stack_base(&self, id: BlockId) -> Option<usize> {
        let block = self.block(id)?;
        Some(self.pool.0.as_ptr() as usize + block.end())
    }

    /// Whether a block's guard words are untouched
    pub fn guard_intact(&self, id: BlockId) -> bool {
        match self.block(id) {
            Some(block) => {
                let lo = block.offset / WORD_SIZE;
                let hi = block.stack_offset() / WORD_SIZE;
                self.pool.0[lo..hi].iter().all(|&w| w == STACK_GUARD)
            }
            None => false,
        }
    }

    /// Live blocks in address order
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &MemBlock)> + '_ {
        let mut walk = self.head;
        core::iter::from_fn(move || {
            let id = walk?;
            let block = self.get(id);
            walk = block.next;
            Some((id, block))
        })
    }

    /// Number of live blocks
    pub fn live_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }

    /// Bytes not covered by a live block (gaps + headroom above the sentinel)
    pub fn free_bytes(&self) -> usize {
        let used: usize = self.iter().map(|(_, b)| BLOCK_HEADER_SIZE + b.size).sum();
        Self::POOL_BYTES - BLOCK_HEADER_SIZE - used
    }

    /// Pool size in bytes
    pub const fn capacity(&self) -> usize {
        Self::POOL_BYTES
    }

    fn link(&mut self, id: BlockId, offset: usize, size: usize, prev: Option<BlockId>, next: Option<BlockId>) {
        self.blocks[id.index()] = Some(MemBlock { offset, size, prev, next });
        match prev {
            Some(p) => self.get_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(n) => self.get_mut(n).prev = Some(id),
            None => self.tail = Some(id),
        }
        let lo = offset / WORD_SIZE;
        let hi = (offset + BLOCK_HEADER_SIZE) / WORD_SIZE;
        self.pool.0[lo..hi].fill(STACK_GUARD);
    }

    fn get(&self, id: BlockId) -> &MemBlock {
        match &self.blocks[id.index()] {
            Some(block) => block,
            None => unreachable!("chain links a freed block"),
        }
    }

    fn get_mut(&mut self, id: BlockId) -> &mut MemBlock {
        match &mut self.blocks[id.index()] {
            Some(block) => block,
            None => unreachable!("chain links a freed block"),
        }
    }
}

impl<const WORDS: usize> Default for Arena<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}
