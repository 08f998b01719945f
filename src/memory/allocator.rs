use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::DataType;
use crate::runtime::Runtime;

/// Lifecycle of the arena: offsets are planned first, then the whole arena
/// is realized in one physical allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArenaState {
    Planning,
    Realized(NonNull<u8>),
}

/// Offset allocator planning non-overlapping byte ranges inside a single
/// growable arena.
///
/// `alloc` and `free` only move offsets around; no memory exists until
/// [`Allocator::get_ptr`] asks the runtime for a buffer of `peak` bytes.
/// Free ranges are kept in address order and coalesced eagerly, and freeing
/// the range at the end of the arena shrinks the arena instead.
#[derive(Debug)]
pub struct Allocator {
    runtime: Arc<dyn Runtime>,
    /// Live bytes
    used: usize,
    /// End of the last planned range, i.e. the current arena size
    peak: usize,
    /// Largest arena size seen so far
    high_water: usize,
    alignment: usize,
    /// Free block start address -> block size
    free_blocks: BTreeMap<usize, usize>,
    state: ArenaState,
}

impl Allocator {
    /// Create an allocator aligned to the widest supported element type
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            used: 0,
            peak: 0,
            high_water: 0,
            alignment: DataType::max_width(),
            free_blocks: BTreeMap::new(),
            state: ArenaState::Planning,
        }
    }

    /// Create an allocator with a custom alignment quantum
    pub fn with_alignment(runtime: Arc<dyn Runtime>, alignment: usize) -> Result<Self> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "Alignment must be a non-zero power of two, got {}",
                alignment
            )));
        }
        let mut allocator = Self::new(runtime);
        allocator.alignment = alignment;
        Ok(allocator)
    }

    /// Plan a range of `size` bytes and return its offset in the arena
    pub fn alloc(&mut self, size: usize) -> Result<usize> {
        self.ensure_planning("alloc")?;
        let size = self.aligned_size(size);
        if size == 0 {
            return Err(Error::InvalidArgument("Cannot allocate zero bytes".to_string()));
        }

        // First fit in address order
        let fit = self
            .free_blocks
            .iter()
            .find(|(_, &block_size)| block_size >= size)
            .map(|(&addr, &block_size)| (addr, block_size));

        let addr = match fit {
            Some((addr, block_size)) => {
                self.free_blocks.remove(&addr);
                if block_size > size {
                    self.free_blocks.insert(addr + size, block_size - size);
                }
                log::trace!("alloc {} bytes at {} (reused block of {})", size, addr, block_size);
                addr
            }
            None => {
                let addr = self.peak;
                self.peak += size;
                self.high_water = self.high_water.max(self.peak);
                log::trace!("alloc {} bytes at {} (arena grows to {})", size, addr, self.peak);
                addr
            }
        };

        self.used += size;
        Ok(addr)
    }

    /// Return the range `[addr, addr + size)` to the allocator
    pub fn free(&mut self, addr: usize, size: usize) -> Result<()> {
        self.ensure_planning("free")?;
        let size = self.aligned_size(size);
        if size == 0 {
            return Err(Error::InvalidArgument("Cannot free zero bytes".to_string()));
        }
        let end = addr.checked_add(size).ok_or_else(|| {
            Error::InvariantViolation(format!("Free range {}+{} overflows", addr, size))
        })?;
        if end > self.peak {
            return Err(Error::InvariantViolation(format!(
                "Free range [{}, {}) exceeds arena size {}",
                addr, end, self.peak
            )));
        }
        if self.used < size {
            return Err(Error::InvariantViolation(format!(
                "Freeing {} bytes with only {} bytes in use (double free or wrong size)",
                size, self.used
            )));
        }
        if let Some((free_addr, free_size)) = self.overlapping_free_block(addr, end) {
            return Err(Error::InvariantViolation(format!(
                "Free range [{}, {}) overlaps free block [{}, {})",
                addr,
                end,
                free_addr,
                free_addr + free_size
            )));
        }

        self.used -= size;

        if end == self.peak {
            self.peak = addr;
            // Reclaim the chain of free blocks now sitting at the tail
            while let Some((&last_addr, &last_size)) = self.free_blocks.iter().next_back() {
                if last_addr + last_size != self.peak {
                    break;
                }
                self.free_blocks.remove(&last_addr);
                self.peak = last_addr;
            }
            log::trace!("free {} bytes at {} (arena shrinks to {})", size, addr, self.peak);
            return Ok(());
        }

        let mut block_addr = addr;
        let mut block_size = size;

        if let Some(next_size) = self.free_blocks.remove(&end) {
            block_size += next_size;
        }

        let prev = self
            .free_blocks
            .range(..addr)
            .next_back()
            .map(|(&prev_addr, &prev_size)| (prev_addr, prev_size));
        if let Some((prev_addr, prev_size)) = prev {
            if prev_addr + prev_size == addr {
                block_addr = prev_addr;
                block_size += prev_size;
            }
        }

        self.free_blocks.insert(block_addr, block_size);
        log::trace!(
            "free {} bytes at {} (free block [{}, {}))",
            size,
            addr,
            block_addr,
            block_addr + block_size
        );
        Ok(())
    }

    /// Realize the arena on the first call and return its base pointer.
    ///
    /// The buffer spans the high-water mark, which is `peak` unless ranges
    /// at the tail were released during planning. Later calls return the
    /// same pointer.
    pub fn get_ptr(&mut self) -> Result<NonNull<u8>> {
        if let ArenaState::Realized(ptr) = self.state {
            return Ok(ptr);
        }
        let ptr = self.runtime.alloc(self.high_water)?;
        log::info!(
            "allocator realized {} bytes at {:p} on {}",
            self.high_water,
            ptr,
            self.runtime.name()
        );
        self.state = ArenaState::Realized(ptr);
        Ok(ptr)
    }

    /// Log current usage
    pub fn info(&self) {
        log::info!(
            "Used memory: {}, peak memory: {}, high-water mark: {}",
            self.used,
            self.peak,
            self.high_water
        );
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Largest arena size reached during planning
    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn is_realized(&self) -> bool {
        matches!(self.state, ArenaState::Realized(_))
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    /// Free blocks as `(address, size)` in ascending address order
    pub fn free_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.free_blocks.iter().map(|(&addr, &size)| (addr, size))
    }

    /// Round `size` up to a multiple of the alignment quantum
    pub fn aligned_size(&self, size: usize) -> usize {
        size.div_ceil(self.alignment) * self.alignment
    }

    fn ensure_planning(&self, call: &str) -> Result<()> {
        if self.is_realized() {
            return Err(Error::PreconditionViolation(format!(
                "{} called after the arena was realized",
                call
            )));
        }
        Ok(())
    }

    fn overlapping_free_block(&self, addr: usize, end: usize) -> Option<(usize, usize)> {
        // The only candidates are the last block starting before `end`
        self.free_blocks
            .range(..end)
            .next_back()
            .map(|(&free_addr, &free_size)| (free_addr, free_size))
            .filter(|&(free_addr, free_size)| free_addr + free_size > addr)
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        if let ArenaState::Realized(ptr) = self.state {
            self.runtime.dealloc(ptr);
        }
    }
}
