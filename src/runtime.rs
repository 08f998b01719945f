use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::fmt::Debug;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Device abstraction that performs the physical allocation of an arena.
///
/// The planner never touches memory itself: it asks the runtime for one
/// buffer once all offsets are decided and hands it back when dropped.
pub trait Runtime: Send + Sync + Debug {
    /// Human readable name used in diagnostics
    fn name(&self) -> &str;

    /// Allocate a buffer of `bytes` bytes
    fn alloc(&self, bytes: usize) -> Result<NonNull<u8>>;

    /// Release a buffer previously returned by [`Runtime::alloc`]
    fn dealloc(&self, ptr: NonNull<u8>);
}

/// Host memory runtime backed by the Rust global allocator
#[derive(Debug)]
pub struct CpuRuntime {
    alignment: usize,
    allocations: Mutex<HashMap<usize, Layout>>,
}

impl CpuRuntime {
    /// Base alignment of every buffer handed out (one cache line)
    pub const BUFFER_ALIGNMENT: usize = 64;

    pub fn new() -> Self {
        Self {
            alignment: Self::BUFFER_ALIGNMENT,
            allocations: Mutex::new(HashMap::new()),
        }
    }

    /// Number of buffers currently held by callers
    pub fn live_allocations(&self) -> usize {
        self.allocations.lock().map(|map| map.len()).unwrap_or(0)
    }
}

impl Default for CpuRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for CpuRuntime {
    fn name(&self) -> &str {
        "cpu"
    }

    fn alloc(&self, bytes: usize) -> Result<NonNull<u8>> {
        // A zero-byte layout cannot be allocated; an empty arena still gets a
        // valid base pointer
        let size = std::cmp::max(1, bytes);

        let layout = Layout::from_size_align(size, self.alignment).map_err(|e| {
            Error::RuntimeAllocation {
                runtime: self.name().to_string(),
                bytes,
                reason: e.to_string(),
            }
        })?;

        let mut allocations = self.allocations.lock().map_err(|_| Error::RuntimeAllocation {
            runtime: self.name().to_string(),
            bytes,
            reason: "allocation table lock poisoned".to_string(),
        })?;

        // SAFETY: layout has a non-zero size
        let ptr = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| Error::RuntimeAllocation {
            runtime: self.name().to_string(),
            bytes,
            reason: "out of memory".to_string(),
        })?;

        allocations.insert(ptr.as_ptr() as usize, layout);
        Ok(ptr)
    }

    fn dealloc(&self, ptr: NonNull<u8>) {
        let layout = match self.allocations.lock() {
            Ok(mut allocations) => allocations.remove(&(ptr.as_ptr() as usize)),
            Err(_) => {
                log::error!("cpu runtime: allocation table lock poisoned, leaking {:p}", ptr);
                return;
            }
        };

        match layout {
            // SAFETY: the pointer was produced by `alloc` with this layout
            Some(layout) => unsafe { alloc::dealloc(ptr.as_ptr(), layout) },
            None => log::warn!("cpu runtime: ignoring dealloc of unknown pointer {:p}", ptr),
        }
    }
}

impl Drop for CpuRuntime {
    fn drop(&mut self) {
        if let Ok(allocations) = self.allocations.get_mut() {
            for (ptr, layout) in allocations.drain() {
                // SAFETY: every entry was produced by `alloc` with this layout
                unsafe { alloc::dealloc(ptr as *mut u8, layout) };
            }
        }
    }
}
