//! Arena Allocator
//!
//! Bump-pointer allocator backing the skip list and the memtable entries.
//!
//! ## Responsibilities
//! - Hand out byte ranges that stay valid until the arena is dropped
//! - Keep per-allocation overhead near zero (no free list, no headers)
//! - Report an approximate memory footprint for memtable rotation
//!
//! ## Block Layout
//! ```text
//!   blocks[0]           blocks[1]            blocks[2] (dedicated)
//! ┌──────────────┐    ┌──────────────┐     ┌──────────────────────┐
//! │used│ wasted  │    │used │ free   │     │ one large allocation │
//! └──────────────┘    └─────┴────────┘     └──────────────────────┘
//!                           ▲
//!                       alloc_ptr, remaining
//! ```
//!
//! Requests larger than a quarter of the block size get a dedicated block so
//! the tail of the current block stays usable. Anything smaller that does not
//! fit abandons the current tail and opens a fresh standard block.

use std::alloc::{self, Layout};
use std::mem;
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Default standard block size (4 KB)
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Alignment guaranteed by [`Arena::allocate_aligned`]
pub const ALIGN: usize = if mem::size_of::<*const u8>() > 8 {
    mem::size_of::<*const u8>()
} else {
    8
};

/// Append-only memory region allocator
///
/// ## Concurrency:
/// - `allocate*`: the bump state sits behind a `Mutex`, so allocation is safe
///   from any thread. Inside a skip list every allocation after construction
///   happens under its writer lock, so this mutex is never contended there
/// - `Arena` is a public `Sync` type; the mutex keeps `allocate` safe for
///   callers that share one without that outer lock
/// - `memory_usage`: atomic, readable without the lock
pub struct Arena {
    /// Size of a standard block
    block_size: usize,
    /// Bump pointer state and owned blocks
    state: Mutex<ArenaState>,
    /// Total bytes owned, including per-block bookkeeping
    memory_usage: AtomicUsize,
}

struct ArenaState {
    alloc_ptr: *mut u8,
    remaining: usize,
    blocks: Vec<Block>,
}

struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the raw pointers refer to heap blocks exclusively owned by the arena.
unsafe impl Send for ArenaState {}

impl Arena {
    /// Create an arena with the default block size
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Create an arena with a custom standard block size
    pub fn with_block_size(block_size: usize) -> Self {
        assert!(block_size > 0, "arena block size must be positive");
        Self {
            block_size,
            state: Mutex::new(ArenaState {
                alloc_ptr: std::ptr::null_mut(),
                remaining: 0,
                blocks: Vec::new(),
            }),
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Allocate `bytes` zeroed bytes with no alignment guarantee
    ///
    /// The returned slice never overlaps any other slice handed out by this
    /// arena and lives as long as the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn allocate(&self, bytes: usize) -> &mut [u8] {
        assert!(bytes > 0, "zero-byte arena allocation");
        let ptr = {
            let mut state = self.state.lock();
            if bytes <= state.remaining {
                let ptr = state.alloc_ptr;
                // SAFETY: `bytes <= remaining` keeps the cursor inside the block.
                state.alloc_ptr = unsafe { ptr.add(bytes) };
                state.remaining -= bytes;
                ptr
            } else {
                self.allocate_fallback(&mut state, bytes)
            }
        };
        // SAFETY: `ptr..ptr+bytes` lies in a live zero-initialized block that is
        // handed out exactly once and freed only when `self` is dropped.
        unsafe { slice::from_raw_parts_mut(ptr, bytes) }
    }

    /// Allocate `bytes` zeroed bytes aligned to [`ALIGN`]
    #[allow(clippy::mut_from_ref)]
    pub fn allocate_aligned(&self, bytes: usize) -> &mut [u8] {
        assert!(bytes > 0, "zero-byte arena allocation");
        let ptr = {
            let mut state = self.state.lock();
            let current_mod = state.alloc_ptr as usize & (ALIGN - 1);
            let slop = if current_mod == 0 { 0 } else { ALIGN - current_mod };
            let needed = bytes + slop;
            if needed <= state.remaining {
                // SAFETY: `needed <= remaining` keeps both pointers inside the block.
                let ptr = unsafe { state.alloc_ptr.add(slop) };
                state.alloc_ptr = unsafe { state.alloc_ptr.add(needed) };
                state.remaining -= needed;
                ptr
            } else {
                // Fresh blocks always start on an ALIGN boundary.
                self.allocate_fallback(&mut state, bytes)
            }
        };
        debug_assert_eq!(ptr as usize & (ALIGN - 1), 0);
        // SAFETY: see `allocate`.
        unsafe { slice::from_raw_parts_mut(ptr, bytes) }
    }

    /// Estimate of the total memory owned by the arena
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }

    /// Standard block size
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn allocate_fallback(&self, state: &mut ArenaState, bytes: usize) -> *mut u8 {
        if bytes > self.block_size / 4 {
            // Dedicated block; the current block keeps serving small requests.
            return self.allocate_new_block(state, bytes);
        }

        // Abandon the rest of the current block.
        let ptr = self.allocate_new_block(state, self.block_size);
        // SAFETY: `bytes <= block_size / 4 < block_size`.
        state.alloc_ptr = unsafe { ptr.add(bytes) };
        state.remaining = self.block_size - bytes;
        ptr
    }

    fn allocate_new_block(&self, state: &mut ArenaState, block_bytes: usize) -> *mut u8 {
        let layout = match Layout::from_size_align(block_bytes, ALIGN) {
            Ok(layout) => layout,
            Err(_) => panic!("arena block of {} bytes exceeds the address space", block_bytes),
        };
        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        };
        state.blocks.push(Block { ptr, layout });
        self.memory_usage.fetch_add(
            block_bytes + mem::size_of::<*mut u8>(),
            Ordering::Relaxed,
        );
        ptr.as_ptr()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for block in self.state.get_mut().blocks.drain(..) {
            // SAFETY: every block was produced by `alloc_zeroed` with this layout.
            unsafe { alloc::dealloc(block.ptr.as_ptr(), block.layout) };
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("block_size", &self.block_size)
            .field("memory_usage", &self.memory_usage())
            .finish()
    }
}
