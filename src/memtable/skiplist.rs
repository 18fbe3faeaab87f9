//! Arena-backed Skip List
//!
//! Ordered index over opaque byte keys. Nodes and key bytes are carved out of
//! an [`Arena`] and are never moved or freed individually.
//!
//! ## Node Layout
//! ```text
//! ┌──────────┬─────────┬────────┬─────────┬─────────┬─────┬──────────────┐
//! │ key_ptr  │ key_len │ height │ next[0] │ next[1] │ ... │ next[h - 1]  │
//! └──────────┴─────────┴────────┴─────────┴─────────┴─────┴──────────────┘
//!   immutable once linked          AtomicPtr<Node>, mutated by insert only
//! ```
//!
//! ## Concurrency
//! - One writer at a time. `insert` holds the writer lock (which also guards
//!   the height RNG) for its whole duration.
//! - Readers (`contains`, iterators) never lock. Link stores are `Release` and
//!   link loads are `Acquire`, so a reader that reaches a node through a link
//!   also sees the node's key.
//! - `max_height` is `Relaxed`. A reader with a stale value starts lower or
//!   walks a few extra head links; both are harmless.
//! - There are no back links: `prev` re-searches from the head, O(log n).

use std::cmp::Ordering as CmpOrdering;
use std::mem;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::arena::Arena;
use crate::comparator::Comparator;

/// Maximum tower height
pub const MAX_HEIGHT: usize = 12;

/// Each level is kept with probability 1 / BRANCHING
const BRANCHING: u32 = 4;

const RNG_SEED: u64 = 0xdead_beef;

#[repr(C)]
struct Node {
    key_ptr: *const u8,
    key_len: usize,
    height: usize,
}

/// Size of a node header plus `height` link slots
fn node_size(height: usize) -> usize {
    mem::size_of::<Node>() + height * mem::size_of::<AtomicPtr<Node>>()
}

// The helpers below take raw node pointers rather than `&Node` so that the
// trailing link slots keep the provenance of the whole arena allocation.

/// SAFETY: `node` must be a live node of this list and `level < height`.
unsafe fn link<'a>(node: *const Node, level: usize) -> &'a AtomicPtr<Node> {
    debug_assert!(level < (*node).height);
    let slots = node.cast::<u8>().add(mem::size_of::<Node>()) as *const AtomicPtr<Node>;
    &*slots.add(level)
}

/// SAFETY: `node` must be a live node of this list.
unsafe fn node_key<'a>(node: *const Node) -> &'a [u8] {
    slice::from_raw_parts((*node).key_ptr, (*node).key_len)
}

unsafe fn next(node: *const Node, level: usize) -> *mut Node {
    link(node, level).load(Ordering::Acquire)
}

unsafe fn set_next(node: *const Node, level: usize, x: *mut Node) {
    link(node, level).store(x, Ordering::Release);
}

unsafe fn next_no_barrier(node: *const Node, level: usize) -> *mut Node {
    link(node, level).load(Ordering::Relaxed)
}

unsafe fn set_next_no_barrier(node: *const Node, level: usize, x: *mut Node) {
    link(node, level).store(x, Ordering::Relaxed);
}

/// Single-writer / multi-reader ordered set of byte keys
pub struct SkipList<C> {
    comparator: C,
    /// Owns every node and key byte
    arena: Arena,
    /// Sentinel with `MAX_HEIGHT` links and an empty key
    head: NonNull<Node>,
    /// Height of the tallest node linked so far
    max_height: AtomicUsize,
    /// Serializes writers; also the source of node heights
    writer: Mutex<StdRng>,
    len: AtomicUsize,
}

// SAFETY: nodes live in the owned arena and are only mutated through atomics
// by the single writer holding `writer`.
unsafe impl<C: Send> Send for SkipList<C> {}
unsafe impl<C: Sync> Sync for SkipList<C> {}

impl<C: Comparator> SkipList<C> {
    /// Create an empty list backed by a default-sized arena
    pub fn new(comparator: C) -> Self {
        Self::with_arena(comparator, Arena::new())
    }

    /// Create an empty list that allocates from `arena`
    pub fn with_arena(comparator: C, arena: Arena) -> Self {
        let head = Self::alloc_node(&arena, &[], MAX_HEIGHT);
        Self {
            comparator,
            arena,
            head,
            max_height: AtomicUsize::new(1),
            writer: Mutex::new(StdRng::seed_from_u64(RNG_SEED)),
            len: AtomicUsize::new(0),
        }
    }

    /// Insert `key` into the list.
    ///
    /// # Panics
    /// Panics if an equal key is already present.
    pub fn insert(&self, key: &[u8]) {
        let inserted = self.insert_with(key.len(), |buf| buf.copy_from_slice(key));
        assert!(inserted, "duplicate key inserted into skip list");
    }

    /// Insert a `len`-byte key that `fill` writes straight into arena memory.
    ///
    /// Returns `false`, linking nothing, if an equal key is already present.
    /// The arena bytes of a rejected key stay allocated until the list drops.
    pub fn insert_with<F>(&self, len: usize, fill: F) -> bool
    where
        F: FnOnce(&mut [u8]),
    {
        let mut rng = self.writer.lock();

        // Arena allocation only happens under the writer lock.
        let key: &[u8] = if len == 0 {
            fill(&mut []);
            &[]
        } else {
            let buf = self.arena.allocate(len);
            fill(&mut *buf);
            buf
        };

        let mut prev = [ptr::null_mut::<Node>(); MAX_HEIGHT];
        let x = self.find_greater_or_equal(key, Some(&mut prev));
        if !x.is_null() && self.equal(key, unsafe { node_key(x) }) {
            return false;
        }

        let height = random_height(&mut rng);
        let max_height = self.max_height();
        if height > max_height {
            for slot in prev.iter_mut().take(height).skip(max_height) {
                *slot = self.head.as_ptr();
            }
            // Readers that see the new height before the node is linked find
            // null head links at the new levels and simply drop a level.
            self.max_height.store(height, Ordering::Relaxed);
        }

        let node = Self::alloc_node(&self.arena, key, height).as_ptr();
        for (level, &before) in prev.iter().enumerate().take(height) {
            // SAFETY: `before` is the head or a linked node at least `level + 1`
            // tall, and `node` was allocated with `height` slots.
            unsafe {
                set_next_no_barrier(node, level, next_no_barrier(before, level));
                set_next(before, level, node);
            }
        }
        self.len.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// True if an entry equal to `key` is in the list
    pub fn contains(&self, key: &[u8]) -> bool {
        let x = self.find_greater_or_equal(key, None);
        !x.is_null() && self.equal(key, unsafe { node_key(x) })
    }

    /// Cursor over the list; see [`SkipListIter`]
    pub fn iter(&self) -> SkipListIter<'_, C> {
        SkipListIter {
            list: self,
            node: ptr::null(),
        }
    }

    /// Number of keys inserted
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate bytes held by the backing arena
    pub fn memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    // =========================================================================
    // Internal Search Helpers
    // =========================================================================

    fn max_height(&self) -> usize {
        self.max_height.load(Ordering::Relaxed)
    }

    fn equal(&self, a: &[u8], b: &[u8]) -> bool {
        self.comparator.compare(a, b) == CmpOrdering::Equal
    }

    /// True if `key` sorts after the key stored in `node`; null is +infinity
    fn key_is_after_node(&self, key: &[u8], node: *const Node) -> bool {
        !node.is_null() && self.comparator.compare(unsafe { node_key(node) }, key) == CmpOrdering::Less
    }

    /// First node with a key >= `key`, or null. Fills `prev` with the
    /// predecessor at every level when asked.
    fn find_greater_or_equal(
        &self,
        key: &[u8],
        mut prev: Option<&mut [*mut Node; MAX_HEIGHT]>,
    ) -> *mut Node {
        let mut x = self.head.as_ptr();
        let mut level = self.max_height() - 1;
        loop {
            // SAFETY: `x` is the head or a linked node taller than `level`.
            let next = unsafe { next(x, level) };
            if self.key_is_after_node(key, next) {
                x = next;
            } else {
                if let Some(prev) = prev.as_deref_mut() {
                    prev[level] = x;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    /// Last node with a key < `key`, or the head
    fn find_less_than(&self, key: &[u8]) -> *mut Node {
        let mut x = self.head.as_ptr();
        let mut level = self.max_height() - 1;
        loop {
            let next = unsafe { next(x, level) };
            if next.is_null()
                || self.comparator.compare(unsafe { node_key(next) }, key) != CmpOrdering::Less
            {
                if level == 0 {
                    return x;
                }
                level -= 1;
            } else {
                x = next;
            }
        }
    }

    /// Last node in the list, or the head if empty
    fn find_last(&self) -> *mut Node {
        let mut x = self.head.as_ptr();
        let mut level = self.max_height() - 1;
        loop {
            let next = unsafe { next(x, level) };
            if next.is_null() {
                if level == 0 {
                    return x;
                }
                level -= 1;
            } else {
                x = next;
            }
        }
    }

    /// Allocate a node referring to `key`, which must already live in `arena`
    /// (or be empty)
    fn alloc_node(arena: &Arena, key: &[u8], height: usize) -> NonNull<Node> {
        let key_ptr = if key.is_empty() {
            NonNull::<u8>::dangling().as_ptr() as *const u8
        } else {
            key.as_ptr()
        };

        let raw = arena.allocate_aligned(node_size(height)).as_mut_ptr() as *mut Node;
        // SAFETY: the block is aligned for `Node`, large enough for the header
        // plus `height` slots, and zeroed, which is a null `AtomicPtr`.
        unsafe {
            raw.write(Node {
                key_ptr,
                key_len: key.len(),
                height,
            });
            NonNull::new_unchecked(raw)
        }
    }
}

fn random_height(rng: &mut StdRng) -> usize {
    let mut height = 1;
    while height < MAX_HEIGHT && rng.gen_ratio(1, BRANCHING) {
        height += 1;
    }
    height
}

/// Positioned cursor over a [`SkipList`]
///
/// Safe to use while another thread inserts. Newly inserted keys may or may
/// not be observed depending on where the cursor is.
pub struct SkipListIter<'a, C> {
    list: &'a SkipList<C>,
    /// Current node; null when not positioned
    node: *const Node,
}

impl<'a, C: Comparator> SkipListIter<'a, C> {
    /// True if the cursor is positioned at a node
    pub fn valid(&self) -> bool {
        !self.node.is_null()
    }

    /// Key at the current position.
    ///
    /// # Panics
    /// Panics if the cursor is not valid.
    pub fn key(&self) -> &'a [u8] {
        assert!(self.valid(), "key() on an invalid skip list cursor");
        unsafe { node_key(self.node) }
    }

    /// Advance to the next key
    pub fn next(&mut self) {
        assert!(self.valid(), "next() on an invalid skip list cursor");
        self.node = unsafe { next(self.node, 0) };
    }

    /// Step back to the previous key
    pub fn prev(&mut self) {
        assert!(self.valid(), "prev() on an invalid skip list cursor");
        let node = self.list.find_less_than(self.key());
        self.node = self.unless_head(node);
    }

    /// Position at the first key >= `target`
    pub fn seek(&mut self, target: &[u8]) {
        self.node = self.list.find_greater_or_equal(target, None);
    }

    /// Position at the first key
    pub fn seek_to_first(&mut self) {
        self.node = unsafe { next(self.list.head.as_ptr(), 0) };
    }

    /// Position at the last key
    pub fn seek_to_last(&mut self) {
        let node = self.list.find_last();
        self.node = self.unless_head(node);
    }

    fn unless_head(&self, node: *mut Node) -> *const Node {
        if node == self.list.head.as_ptr() {
            ptr::null()
        } else {
            node
        }
    }
}
