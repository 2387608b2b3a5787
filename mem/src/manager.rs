use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Minimum alignment handed to the allocator for translator-requested
/// blocks. The translator never tells us an alignment requirement (the
/// native `allocate`/`reallocate`/`free` trampolines are untyped byte
/// counts), so we pick the widest alignment any translator-side access
/// could plausibly need.
const BLOCK_ALIGN: usize = 16;

/// Serves the translator's `allocate`/`reallocate`/`free` exports and
/// tracks every outstanding block so `Dispose` can detect leaks.
///
/// Mirrors the `Mutex`-for-mutation / `Atomic*`-for-published-total split
/// `exec/src/tb_store.rs` uses for its own concurrent store (`hash:
/// Mutex<...>` beside `len: AtomicUsize`). Backing allocation goes through
/// `std::alloc`, not `libc::malloc`: the harness is the sole owner of the
/// memory's lifetime on both ends of the trampoline (nothing outside Rust
/// ever frees these pointers), so the global Rust allocator is the
/// idiomatic choice.
pub struct MemoryManager {
    blocks: Mutex<HashMap<usize, Layout>>,
    total: AtomicUsize,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        }
    }

    /// Total bytes currently outstanding across all allocations.
    pub fn total_allocated(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn outstanding_count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    /// Allocate `size` bytes and register the resulting host pointer.
    pub fn allocate(&self, size: usize) -> usize {
        if size == 0 {
            return 0;
        }
        let layout = Layout::from_size_align(size, BLOCK_ALIGN).expect("invalid layout");
        // SAFETY: layout has nonzero size.
        let ptr = unsafe { alloc::alloc(layout) };
        assert!(!ptr.is_null(), "allocation of {size} bytes failed");
        let addr = ptr as usize;
        let mut blocks = self.blocks.lock().unwrap();
        assert!(
            blocks.insert(addr, layout).is_none(),
            "duplicate registration of host pointer {addr:#x}"
        );
        self.total.fetch_add(size, Ordering::AcqRel);
        addr
    }

    /// Reallocate a previously allocated block. `ptr == 0` allocates;
    /// `size == 0` frees and returns 0.
    pub fn reallocate(&self, ptr: usize, size: usize) -> usize {
        if ptr == 0 {
            return self.allocate(size);
        }
        if size == 0 {
            self.free(ptr);
            return 0;
        }
        let old_layout = {
            let mut blocks = self.blocks.lock().unwrap();
            blocks
                .remove(&ptr)
                .unwrap_or_else(|| panic!("reallocate of unregistered host pointer {ptr:#x}"))
        };
        let new_layout = Layout::from_size_align(size, BLOCK_ALIGN).expect("invalid layout");
        // SAFETY: old_layout matches the allocation made for `ptr`.
        let new_ptr = unsafe { alloc::realloc(ptr as *mut u8, old_layout, new_layout.size()) };
        assert!(!new_ptr.is_null(), "reallocation to {size} bytes failed");
        let new_addr = new_ptr as usize;
        let mut blocks = self.blocks.lock().unwrap();
        blocks.insert(new_addr, new_layout);
        drop(blocks);

        let old_size = old_layout.size();
        if size >= old_size {
            self.total.fetch_add(size - old_size, Ordering::AcqRel);
        } else {
            self.total.fetch_sub(old_size - size, Ordering::AcqRel);
        }
        new_addr
    }

    /// Free a previously allocated block. Freeing an unregistered pointer
    /// is a bug in a collaborator and panics.
    pub fn free(&self, ptr: usize) {
        if ptr == 0 {
            return;
        }
        let layout = {
            let mut blocks = self.blocks.lock().unwrap();
            blocks
                .remove(&ptr)
                .unwrap_or_else(|| panic!("free of unregistered host pointer {ptr:#x}"))
        };
        // SAFETY: layout matches the allocation made for `ptr`, which is
        // no longer registered so cannot be freed twice through this path.
        unsafe { alloc::dealloc(ptr as *mut u8, layout) };
        self.total.fetch_sub(layout.size(), Ordering::AcqRel);
    }

    /// Assert there are no outstanding allocations. Called from `Dispose`.
    pub fn assert_empty(&self) {
        let blocks = self.blocks.lock().unwrap();
        assert!(
            blocks.is_empty(),
            "memory manager disposed with {} outstanding allocation(s)",
            blocks.len()
        );
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_free_round_trip() {
        let mgr = MemoryManager::new();
        let p = mgr.allocate(64);
        assert_ne!(p, 0);
        assert_eq!(mgr.total_allocated(), 64);
        mgr.free(p);
        assert_eq!(mgr.total_allocated(), 0);
        mgr.assert_empty();
    }

    #[test]
    #[should_panic(expected = "unregistered")]
    fn free_unregistered_is_fatal() {
        let mgr = MemoryManager::new();
        mgr.free(0xdead_beef);
    }

    #[test]
    fn reallocate_null_allocates() {
        let mgr = MemoryManager::new();
        let p = mgr.reallocate(0, 128);
        assert_ne!(p, 0);
        assert_eq!(mgr.total_allocated(), 128);
        mgr.free(p);
    }

    #[test]
    fn reallocate_zero_frees() {
        let mgr = MemoryManager::new();
        let p = mgr.allocate(128);
        let r = mgr.reallocate(p, 0);
        assert_eq!(r, 0);
        assert_eq!(mgr.total_allocated(), 0);
    }

    #[test]
    fn reallocate_adjusts_total_by_delta() {
        let mgr = MemoryManager::new();
        let p = mgr.allocate(64);
        let p2 = mgr.reallocate(p, 256);
        assert_eq!(mgr.total_allocated(), 256);
        mgr.free(p2);
        assert_eq!(mgr.total_allocated(), 0);
    }

    #[test]
    #[should_panic(expected = "outstanding")]
    fn assert_empty_fails_on_leak() {
        let mgr = MemoryManager::new();
        let _leak = mgr.allocate(32);
        mgr.assert_empty();
    }
}
