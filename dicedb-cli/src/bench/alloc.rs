//! Per-thread allocation accounting.
//!
//! Install [`TrackingAllocator`] as the global allocator; every benchmark
//! worker runs on its own thread, so thread-local counters attribute
//! allocations to the worker that made them.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::Cell,
};

thread_local! {
    static COUNT: Cell<u64> = const { Cell::new(0) };
    static BYTES: Cell<u64> = const { Cell::new(0) };
}

pub struct TrackingAllocator;

fn record(size: usize) {
    // try_with: the counters may already be gone while the thread exits.
    let _ = COUNT.try_with(|count| count.set(count.get() + 1));
    let _ = BYTES.try_with(|bytes| bytes.set(bytes.get() + size as u64));
}

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        record(layout.size());
        System.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        record(layout.size());
        System.alloc_zeroed(layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        record(new_size);
        System.realloc(ptr, layout, new_size)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

/// Allocation totals for the current thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocSnapshot {
    pub count: u64,
    pub bytes: u64,
}

impl AllocSnapshot {
    pub fn current() -> Self {
        Self {
            count: COUNT.try_with(Cell::get).unwrap_or(0),
            bytes: BYTES.try_with(Cell::get).unwrap_or(0),
        }
    }

    pub fn since(self, earlier: AllocSnapshot) -> AllocSnapshot {
        AllocSnapshot {
            count: self.count.saturating_sub(earlier.count),
            bytes: self.bytes.saturating_sub(earlier.bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::hint::black_box;

    use super::*;

    #[global_allocator]
    static GLOBAL: TrackingAllocator = TrackingAllocator;

    #[test]
    fn counts_allocations_on_this_thread() {
        let before = AllocSnapshot::current();
        let buffer = black_box(vec![0u8; 4096]);
        let delta = AllocSnapshot::current().since(before);

        assert!(delta.count >= 1);
        assert!(delta.bytes >= 4096);
        drop(buffer);
    }

    #[test]
    fn other_threads_do_not_leak_into_this_one() {
        let before = AllocSnapshot::current();
        std::thread::scope(|scope| {
            scope.spawn(|| black_box(vec![0u8; 1 << 20]));
        });
        let delta = AllocSnapshot::current().since(before);

        assert!(delta.bytes < 1 << 20);
    }
}
