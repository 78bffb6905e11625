//! Double-buffered worker caches (spec §4.5, §8.1–§8.3).
//!
//! A worker's cache is written by many concurrent producers (`offer`) and
//! drained by exactly one reader per tick (`read`). `read` swaps which of two
//! slots is "active" and hands back the contents of the slot that was active
//! until the swap, so producers never block on a tick and a tick never
//! observes a half-written batch.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Unbounded double buffer used by metrics workers: every offered item
/// survives until the next `read()`.
pub struct ReadWriteSafeCache<T> {
    slots: [Mutex<Vec<T>>; 2],
    active: AtomicUsize,
}

impl<T> ReadWriteSafeCache<T> {
    pub fn new() -> Self {
        Self {
            slots: [Mutex::new(Vec::new()), Mutex::new(Vec::new())],
            active: AtomicUsize::new(0),
        }
    }

    /// Buffers `item` into whichever slot is currently active. Never blocks
    /// behind a concurrent `read()` for longer than it takes to drain a slot.
    pub fn offer(&self, item: T) {
        let idx = self.active.load(Ordering::Acquire) & 1;
        self.slots[idx].lock().unwrap().push(item);
    }

    /// Flips the active slot and returns everything that had accumulated in
    /// the slot that was active until now. A producer racing this call either
    /// lands in the returned batch or the next one; it is never lost.
    pub fn read(&self) -> Vec<T> {
        let idx = self.active.fetch_xor(1, Ordering::AcqRel) & 1;
        let mut guard = self.slots[idx].lock().unwrap();
        std::mem::take(&mut *guard)
    }
}

impl<T> Default for ReadWriteSafeCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A bounded, size-`N` holder of the largest items offered to it.
///
/// Overflow evicts the current minimum; ties are resolved in favor of the
/// item already held (strict `>` below, never `>=`), so an equal-valued
/// latecomer never displaces an earlier arrival.
pub struct LimitedSizeBufferedData<T: Ord> {
    cap: usize,
    heap: BinaryHeap<Reverse<T>>,
}

impl<T: Ord> LimitedSizeBufferedData<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            heap: BinaryHeap::with_capacity(cap.max(1)),
        }
    }

    pub fn insert(&mut self, item: T) {
        if self.heap.len() < self.cap {
            self.heap.push(Reverse(item));
            return;
        }
        if let Some(Reverse(min)) = self.heap.peek() {
            if item > *min {
                self.heap.pop();
                self.heap.push(Reverse(item));
            }
        }
    }

    pub fn drain(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.heap, BinaryHeap::with_capacity(self.cap))
            .into_iter()
            .map(|Reverse(t)| t)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Double-buffered Top-N holder: same swap-on-read discipline as
/// [`ReadWriteSafeCache`], but each slot is a bounded [`LimitedSizeBufferedData`]
/// rather than an unbounded `Vec`, so total memory stays bounded by `2 * cap`.
pub struct TopNCache<T: Ord> {
    slots: [Mutex<LimitedSizeBufferedData<T>>; 2],
    active: AtomicUsize,
}

impl<T: Ord> TopNCache<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            slots: [
                Mutex::new(LimitedSizeBufferedData::new(cap)),
                Mutex::new(LimitedSizeBufferedData::new(cap)),
            ],
            active: AtomicUsize::new(0),
        }
    }

    pub fn offer(&self, item: T) {
        let idx = self.active.load(Ordering::Acquire) & 1;
        self.slots[idx].lock().unwrap().insert(item);
    }

    pub fn read(&self) -> Vec<T> {
        let idx = self.active.fetch_xor(1, Ordering::AcqRel) & 1;
        let mut guard = self.slots[idx].lock().unwrap();
        guard.drain()
    }

    /// Total items currently held across both slots. Exposed for tests that
    /// check the `2 * cap` memory bound (spec invariant 3).
    pub fn len(&self) -> usize {
        self.slots.iter().map(|s| s.lock().unwrap().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_safe_cache_round_trips_offers() {
        let cache = ReadWriteSafeCache::new();
        cache.offer(1);
        cache.offer(2);
        cache.offer(3);
        let batch = cache.read();
        assert_eq!(batch, vec![1, 2, 3]);
        assert!(cache.read().is_empty());
    }

    #[test]
    fn read_write_safe_cache_isolates_consecutive_batches() {
        let cache = ReadWriteSafeCache::new();
        cache.offer("a");
        let first = cache.read();
        cache.offer("b");
        let second = cache.read();
        assert_eq!(first, vec!["a"]);
        assert_eq!(second, vec!["b"]);
    }

    #[test]
    fn limited_size_buffered_data_keeps_the_largest_n() {
        let mut data = LimitedSizeBufferedData::new(3);
        for item in [5, 1, 9, 2, 8, 3] {
            data.insert(item);
        }
        let mut drained = data.drain();
        drained.sort_unstable();
        assert_eq!(drained, vec![5, 8, 9]);
    }

    #[test]
    fn limited_size_buffered_data_ties_favor_the_earlier_item() {
        let mut data = LimitedSizeBufferedData::new(2);
        data.insert((1, "first"));
        data.insert((2, "second"));
        // Same rank as the current minimum (1, "first"); must not evict it.
        data.insert((1, "latecomer"));
        let mut drained = data.drain();
        drained.sort_unstable();
        assert_eq!(drained, vec![(1, "first"), (2, "second")]);
    }

    #[test]
    fn topn_cache_bounds_total_memory_to_two_times_cap() {
        let cache: TopNCache<i32> = TopNCache::new(2);
        for item in 0..10 {
            cache.offer(item);
        }
        assert!(cache.len() <= 4);
        let top = cache.read();
        assert_eq!(top, vec![8, 9]);
    }
}
