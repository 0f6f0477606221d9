//! Min-heap keyed by a signed 64-bit timestamp (spec.md §4.B), ported from
//! `CFCore/include/OSHeap.h`. The original stores raw `OSHeapElem*` and
//! gives each element a back-pointer to its owning heap so `Remove` can
//! assert membership; we replace the pointer with an index-based
//! [`HeapHandle`] per spec §9's "use index-based handles into owning
//! arenas" redesign note. A handle stays valid across any number of other
//! inserts/removals: it names a stable slot id, not a raw array position,
//! and a side table tracks where that id currently lives after sifting.

use std::collections::HashMap;

/// Handle returned by [`Heap::insert`], valid until the element is removed
/// (by `remove` or by `extract_min` picking it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapHandle(u64);

struct Entry<T> {
    id: u64,
    key: i64,
    value: T,
}

/// An array-backed min-heap. `insert`, `peek_min`, `extract_min` and
/// `remove` are all O(log n).
pub struct Heap<T> {
    data: Vec<Entry<T>>,
    positions: HashMap<u64, usize>,
    next_id: u64,
}

impl<T> Heap<T> {
    pub fn new() -> Self {
        Heap {
            data: Vec::new(),
            positions: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Inserts `value` keyed by `key`, returning a handle for later removal.
    /// Contract: a handle must never be inserted twice (spec §4.B); this is
    /// naturally upheld since every call mints a fresh id.
    pub fn insert(&mut self, key: i64, value: T) -> HeapHandle {
        let id = self.next_id;
        self.next_id += 1;
        let idx = self.data.len();
        self.data.push(Entry { id, key, value });
        self.positions.insert(id, idx);
        self.sift_up(idx);
        HeapHandle(id)
    }

    pub fn peek_min(&self) -> Option<(i64, &T)> {
        self.data.first().map(|e| (e.key, &e.value))
    }

    pub fn extract_min(&mut self) -> Option<(i64, T)> {
        if self.data.is_empty() {
            return None;
        }
        let removed = self.remove_at(0).expect("index 0 exists when non-empty");
        Some(removed)
    }

    /// Removes the element identified by `handle`, if it is still present.
    pub fn remove(&mut self, handle: HeapHandle) -> Option<T> {
        let idx = *self.positions.get(&handle.0)?;
        self.remove_at(idx).map(|(_, v)| v)
    }

    fn remove_at(&mut self, idx: usize) -> Option<(i64, T)> {
        if idx >= self.data.len() {
            return None;
        }
        let last = self.data.len() - 1;
        self.swap(idx, last);
        let Entry { id, key, value } = self.data.pop().expect("just checked non-empty");
        self.positions.remove(&id);
        if idx < self.data.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
        Some((key, value))
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.data.swap(a, b);
        self.positions.insert(self.data[a].id, a);
        self.positions.insert(self.data[b].id, b);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.data[parent].key <= self.data[i].key {
                break;
            }
            self.swap(parent, i);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.data.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < n && self.data[left].key < self.data[smallest].key {
                smallest = left;
            }
            if right < n && self.data[right].key < self.data[smallest].key {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }
}

impl<T> Default for Heap<T> {
    fn default() -> Self {
        Heap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_basic_extract_order() {
        let mut heap = Heap::new();
        for key in [5, 3, 8, 1, 9, 2] {
            heap.insert(key, key);
        }
        let mut out = Vec::new();
        while let Some((k, _)) = heap.extract_min() {
            out.push(k);
        }
        assert_eq!(out, vec![1, 2, 3, 5, 8, 9]);
    }

    #[test]
    fn heap_remove_middle() {
        let mut heap = Heap::new();
        let h10 = heap.insert(10, 10);
        let h20 = heap.insert(20, 20);
        let h30 = heap.insert(30, 30);
        let h40 = heap.insert(40, 40);
        let _ = (h10, h30, h40);

        let removed = heap.remove(h20);
        assert_eq!(removed, Some(20));

        let mut out = Vec::new();
        while let Some((k, _)) = heap.extract_min() {
            out.push(k);
        }
        assert_eq!(out, vec![10, 30, 40]);
    }

    #[test]
    fn heap_invariant_holds_after_mixed_ops() {
        let mut heap = Heap::new();
        let mut handles = Vec::new();
        for key in [17, 3, 42, 8, 91, 2, 55, 6, 1, 23] {
            handles.push(heap.insert(key, key));
        }
        heap.remove(handles[2]);
        heap.remove(handles[5]);
        let mut out = Vec::new();
        while let Some((k, _)) = heap.extract_min() {
            out.push(k);
        }
        let mut sorted = out.clone();
        sorted.sort();
        assert_eq!(out, sorted);
    }

    #[test]
    fn handle_stays_valid_across_unrelated_churn() {
        let mut heap = Heap::new();
        let target = heap.insert(100, "target");
        for key in 0..200 {
            heap.insert(key, "noise");
        }
        assert_eq!(heap.remove(target), Some("target"));
    }

    #[test]
    fn removing_twice_is_a_noop_second_time() {
        let mut heap = Heap::new();
        let h = heap.insert(5, 5);
        assert_eq!(heap.remove(h), Some(5));
        assert_eq!(heap.remove(h), None);
    }

    #[test]
    fn empty_heap_peek_and_extract() {
        let mut heap: Heap<i32> = Heap::new();
        assert!(heap.peek_min().is_none());
        assert!(heap.extract_min().is_none());
    }
}
