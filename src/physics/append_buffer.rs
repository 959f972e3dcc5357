use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed-capacity buffer with lock-free parallel append and exclusive
/// consumption. Producers reserve slots with a relaxed fetch-add; the
/// schedule edge between the producing and consuming stages is the
/// synchronization point, so no stronger ordering is needed. Capacity
/// overflow is a sizing bug and panics.
pub struct AppendBuffer<T: Copy> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    len: AtomicUsize,
}

// Safety: concurrent `push` calls write disjoint slots (each index is handed
// out exactly once by the fetch-add); reads require `&mut self`.
unsafe impl<T: Copy + Send> Sync for AppendBuffer<T> {}

impl<T: Copy> AppendBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));
        AppendBuffer {
            slots: slots.into_boxed_slice(),
            len: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).min(self.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a value from any thread of the producing stage.
    pub fn push(&self, value: T) {
        let idx = self.len.fetch_add(1, Ordering::Relaxed);
        assert!(
            idx < self.slots.len(),
            "append buffer overflow: capacity {} exhausted",
            self.slots.len()
        );
        unsafe {
            (*self.slots[idx].get()).write(value);
        }
    }

    pub fn as_slice(&mut self) -> &[T] {
        let len = self.len();
        // Safety: the first `len` slots were initialized by `push` and no
        // producer is running (`&mut self`).
        unsafe { std::slice::from_raw_parts(self.slots.as_ptr() as *const T, len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let len = self.len();
        // Safety: as in `as_slice`, plus exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.slots.as_mut_ptr() as *mut T, len) }
    }

    pub fn clear(&mut self) {
        *self.len.get_mut() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn parallel_pushes_are_all_retained() {
        let mut buffer: AppendBuffer<usize> = AppendBuffer::with_capacity(1024);
        (0..1024usize).into_par_iter().for_each(|i| buffer.push(i));

        assert_eq!(buffer.len(), 1024);
        let mut values: Vec<usize> = buffer.as_slice().to_vec();
        values.sort_unstable();
        assert_eq!(values, (0..1024).collect::<Vec<_>>());
    }

    #[test]
    fn clear_resets_length() {
        let mut buffer: AppendBuffer<u32> = AppendBuffer::with_capacity(4);
        buffer.push(7);
        buffer.clear();
        assert!(buffer.is_empty());
        buffer.push(9);
        assert_eq!(buffer.as_slice(), &[9]);
    }

    #[test]
    #[should_panic(expected = "append buffer overflow")]
    fn overflow_panics() {
        let buffer: AppendBuffer<u32> = AppendBuffer::with_capacity(1);
        buffer.push(1);
        buffer.push(2);
    }
}
