//! Purpose: Lock-free single-producer single-consumer hand-off between the
//! reader and validator threads.
//! Exports: `spsc_channel`, `Producer`, `Consumer`.
//! Role: The only synchronization on the hot path; never allocates, blocks,
//! or fails beyond "full"/"empty" flow control.
//! Invariants: Capacity is a compile-time power of two; one slot stays
//! reserved so `head == tail` means empty and `tail + 1 == head` means full.
//! Invariants: A slot's bytes are published before the index that exposes
//! them (release store paired with the other side's acquire load).
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

/// Create a bounded SPSC ring with `N` slots (`N - 1` usable). The
/// single-producer / single-consumer precondition is enforced by handle
/// ownership: each endpoint is `Send` but not `Clone`.
pub fn spsc_channel<T: Send, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let shared = Arc::new(Shared::<T, N>::new());
    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

struct Shared<T, const N: usize> {
    /// Consumer read position. Written only by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Producer write position. Written only by the producer.
    tail: CachePadded<AtomicUsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Slots are only ever touched by the side that owns them under the
// head/tail protocol, so sharing the struct across the two threads is sound
// for any T that can itself move between threads.
unsafe impl<T: Send, const N: usize> Sync for Shared<T, N> {}
unsafe impl<T: Send, const N: usize> Send for Shared<T, N> {}

impl<T, const N: usize> Shared<T, N> {
    const CAPACITY_IS_POWER_OF_TWO: () =
        assert!(N.is_power_of_two() && N >= 2, "ring capacity must be a power of two >= 2");
    const MASK: usize = N - 1;

    fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_POWER_OF_TWO;
        let mut slots = Vec::with_capacity(N);
        slots.resize_with(N, || UnsafeCell::new(MaybeUninit::uninit()));
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            slots: slots.into_boxed_slice(),
        }
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        tail.wrapping_sub(head) & Self::MASK
    }
}

impl<T, const N: usize> Drop for Shared<T, N> {
    fn drop(&mut self) {
        // Sole owner at this point; drain whatever the consumer never took.
        let mut head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        while head != tail {
            unsafe {
                (*self.slots[head].get()).assume_init_drop();
            }
            head = (head + 1) & Self::MASK;
        }
    }
}

pub struct Producer<T, const N: usize> {
    shared: Arc<Shared<T, N>>,
}

impl<T: Send, const N: usize> Producer<T, N> {
    /// Non-blocking push. Returns the item back when the ring is full so the
    /// caller can retry without a clone.
    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        let shared = &*self.shared;
        // Only this side writes `tail`, so a relaxed read sees its own value.
        let tail = shared.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & Shared::<T, N>::MASK;
        if next == shared.head.load(Ordering::Acquire) {
            return Err(item);
        }
        unsafe {
            (*shared.slots[tail].get()).write(item);
        }
        // Publish the slot write before the new index becomes visible.
        shared.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Approximate; for monitoring only.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        N - 1
    }
}

pub struct Consumer<T, const N: usize> {
    shared: Arc<Shared<T, N>>,
}

impl<T: Send, const N: usize> Consumer<T, N> {
    /// Non-blocking pop; `None` when the ring is empty.
    pub fn try_pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        // Only this side writes `head`, so a relaxed read sees its own value.
        let head = shared.head.load(Ordering::Relaxed);
        if head == shared.tail.load(Ordering::Acquire) {
            return None;
        }
        let item = unsafe { (*shared.slots[head].get()).assume_init_read() };
        // Hand the slot back before the producer can see the new index.
        shared.head.store((head + 1) & Shared::<T, N>::MASK, Ordering::Release);
        Some(item)
    }

    /// Approximate; for monitoring only.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        N - 1
    }
}
