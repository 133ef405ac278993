//! Cross-thread queues connecting ingress, matching, dispatch, and logging.
//!
//! Two shapes cover every edge in the pipeline:
//!
//! - [`SpscRing`]: a bounded lock-free ring for exactly one producer and one
//!   consumer. Used for the matching thread's log feeds, where dropping under
//!   extreme pressure is preferable to stalling the hot loop.
//! - [`EventQueue`]: a mutex/condvar queue whose `push` never drops. Used for
//!   the ingress event queue (many producers, per-producer FIFO) and the
//!   execution-report egress.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crossbeam_utils::CachePadded;

/// Bounded single-producer/single-consumer ring buffer.
///
/// Capacity is rounded up to a power of two. Cursors grow monotonically and
/// are masked on access; they live on separate cache lines so the producer
/// and consumer never contend on the same line. Synchronization is
/// acquire-release on the cursors; the buffer itself carries no locks.
///
/// The type is safe to share (`Arc`) but the contract is exactly one pushing
/// thread and one popping thread.
pub struct SpscRing<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Consumer cursor: next slot to read.
    head: CachePadded<AtomicUsize>,
    /// Producer cursor: next slot to write.
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T: Copy> SpscRing<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(2);
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffer,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Producer side. Returns false when the ring is full.
    #[inline]
    pub fn try_push(&self, value: T) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) == self.buffer.len() {
            return false;
        }
        unsafe {
            (*self.buffer[tail & self.mask].get()).write(value);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Consumer side. Returns `None` when the ring is empty.
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let value = unsafe { (*self.buffer[head & self.mask].get()).assume_init() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.buffer.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

/// Condvar-protected queue for the edges that must never drop.
///
/// Multiple producers are allowed; each producer's pushes are observed in
/// order, and no ordering is promised across producers (the matching thread
/// timestamps on dequeue, which is the authoritative order). `close` wakes
/// all waiters; after close, `wait_pop` drains what remains and then returns
/// `None`.
pub struct EventQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue an item. Never fails, never drops.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock().expect("event queue poisoned");
        inner.items.push_back(item);
        drop(inner);
        self.available.notify_one();
    }

    /// Non-blocking pop; `None` when currently empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("event queue poisoned");
        inner.items.pop_front()
    }

    /// Block until an item is available or the queue is closed and drained.
    pub fn wait_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("event queue poisoned");
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .available
                .wait(inner)
                .expect("event queue poisoned");
        }
    }

    /// Signal shutdown: wake every waiter. Items already queued remain
    /// poppable so consumers can drain before exiting.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("event queue poisoned");
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("event queue poisoned").closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("event queue poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
