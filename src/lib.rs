//! A lock-free concurrent stack with epoch-based memory reclamation.
//!
//! Any number of threads may push and pop concurrently. Elements are stored
//! in a pool of reusable nodes rather than allocated per push, and nodes
//! removed from the stack are recycled through an epoch protocol that keeps
//! them alive for as long as a racing pop could still be reading them.
//!
//! # Usage
//!
//! ```rust
//! use epoch_stack::Stack;
//! use std::sync::Arc;
//!
//! let stack = Arc::new(Stack::new());
//!
//! let producer = {
//!     let stack = stack.clone();
//!     std::thread::spawn(move || {
//!         for i in 0..8 {
//!             stack.push(i).expect("the stack is not shut down");
//!         }
//!     })
//! };
//!
//! producer.join().unwrap();
//!
//! let mut drained = Vec::new();
//! while let Some(i) = stack.pop() {
//!     drained.push(i);
//! }
//! assert_eq!(drained, vec![7, 6, 5, 4, 3, 2, 1, 0]);
//! ```
//!
//! # How it works
//!
//! The stack itself is a single atomic head index threading through an
//! intrusive chain of nodes:
//!
//! ```text
//!    head ──▶ ┌────────┐      ┌────────┐      ┌────────┐
//!             │ item C │      │ item B │      │ item A │
//!             │  next──┼─────▶│  next──┼─────▶│  next──┼──▶ nil
//!             └────────┘      └────────┘      └────────┘
//! ```
//!
//! A push links a node in with one compare-and-swap on `head`; a pop detaches
//! the head node the same way. Neither operation loops more than its
//! compare-and-swap fails, so a stalled thread never blocks the others.
//!
//! Nodes live in pages owned by the worker that allocated them, and a node is
//! named by a packed index (worker ID plus page address) rather than a
//! pointer. Popped nodes are *retired*, not freed: each worker publishes the
//! epoch it is operating in, the epoch only advances once every active worker
//! has caught up, and a retired node rejoins the shared free pool two epochs
//! after its removal. By then, no pop started before the removal can still be
//! reading the node, so reusing it is safe without per-element allocation.
//!
//! # Configuration
//!
//! Capacity and pacing parameters are compile-time constants, supplied by
//! implementing [`Config`]. [`Stack::new_with_config`] checks the parameters
//! at construction:
//!
//! ```rust
//! use epoch_stack::{Config, Stack};
//!
//! struct Small;
//!
//! impl Config for Small {
//!     const INITIAL_PAGE_SIZE: usize = 8;
//!     const MAX_PAGES: usize = 3;
//! }
//!
//! let stack: Stack<String, Small> = Stack::new_with_config();
//! stack.push("hello".to_string()).unwrap();
//! ```
//!
//! # Implementation notes
//!
//! A thread that pushes or pops is assigned a worker ID for as long as it
//! lives, and a stack panics if more than [`Config::MAX_WORKERS`] threads
//! touch it at once. Node storage is only returned to the allocator when the
//! stack itself is dropped; the pool exists to recycle nodes, not to shrink.

#[macro_use]
mod macros;

pub(crate) mod cfg;
mod epoch;
mod free;
mod page;
pub(crate) mod sync;
mod tid;
mod util;
mod worker;

#[cfg(test)]
mod tests;

pub use cfg::{Config, DefaultConfig};
pub(crate) use tid::Tid;

use cfg::CfgPrivate;
use free::FreeList;
use page::Slot;
use sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use util::{Backoff, CachePadded};
use worker::Worker;

use std::{fmt, marker::PhantomData};

/// The `next` link of a node at the bottom of a list.
pub(crate) const NIL: usize = std::usize::MAX;

/// A lock-free stack of values of type `T`.
///
/// Pushing and popping never block: every operation completes in a bounded
/// number of its own steps plus one compare-and-swap retry per concurrent
/// modification it loses to. The stack may be shared by reference or inside
/// an [`Arc`](std::sync::Arc); all methods take `&self`.
pub struct Stack<T, C: cfg::Config = DefaultConfig> {
    /// The packed index of the most recently pushed node.
    head: CachePadded<AtomicUsize>,
    /// Set once by [`Stack::shutdown`]; never cleared.
    shutdown: AtomicBool,
    /// The global epoch counter.
    epoch: epoch::Global,
    /// Recycled nodes, available to any worker.
    free: FreeList,
    workers: worker::Array<T, C>,
    _cfg: PhantomData<fn(C)>,
}

/// An error produced when a push cannot complete.
///
/// The value that failed to push is handed back to the caller in both cases.
#[derive(Debug, Eq, PartialEq)]
pub enum PushError<T> {
    /// The stack has been shut down and no longer accepts new elements.
    Shutdown(T),
    /// No node storage could be obtained for the element: the calling
    /// worker's pages are exhausted and the shared free list is empty.
    AtCapacity(T),
}

// Safety: a stack is a channel for `T`s: values pushed on one thread may be
// popped (and dropped) on any other, so `T` must be `Send`, but a `&T` is
// never shared across threads, so `T: Sync` is not required.
unsafe impl<T: Send, C: cfg::Config> Send for Stack<T, C> {}
unsafe impl<T: Send, C: cfg::Config> Sync for Stack<T, C> {}

// === impl Stack ===

impl<T> Stack<T> {
    /// Returns a new stack with the default configuration parameters.
    pub fn new() -> Self {
        Self::new_with_config()
    }

    /// Returns a new stack with the provided configuration parameters.
    ///
    /// # Panics
    ///
    /// Panics if the parameters are invalid, e.g. the packed index bits they
    /// imply do not fit in a word.
    pub fn new_with_config<C: cfg::Config>() -> Stack<T, C> {
        C::validate();
        Stack {
            head: CachePadded(AtomicUsize::new(NIL)),
            shutdown: AtomicBool::new(false),
            epoch: epoch::Global::new(),
            free: FreeList::new(),
            workers: worker::Array::new(),
            _cfg: PhantomData,
        }
    }
}

impl<T, C: cfg::Config> Stack<T, C> {
    /// Pushes `value` onto the stack.
    ///
    /// On success, the value becomes the new top of the stack. If the stack
    /// has been [shut down](Stack::shutdown), or if no node can be obtained
    /// for the value, the value is handed back in the error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let stack = epoch_stack::Stack::new();
    /// stack.push("lifo").unwrap();
    /// assert_eq!(stack.pop(), Some("lifo"));
    /// ```
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(PushError::Shutdown(value));
        }

        let (tid, worker) = self.workers.current();
        test_println!("push {:?}", tid);
        let idx = match self.alloc(worker) {
            Some(idx) => idx,
            None => return Err(PushError::AtCapacity(value)),
        };
        let slot = self.slot(idx);
        slot.fill(value);

        let mut head = self.head.load(Ordering::Relaxed);
        let mut backoff = Backoff::<C>::new();
        loop {
            // a push racing a shutdown may not land after the drain has
            // started; give the node back and hand the value out.
            if self.shutdown.load(Ordering::SeqCst) {
                let value = slot
                    .take()
                    .expect("a node being pushed must hold a value, this is a bug!");
                slot.set_next(worker.cache_head());
                worker.set_cache_head(idx);
                return Err(PushError::Shutdown(value));
            }

            slot.set_next(head);
            match self
                .head
                .compare_exchange(head, idx, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => {
                    test_println!("-> pushed {:#x}; next={:#x}", idx, head);
                    return Ok(());
                }
                Err(actual) => {
                    test_println!("-> push lost the race; retrying");
                    head = actual;
                    backoff.snooze();
                }
            }
        }
    }

    /// Pushes a batch of values onto the stack as one unit.
    ///
    /// The batch is linked up privately and spliced onto the stack with a
    /// single compare-and-swap, so no other thread ever observes part of it:
    /// popping after `push_bulk(vec![a, b, c])` yields `c`, `b`, `a` with
    /// nothing interleaved between them. On failure nothing is pushed, and
    /// the error hands back every value in its original order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let stack = epoch_stack::Stack::new();
    /// stack.push_bulk(vec![1, 2, 3]).unwrap();
    /// assert_eq!(stack.pop(), Some(3));
    /// assert_eq!(stack.pop(), Some(2));
    /// assert_eq!(stack.pop(), Some(1));
    /// ```
    pub fn push_bulk(&self, values: Vec<T>) -> Result<(), PushError<Vec<T>>> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(PushError::Shutdown(values));
        }
        if values.is_empty() {
            return Ok(());
        }

        let (tid, worker) = self.workers.current();
        test_println!("push_bulk {:?} ({} values)", tid, values.len());

        // Link the whole batch into a private chain; only the final splice
        // touches shared state.
        let mut top = NIL;
        let mut bottom = NIL;
        let mut len = 0;
        let mut values = values.into_iter();
        while let Some(value) = values.next() {
            let idx = match self.alloc(worker) {
                Some(idx) => idx,
                None => {
                    let mut returned = self.unlink_chain(worker, top, len);
                    returned.push(value);
                    returned.extend(values);
                    return Err(PushError::AtCapacity(returned));
                }
            };
            let slot = self.slot(idx);
            slot.fill(value);
            slot.set_next(top);
            top = idx;
            if bottom == NIL {
                bottom = idx;
            }
            len += 1;
        }

        let bottom_slot = self.slot(bottom);
        let mut head = self.head.load(Ordering::Relaxed);
        let mut backoff = Backoff::<C>::new();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(PushError::Shutdown(self.unlink_chain(worker, top, len)));
            }

            bottom_slot.set_next(head);
            match self
                .head
                .compare_exchange(head, top, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => {
                    test_println!("-> pushed chain {:#x}..{:#x}; next={:#x}", top, bottom, head);
                    return Ok(());
                }
                Err(actual) => {
                    test_println!("-> bulk push lost the race; retrying");
                    head = actual;
                    backoff.snooze();
                }
            }
        }
    }

    /// Pops the most recently pushed value, or returns `None` if the stack is
    /// empty or shut down.
    ///
    /// Values pushed by a single thread pop in reverse push order; pushes
    /// from different threads may interleave in any order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let stack = epoch_stack::Stack::new();
    /// assert_eq!(stack.pop(), None);
    /// stack.push(1).unwrap();
    /// stack.push(2).unwrap();
    /// assert_eq!(stack.pop(), Some(2));
    /// assert_eq!(stack.pop(), Some(1));
    /// assert_eq!(stack.pop(), None);
    /// ```
    pub fn pop(&self) -> Option<T> {
        let (tid, worker) = self.workers.current();
        test_println!("pop {:?}", tid);

        // The reservation must be published before the first head load; the
        // node it yields may be unlinked by a racing pop at any point, and
        // only the reservation keeps the node's storage alive while we read
        // its `next` link.
        worker.epoch.pin(&self.epoch);
        let mut head = self.head.load(Ordering::Acquire);
        let mut backoff = Backoff::<C>::new();
        let popped = loop {
            if head == NIL {
                test_println!("-> empty");
                break None;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                test_println!("-> shut down");
                break None;
            }

            let slot = self.slot(head);
            let next = slot.next();
            match self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    let value = slot
                        .take()
                        .expect("a node on the stack must hold a value, this is a bug!");
                    let retired_at = self.epoch.stamp();
                    slot.retire(retired_at);
                    worker.epoch.defer(head);
                    test_println!("-> popped {:#x}; retired at epoch {}", head, retired_at);
                    break Some(value);
                }
                Err(actual) => {
                    test_println!("-> pop lost the race; retrying");
                    head = actual;
                    backoff.snooze();
                }
            }
        };
        worker.epoch.unpin();

        if worker.epoch.tick::<C>() {
            self.sweep(worker);
        }
        popped
    }

    /// Returns `true` if the stack held no values at some point during the
    /// call.
    ///
    /// The answer may be stale by the time the caller acts on it; use it for
    /// monitoring and tests rather than synchronization.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == NIL
    }

    /// Shuts the stack down.
    ///
    /// Pushes that have not yet published their node are rejected from this
    /// point on, and pops report the stack as empty. Values still on the
    /// stack are dropped with it.
    pub fn shutdown(&self) {
        test_println!("shutdown");
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Takes a free node off the worker's private cache, refilling the cache
    /// from the shared free list or by growing the worker's storage.
    ///
    /// Returns `None` when the worker's configured index space is exhausted.
    fn alloc(&self, worker: &Worker<T, C>) -> Option<usize> {
        let cached = worker.cache_head();
        let idx = if cached != NIL {
            cached
        } else if let Some(taken) = self.free.take_all() {
            test_println!("-> refilled cache from the shared free list");
            taken
        } else {
            worker.grow()?
        };
        worker.set_cache_head(self.slot(idx).next());
        Some(idx)
    }

    /// Unlinks an unpublished chain built by `push_bulk`, returning its
    /// values in their original order and caching its nodes for reuse.
    fn unlink_chain(&self, worker: &Worker<T, C>, top: usize, len: usize) -> Vec<T> {
        let mut values = Vec::with_capacity(len);
        let mut idx = top;
        for _ in 0..len {
            let slot = self.slot(idx);
            let next = slot.next();
            let value = slot
                .take()
                .expect("a node on an unpublished chain must hold a value, this is a bug!");
            values.push(value);
            slot.set_next(worker.cache_head());
            worker.set_cache_head(idx);
            idx = next;
        }
        values.reverse();
        values
    }

    /// Attempts to advance the epoch, then recycles every deferred node whose
    /// retirement the epoch has left two or more steps behind.
    fn sweep(&self, worker: &Worker<T, C>) {
        let now = self
            .epoch
            .try_advance(self.workers.iter().map(|worker| &worker.epoch));
        let swept = worker.epoch.sweep(|idx| {
            let slot = self.slot(idx);
            if slot.retired_at() + 1 < now {
                self.free.push::<C>(idx, |next| slot.set_next(next));
                true
            } else {
                false
            }
        });
        test_println!("-> swept {} nodes at epoch {}", swept, now);
    }

    /// Resolves a packed index to its slot.
    #[inline(always)]
    fn slot(&self, idx: usize) -> &Slot<T, C> {
        let tid = C::unpack_tid(idx);
        let addr = C::unpack_addr(idx);
        self.workers
            .get(tid.as_usize())
            .expect("a packed index must name an installed worker, this is a bug!")
            .slot(addr)
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C: cfg::Config> fmt::Debug for Stack<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field(
                "head",
                &format_args!("{:#x}", self.head.load(Ordering::Relaxed)),
            )
            .field("is_shutdown", &self.shutdown.load(Ordering::Relaxed))
            .field("epoch", &self.epoch)
            .field("free", &self.free)
            .field("workers", &self.workers)
            .field("config", &C::debug())
            .finish()
    }
}

// === impl PushError ===

impl<T> PushError<T> {
    /// Returns the value this push attempted to store.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Shutdown(value) => value,
            PushError::AtCapacity(value) => value,
        }
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Shutdown(_) => f.pad("stack is shut down"),
            PushError::AtCapacity(_) => f.pad("no node storage available"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for PushError<T> {}

/// A packed value which can occupy a bit range of a `usize` index.
///
/// Indices are encoded as `[ worker id | page address ]`, each field taking
/// the bits its configured maximum requires. Packing the fields (rather than
/// passing pointers around) is what lets the whole stack head fit in one
/// atomic word.
pub(crate) trait Pack<C: cfg::Config>: Sized {
    // ====== provided by each implementation =================================
    /// The number of bits occupied by this type when packed.
    const LEN: usize;
    /// The type packed immediately below this one.
    type Prev: Pack<C>;

    // ====== provided by the trait ===========================================
    /// The maximum value this type can represent.
    const BITS: usize = {
        let shift = 1 << (Self::LEN - 1);
        shift | (shift - 1)
    };
    /// The number of bits to shift by when packing this value.
    const SHIFT: usize = Self::Prev::SHIFT + Self::Prev::LEN;
    /// The mask to extract only this type from a packed index.
    const MASK: usize = Self::BITS << Self::SHIFT;

    fn as_usize(&self) -> usize;
    fn from_usize(val: usize) -> Self;

    #[inline(always)]
    fn pack(&self, to: usize) -> usize {
        let value = self.as_usize();
        debug_assert!(value <= Self::BITS);
        (to & !Self::MASK) | (value << Self::SHIFT)
    }

    #[inline(always)]
    fn from_packed(from: usize) -> Self {
        let value = (from & Self::MASK) >> Self::SHIFT;
        debug_assert!(value <= Self::BITS);
        Self::from_usize(value)
    }
}

impl<C: cfg::Config> Pack<C> for () {
    const BITS: usize = 0;
    const LEN: usize = 0;
    const SHIFT: usize = 0;
    const MASK: usize = 0;

    type Prev = ();

    fn as_usize(&self) -> usize {
        unreachable!()
    }

    fn from_usize(_val: usize) -> Self {
        unreachable!()
    }

    fn pack(&self, _to: usize) -> usize {
        unreachable!()
    }

    fn from_packed(_from: usize) -> Self {
        unreachable!()
    }
}
