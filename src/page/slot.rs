use crate::cfg;
use crate::sync::UnsafeCell;
use std::{fmt, marker::PhantomData};

/// The epoch stamp of a slot that has not been retired.
const UNSTAMPED: usize = std::usize::MAX;

/// A single node's backing storage.
///
/// Slots live in per-worker pages and are addressed by packed indices. The
/// `next` cell is the intrusive link of whichever list currently owns the
/// slot: the stack's live chain, the shared free list, or a worker's private
/// cache. `retired_at` is only meaningful between the slot's retirement and
/// its reclamation.
///
/// None of the cells are atomics. Exclusive access is a property of the
/// protocol: a slot's cells are only written by a thread that owns it
/// outright, and only read by others while the slot is reachable from a
/// shared list head published with release ordering.
#[repr(align(64))]
pub(crate) struct Slot<T, C> {
    item: UnsafeCell<Option<T>>,
    /// The index of the next slot in the list that currently owns this one.
    next: UnsafeCell<usize>,
    /// The epoch at which this slot was retired.
    retired_at: UnsafeCell<usize>,
    _cfg: PhantomData<fn(C)>,
}

impl<T, C: cfg::Config> Slot<T, C> {
    pub(in crate::page) fn new(next: usize) -> Self {
        Self {
            item: UnsafeCell::new(None),
            next: UnsafeCell::new(next),
            retired_at: UnsafeCell::new(UNSTAMPED),
            _cfg: PhantomData,
        }
    }

    /// Stores `value` in the slot, clearing the retirement stamp.
    ///
    /// The caller must own the slot exclusively (freshly allocated, or taken
    /// off a free list); the value becomes visible to other threads via the
    /// release edge that later publishes the slot's index.
    #[inline]
    pub(crate) fn fill(&self, value: T) {
        debug_assert!(
            self.item.with(|item| unsafe { (*item).is_none() }),
            "filled an occupied slot"
        );
        self.retired_at.with_mut(|retired_at| unsafe {
            *retired_at = UNSTAMPED;
        });
        self.item.with_mut(|item| unsafe {
            *item = Some(value);
        });
    }

    /// Moves the value out of the slot.
    #[inline]
    pub(crate) fn take(&self) -> Option<T> {
        self.item.with_mut(|item| unsafe { (*item).take() })
    }

    #[inline(always)]
    pub(crate) fn next(&self) -> usize {
        self.next.with(|next| unsafe { *next })
    }

    #[inline(always)]
    pub(crate) fn set_next(&self, next: usize) {
        self.next.with_mut(|n| unsafe {
            (*n) = next;
        })
    }

    /// Stamps the epoch at which the slot was unlinked from the live chain.
    #[inline]
    pub(crate) fn retire(&self, epoch: usize) {
        debug_assert!(
            self.retired_at
                .with(|retired_at| unsafe { *retired_at == UNSTAMPED }),
            "slot retired twice"
        );
        self.retired_at.with_mut(|retired_at| unsafe {
            *retired_at = epoch;
        });
    }

    #[inline(always)]
    pub(crate) fn retired_at(&self) -> usize {
        self.retired_at.with(|retired_at| unsafe { *retired_at })
    }
}

impl<T, C: cfg::Config> fmt::Debug for Slot<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("next", &format_args!("{:#x}", self.next()))
            .field("retired_at", &format_args!("{:#x}", self.retired_at()))
            .finish()
    }
}
