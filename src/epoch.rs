//! Epoch-based deferred reclamation.
//!
//! A popped node cannot be recycled immediately: a concurrent pop may have
//! read the stack's head just before the winning compare-and-swap, and may
//! still dereference the node's `next` link. Retired nodes therefore wait on
//! the retiring worker's deferred list until the global epoch proves every
//! such reader is gone.
//!
//! Before reading any shared link, a worker publishes the epoch it observed
//! (its *reservation*), and clears it when the operation ends. The global
//! epoch only advances when every published reservation matches it, so a
//! worker inside a critical section holds the epoch to at most one step past
//! its reservation. Retirements are stamped with the epoch current at unlink
//! time, and a stamped node is only recycled once the epoch has moved two
//! steps past the stamp; no reservation from before the unlink can still be
//! live by then.

use crate::cfg;
use crate::sync::{
    atomic::{self, AtomicUsize, Ordering},
    UnsafeCell,
};
use crate::util::CachePadded;
use std::fmt;

/// The reservation value of a worker that is not in a critical section.
pub(crate) const INACTIVE: usize = std::usize::MAX;

/// The global epoch counter.
pub(crate) struct Global {
    current: CachePadded<AtomicUsize>,
}

/// A single worker's reclamation state.
///
/// `active` is written by the owning worker and read by any worker attempting
/// to advance the epoch; the deferred list and operation counter are strictly
/// local.
pub(crate) struct Local {
    active: CachePadded<AtomicUsize>,
    deferred: UnsafeCell<Vec<usize>>,
    ops: UnsafeCell<usize>,
}

// === impl Global ===

impl Global {
    pub(crate) fn new() -> Self {
        Self {
            current: CachePadded(AtomicUsize::new(0)),
        }
    }

    /// Returns the current epoch.
    #[inline]
    pub(crate) fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Returns the epoch to stamp a retirement that is happening now.
    ///
    /// The stamp may lag a racing advance by at most one step, which the
    /// two-step reclamation distance absorbs.
    pub(crate) fn stamp(&self) -> usize {
        atomic::fence(Ordering::SeqCst);
        self.current.load(Ordering::Relaxed)
    }

    /// Attempts to advance the epoch, returning the epoch current after the
    /// attempt.
    ///
    /// The epoch may only advance while no published reservation lags it; a
    /// worker pinned in an older epoch parks the clock until it leaves its
    /// critical section.
    pub(crate) fn try_advance<'a>(
        &self,
        reservations: impl Iterator<Item = &'a Local>,
    ) -> usize {
        let current = self.current.load(Ordering::Relaxed);
        atomic::fence(Ordering::SeqCst);
        for local in reservations {
            let active = local.active.load(Ordering::Relaxed);
            if active != INACTIVE && active != current {
                test_println!("-> cannot advance epoch {}; a worker is pinned at {}", current, active);
                return current;
            }
        }
        atomic::fence(Ordering::Acquire);

        match self.current.compare_exchange(
            current,
            current + 1,
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                test_println!("-> advanced epoch to {}", current + 1);
                current + 1
            }
            Err(actual) => actual,
        }
    }
}

impl fmt::Debug for Global {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Global")
            .field("current", &self.current.load(Ordering::Relaxed))
            .finish()
    }
}

// === impl Local ===

impl Local {
    pub(crate) fn new() -> Self {
        Self {
            active: CachePadded(AtomicUsize::new(INACTIVE)),
            deferred: UnsafeCell::new(Vec::new()),
            ops: UnsafeCell::new(0),
        }
    }

    /// Publishes a reservation for the current epoch, entering a critical
    /// section. Must be paired with a call to [`Local::unpin`].
    pub(crate) fn pin(&self, global: &Global) -> usize {
        let epoch = global.current();
        self.active.store(epoch, Ordering::Relaxed);
        // the reservation must be globally visible before any read of a
        // shared list head.
        atomic::fence(Ordering::SeqCst);
        epoch
    }

    /// Clears this worker's reservation, leaving the critical section.
    pub(crate) fn unpin(&self) {
        self.active.store(INACTIVE, Ordering::Release);
    }

    /// Adds a retired slot index to this worker's deferred list.
    pub(crate) fn defer(&self, idx: usize) {
        self.deferred.with_mut(|deferred| unsafe {
            (*deferred).push(idx);
        })
    }

    pub(crate) fn deferred_len(&self) -> usize {
        self.deferred.with(|deferred| unsafe { (*deferred).len() })
    }

    /// Counts an operation, returning `true` when a reclamation attempt is
    /// due.
    pub(crate) fn tick<C: cfg::Config>(&self) -> bool {
        let ops = self.ops.with_mut(|ops| unsafe {
            *ops += 1;
            *ops
        });
        ops % C::EPOCH_ADVANCE_INTERVAL == 0 || self.deferred_len() >= C::RETIRE_THRESHOLD
    }

    /// Drains reclaimable entries from the deferred list.
    ///
    /// `reclaim` returns `true` if it recycled the slot; entries it refuses
    /// stay deferred for the next sweep. Returns the number of entries
    /// reclaimed.
    pub(crate) fn sweep(&self, mut reclaim: impl FnMut(usize) -> bool) -> usize {
        self.deferred.with_mut(|deferred| {
            let deferred = unsafe { &mut *deferred };
            let before = deferred.len();
            deferred.retain(|&idx| !reclaim(idx));
            before - deferred.len()
        })
    }
}

impl fmt::Debug for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self.active.load(Ordering::Relaxed);
        let mut debug = f.debug_struct("Local");
        if active == INACTIVE {
            debug.field("active", &format_args!("-"));
        } else {
            debug.field("active", &active);
        }
        debug.field("deferred", &self.deferred_len()).finish()
    }
}

#[cfg(all(test, not(loom)))]
mod test {
    use super::*;
    use crate::cfg::Config;

    struct ShortInterval;

    impl Config for ShortInterval {
        const EPOCH_ADVANCE_INTERVAL: usize = 4;
        const RETIRE_THRESHOLD: usize = 2;
    }

    #[test]
    fn advance_gated_on_reservations() {
        let global = Global::new();
        let a = Local::new();
        let b = Local::new();

        assert_eq!(a.pin(&global), 0);
        // one advance past a pinned reservation is allowed, a second is not.
        assert_eq!(global.try_advance([&a, &b].iter().copied()), 1);
        assert_eq!(global.try_advance([&a, &b].iter().copied()), 1);

        a.unpin();
        assert_eq!(global.try_advance([&a, &b].iter().copied()), 2);

        // a worker pinned in the current epoch lets one more step through.
        assert_eq!(b.pin(&global), 2);
        assert_eq!(global.try_advance([&a, &b].iter().copied()), 3);
        assert_eq!(global.try_advance([&a, &b].iter().copied()), 3);
    }

    #[test]
    fn tick_counts_operations() {
        let local = Local::new();
        assert!(!local.tick::<ShortInterval>());
        assert!(!local.tick::<ShortInterval>());
        assert!(!local.tick::<ShortInterval>());
        assert!(local.tick::<ShortInterval>());
        assert!(!local.tick::<ShortInterval>());
    }

    #[test]
    fn tick_fires_when_deferred_list_is_full() {
        let local = Local::new();
        local.defer(1);
        local.defer(2);
        // under threshold it obeys the interval; at the threshold it fires
        // every time.
        assert!(local.tick::<ShortInterval>());
        assert!(local.tick::<ShortInterval>());
    }

    #[test]
    fn sweep_retains_unreclaimed_entries() {
        let local = Local::new();
        local.defer(7);
        local.defer(8);
        local.defer(9);

        let swept = local.sweep(|idx| idx != 8);
        assert_eq!(swept, 2);
        assert_eq!(local.deferred_len(), 1);

        let swept = local.sweep(|_| true);
        assert_eq!(swept, 1);
        assert_eq!(local.deferred_len(), 0);
    }
}
