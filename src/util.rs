use crate::cfg;
use crate::sync::{spin_loop_hint, yield_now};
use std::{marker::PhantomData, ops::Deref};

/// Exponential backoff for contended compare-and-swap loops.
///
/// Each failed attempt spins for twice as many iterations as the last, up to
/// `C::MAX_SPINS`; past that, the loop yields to the OS scheduler instead of
/// burning the CPU.
pub(crate) struct Backoff<C = cfg::DefaultConfig> {
    spins: usize,
    _cfg: PhantomData<fn(C)>,
}

/// Pads and aligns a value to the length of a cache line, so that hot atomics
/// in neighboring fields don't share one.
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct CachePadded<T>(pub(crate) T);

// === impl Backoff ===

impl<C: cfg::Config> Backoff<C> {
    pub(crate) fn new() -> Self {
        Self {
            spins: 1,
            _cfg: PhantomData,
        }
    }

    pub(crate) fn snooze(&mut self) {
        if cfg!(loom) || self.spins > C::MAX_SPINS {
            yield_now();
        } else {
            for _ in 0..self.spins {
                spin_loop_hint();
            }
            self.spins <<= 1;
        }
    }
}

// === impl CachePadded ===

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

#[cfg(all(test, not(loom)))]
mod test {
    use super::*;
    use crate::cfg::{Config, DefaultConfig};

    #[test]
    fn backoff_stops_doubling_at_cap() {
        let mut backoff = Backoff::<DefaultConfig>::new();
        for _ in 0..=11 {
            backoff.snooze();
        }
        // 2^10 = 1024 is the default cap; the counter stops doubling there.
        assert!(backoff.spins > DefaultConfig::MAX_SPINS);
        let spins = backoff.spins;
        backoff.snooze();
        assert_eq!(backoff.spins, spins);
    }
}
