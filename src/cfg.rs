use crate::page::Addr;
use crate::tid::Tid;
use crate::Pack;
use std::{fmt, marker::PhantomData};

/// Configuration parameters which can be overridden to tune the behavior of a
/// stack.
pub trait Config: Sized {
    /// The maximum number of threads which may push to or pop from the stack.
    ///
    /// This value (rounded up to a power of two) determines the number of
    /// bits a packed slot index spends on the owning worker, and the size of
    /// the worker lookup table. A thread's worker ID is released when the
    /// thread exits, so threads that come and go do not count against this
    /// limit; exceeding it with live threads panics.
    const MAX_WORKERS: usize = DefaultConfig::MAX_WORKERS;
    /// The maximum number of pages of node storage each worker may allocate.
    ///
    /// Pages double in size as they are allocated, so a worker's total node
    /// capacity is `INITIAL_PAGE_SIZE * (2^MAX_PAGES - 1)`.
    const MAX_PAGES: usize = DefaultConfig::MAX_PAGES;
    /// The size of the first page of nodes allocated by a worker.
    ///
    /// When a worker runs out of free nodes, the next page it allocates will
    /// be twice as large as the previous one. Raising this value trades
    /// memory for fewer allocations on push-heavy workloads.
    const INITIAL_PAGE_SIZE: usize = DefaultConfig::INITIAL_PAGE_SIZE;
    /// The number of pops a worker performs between attempts to advance the
    /// epoch and recycle its retired nodes.
    const EPOCH_ADVANCE_INTERVAL: usize = DefaultConfig::EPOCH_ADVANCE_INTERVAL;
    /// The deferred-list length at which a worker attempts to recycle retired
    /// nodes regardless of the operation interval.
    const RETIRE_THRESHOLD: usize = DefaultConfig::RETIRE_THRESHOLD;
    /// The maximum number of iterations a contended operation spins before it
    /// starts yielding to the OS scheduler instead.
    const MAX_SPINS: usize = DefaultConfig::MAX_SPINS;
}

pub(crate) trait CfgPrivate: Config {
    const ACTUAL_MAX_WORKERS: usize = next_pow2(Self::MAX_WORKERS);

    const INITIAL_SZ: usize = next_pow2(Self::INITIAL_PAGE_SIZE);

    const ADDR_INDEX_SHIFT: usize = Self::INITIAL_SZ.trailing_zeros() as usize + 1;

    const USED_BITS: usize = Tid::<Self>::LEN + Tid::<Self>::SHIFT;

    fn page_size(n: usize) -> usize {
        Self::INITIAL_SZ * 2usize.pow(n as u32)
    }

    fn debug() -> DebugConfig<Self> {
        DebugConfig { _cfg: PhantomData }
    }

    fn validate() {
        assert!(
            Self::INITIAL_SZ.is_power_of_two(),
            "invalid config: {:#?}",
            Self::debug()
        );
        assert!(
            Self::INITIAL_SZ <= Addr::<Self>::BITS,
            "invalid config: {:#?}",
            Self::debug()
        );
        // a packed index must never be all ones, since that's the nil link.
        assert!(
            Self::USED_BITS < WIDTH,
            "invalid config: {:#?}\ntotal number of bits per index must be less than a word!",
            Self::debug()
        );
        assert!(
            Self::EPOCH_ADVANCE_INTERVAL > 0,
            "invalid config: {:#?}\nepoch advance interval must be nonzero!",
            Self::debug()
        );
    }

    #[inline(always)]
    fn unpack<A: Pack<Self>>(packed: usize) -> A {
        A::from_packed(packed)
    }

    #[inline(always)]
    fn unpack_addr(packed: usize) -> Addr<Self> {
        Self::unpack(packed)
    }

    #[inline(always)]
    fn unpack_tid(packed: usize) -> Tid<Self> {
        Self::unpack(packed)
    }
}

impl<C: Config> CfgPrivate for C {}

/// Default configuration parameters.
#[derive(Copy, Clone)]
pub struct DefaultConfig {
    _p: (),
}

pub(crate) struct DebugConfig<C: Config> {
    _cfg: PhantomData<fn(C)>,
}

#[cfg(target_pointer_width = "32")]
pub(crate) const WIDTH: usize = 32;
#[cfg(target_pointer_width = "64")]
pub(crate) const WIDTH: usize = 64;

pub(crate) const fn next_pow2(n: usize) -> usize {
    let pow2 = n.count_ones() == 1;
    let ctlz = n.leading_zeros();
    let bits = std::mem::size_of::<usize>() * 8;
    1 << (bits - ctlz as usize - pow2 as usize)
}

// === impl DefaultConfig ===

impl Config for DefaultConfig {
    const INITIAL_PAGE_SIZE: usize = 32;

    #[cfg(target_pointer_width = "64")]
    const MAX_WORKERS: usize = 4096;
    #[cfg(target_pointer_width = "32")]
    const MAX_WORKERS: usize = 128;

    const MAX_PAGES: usize = WIDTH / 2;

    const EPOCH_ADVANCE_INTERVAL: usize = 64;

    const RETIRE_THRESHOLD: usize = 32;

    const MAX_SPINS: usize = 1024;
}

impl fmt::Debug for DefaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Self::debug().fmt(f)
    }
}

impl<C: Config> fmt::Debug for DebugConfig<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_workers", &C::MAX_WORKERS)
            .field("max_pages", &C::MAX_PAGES)
            .field("initial_page_size", &C::INITIAL_SZ)
            .field("epoch_advance_interval", &C::EPOCH_ADVANCE_INTERVAL)
            .field("retire_threshold", &C::RETIRE_THRESHOLD)
            .field("used_bits", &format_args!("{}/{}", C::USED_BITS, WIDTH))
            .finish()
    }
}
