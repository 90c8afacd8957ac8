use crate::cfg::{self, CfgPrivate};
use crate::sync::UnsafeCell;
use crate::tid::Tid;
use crate::{Pack, NIL};

pub(crate) mod slot;
pub(crate) use self::slot::Slot;

use std::{fmt, marker::PhantomData};

/// A page address encodes the location of a slot within a worker (the page
/// number and offset within that page) as a single linear value.
#[repr(transparent)]
pub(crate) struct Addr<C: cfg::Config = cfg::DefaultConfig> {
    addr: usize,
    _cfg: PhantomData<fn(C)>,
}

/// A block of slot storage, allocated lazily the first time the owning worker
/// needs it.
///
/// The slots of a freshly allocated page are pre-linked into a single run of
/// free nodes, which the owning worker splices into its private cache.
pub(crate) struct Page<T, C> {
    /// The number of slots this page holds.
    size: usize,
    /// The sum of the sizes of all previous pages, i.e. the address of this
    /// page's first slot.
    prev_sz: usize,
    slab: UnsafeCell<Option<Box<[Slot<T, C>]>>>,
}

// === impl Addr ===

impl<C: cfg::Config> Addr<C> {
    pub(crate) fn index(self) -> usize {
        // Since every page is twice as large as the previous page, and all page sizes
        // are powers of two, we can determine the page index that contains a given
        // address by counting leading zeros, which tells us what power of two
        // the offset fits into.
        //
        // First, we must shift down to the smallest page size, so that the last
        // offset on the first page becomes 0.
        let shifted = (self.addr + C::INITIAL_SZ) >> C::ADDR_INDEX_SHIFT;
        // Now, we can  determine the number of twos places by counting the
        // number of leading  zeros (unused twos places) in the number's binary
        // representation, and subtracting that count from the total number of bits in a word.
        cfg::WIDTH - shifted.leading_zeros() as usize
    }

    pub(crate) fn offset(self) -> usize {
        self.addr
    }
}

impl<C: cfg::Config> Pack<C> for Addr<C> {
    const LEN: usize = C::MAX_PAGES + C::ADDR_INDEX_SHIFT;

    type Prev = ();

    #[inline(always)]
    fn as_usize(&self) -> usize {
        self.addr
    }

    #[inline(always)]
    fn from_usize(addr: usize) -> Self {
        debug_assert!(addr <= Self::BITS);
        Self {
            addr,
            _cfg: PhantomData,
        }
    }
}

impl<C: cfg::Config> fmt::Debug for Addr<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Addr")
            .field(&format_args!("{:#x}", self.addr))
            .finish()
    }
}

impl<C: cfg::Config> PartialEq for Addr<C> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl<C: cfg::Config> Eq for Addr<C> {}

impl<C: cfg::Config> Clone for Addr<C> {
    fn clone(&self) -> Self {
        Self::from_usize(self.addr)
    }
}

impl<C: cfg::Config> Copy for Addr<C> {}

// === impl Page ===

impl<T, C: cfg::Config> Page<T, C> {
    pub(crate) fn new(size: usize, prev_sz: usize) -> Self {
        Self {
            size,
            prev_sz,
            slab: UnsafeCell::new(None),
        }
    }

    pub(crate) fn is_unallocated(&self) -> bool {
        self.slab.with(|slab| unsafe { (*slab).is_none() })
    }

    /// Allocates this page's slot storage, pre-linked into a single free run,
    /// and returns the packed index of the run's first slot.
    #[cold]
    pub(crate) fn allocate(&self, tid: Tid<C>) -> usize {
        test_println!("-> allocating page of {} slots", self.size);
        debug_assert!(self.is_unallocated(), "page allocated twice");

        let head = self.prev_sz;
        let mut slab = Vec::with_capacity(self.size);
        slab.extend((1..self.size).map(|i| {
            let next = tid.pack(Addr::<C>::from_usize(head + i).pack(0));
            Slot::new(next)
        }));
        slab.push(Slot::new(NIL));
        self.slab.with_mut(|s| {
            // this mut access is safe — it only occurs to initially
            // allocate the page, which only happens on this thread; other
            // threads cannot hold an index into it until the owning thread
            // has published one.
            unsafe {
                *s = Some(slab.into_boxed_slice());
            }
        });

        tid.pack(Addr::<C>::from_usize(head).pack(0))
    }

    /// Returns the slot at `addr`.
    ///
    /// The page must already be allocated; an index can only name a slot in
    /// an allocated page.
    #[inline]
    pub(crate) fn slot(&self, addr: Addr<C>) -> &Slot<T, C> {
        let poff = addr.offset() - self.prev_sz;
        self.slab.with(|slab| {
            let slab = unsafe { &*slab };
            &slab
                .as_ref()
                .expect("a live slot's page must be allocated, this is a bug!")[poff]
        })
    }
}

impl<T, C> fmt::Debug for Page<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("size", &self.size)
            .field("prev_sz", &self.prev_sz)
            .finish()
    }
}
