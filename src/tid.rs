use crate::{
    cfg::{self, CfgPrivate},
    page,
    sync::{
        atomic::{AtomicUsize, Ordering},
        lazy_static, thread_local, Mutex,
    },
    Pack,
};
use std::{
    cell::{Cell, UnsafeCell},
    collections::VecDeque,
    fmt,
    marker::PhantomData,
};

/// Uniquely identifies a worker thread.
///
/// A `Tid` indexes the stack's worker table and occupies the upper bits of a
/// packed slot index. IDs are assigned the first time a thread touches a
/// stack and returned to a free list when the thread exits, so churning
/// threads don't exhaust the ID space.
pub(crate) struct Tid<C> {
    id: usize,
    _not_send: PhantomData<UnsafeCell<()>>,
    _cfg: PhantomData<fn(C)>,
}

#[derive(Debug)]
struct Registration(Cell<Option<usize>>);

struct Registry {
    next: AtomicUsize,
    free: Mutex<VecDeque<usize>>,
}

lazy_static! {
    static ref REGISTRY: Registry = Registry {
        next: AtomicUsize::new(0),
        free: Mutex::new(VecDeque::new()),
    };
}

thread_local! {
    static REGISTRATION: Registration = Registration::new();
}

// === impl Tid ===

impl<C: cfg::Config> Pack<C> for Tid<C> {
    const LEN: usize = C::ACTUAL_MAX_WORKERS.trailing_zeros() as usize;

    type Prev = page::Addr<C>;

    #[inline(always)]
    fn as_usize(&self) -> usize {
        self.id
    }

    #[inline(always)]
    fn from_usize(id: usize) -> Self {
        Self::new(id)
    }
}

impl<C: cfg::Config> Tid<C> {
    #[inline(always)]
    fn new(id: usize) -> Self {
        debug_assert!(id <= Self::BITS);
        Self {
            id,
            _not_send: PhantomData,
            _cfg: PhantomData,
        }
    }

    /// Returns the `Tid` of the current thread, assigning one if the thread
    /// has not used a stack before.
    #[inline]
    pub(crate) fn current() -> Self {
        REGISTRATION
            .try_with(|registration| registration.current())
            .unwrap_or_else(|_| Self::poisoned())
    }
}

impl<C> Tid<C> {
    #[cold]
    fn poisoned() -> Self {
        Self {
            id: std::usize::MAX,
            _not_send: PhantomData,
            _cfg: PhantomData,
        }
    }

    /// Returns true if the local thread ID was accessed while unwinding.
    pub(crate) fn is_poisoned(&self) -> bool {
        self.id == std::usize::MAX
    }
}

impl<C> fmt::Debug for Tid<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_poisoned() {
            f.debug_tuple("Tid")
                .field(&format_args!("<poisoned>"))
                .finish()
        } else {
            f.debug_tuple("Tid")
                .field(&format_args!("{}", self.id))
                .finish()
        }
    }
}

impl<C> PartialEq for Tid<C> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<C> Eq for Tid<C> {}

impl<C: cfg::Config> Clone for Tid<C> {
    fn clone(&self) -> Self {
        Self::new(self.id)
    }
}

impl<C: cfg::Config> Copy for Tid<C> {}

// === impl Registration ===

impl Registration {
    fn new() -> Self {
        Registration(Cell::new(None))
    }

    #[inline(always)]
    fn current<C: cfg::Config>(&self) -> Tid<C> {
        if let Some(id) = self.0.get() {
            return Tid::new(id);
        }
        self.register()
    }

    #[cold]
    fn register<C: cfg::Config>(&self) -> Tid<C> {
        let id = REGISTRY
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop_front())
            .unwrap_or_else(|| REGISTRY.next.fetch_add(1, Ordering::AcqRel));
        assert!(
            id < C::ACTUAL_MAX_WORKERS,
            "more than {} threads are live at once; \
             raise `Config::MAX_WORKERS` to push from this many threads",
            C::ACTUAL_MAX_WORKERS,
        );
        self.0.set(Some(id));
        test_println!("-> registered worker {}", id);
        Tid::new(id)
    }
}

// Returns the thread's ID to the free list when it exits, so another thread
// may reuse the worker state.
//
// Not compiled under loom: this runs in a thread-local destructor while the
// model is shutting down, and accessing loom's mock `lazy_static` there
// panics. Loom models just don't reuse worker IDs; loom's `lazy_static`
// resets the registry on every iteration instead.
#[cfg(not(loom))]
impl Drop for Registration {
    fn drop(&mut self) {
        use std::sync::PoisonError;

        if let Some(id) = self.0.get() {
            let mut free = REGISTRY.free.lock().unwrap_or_else(PoisonError::into_inner);
            free.push_back(id);
        }
    }
}
