use crate::{
    cfg::{self, CfgPrivate},
    epoch,
    page::{self, Page, Slot},
    sync::{
        alloc,
        atomic::{AtomicPtr, AtomicUsize, Ordering::*},
        UnsafeCell,
    },
    tid::Tid,
    Pack, NIL,
};

use std::{fmt, marker::PhantomData, ptr};

// ┌─────────────┐      ┌────────┐
// │ page 1      │      │        │
// ├─────────────┤ ┌───▶│  next──┼─┐
// │ page 2      │ │    ├────────┤ │
// │             │ │    │XXXXXXXX│ │
// │ cache───────┼─┘    ├────────┤ │
// ├─────────────┤      │        │◀┘
// │ page 3      │      │  next──┼─┐
// └─────────────┘      ├────────┤ │
//       ...            │XXXXXXXX│ │
// ┌─────────────┐      ├────────┤ │
// │ page n      │      │XXXXXXXX│ │
// └─────────────┘      ├────────┤ │
//                      │        │◀┘
//                      │  next──┼───▶ ...
//                      ├────────┤
//                      │XXXXXXXX│
//                      └────────┘
//
/// The state of a single worker thread: its node storage, its private cache
/// of free slots, and its reclamation state.
///
/// Node storage grows page by page as the worker's demand outpaces what the
/// shared free list returns to it. The private cache threads through slots of
/// any worker's pages; storage is only reclaimed when the whole stack is
/// dropped.
pub(crate) struct Worker<T, C: cfg::Config> {
    /// The worker's parent thread ID.
    pub(crate) tid: usize,
    /// This worker's epoch reservation and deferred-retirement list.
    pub(crate) epoch: epoch::Local,
    /// The head of the private run of free slots the worker allocates from.
    ///
    /// Only ever accessed from the worker's own thread; refilled from the
    /// shared free list, or by allocating a fresh page.
    cache: UnsafeCell<usize>,
    /// The number of pages allocated so far.
    grown: UnsafeCell<usize>,
    pages: Box<[Page<T, C>]>,
}

pub(crate) struct Array<T, C: cfg::Config> {
    workers: Box<[AtomicPtr<alloc::Track<Worker<T, C>>>]>,
    max: AtomicUsize,
    _own: PhantomData<Worker<T, C>>,
}

// === impl Worker ===

impl<T, C: cfg::Config> Worker<T, C> {
    fn new(tid: usize) -> Self {
        let mut total_sz = 0;
        let pages = (0..C::MAX_PAGES)
            .map(|page_num| {
                let sz = C::page_size(page_num);
                let prev_sz = total_sz;
                total_sz += sz;
                Page::new(sz, prev_sz)
            })
            .collect();
        Self {
            tid,
            epoch: epoch::Local::new(),
            cache: UnsafeCell::new(NIL),
            grown: UnsafeCell::new(0),
            pages,
        }
    }

    #[inline(always)]
    pub(crate) fn cache_head(&self) -> usize {
        self.assert_local();
        self.cache.with(|cache| unsafe { *cache })
    }

    #[inline(always)]
    pub(crate) fn set_cache_head(&self, idx: usize) {
        self.assert_local();
        self.cache.with_mut(|cache| unsafe {
            *cache = idx;
        })
    }

    /// Allocates storage for this worker's next page, returning the packed
    /// index of the first slot in its free run.
    ///
    /// Returns `None` if every page has already been allocated.
    #[cold]
    pub(crate) fn grow(&self) -> Option<usize> {
        self.assert_local();
        let grown = self.grown.with(|grown| unsafe { *grown });
        if grown == self.pages.len() {
            test_println!("-> no more pages (already grew {} times)", grown);
            return None;
        }
        let head = self.pages[grown].allocate(Tid::<C>::from_usize(self.tid));
        self.grown.with_mut(|grown| unsafe {
            *grown += 1;
        });
        Some(head)
    }

    /// Returns the slot at `addr` in this worker's storage.
    #[inline(always)]
    pub(crate) fn slot(&self, addr: page::Addr<C>) -> &Slot<T, C> {
        self.pages[addr.index()].slot(addr)
    }

    #[inline(always)]
    fn assert_local(&self) {
        debug_assert_eq!(
            Tid::<C>::current().as_usize(),
            self.tid,
            "tried to access local data from another thread!"
        );
    }
}

impl<T, C: cfg::Config> fmt::Debug for Worker<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("tid", &self.tid)
            .field("epoch", &self.epoch)
            .finish()
    }
}

// === impl Array ===

impl<T, C: cfg::Config> Array<T, C> {
    pub(crate) fn new() -> Self {
        let mut workers = Vec::with_capacity(C::ACTUAL_MAX_WORKERS);
        for _ in 0..C::ACTUAL_MAX_WORKERS {
            workers.push(AtomicPtr::new(ptr::null_mut()));
        }
        Self {
            workers: workers.into_boxed_slice(),
            max: AtomicUsize::new(0),
            _own: PhantomData,
        }
    }

    /// Returns the worker for the current thread, installing it on the
    /// thread's first use of this stack.
    pub(crate) fn current(&self) -> (Tid<C>, &Worker<T, C>) {
        let tid = Tid::<C>::current();
        test_println!("current worker: {:?}", tid);
        let idx = tid.as_usize();
        // It's okay for this to be relaxed. The value is only ever stored by
        // the thread that corresponds to the index, and we are that thread.
        let worker = self.workers[idx].load(Relaxed);
        let worker = ptr::NonNull::new(worker)
            .map(|worker| unsafe {
                // Safety: the pointer points into the boxed worker table,
                // which will not be dropped while `self` exists.
                &*worker.as_ptr()
            })
            .unwrap_or_else(|| self.install(idx));
        (tid, worker.get_ref())
    }

    #[cold]
    fn install(&self, idx: usize) -> &alloc::Track<Worker<T, C>> {
        let worker = Box::new(alloc::Track::new(Worker::new(idx)));
        let worker = Box::into_raw(worker);
        test_println!("-> installed worker {} at {:p}", idx, worker);
        self.workers[idx]
            .compare_exchange(ptr::null_mut(), worker, AcqRel, Acquire)
            .expect("a worker can only be installed by the thread that owns it, this is a bug!");

        // Update the high-water mark so epoch scans cover the new worker.
        let mut max = self.max.load(Acquire);
        while max < idx {
            match self.max.compare_exchange(max, idx, AcqRel, Acquire) {
                Ok(_) => break,
                Err(actual) => max = actual,
            }
        }

        unsafe {
            // Safety: we just put it there!
            &*worker
        }
    }

    /// Returns the worker with the given index, if it has been installed.
    #[inline]
    pub(crate) fn get(&self, idx: usize) -> Option<&Worker<T, C>> {
        let worker = self.workers.get(idx)?.load(Acquire);
        let worker = ptr::NonNull::new(worker)?;
        Some(unsafe {
            // Safety: the returned reference cannot outlive the array, which
            // owns the allocation.
            &*worker.as_ptr()
        }
        .get_ref())
    }

    /// Iterates over every installed worker.
    ///
    /// Workers installed after the iterator snapshots the high-water mark may
    /// be skipped; callers must tolerate that.
    pub(crate) fn iter<'a>(&'a self) -> impl Iterator<Item = &'a Worker<T, C>> + 'a {
        self.workers[..=self.max.load(Acquire)]
            .iter()
            .filter_map(|worker| {
                let worker = ptr::NonNull::new(worker.load(Acquire))?;
                Some(
                    unsafe {
                        // Safety: the returned reference cannot outlive the
                        // array, which owns the allocation.
                        &*worker.as_ptr()
                    }
                    .get_ref(),
                )
            })
    }
}

impl<T, C: cfg::Config> Drop for Array<T, C> {
    fn drop(&mut self) {
        let max = self.max.load(Acquire);
        for worker in &self.workers[0..=max] {
            let worker = worker.load(Acquire);
            if worker.is_null() {
                continue;
            }
            let worker = unsafe {
                // Safety: no live references to the worker can remain while
                // the array is being dropped.
                Box::from_raw(worker)
            };
            drop(worker);
        }
    }
}

impl<T, C: cfg::Config> fmt::Debug for Array<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let max = self.max.load(Acquire);
        f.debug_struct("Array")
            .field("max", &max)
            .field("workers", &format_args!("[...; {}]", self.workers.len()))
            .finish()
    }
}
