use crate::cfg;
use crate::sync::atomic::{AtomicUsize, Ordering};
use crate::util::{Backoff, CachePadded};
use crate::NIL;
use std::fmt;

/// A lock-free list of free slot indices, shared by every worker.
///
/// Workers push reclaimed slots one at a time, and refill their private
/// caches by detaching the entire list in a single swap. Because a consumer
/// takes the whole list at once, no thread ever follows a `next` link that
/// another consumer might be racing it for.
pub(crate) struct FreeList {
    head: CachePadded<AtomicUsize>,
}

impl FreeList {
    pub(crate) fn new() -> Self {
        Self {
            head: CachePadded(AtomicUsize::new(NIL)),
        }
    }

    /// Pushes `idx` onto the free list.
    ///
    /// `before` is called with the current head before each attempt to
    /// publish `idx`, so the caller can link the slot to the rest of the
    /// list; the write it performs is released by the publishing
    /// compare-and-swap.
    pub(crate) fn push<C: cfg::Config>(&self, idx: usize, before: impl Fn(usize)) {
        let mut next = self.head.load(Ordering::Relaxed);
        let mut backoff = Backoff::<C>::new();
        loop {
            before(next);
            match self
                .head
                .compare_exchange(next, idx, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => {
                    test_println!("-> pushed free slot {:#x}; next={:#x}", idx, next);
                    return;
                }
                Err(actual) => {
                    test_println!("-> free list push lost the race; retrying");
                    next = actual;
                    backoff.snooze();
                }
            }
        }
    }

    /// Detaches the entire free list, returning the index of its first slot.
    pub(crate) fn take_all(&self) -> Option<usize> {
        let head = self.head.swap(NIL, Ordering::Acquire);
        test_println!("-> took free list; head={:#x}", head);
        if head == NIL {
            None
        } else {
            Some(head)
        }
    }
}

impl fmt::Debug for FreeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeList")
            .field(
                "head",
                &format_args!("{:#x}", self.head.load(Ordering::Relaxed)),
            )
            .finish()
    }
}

#[cfg(all(test, loom))]
mod test {
    use super::*;
    use crate::cfg::DefaultConfig;
    use crate::sync::UnsafeCell;
    use crate::tests::util;
    use loom::thread;
    use std::sync::Arc;

    #[test]
    fn take_all_sees_pushed_links() {
        util::run_model("free::take_all_sees_pushed_links", || {
            let causalities = [UnsafeCell::new(NIL), UnsafeCell::new(NIL)];
            let shared = Arc::new((causalities, FreeList::new()));
            let shared1 = shared.clone();
            let shared2 = shared.clone();

            // Two threads each publish an index after writing to the cell it
            // names; if `take_all` fails to acquire those writes, loom will
            // catch the racy read below.
            let t1 = thread::spawn(move || {
                let (causalities, free) = &*shared1;
                free.push::<DefaultConfig>(0, |prev| {
                    causalities[0].with_mut(|c| unsafe {
                        *c = 0;
                    });
                    test_println!("prev={:#x}", prev)
                });
            });
            let t2 = thread::spawn(move || {
                let (causalities, free) = &*shared2;
                free.push::<DefaultConfig>(1, |prev| {
                    causalities[1].with_mut(|c| unsafe {
                        *c = 1;
                    });
                    test_println!("prev={:#x}", prev)
                });
            });

            let (causalities, free) = &*shared;
            let mut head = free.take_all();
            while head.is_none() {
                test_println!("-> free list is empty...");
                thread::yield_now();
                head = free.take_all();
            }
            let head = head.unwrap();
            causalities[head].with(|val| unsafe {
                assert_eq!(
                    *val, head,
                    "cell write must happen-before index is pushed to the free list!",
                );
            });

            t1.join().unwrap();
            t2.join().unwrap();
        });
    }
}
