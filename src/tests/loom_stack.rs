use super::util::*;
use crate::{Config, PushError, Stack};
use loom::sync::Arc;
use loom::thread;

struct TinyConfig;

impl Config for TinyConfig {
    const MAX_WORKERS: usize = 4;
    const MAX_PAGES: usize = 2;
    const INITIAL_PAGE_SIZE: usize = 4;
    const EPOCH_ADVANCE_INTERVAL: usize = 1;
    const RETIRE_THRESHOLD: usize = 1;
}

fn new_stack() -> Arc<Stack<usize, TinyConfig>> {
    Arc::new(Stack::new_with_config())
}

#[test]
fn concurrent_push_pop() {
    run_model("stack::concurrent_push_pop", || {
        let stack = new_stack();

        let s = stack.clone();
        let t1 = thread::spawn(move || {
            s.push(1).expect("push");
        });

        let s = stack.clone();
        let t2 = thread::spawn(move || {
            s.push(2).expect("push");
        });

        t1.join().expect("thread 1 should not panic");
        t2.join().expect("thread 2 should not panic");

        let first = stack.pop().expect("two values were pushed");
        let second = stack.pop().expect("two values were pushed");
        assert_ne!(first, second);
        assert!(first == 1 || first == 2);
        assert!(second == 1 || second == 2);
        assert_eq!(stack.pop(), None);
    });
}

#[test]
fn push_racing_pop() {
    run_model("stack::push_racing_pop", || {
        let stack = new_stack();

        let s = stack.clone();
        let pusher = thread::spawn(move || {
            s.push(1).expect("push");
            s.push(2).expect("push");
        });

        // A racing pop may observe any prefix of the pushes.
        let popped = stack.pop();

        pusher.join().expect("pusher should not panic");

        let mut seen = Vec::new();
        seen.extend(popped);
        while let Some(value) = stack.pop() {
            seen.push(value);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    });
}

#[test]
fn recycle_under_contention() {
    // With an advance interval and retire threshold of one, every pop
    // attempts to advance the epoch and recycle its node, so the later
    // pushes race the reclamation of the earlier pops' nodes.
    let mut builder = loom::model::Builder::new();
    builder.preemption_bound = Some(3);
    run_builder("stack::recycle_under_contention", builder, || {
        let stack = new_stack();

        let s = stack.clone();
        let t1 = thread::spawn(move || {
            s.push(1).expect("push");
            let popped = s.pop();
            s.push(3).expect("push");
            popped
        });

        let s = stack.clone();
        let t2 = thread::spawn(move || {
            s.push(2).expect("push");
            s.pop()
        });

        let mut seen = Vec::new();
        seen.extend(t1.join().expect("thread 1 should not panic"));
        seen.extend(t2.join().expect("thread 2 should not panic"));
        while let Some(value) = stack.pop() {
            seen.push(value);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3]);
    });
}

#[test]
fn shutdown_rejects_racing_push() {
    run_model("stack::shutdown_rejects_racing_push", || {
        let stack = new_stack();
        stack.push(1).expect("the stack is not yet shut down");

        let s = stack.clone();
        let pusher = thread::spawn(move || s.push(2));

        stack.shutdown();
        match pusher.join().expect("pusher should not panic") {
            // the push won the race and landed before the shutdown.
            Ok(()) => {}
            Err(err) => assert_eq!(err, PushError::Shutdown(2)),
        }

        // After a shutdown, pops report empty regardless of contents.
        assert_eq!(stack.pop(), None);
    });
}

#[test]
fn bulk_push_is_atomic() {
    run_model("stack::bulk_push_is_atomic", || {
        let stack = new_stack();

        let s = stack.clone();
        let t1 = thread::spawn(move || {
            s.push_bulk(vec![1, 2]).expect("push_bulk");
        });

        let s = stack.clone();
        let t2 = thread::spawn(move || {
            s.push(3).expect("push");
        });

        t1.join().expect("thread 1 should not panic");
        t2.join().expect("thread 2 should not panic");

        let mut drained = Vec::new();
        while let Some(value) = stack.pop() {
            drained.push(value);
        }
        assert_eq!(drained.len(), 3);

        // The batch must pop as 2 then 1 with nothing interleaved.
        let two = drained.iter().position(|&v| v == 2).expect("2 was pushed");
        let one = drained.iter().position(|&v| v == 1).expect("1 was pushed");
        assert_eq!(one, two + 1, "batch was interleaved: {:?}", drained);
    });
}
