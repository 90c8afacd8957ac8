use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::{
    sync::{Arc, Barrier, Mutex},
    thread,
    time::{Duration, Instant},
};

#[derive(Clone)]
struct MultithreadedBench<T> {
    start: Arc<Barrier>,
    end: Arc<Barrier>,
    stack: Arc<T>,
}

impl<T: Send + Sync + 'static> MultithreadedBench<T> {
    fn new(stack: Arc<T>) -> Self {
        Self {
            start: Arc::new(Barrier::new(5)),
            end: Arc::new(Barrier::new(5)),
            stack,
        }
    }

    fn thread(&self, f: impl FnOnce(&Barrier, &T) + Send + 'static) -> &Self {
        let start = self.start.clone();
        let end = self.end.clone();
        let stack = self.stack.clone();
        thread::spawn(move || {
            f(&*start, &*stack);
            end.wait();
        });
        self
    }

    fn run(&self) -> Duration {
        self.start.wait();
        let t0 = Instant::now();
        self.end.wait();
        t0.elapsed()
    }
}

fn push_pop_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_pop_contended");

    for i in [100, 500, 1000, 5000].iter() {
        group.bench_with_input(BenchmarkId::new("epoch_stack", i), i, |b, &i| {
            b.iter_custom(|iters| {
                let mut total = Duration::from_secs(0);
                for _ in 0..iters {
                    let bench = MultithreadedBench::new(Arc::new(epoch_stack::Stack::new()));
                    let elapsed = bench
                        .thread(move |start, stack| {
                            start.wait();
                            for n in 0..i {
                                stack.push(n).unwrap();
                            }
                        })
                        .thread(move |start, stack| {
                            start.wait();
                            for n in 0..i {
                                stack.push(n).unwrap();
                            }
                        })
                        .thread(move |start, stack| {
                            start.wait();
                            let mut popped = 0;
                            while popped < i {
                                if stack.pop().is_some() {
                                    popped += 1;
                                } else {
                                    thread::yield_now();
                                }
                            }
                        })
                        .thread(move |start, stack| {
                            start.wait();
                            let mut popped = 0;
                            while popped < i {
                                if stack.pop().is_some() {
                                    popped += 1;
                                } else {
                                    thread::yield_now();
                                }
                            }
                        })
                        .run();
                    total += elapsed;
                }
                total
            })
        });
        group.bench_with_input(BenchmarkId::new("mutex_vec", i), i, |b, &i| {
            b.iter_custom(|iters| {
                let mut total = Duration::from_secs(0);
                for _ in 0..iters {
                    let bench = MultithreadedBench::new(Arc::new(Mutex::new(Vec::new())));
                    let elapsed = bench
                        .thread(move |start, stack| {
                            start.wait();
                            for n in 0..i {
                                stack.lock().unwrap().push(n);
                            }
                        })
                        .thread(move |start, stack| {
                            start.wait();
                            for n in 0..i {
                                stack.lock().unwrap().push(n);
                            }
                        })
                        .thread(move |start, stack| {
                            start.wait();
                            let mut popped = 0;
                            while popped < i {
                                if stack.lock().unwrap().pop().is_some() {
                                    popped += 1;
                                } else {
                                    thread::yield_now();
                                }
                            }
                        })
                        .thread(move |start, stack| {
                            start.wait();
                            let mut popped = 0;
                            while popped < i {
                                if stack.lock().unwrap().pop().is_some() {
                                    popped += 1;
                                } else {
                                    thread::yield_now();
                                }
                            }
                        })
                        .run();
                    total += elapsed;
                }
                total
            })
        });
    }
    group.finish();
}

fn push_pop_local(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_pop_local");
    group.bench_function("epoch_stack", |b| {
        let stack = epoch_stack::Stack::new();
        b.iter(|| {
            stack.push(1usize).unwrap();
            stack.pop()
        });
    });
    group.bench_function("mutex_vec", |b| {
        let stack = Mutex::new(Vec::new());
        b.iter(|| {
            stack.lock().unwrap().push(1usize);
            stack.lock().unwrap().pop()
        });
    });
    group.finish();
}

criterion_group!(benches, push_pop_contended, push_pop_local);
criterion_main!(benches);
