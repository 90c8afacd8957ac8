use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) fn run_model(name: &'static str, f: impl Fn() + Sync + Send + 'static) {
    run_builder(name, loom::model::Builder::new(), f)
}

pub(crate) fn run_builder(
    name: &'static str,
    builder: loom::model::Builder,
    f: impl Fn() + Sync + Send + 'static,
) {
    let iters = AtomicUsize::new(1);
    builder.check(move || {
        test_println!(
            "\n------------ running test {}; iteration {} ------------\n",
            name,
            iters.fetch_add(1, Ordering::SeqCst)
        );
        f()
    });
}
