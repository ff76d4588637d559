use coro::stack::OsStack;
use coro::{Coroutine, Exit};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn switch(c: &mut Criterion) {
    c.bench_function("resume/suspend pair", |b| {
        let stack = OsStack::default();
        let mut coro = Coroutine::with_stack(stack, |mut input: usize, yielder| -> usize {
            loop {
                input = yielder.suspend(input);
            }
        });

        b.iter(|| {
            let Exit::Yielded(out) = coro.resume(black_box(1)) else {
                unreachable!()
            };
            black_box(out);
        });
    });

    c.bench_function("create/run/destroy", |b| {
        b.iter(|| {
            let stack = OsStack::default();
            let mut coro = Coroutine::with_stack(stack, |input: usize, _yielder| input);
            coro.resume(black_box(1))
        });
    });
}

criterion_group!(benches, switch);
criterion_main!(benches);
