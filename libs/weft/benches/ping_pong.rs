use criterion::{Criterion, criterion_group, criterion_main};
use weft::{Event, FiberRef, FiberSystem};

fn ping_pong(c: &mut Criterion) {
    let system = FiberSystem::with_threads(2);
    let me = system.fiberize();

    c.bench_function("event round trip", |b| {
        let ping: Event<FiberRef> = Event::unique();
        let pong: Event<()> = Event::unique();

        let echo = system
            .fiber({
                let ping = ping.clone();
                let pong = pong.clone();
                move || {
                    loop {
                        let sender = ping.wait();
                        sender.send(&pong, ());
                    }
                }
            })
            .run();

        b.iter(|| {
            echo.send(&ping, me.clone());
            pong.wait();
        });

        echo.kill();
    });
}

criterion_group!(benches, ping_pong);
criterion_main!(benches);
