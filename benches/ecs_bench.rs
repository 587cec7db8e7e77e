use criterion::{black_box, criterion_group, criterion_main, Criterion};

use spatial_ecs::prelude::*;

#[derive(Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}
impl Component for Position {}

#[derive(Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}
impl Component for Velocity {}

fn bench_spawn(c: &mut Criterion) {
    register::<Position>();
    register::<Velocity>();

    c.bench_function("spawn_10k", |b| {
        b.iter(|| {
            let em = EntityManager::new();
            let mut ids = Vec::with_capacity(10_000);
            for i in 0..10_000 {
                let f = i as f32;
                ids.push(
                    em.add_entity((
                        Position { x: f, y: f, z: f },
                        Velocity {
                            x: 1.0,
                            y: 0.0,
                            z: 0.0,
                        },
                    ))
                    .unwrap(),
                );
            }
            black_box(em.entity_count());
            // Return indices to the shared pool between iterations.
            for id in ids {
                em.destroy(id);
            }
        });
    });
}

fn bench_iterate(c: &mut Criterion) {
    register::<Position>();
    register::<Velocity>();

    let em = EntityManager::new();
    for i in 0..100_000 {
        let f = i as f32;
        em.add_entity((
            Position { x: f, y: f, z: f },
            Velocity {
                x: 1.0,
                y: 2.0,
                z: 3.0,
            },
        ))
        .unwrap();
    }

    c.bench_function("integrate_100k", |b| {
        let query = Query::new().with::<Position>().with::<Velocity>();
        b.iter(|| {
            let mut sum = 0.0f32;
            for chunk in query.matching_chunks(&em) {
                let velocities = chunk.column::<Velocity>().unwrap();
                // SAFETY: single-threaded bench, no aliasing views.
                let positions = unsafe { chunk.column_mut::<Position>() }.unwrap();
                for (p, v) in positions.iter_mut().zip(velocities) {
                    p.x += v.x;
                    p.y += v.y;
                    p.z += v.z;
                    sum += p.x;
                }
            }
            black_box(sum)
        });
    });
}

criterion_group!(benches, bench_spawn, bench_iterate);
criterion_main!(benches);
