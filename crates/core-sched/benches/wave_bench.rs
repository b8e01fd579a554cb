//! Wave-scheduling throughput over a deep multirate chain.

use core_expr::RpnToken;
use core_firing::FiringTree;
use core_graph::{Model, VertexKind};
use core_platform::Platform;
use core_sched::{ListScheduler, Mapper, MappingPolicy, Schedule, SchedulingPolicy};
use criterion::{Criterion, criterion_group, criterion_main};

fn chain(length: usize) -> Model {
    let mut model = Model::new("bench");
    let root = model.root();
    let rate = |n: i64| vec![RpnToken::literal(n)];
    let mut prev = model
        .add_vertex(root, "stage0", VertexKind::Normal, 0, 1)
        .unwrap();
    for i in 1..length {
        let out_ports = if i + 1 < length { 1 } else { 0 };
        let v = model
            .add_vertex(root, format!("stage{i}"), VertexKind::Normal, 1, out_ports)
            .unwrap();
        // Alternating 2:1 / 1:2 keeps repetition counts bounded but uneven.
        let (src, snk) = if i % 2 == 0 { (2, 1) } else { (1, 2) };
        model
            .add_edge(root, prev, 0, &rate(src), v, 0, &rate(snk))
            .unwrap();
        prev = v;
    }
    model
}

fn platform(pes: usize) -> Platform {
    let mut p = Platform::new();
    let c = p.add_cluster(64 << 20);
    let grt = p.add_pe(c, 0, true);
    for _ in 1..pes {
        p.add_pe(c, 0, true);
    }
    p.set_grt(grt);
    p
}

fn bench_wave(c: &mut Criterion) {
    let model = chain(64);
    let platform = platform(4);
    c.bench_function("schedule_wave_chain64", |b| {
        b.iter(|| {
            let mut tree = FiringTree::new(&model).unwrap();
            let mut schedule = Schedule::new(platform.lrt_count());
            let mut scheduler = ListScheduler::new(SchedulingPolicy::List);
            let mut mapper = Mapper::new(MappingPolicy::BestFit);
            scheduler
                .schedule(&model, &mut tree, &platform, &mut schedule, &mut mapper)
                .unwrap();
            schedule.len()
        })
    });
}

criterion_group!(benches, bench_wave);
criterion_main!(benches);
