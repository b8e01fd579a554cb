//! Wave-level scheduling tests over small hand-built models.

use core_expr::RpnToken;
use core_firing::FiringTree;
use core_graph::{Model, VertexKind};
use core_platform::{MemoryBus, PeId, Platform};
use core_sched::{
    ListScheduler, Mapper, MappingPolicy, SchedError, Schedule, SchedulingPolicy, TaskKind,
    TaskState,
};

fn rate(n: i64) -> Vec<RpnToken> {
    vec![RpnToken::literal(n)]
}

fn single_pe_platform() -> Platform {
    let mut p = Platform::new();
    let c = p.add_cluster(1 << 20);
    let pe = p.add_pe(c, 0, true);
    p.set_grt(pe);
    p
}

fn two_cluster_platform() -> Platform {
    let mut p = Platform::new();
    let c0 = p.add_cluster(1 << 20);
    let c1 = p.add_cluster(1 << 20);
    let pe0 = p.add_pe(c0, 0, true);
    p.add_pe(c1, 1, true);
    p.set_grt(pe0);
    let bus = MemoryBus {
        read_speed: 8,
        write_speed: 8,
        send_kernel: 90,
        recv_kernel: 91,
    };
    p.set_bus(c0, c1, bus);
    p.set_bus(c1, c0, bus);
    p
}

fn chain_model(rates: (i64, i64)) -> (Model, core_graph::VertexId, core_graph::VertexId) {
    let mut model = Model::new("chain");
    let root = model.root();
    let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
    let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
    model
        .add_edge(root, a, 0, &rate(rates.0), b, 0, &rate(rates.1))
        .unwrap();
    (model, a, b)
}

#[test]
fn producers_schedule_before_consumers() {
    let (model, a, b) = chain_model((2, 1));
    let platform = single_pe_platform();
    let mut tree = FiringTree::new(&model).unwrap();
    let mut schedule = Schedule::new(platform.lrt_count());
    let mut scheduler = ListScheduler::new(SchedulingPolicy::List);
    let mut mapper = Mapper::new(MappingPolicy::BestFit);
    let range = scheduler
        .schedule(&model, &mut tree, &platform, &mut schedule, &mut mapper)
        .unwrap();
    // rv(A) = 1, rv(B) = 2: three tasks, A first by level.
    assert_eq!(range, 0..3);
    let first = schedule.task(0).vertex_ref().unwrap();
    assert_eq!(first.1, a);
    for ix in 1..3 {
        assert_eq!(schedule.task(ix).vertex_ref().unwrap().1, b);
    }
    // Same-PE monotonicity.
    let tasks = schedule.tasks();
    for pair in tasks.windows(2) {
        if pair[0].mapped_pe == pair[1].mapped_pe {
            assert!(pair[0].end_time <= pair[1].start_time);
        }
    }
    // B's firings link back to A with the right window sizes.
    for ix in 1..3u32 {
        let preds = &schedule.task(ix).predecessors;
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].task, 0);
        assert_eq!(preds[0].size, 1);
    }
    assert!(schedule.tasks().iter().all(|t| t.state == TaskState::Ready));
}

#[test]
fn unmappable_vertex_is_fatal_before_dispatch() {
    let (mut model, a, _) = chain_model((1, 1));
    let root = model.root();
    // Advertise a PE type the platform does not have.
    model.set_rt_info(root, a, 0, 1 << 7, &[]).unwrap();
    let platform = single_pe_platform();
    let mut tree = FiringTree::new(&model).unwrap();
    let mut schedule = Schedule::new(platform.lrt_count());
    let mut scheduler = ListScheduler::new(SchedulingPolicy::List);
    let mut mapper = Mapper::new(MappingPolicy::BestFit);
    let err = scheduler
        .schedule(&model, &mut tree, &platform, &mut schedule, &mut mapper)
        .unwrap_err();
    assert!(matches!(err, SchedError::NoMappablePe { vertex } if vertex == "A"));
}

#[test]
fn cross_cluster_dependency_injects_sync_pair() {
    let (mut model, a, b) = chain_model((128, 128));
    let root = model.root();
    model.set_rt_info(root, a, 0, 1 << 0, &[]).unwrap();
    model.set_rt_info(root, b, 1, 1 << 1, &[]).unwrap();
    let platform = two_cluster_platform();
    let mut tree = FiringTree::new(&model).unwrap();
    let mut schedule = Schedule::new(platform.lrt_count());
    let mut scheduler = ListScheduler::new(SchedulingPolicy::List);
    let mut mapper = Mapper::new(MappingPolicy::BestFit);
    scheduler
        .schedule(&model, &mut tree, &platform, &mut schedule, &mut mapper)
        .unwrap();
    let send = schedule
        .tasks()
        .iter()
        .find(|t| matches!(t.kind, TaskKind::SyncSend { .. }))
        .expect("send injected");
    let recv = schedule
        .tasks()
        .iter()
        .find(|t| matches!(t.kind, TaskKind::SyncReceive { .. }))
        .expect("receive injected");
    let TaskKind::SyncSend { size, kernel_ix, .. } = send.kind else {
        unreachable!()
    };
    assert_eq!(size, 128);
    assert_eq!(kernel_ix, 90);
    let TaskKind::SyncReceive { size, kernel_ix, .. } = recv.kind else {
        unreachable!()
    };
    assert_eq!(size, 128);
    assert_eq!(kernel_ix, 91);
    // Send on the producer's cluster, receive on the consumer's.
    assert_eq!(send.mapped_pe, Some(PeId(0)));
    assert_eq!(recv.mapped_pe, Some(PeId(1)));
    // The consumer now depends on the receive, which depends on the send.
    let b_task = schedule
        .tasks()
        .iter()
        .find(|t| t.vertex_ref().is_some_and(|(_, v, _)| v == b))
        .unwrap();
    assert!(b_task.predecessors.iter().any(|l| l.task == recv.ix));
    assert!(recv.predecessors.iter().any(|l| l.task == send.ix));
    assert!(b_task.sync_exec_ix[0] != core_sched::NO_SYNC || b_task.sync_exec_ix[1] != core_sched::NO_SYNC);
}

#[test]
fn round_robin_cycles_over_pes() {
    let mut model = Model::new("spread");
    let root = model.root();
    // Four independent portless actors so mapping is unconstrained.
    for i in 0..4 {
        model
            .add_vertex(root, format!("solo{i}"), VertexKind::Normal, 0, 0)
            .unwrap();
    }
    let mut platform = Platform::new();
    let c = platform.add_cluster(1 << 20);
    let pe0 = platform.add_pe(c, 0, true);
    platform.add_pe(c, 0, true);
    platform.set_grt(pe0);
    let mut tree = FiringTree::new(&model).unwrap();
    let mut schedule = Schedule::new(platform.lrt_count());
    let mut scheduler = ListScheduler::new(SchedulingPolicy::Greedy);
    let mut mapper = Mapper::new(MappingPolicy::RoundRobin);
    scheduler
        .schedule(&model, &mut tree, &platform, &mut schedule, &mut mapper)
        .unwrap();
    let on_pe0 = schedule
        .tasks()
        .iter()
        .filter(|t| t.mapped_pe == Some(PeId(0)))
        .count();
    let on_pe1 = schedule
        .tasks()
        .iter()
        .filter(|t| t.mapped_pe == Some(PeId(1)))
        .count();
    assert_eq!((on_pe0, on_pe1), (2, 2));
}

#[test]
fn dynamic_consumer_blocks_until_parameter_feedback() {
    use core_graph::ParamSpec;
    let mut model = Model::new("dyn");
    let root = model.root();
    let p = model.add_param(root, "p", ParamSpec::Dynamic).unwrap();
    let cfg = model.add_vertex(root, "cfg", VertexKind::Config, 0, 0).unwrap();
    model.bind_output_param(root, cfg, p).unwrap();
    let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
    let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
    model
        .add_edge(root, a, 0, &[RpnToken::param("p")], b, 0, &rate(1))
        .unwrap();
    let platform = single_pe_platform();
    let mut tree = FiringTree::new(&model).unwrap();
    let mut schedule = Schedule::new(platform.lrt_count());
    let mut scheduler = ListScheduler::new(SchedulingPolicy::List);
    let mut mapper = Mapper::new(MappingPolicy::BestFit);

    // Wave 1: only the configuration firing is schedulable.
    let range = scheduler
        .schedule(&model, &mut tree, &platform, &mut schedule, &mut mapper)
        .unwrap();
    assert_eq!(range.len(), 1);
    assert_eq!(schedule.task(0).vertex_ref().unwrap().1, cfg);

    // Parameter arrives; wave 2 schedules A once and B three times.
    tree.set_param_value(&model, tree.root(), p, 3).unwrap();
    let range = scheduler
        .schedule(&model, &mut tree, &platform, &mut schedule, &mut mapper)
        .unwrap();
    assert_eq!(range.len(), 4);
    let fired: Vec<_> = range
        .map(|ix| schedule.task(ix).vertex_ref().unwrap().1)
        .collect();
    assert_eq!(fired.iter().filter(|v| **v == a).count(), 1);
    assert_eq!(fired.iter().filter(|v| **v == b).count(), 3);
}
