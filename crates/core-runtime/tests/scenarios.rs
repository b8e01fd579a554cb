//! End-to-end scenarios: build a model, run it on in-process runners, and
//! observe the kernels' side effects.

use core_config::Config;
use core_expr::RpnToken;
use core_graph::{Model, ParamSpec, VertexKind};
use core_platform::{Kernel, KernelRegistry, MemoryBus, Platform};
use core_runtime::{RuntimeError, create_runtime_context, quit, run};
use std::sync::{Arc, Mutex};

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

type Trace = Arc<Mutex<Vec<Vec<u8>>>>;

fn recording_kernel(trace: Trace) -> Kernel {
    Box::new(move |_params, _out_params, inputs, _outputs| {
        let mut log = trace.lock().unwrap();
        for input in inputs {
            log.push(input.to_vec());
        }
    })
}

fn emitting_kernel(bytes: Vec<u8>) -> Kernel {
    Box::new(move |_params, _out_params, _inputs, outputs| {
        outputs[0].copy_from_slice(&bytes);
    })
}

#[test]
fn static_producer_consumer_chain() {
    let mut model = Model::new("chain");
    let root = model.root();
    let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
    let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
    model.add_edge(root, a, 0, &rate(1), b, 0, &rate(1)).unwrap();

    let mut kernels = KernelRegistry::new();
    let produce = kernels.register(emitting_kernel(vec![42]));
    let seen: Trace = Arc::new(Mutex::new(Vec::new()));
    let consume = kernels.register(recording_kernel(seen.clone()));
    model.set_rt_info(root, a, produce, 1 << 0, &[]).unwrap();
    model.set_rt_info(root, b, consume, 1 << 0, &[]).unwrap();

    let mut ctx = create_runtime_context(
        model,
        single_pe_platform(),
        kernels,
        Config::default(),
    )
    .unwrap();
    run(&mut ctx).unwrap();
    quit(ctx);
    assert_eq!(*seen.lock().unwrap(), vec![vec![42]]);
}

#[test]
fn multirate_consumer_sees_merged_window() {
    // A fires twice at rate 1; B consumes 2 per firing through a merge FIFO.
    let mut model = Model::new("merge");
    let root = model.root();
    let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
    let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
    model.add_edge(root, a, 0, &rate(1), b, 0, &rate(2)).unwrap();

    let mut kernels = KernelRegistry::new();
    let counter = Arc::new(Mutex::new(0u8));
    let produce = kernels.register(Box::new(move |_p, _op, _i, outputs| {
        let mut n = counter.lock().unwrap();
        outputs[0][0] = 10 + *n;
        *n += 1;
    }));
    let seen: Trace = Arc::new(Mutex::new(Vec::new()));
    let consume = kernels.register(recording_kernel(seen.clone()));
    model.set_rt_info(root, a, produce, 1 << 0, &[]).unwrap();
    model.set_rt_info(root, b, consume, 1 << 0, &[]).unwrap();

    let mut ctx = create_runtime_context(
        model,
        single_pe_platform(),
        kernels,
        Config::default(),
    )
    .unwrap();
    run(&mut ctx).unwrap();
    quit(ctx);
    assert_eq!(*seen.lock().unwrap(), vec![vec![10, 11]]);
}

#[test]
fn persistent_delay_carries_tokens_across_iterations() {
    // A(1) -[persistent delay 2]-> B(1), three iterations. B reads the
    // initial zeros twice, then A's first token; afterwards the region holds
    // A's two most recent tokens.
    let mut model = Model::new("delayed");
    let root = model.root();
    let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
    let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
    let e = model.add_edge(root, a, 0, &rate(1), b, 0, &rate(1)).unwrap();
    model.add_delay(root, e, &rate(2), true, None, None).unwrap();

    let mut kernels = KernelRegistry::new();
    let counter = Arc::new(Mutex::new(0u8));
    let produce = kernels.register(Box::new(move |_p, _op, _i, outputs| {
        let mut n = counter.lock().unwrap();
        *n += 1;
        outputs[0][0] = *n; // 1, 2, 3, ...
    }));
    let seen: Trace = Arc::new(Mutex::new(Vec::new()));
    let consume = kernels.register(recording_kernel(seen.clone()));
    model.set_rt_info(root, a, produce, 1 << 0, &[]).unwrap();
    model.set_rt_info(root, b, consume, 1 << 0, &[]).unwrap();

    let mut config = Config::default();
    config.file.engine.loop_count = 3;
    let mut ctx =
        create_runtime_context(model, single_pe_platform(), kernels, config).unwrap();
    run(&mut ctx).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec![0], vec![0], vec![1]],
        "two initial tokens then the first produced one"
    );
    // Reserved region starts at address 0 and now holds tokens 2 and 3.
    assert_eq!(ctx.read_memory(0, 0, 2), vec![2, 3]);
    quit(ctx);
}

#[test]
fn fork_join_shares_buffers_and_rebalances() {
    // A(4) -> FORK -> {2, 2} -> JOIN(4) -> B(4).
    let mut model = Model::new("forkjoin");
    let root = model.root();
    let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
    let fork = model.add_vertex(root, "fork", VertexKind::Fork, 1, 2).unwrap();
    let join = model.add_vertex(root, "join", VertexKind::Join, 2, 1).unwrap();
    let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
    model.add_edge(root, a, 0, &rate(4), fork, 0, &rate(4)).unwrap();
    model.add_edge(root, fork, 0, &rate(2), join, 0, &rate(2)).unwrap();
    model.add_edge(root, fork, 1, &rate(2), join, 1, &rate(2)).unwrap();
    model.add_edge(root, join, 0, &rate(4), b, 0, &rate(4)).unwrap();

    let mut kernels = KernelRegistry::new();
    let produce = kernels.register(emitting_kernel(vec![1, 2, 3, 4]));
    let joiner = kernels.register(Box::new(
        |_p: &[i64], _op: &mut [i64], inputs: &[&[u8]], outputs: &mut [&mut [u8]]| {
            let mut cursor = 0;
            for input in inputs {
                outputs[0][cursor..cursor + input.len()].copy_from_slice(input);
                cursor += input.len();
            }
        },
    ));
    let seen: Trace = Arc::new(Mutex::new(Vec::new()));
    let consume = kernels.register(recording_kernel(seen.clone()));
    model.set_rt_info(root, a, produce, 1 << 0, &[]).unwrap();
    model.set_rt_info(root, join, joiner, 1 << 0, &[]).unwrap();
    model.set_rt_info(root, b, consume, 1 << 0, &[]).unwrap();

    let mut ctx = create_runtime_context(
        model,
        single_pe_platform(),
        kernels,
        Config::default(),
    )
    .unwrap();
    run(&mut ctx).unwrap();
    quit(ctx);
    assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2, 3, 4]]);
}

#[test]
fn repeat_passes_its_input_through() {
    // A(4) -> REPEAT(4:4) -> B(4): the repeat firing is kernel-less
    // plumbing over an aliased buffer.
    let mut model = Model::new("repeat");
    let root = model.root();
    let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
    let r = model.add_vertex(root, "R", VertexKind::Repeat, 1, 1).unwrap();
    let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
    model.add_edge(root, a, 0, &rate(4), r, 0, &rate(4)).unwrap();
    model.add_edge(root, r, 0, &rate(4), b, 0, &rate(4)).unwrap();

    let mut kernels = KernelRegistry::new();
    let produce = kernels.register(emitting_kernel(vec![9, 8, 7, 6]));
    let seen: Trace = Arc::new(Mutex::new(Vec::new()));
    let consume = kernels.register(recording_kernel(seen.clone()));
    model.set_rt_info(root, a, produce, 1 << 0, &[]).unwrap();
    model.set_rt_info(root, b, consume, 1 << 0, &[]).unwrap();

    let mut ctx = create_runtime_context(
        model,
        single_pe_platform(),
        kernels,
        Config::default(),
    )
    .unwrap();
    run(&mut ctx).unwrap();
    quit(ctx);
    assert_eq!(*seen.lock().unwrap(), vec![vec![9, 8, 7, 6]]);
}

#[test]
fn dynamic_graph_resolves_through_config_feedback() {
    // CFG -> param p; A(rate = p) -> B(rate = 1). CFG reports p = 3, so one
    // firing of A feeds three firings of B.
    let mut model = Model::new("dynamic");
    let root = model.root();
    let p = model.add_param(root, "p", ParamSpec::Dynamic).unwrap();
    let cfg = model.add_vertex(root, "cfg", VertexKind::Config, 0, 0).unwrap();
    model.bind_output_param(root, cfg, p).unwrap();
    let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
    let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
    model
        .add_edge(root, a, 0, &[RpnToken::param("p")], b, 0, &rate(1))
        .unwrap();

    let mut kernels = KernelRegistry::new();
    let configure = kernels.register(Box::new(
        |_p: &[i64], out_params: &mut [i64], _i: &[&[u8]], _o: &mut [&mut [u8]]| {
            out_params[0] = 3;
        },
    ));
    let produce = kernels.register(Box::new(
        |_p: &[i64], _op: &mut [i64], _i: &[&[u8]], outputs: &mut [&mut [u8]]| {
            for (i, byte) in outputs[0].iter_mut().enumerate() {
                *byte = 7 + i as u8;
            }
        },
    ));
    let seen: Trace = Arc::new(Mutex::new(Vec::new()));
    let consume = kernels.register(recording_kernel(seen.clone()));
    model.set_rt_info(root, cfg, configure, 1 << 0, &[]).unwrap();
    model.set_rt_info(root, a, produce, 1 << 0, &[]).unwrap();
    model.set_rt_info(root, b, consume, 1 << 0, &[]).unwrap();

    let mut ctx = create_runtime_context(
        model,
        single_pe_platform(),
        kernels,
        Config::default(),
    )
    .unwrap();
    run(&mut ctx).unwrap();
    quit(ctx);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec![7], vec![8], vec![9]],
        "three consumer firings after parameter resolution"
    );
}

#[test]
fn cross_cluster_transfer_moves_data_through_sync_pair() {
    // A only on cluster 0, B only on cluster 1, edge rate 128.
    let mut model = Model::new("xcluster");
    let root = model.root();
    let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
    let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
    model
        .add_edge(root, a, 0, &rate(128), b, 0, &rate(128))
        .unwrap();

    let mut kernels = KernelRegistry::new();
    let payload: Vec<u8> = (0..128).map(|i| i as u8).collect();
    let produce = kernels.register(emitting_kernel(payload.clone()));
    let seen: Trace = Arc::new(Mutex::new(Vec::new()));
    let consume = kernels.register(recording_kernel(seen.clone()));
    let copy: fn(&[i64], &mut [i64], &[&[u8]], &mut [&mut [u8]]) =
        |_p, _op, inputs, outputs| outputs[0].copy_from_slice(inputs[0]);
    let send = kernels.register(Box::new(copy));
    let recv = kernels.register(Box::new(copy));
    model.set_rt_info(root, a, produce, 1 << 0, &[]).unwrap();
    model.set_rt_info(root, b, consume, 1 << 1, &[]).unwrap();

    let mut platform = Platform::new();
    let c0 = platform.add_cluster(1 << 20);
    let c1 = platform.add_cluster(1 << 20);
    let pe0 = platform.add_pe(c0, 0, true);
    platform.add_pe(c1, 1, true);
    platform.set_grt(pe0);
    let bus = MemoryBus {
        read_speed: 16,
        write_speed: 16,
        send_kernel: send,
        recv_kernel: recv,
    };
    platform.set_bus(c0, c1, bus);
    platform.set_bus(c1, c0, bus);

    let mut ctx = create_runtime_context(model, platform, kernels, Config::default()).unwrap();
    run(&mut ctx).unwrap();
    quit(ctx);
    assert_eq!(*seen.lock().unwrap(), vec![payload]);
}

#[test]
fn unmappable_actor_aborts_the_run() {
    let mut model = Model::new("unmappable");
    let root = model.root();
    let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
    let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
    model.add_edge(root, a, 0, &rate(1), b, 0, &rate(1)).unwrap();
    // No PE of type 9 exists anywhere.
    model.set_rt_info(root, a, 0, 1 << 9, &[]).unwrap();
    let mut ctx = create_runtime_context(
        model,
        single_pe_platform(),
        KernelRegistry::new(),
        Config::default(),
    )
    .unwrap();
    let err = run(&mut ctx).unwrap_err();
    assert!(matches!(err, RuntimeError::Sched(_)));
    quit(ctx);
}

#[test]
fn srdag_runtime_is_rejected() {
    let mut config = Config::default();
    config.file.engine.runtime = core_config::RuntimeKind::Srdag;
    let err = create_runtime_context(
        Model::new("noop"),
        single_pe_platform(),
        KernelRegistry::new(),
        config,
    )
    .unwrap_err();
    assert!(matches!(err, RuntimeError::UnsupportedRuntime));
}

#[test]
fn extern_loop_runs_one_iteration_per_call() {
    let mut model = Model::new("extloop");
    let root = model.root();
    let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
    let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
    model.add_edge(root, a, 0, &rate(1), b, 0, &rate(1)).unwrap();
    let mut kernels = KernelRegistry::new();
    let produce = kernels.register(emitting_kernel(vec![5]));
    let seen: Trace = Arc::new(Mutex::new(Vec::new()));
    let consume = kernels.register(recording_kernel(seen.clone()));
    model.set_rt_info(root, a, produce, 1 << 0, &[]).unwrap();
    model.set_rt_info(root, b, consume, 1 << 0, &[]).unwrap();
    let mut config = Config::default();
    config.file.engine.run_mode = core_config::RunMode::ExternLoop;
    let mut ctx =
        create_runtime_context(model, single_pe_platform(), kernels, config).unwrap();
    run(&mut ctx).unwrap();
    run(&mut ctx).unwrap();
    assert_eq!(ctx.iterations_done(), 2);
    quit(ctx);
    assert_eq!(seen.lock().unwrap().len(), 2);
}
