//! Iteration driver and engine lifecycle.

use crate::launcher::{PendingParam, TaskLauncher};
use crate::runner::{StampBoard, spawn_runner};
use crate::{RuntimeError, export};
use core_alloc::{AllocPolicy, FifoAllocator};
use core_comm::{Communicator, Notification};
use core_config::{
    AllocatorConfig, Config, MappingPolicyConfig, RunMode, RuntimeKind, SchedulingPolicyConfig,
};
use core_firing::FiringTree;
use core_graph::Model;
use core_platform::{KernelRegistry, MemoryPool, Platform};
use core_sched::{ListScheduler, Mapper, MappingPolicy, Schedule, SchedulingPolicy};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Everything one application run needs, built by
/// [`create_runtime_context`] and consumed by [`run`].
#[derive(Debug)]
pub struct RuntimeContext {
    model: Model,
    platform: Arc<Platform>,
    pool: Arc<MemoryPool>,
    comm: Communicator,
    board: Arc<StampBoard>,
    runners: Vec<JoinHandle<()>>,
    scheduler: ListScheduler,
    mapper: Mapper,
    allocator: FifoAllocator,
    launcher: TaskLauncher,
    config: Config,
    grt_ix: u32,
    stop: Arc<AtomicBool>,
    iterations_done: u64,
}

impl RuntimeContext {
    /// Cooperative stop flag, polled at iteration boundaries in
    /// `Infinite` mode.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn iterations_done(&self) -> u64 {
        self.iterations_done
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Read back bytes from the shared memory space (external buffers,
    /// persistent delay regions) after a run.
    pub fn read_memory(&self, address: u64, offset: u64, len: usize) -> Vec<u8> {
        self.pool.read(0, address, offset, len)
    }

    /// Seed bytes into the shared memory space before a run (external input
    /// buffers).
    pub fn write_memory(&self, address: u64, offset: u64, data: &[u8]) {
        self.pool.write(0, address, offset, data)
    }
}

/// Validate the application and platform, reserve persistent-delay memory,
/// and spawn one runner per PE.
pub fn create_runtime_context(
    mut model: Model,
    platform: Platform,
    kernels: KernelRegistry,
    config: Config,
) -> Result<RuntimeContext, RuntimeError> {
    if config.file.engine.runtime == RuntimeKind::Srdag {
        return Err(RuntimeError::UnsupportedRuntime);
    }
    model.validate()?;
    platform.validate()?;
    let grt_ix = platform.grt()?.virtual_ix.0;
    let lrt_count = platform.lrt_count();
    let platform = Arc::new(platform);
    let kernels = Arc::new(kernels);
    let pool = Arc::new(MemoryPool::new(1));
    let board = Arc::new(StampBoard::new(lrt_count));
    let mut comm = Communicator::new(lrt_count);

    let alloc_policy = match config.file.scheduling.allocator {
        AllocatorConfig::Default => AllocPolicy::Default,
        AllocatorConfig::DefaultNoSync => AllocPolicy::DefaultNoSync,
        AllocatorConfig::ArchiAware => AllocPolicy::ArchiAware,
    };
    let mut allocator = FifoAllocator::new(alloc_policy, &platform);
    allocator.allocate_persistent_delays(&mut model, &platform, &pool)?;

    let mut runners = Vec::with_capacity(lrt_count);
    for lrt in 0..lrt_count as u32 {
        let endpoint = comm.take_endpoint(lrt)?;
        runners.push(spawn_runner(
            endpoint,
            pool.clone(),
            kernels.clone(),
            board.clone(),
        ));
    }

    let sched_policy = match config.file.scheduling.policy {
        SchedulingPolicyConfig::List => SchedulingPolicy::List,
        SchedulingPolicyConfig::Greedy => SchedulingPolicy::Greedy,
    };
    let map_policy = match config.file.scheduling.mapping {
        MappingPolicyConfig::BestFit => MappingPolicy::BestFit,
        MappingPolicyConfig::RoundRobin => MappingPolicy::RoundRobin,
    };
    info!(
        target: "runtime",
        lrts = lrt_count,
        fully_static = model.is_fully_static(),
        "context_created"
    );
    Ok(RuntimeContext {
        model,
        platform,
        pool,
        comm,
        board,
        runners,
        scheduler: ListScheduler::new(sched_policy),
        mapper: Mapper::new(map_policy),
        allocator,
        launcher: TaskLauncher::new(lrt_count),
        config,
        grt_ix,
        stop: Arc::new(AtomicBool::new(false)),
        iterations_done: 0,
    })
}

/// Drive the application according to the configured run mode.
pub fn run(ctx: &mut RuntimeContext) -> Result<(), RuntimeError> {
    match ctx.config.file.engine.run_mode {
        RunMode::Infinite => {
            while !ctx.stop.load(Ordering::Relaxed) {
                iterate(ctx)?;
            }
            Ok(())
        }
        RunMode::Loop => {
            for _ in 0..ctx.config.file.engine.loop_count {
                iterate(ctx)?;
            }
            Ok(())
        }
        RunMode::ExternLoop => iterate(ctx),
    }
}

/// Tear the engine down: discard runner-local state and join the workers.
pub fn quit(ctx: RuntimeContext) {
    let _ = ctx.comm.broadcast(ctx.grt_ix, Notification::Clear);
    drop(ctx.comm);
    for runner in ctx.runners {
        let _ = runner.join();
    }
    info!(target: "runtime", iterations = ctx.iterations_done, "engine_stopped");
}

/// One application iteration: resolve, schedule, allocate, launch, await.
fn iterate(ctx: &mut RuntimeContext) -> Result<(), RuntimeError> {
    ctx.comm
        .broadcast(ctx.grt_ix, Notification::LrtStartIteration)?;
    ctx.comm.clear_jobs();
    ctx.allocator.clear();
    ctx.scheduler.clear();
    ctx.launcher.reset();
    ctx.board.reset();
    let mut schedule = Schedule::new(ctx.platform.lrt_count());
    let mut tree = FiringTree::new(&ctx.model)?;

    // Wave loop: schedule the resolved portion, launch it, and if dynamic
    // parameters are outstanding, block on the parameter channel, resolve,
    // and go again.
    loop {
        let range = ctx.scheduler.schedule(
            &ctx.model,
            &mut tree,
            &ctx.platform,
            &mut schedule,
            &mut ctx.mapper,
        )?;
        let launched_any = !range.is_empty();
        let pending: Vec<PendingParam> = ctx.launcher.launch_wave(
            &ctx.model,
            &mut tree,
            &mut schedule,
            &mut ctx.allocator,
            &ctx.platform,
            &ctx.comm,
            ctx.grt_ix,
            range,
        )?;
        if !pending.is_empty() {
            await_parameters(ctx, &mut tree, pending)?;
            ctx.allocator
                .update_pending(&ctx.model, &tree, &ctx.comm, ctx.grt_ix)?;
            continue;
        }
        if ctx.scheduler.blocked_len() > 0 {
            if !launched_any {
                return Err(RuntimeError::Deadlock);
            }
            continue;
        }
        break;
    }

    // Completion barrier: one FinishedTask per launched job.
    let mut outstanding = ctx.launcher.total_launched();
    while outstanding > 0 {
        let (lrt, _exec_ix) = ctx.comm.pop_finished()?;
        debug_assert!((lrt as usize) < ctx.platform.lrt_count());
        outstanding -= 1;
    }

    rotate_persistent_delays(ctx, &tree);
    ctx.pool.clear_transient(0);
    ctx.comm
        .broadcast(ctx.grt_ix, Notification::LrtEndIteration)?;
    ctx.iterations_done += 1;

    let busy = schedule.busy_cycles();
    debug!(
        target: "runtime",
        iteration = ctx.iterations_done,
        tasks = schedule.len(),
        makespan = schedule.makespan(),
        busy = ?busy,
        "iteration_complete"
    );
    if ctx.config.file.trace.enabled {
        export_traces(ctx, &schedule)?;
    }
    Ok(())
}

/// Block on the parameter channel until every pending configuration firing
/// reported, writing values into the handler tree as they arrive.
fn await_parameters(
    ctx: &RuntimeContext,
    tree: &mut FiringTree,
    mut pending: Vec<PendingParam>,
) -> Result<(), RuntimeError> {
    info!(target: "runtime", count = pending.len(), "awaiting_dynamic_parameters");
    while !pending.is_empty() {
        let (task_ix, values) = ctx.comm.pop_param()?;
        let Some(pos) = pending.iter().position(|p| p.task_ix == task_ix) else {
            warn!(target: "runtime", task = task_ix, "param_message_for_unknown_task");
            continue;
        };
        let entry = pending.swap_remove(pos);
        let graph = ctx.model.graph(tree.handler(entry.handler).graph);
        let params: Vec<core_graph::ParamId> =
            graph.vertex(entry.vertex).output_params.clone();
        for (param, value) in params.iter().zip(values) {
            tree.set_param_value(&ctx.model, entry.handler, *param, value)?;
            info!(
                target: "runtime",
                param = ctx
                    .model
                    .graph(tree.handler(entry.handler).graph)
                    .param(*param)
                    .name
                    .as_str(),
                value,
                "parameter_received"
            );
        }
    }
    Ok(())
}

/// Persistent delays keep the last `delay` tokens of the iteration: compose
/// the surviving slice of the old region with the producer's tail and write
/// it back to the reserved storage.
fn rotate_persistent_delays(ctx: &RuntimeContext, tree: &FiringTree) {
    for handler in tree.handler_ids() {
        if !tree.handler(handler).is_resolved() {
            continue;
        }
        let graph = ctx.model.graph(tree.handler(handler).graph);
        for edge_id in graph.edge_ids() {
            let edge = graph.edge(edge_id);
            let Some(delay) = &edge.delay else { continue };
            if !delay.persistent {
                continue;
            }
            let Some(region) = delay.address else { continue };
            let d = tree.delay_value(handler, edge_id);
            if d <= 0 {
                continue;
            }
            let snk_total =
                tree.snk_rate(handler, edge_id) * i64::from(tree.rv(handler, edge.sink));
            let src_rate = tree.src_rate(handler, edge_id);
            let produced = src_rate * i64::from(tree.rv(handler, edge.source));
            let mut next = Vec::with_capacity(d as usize);
            for p in 0..d {
                let pos = snk_total + p;
                if pos < d {
                    next.extend(ctx.pool.read(0, region, pos as u64, 1));
                } else if src_rate > 0 && pos - d < produced {
                    let token = pos - d;
                    let slot = tree.edge_slot(handler, edge_id, (token / src_rate) as u32);
                    next.extend(ctx.pool.read(
                        0,
                        slot.address,
                        u64::from(slot.offset) + (token % src_rate) as u64,
                        1,
                    ));
                } else {
                    next.push(0);
                }
            }
            ctx.pool.write(0, region, 0, &next);
        }
    }
}

fn export_traces(ctx: &RuntimeContext, schedule: &Schedule) -> Result<(), RuntimeError> {
    let trace = &ctx.config.file.trace;
    if let Some(path) = &trace.dot {
        std::fs::write(path, export::export_dot(&ctx.model))?;
    }
    if let Some(path) = &trace.gantt_xml {
        std::fs::write(path, export::export_gantt_xml(schedule, &ctx.platform))?;
    }
    if let Some(path) = &trace.gantt_svg {
        std::fs::write(path, export::export_gantt_svg(schedule, &ctx.platform))?;
    }
    Ok(())
}
