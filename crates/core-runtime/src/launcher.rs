//! Task launcher: from mapped tasks to job messages on the runner queues.

use crate::RuntimeError;
use core_alloc::FifoAllocator;
use core_comm::{Communicator, Fifo, FifoAttribute, JobMessage, Notification, RunnerNotification};
use core_firing::{FiringTree, HandlerId, NO_TASK, deps};
use core_graph::{Model, VertexId};
use core_sched::{NO_SYNC, Schedule, TaskKind, TaskState};
use std::ops::Range;
use tracing::{debug, trace};

/// A launched configuration firing the driver must collect parameters for.
#[derive(Debug, Clone, Copy)]
pub struct PendingParam {
    pub task_ix: u32,
    pub handler: HandlerId,
    pub vertex: VertexId,
}

#[derive(Debug, Default)]
pub struct TaskLauncher {
    /// Sync tasks awaiting their successor's launch, in emission order.
    deferred_sync: Vec<u32>,
    /// Jobs pushed per LRT this iteration (completion barrier bookkeeping).
    launched_per_lrt: Vec<u32>,
}

impl TaskLauncher {
    pub fn new(lrt_count: usize) -> Self {
        Self {
            deferred_sync: Vec::new(),
            launched_per_lrt: vec![0; lrt_count],
        }
    }

    pub fn reset(&mut self) {
        self.deferred_sync.clear();
        self.launched_per_lrt.fill(0);
    }

    pub fn launched_per_lrt(&self) -> &[u32] {
        &self.launched_per_lrt
    }

    pub fn total_launched(&self) -> u64 {
        self.launched_per_lrt.iter().map(|n| u64::from(*n)).sum()
    }

    /// Emit job messages for every ready task of the wave. Sync tasks are
    /// deferred and flushed immediately before the consumer they serve.
    /// Returns the configuration firings whose parameter feedback the driver
    /// must await.
    #[allow(clippy::too_many_arguments)]
    pub fn launch_wave(
        &mut self,
        model: &Model,
        tree: &mut FiringTree,
        schedule: &mut Schedule,
        allocator: &mut FifoAllocator,
        platform: &core_platform::Platform,
        comm: &Communicator,
        grt_ix: u32,
        range: Range<u32>,
    ) -> Result<Vec<PendingParam>, RuntimeError> {
        let mut pending_params = Vec::new();
        // Sync tasks sit behind the consumer that triggered them in schedule
        // order; collect them all up front so the consumer's launch can
        // flush its pair first.
        for task_ix in range.clone() {
            if schedule.task(task_ix).kind.is_sync() {
                self.deferred_sync.push(task_ix);
            }
        }
        for task_ix in range {
            if schedule.task(task_ix).kind.is_sync()
                || schedule.task(task_ix).state != TaskState::Ready
            {
                continue;
            }
            if let Some(pending) = self.launch_vertex_task(
                model, tree, schedule, allocator, platform, comm, grt_ix, task_ix,
            )? {
                pending_params.push(pending);
            }
        }
        Ok(pending_params)
    }

    #[allow(clippy::too_many_arguments)]
    fn launch_vertex_task(
        &mut self,
        model: &Model,
        tree: &mut FiringTree,
        schedule: &mut Schedule,
        allocator: &mut FifoAllocator,
        platform: &core_platform::Platform,
        comm: &Communicator,
        grt_ix: u32,
        task_ix: u32,
    ) -> Result<Option<PendingParam>, RuntimeError> {
        let (handler, vertex_id, firing) = schedule
            .task(task_ix)
            .vertex_ref()
            .expect("vertex task");
        let graph = model.graph(tree.handler(handler).graph);
        let vertex = graph.vertex(vertex_id);
        let fifos = allocator.build_job_fifos(model, tree, platform, schedule, task_ix)?;
        let values = tree.param_values(handler);
        let input_params: Vec<i64> = vertex
            .input_params
            .iter()
            .map(|p| values.get(p.index()).copied().unwrap_or(0))
            .collect();
        let n_params_out = vertex.output_params.len() as u32;
        let kernel_ix = vertex.rt.as_ref().map_or(u32::MAX, |rt| rt.kernel_ix);
        let message = JobMessage {
            task_ix,
            exec_ix: schedule.task(task_ix).exec_ix,
            kernel_ix,
            n_params_out,
            input_params,
            input_fifos: fifos.inputs,
            output_fifos: fifos.outputs,
            exec_constraints: build_exec_constraints(schedule, task_ix),
            notify_flags: self.build_notify_flags(model, tree, schedule, comm, task_ix),
        };
        // Flush the sync tasks waiting on this consumer: send first, then
        // receive, chained through the consumer's input descriptor.
        let deferred: Vec<u32> = self
            .deferred_sync
            .iter()
            .copied()
            .filter(|s| sync_successor(schedule, *s) == Some(task_ix))
            .collect();
        self.deferred_sync
            .retain(|s| sync_successor(schedule, *s) != Some(task_ix));
        for sync_ix in deferred {
            self.send_sync_task(model, tree, schedule, comm, grt_ix, sync_ix, &message)?;
        }
        let lrt = schedule.task(task_ix).mapped_pe.expect("mapped").0;
        let message_ix = comm.push_job(lrt, message);
        comm.notify(
            lrt,
            RunnerNotification {
                sender: grt_ix,
                kind: Notification::JobAdd { message_ix },
            },
        )?;
        schedule.task_mut(task_ix).state = TaskState::Running;
        self.launched_per_lrt[lrt as usize] += 1;
        trace!(
            target: "launcher",
            task = task_ix,
            lrt,
            vertex = vertex.name.as_str(),
            firing,
            "job_dispatched"
        );
        Ok((n_params_out > 0).then_some(PendingParam {
            task_ix,
            handler,
            vertex: vertex_id,
        }))
    }

    /// Emit one deferred sync task, deriving its FIFO from the consumer's
    /// message: the send decrements, the receive allocates in the
    /// destination interface.
    #[allow(clippy::too_many_arguments)]
    fn send_sync_task(
        &mut self,
        model: &Model,
        tree: &FiringTree,
        schedule: &mut Schedule,
        comm: &Communicator,
        grt_ix: u32,
        sync_ix: u32,
        consumer_message: &JobMessage,
    ) -> Result<(), RuntimeError> {
        let task = schedule.task(sync_ix);
        let (kernel_ix, input_port, receive, size) = match task.kind {
            TaskKind::SyncSend {
                size,
                kernel_ix,
                input_port,
                ..
            } => (kernel_ix, input_port, false, size),
            TaskKind::SyncReceive {
                size,
                kernel_ix,
                input_port,
                ..
            } => (kernel_ix, input_port, true, size),
            TaskKind::Vertex { .. } => return Ok(()),
        };
        let mut fifo = consumer_message
            .input_fifos
            .get(input_port as usize)
            .copied()
            .unwrap_or_else(Fifo::dummy);
        if receive {
            fifo.count = 1;
            fifo.attribute = FifoAttribute::WOwn;
        } else {
            fifo.count = 0;
            fifo.attribute = FifoAttribute::RwOnly;
        }
        let lrt = task.mapped_pe.expect("mapped").0;
        let message = JobMessage {
            task_ix: sync_ix,
            exec_ix: task.exec_ix,
            kernel_ix,
            n_params_out: 0,
            input_params: vec![i64::from(lrt), i64::from(size as u32), fifo.address as i64],
            input_fifos: vec![fifo],
            output_fifos: vec![fifo],
            exec_constraints: build_exec_constraints(schedule, sync_ix),
            notify_flags: self.build_notify_flags(model, tree, schedule, comm, sync_ix),
        };
        let message_ix = comm.push_job(lrt, message);
        comm.notify(
            lrt,
            RunnerNotification {
                sender: grt_ix,
                kind: Notification::JobAdd { message_ix },
            },
        )?;
        schedule.task_mut(sync_ix).state = TaskState::Running;
        self.launched_per_lrt[lrt as usize] += 1;
        debug!(
            target: "launcher",
            task = sync_ix,
            lrt,
            receive,
            size,
            "sync_task_dispatched"
        );
        Ok(())
    }

    /// Per-LRT notification flags. A successor that is not `Ready`/`Skipped`
    /// (or not even scheduled yet) forces a full fan-out; otherwise only the
    /// LRTs of successors that actually wait on this task's stamp are
    /// flagged.
    fn build_notify_flags(
        &self,
        model: &Model,
        tree: &FiringTree,
        schedule: &Schedule,
        comm: &Communicator,
        task_ix: u32,
    ) -> Vec<bool> {
        let lrt_count = comm.lrt_count();
        let mut flags = vec![false; lrt_count];
        let task = schedule.task(task_ix);
        let own_lrt = task.mapped_pe.map(|pe| pe.index()).unwrap_or(0);
        let set_from_sink = |sink: Option<&core_sched::ScheduleTask>, flags: &mut Vec<bool>| {
            let Some(sink) = sink else {
                flags.fill(true);
                return true;
            };
            if !matches!(sink.state, TaskState::Ready | TaskState::Skipped) {
                flags.fill(true);
                return true;
            }
            let Some(snk_pe) = sink.mapped_pe else {
                flags.fill(true);
                return true;
            };
            let snk_lrt = snk_pe.index();
            if !flags[snk_lrt] && snk_lrt != own_lrt {
                let wait_ix = sink.sync_exec_ix[own_lrt];
                flags[snk_lrt] = wait_ix == NO_SYNC || task.exec_ix >= wait_ix;
            }
            false
        };
        match task.kind {
            TaskKind::Vertex {
                handler,
                vertex,
                firing,
            } if tree.handler(handler).is_resolved() => {
                let graph = model.graph(tree.handler(handler).graph);
                let out_ports = graph.vertex(vertex).output_count() as u32;
                for port in 0..out_ports {
                    let Ok(dep_list) =
                        deps::cons_deps(model, tree, handler, vertex, firing, port)
                    else {
                        flags.fill(true);
                        return flags;
                    };
                    for dep in dep_list.iter() {
                        if dep.is_persistent() || dep.is_null() {
                            continue;
                        }
                        let Some(sink) = dep.vertex else {
                            // Unresolved consumer below a dynamic handler.
                            flags.fill(true);
                            return flags;
                        };
                        for k in dep.firing_start..=dep.firing_end {
                            let sink_task = tree.task_ix(dep.handler, sink, k);
                            let sink_ref =
                                (sink_task != NO_TASK).then(|| schedule.task(sink_task));
                            if set_from_sink(sink_ref, &mut flags) {
                                return flags;
                            }
                        }
                    }
                }
            }
            _ => {
                // Sync tasks and pre-resolution config firings fan out along
                // their recorded successors.
                for succ in &task.successors {
                    if set_from_sink(Some(schedule.task(*succ)), &mut flags) {
                        return flags;
                    }
                }
            }
        }
        flags
    }
}

fn sync_successor(schedule: &Schedule, sync_ix: u32) -> Option<u32> {
    match schedule.task(sync_ix).kind {
        TaskKind::SyncSend { successor, .. } | TaskKind::SyncReceive { successor, .. } => {
            Some(successor)
        }
        TaskKind::Vertex { .. } => None,
    }
}

/// Execution constraints: for each LRT, the highest predecessor exec index
/// recorded during mapping.
fn build_exec_constraints(schedule: &Schedule, task_ix: u32) -> Vec<(u32, u32)> {
    schedule
        .task(task_ix)
        .sync_exec_ix
        .iter()
        .enumerate()
        .filter(|(_, ix)| **ix != NO_SYNC)
        .map(|(lrt, ix)| (lrt as u32, *ix))
        .collect()
}
