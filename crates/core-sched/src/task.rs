//! Schedule state: tasks, their lifecycle and per-PE timelines.

use core_firing::HandlerId;
use core_graph::VertexId;
use core_platform::PeId;
use tracing::trace;

/// Sentinel for "no synchronization required on this LRT".
pub const NO_SYNC: u32 = u32::MAX;

/// Task lifecycle. Only `Ready` and `Skipped` tasks count as resolved-on-time
/// dependencies for their successors; any other predecessor state forces a
/// full notification fan-out in the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotSchedulable,
    Pending,
    Ready,
    Running,
    Skipped,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Normal actor firing.
    Vertex {
        handler: HandlerId,
        vertex: VertexId,
        firing: u32,
    },
    /// Cross-cluster data push, injected by the mapper.
    SyncSend {
        size: u64,
        kernel_ix: u32,
        /// Input port on the consumer whose FIFO is being moved.
        input_port: u32,
        /// Consumer task whose launch triggers the deferred emission.
        successor: u32,
    },
    /// Matching receive on the destination cluster.
    SyncReceive {
        size: u64,
        kernel_ix: u32,
        input_port: u32,
        successor: u32,
    },
}

impl TaskKind {
    pub fn is_sync(&self) -> bool {
        !matches!(self, TaskKind::Vertex { .. })
    }
}

/// One resolved producer edge of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredLink {
    pub task: u32,
    /// Bytes this link moves, for transfer-cost estimation.
    pub size: u64,
    /// Input port of the consumer the data arrives on.
    pub port: u32,
}

#[derive(Debug, Clone)]
pub struct ScheduleTask {
    pub ix: u32,
    pub kind: TaskKind,
    pub state: TaskState,
    pub mapped_pe: Option<PeId>,
    pub start_time: u64,
    pub end_time: u64,
    /// Execution index on the mapped LRT (queue order).
    pub exec_ix: u32,
    pub predecessors: Vec<PredLink>,
    pub successors: Vec<u32>,
    /// Per LRT: highest predecessor exec index on that LRT, [`NO_SYNC`] when
    /// none. Own LRT excluded (queue order already serializes it).
    pub sync_exec_ix: Vec<u32>,
}

impl ScheduleTask {
    pub fn vertex_ref(&self) -> Option<(HandlerId, VertexId, u32)> {
        match self.kind {
            TaskKind::Vertex {
                handler,
                vertex,
                firing,
            } => Some((handler, vertex, firing)),
            _ => None,
        }
    }
}

/// The growing schedule of one iteration: tasks plus per-PE ready times and
/// per-LRT execution counters.
#[derive(Debug, Default)]
pub struct Schedule {
    tasks: Vec<ScheduleTask>,
    pe_end_time: Vec<u64>,
    lrt_job_count: Vec<u32>,
}

impl Schedule {
    pub fn new(lrt_count: usize) -> Self {
        Self {
            tasks: Vec::new(),
            pe_end_time: vec![0; lrt_count],
            lrt_job_count: vec![0; lrt_count],
        }
    }

    pub fn add_task(&mut self, kind: TaskKind) -> u32 {
        let ix = self.tasks.len() as u32;
        let lrt_count = self.pe_end_time.len();
        self.tasks.push(ScheduleTask {
            ix,
            kind,
            state: TaskState::Pending,
            mapped_pe: None,
            start_time: 0,
            end_time: 0,
            exec_ix: 0,
            predecessors: Vec::new(),
            successors: Vec::new(),
            sync_exec_ix: vec![NO_SYNC; lrt_count],
        });
        ix
    }

    pub fn task(&self, ix: u32) -> &ScheduleTask {
        &self.tasks[ix as usize]
    }

    pub fn task_mut(&mut self, ix: u32) -> &mut ScheduleTask {
        &mut self.tasks[ix as usize]
    }

    pub fn tasks(&self) -> &[ScheduleTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn lrt_count(&self) -> usize {
        self.pe_end_time.len()
    }

    /// Ready time of a PE: end of the last task mapped on it.
    pub fn end_time(&self, pe: PeId) -> u64 {
        self.pe_end_time[pe.index()]
    }

    /// Finalize the mapping of a task: assign PE, window and exec index, set
    /// it `Ready` and record the per-LRT constraints from its predecessors.
    pub fn commit_mapping(&mut self, ix: u32, pe: PeId, start: u64, end: u64) {
        let exec_ix = self.lrt_job_count[pe.index()];
        self.lrt_job_count[pe.index()] += 1;
        self.pe_end_time[pe.index()] = self.pe_end_time[pe.index()].max(end);
        let preds: Vec<(usize, u32)> = self.tasks[ix as usize]
            .predecessors
            .iter()
            .filter_map(|link| {
                let pred = &self.tasks[link.task as usize];
                pred.mapped_pe.map(|pp| (pp.index(), pred.exec_ix))
            })
            .collect();
        let task = &mut self.tasks[ix as usize];
        task.mapped_pe = Some(pe);
        task.start_time = start;
        task.end_time = end;
        task.exec_ix = exec_ix;
        task.state = TaskState::Ready;
        for (lrt, pred_exec) in preds {
            if lrt != pe.index() {
                let slot = &mut task.sync_exec_ix[lrt];
                if *slot == NO_SYNC || *slot < pred_exec {
                    *slot = pred_exec;
                }
            }
        }
        trace!(
            target: "sched",
            task = ix,
            pe = pe.index(),
            start,
            end,
            exec_ix,
            "task_mapped"
        );
    }

    /// Register the dependency in both directions. A repeated (pred, succ)
    /// pair accumulates its moved size.
    pub fn link(&mut self, pred: u32, succ: u32, size: u64, port: u32) {
        let links = &mut self.tasks[succ as usize].predecessors;
        if let Some(existing) = links
            .iter_mut()
            .find(|l| l.task == pred && l.port == port)
        {
            existing.size += size;
        } else {
            links.push(PredLink {
                task: pred,
                size,
                port,
            });
        }
        if !self.tasks[pred as usize].successors.contains(&succ) {
            self.tasks[pred as usize].successors.push(succ);
        }
    }

    /// Re-route one predecessor link through an injected receive task.
    pub fn relink_predecessor(&mut self, task: u32, old_pred: u32, new_pred: u32) {
        for link in &mut self.tasks[task as usize].predecessors {
            if link.task == old_pred {
                link.task = new_pred;
            }
        }
        self.tasks[old_pred as usize]
            .successors
            .retain(|s| *s != task);
        if !self.tasks[new_pred as usize].successors.contains(&task) {
            self.tasks[new_pred as usize].successors.push(task);
        }
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.pe_end_time.fill(0);
        self.lrt_job_count.fill(0);
    }

    /// Per-PE busy cycles, for the post-iteration statistics log.
    pub fn busy_cycles(&self) -> Vec<u64> {
        let mut busy = vec![0u64; self.pe_end_time.len()];
        for task in &self.tasks {
            if let Some(pe) = task.mapped_pe {
                busy[pe.index()] += task.end_time - task.start_time;
            }
        }
        busy
    }

    pub fn makespan(&self) -> u64 {
        self.pe_end_time.iter().copied().max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_kind() -> TaskKind {
        TaskKind::SyncReceive {
            size: 0,
            kernel_ix: 0,
            input_port: 0,
            successor: 0,
        }
    }

    #[test]
    fn commit_assigns_dense_exec_indices_per_lrt() {
        let mut schedule = Schedule::new(2);
        let a = schedule.add_task(sync_kind());
        let b = schedule.add_task(sync_kind());
        let c = schedule.add_task(sync_kind());
        schedule.commit_mapping(a, PeId(0), 0, 5);
        schedule.commit_mapping(b, PeId(0), 5, 9);
        schedule.commit_mapping(c, PeId(1), 0, 2);
        assert_eq!(schedule.task(a).exec_ix, 0);
        assert_eq!(schedule.task(b).exec_ix, 1);
        assert_eq!(schedule.task(c).exec_ix, 0);
        assert_eq!(schedule.end_time(PeId(0)), 9);
    }

    #[test]
    fn cross_lrt_predecessors_become_sync_constraints() {
        let mut schedule = Schedule::new(2);
        let a = schedule.add_task(sync_kind());
        let b = schedule.add_task(sync_kind());
        schedule.link(a, b, 16, 0);
        schedule.commit_mapping(a, PeId(0), 0, 5);
        schedule.commit_mapping(b, PeId(1), 5, 9);
        assert_eq!(schedule.task(b).sync_exec_ix[0], 0);
        assert_eq!(schedule.task(b).sync_exec_ix[1], NO_SYNC);
    }

    #[test]
    fn repeated_links_accumulate_size() {
        let mut schedule = Schedule::new(1);
        let a = schedule.add_task(sync_kind());
        let b = schedule.add_task(sync_kind());
        schedule.link(a, b, 16, 0);
        schedule.link(a, b, 8, 0);
        assert_eq!(schedule.task(b).predecessors.len(), 1);
        assert_eq!(schedule.task(b).predecessors[0].size, 24);
        assert_eq!(schedule.task(a).successors, vec![b]);
    }
}
