//! The list scheduler: wave construction, levels, ordering.

use crate::mapper::Mapper;
use crate::task::{Schedule, TaskKind, TaskState};
use crate::{SchedError, SchedulingPolicy};
use core_firing::{DependencyInfo, FiringTree, HandlerId, NO_TASK, deps};
use core_graph::{Model, VertexId, VertexKind};
use core_platform::Platform;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::Range;
use tracing::debug;

/// Level marking a firing that cannot be scheduled this wave.
const NOT_SCHEDULABLE: i64 = i64::MIN / 2;
/// Level of configuration firings scheduled ahead of resolution.
const CONFIG_LEVEL: i64 = i64::MAX / 2;

/// One registered firing awaiting (or surviving) scheduling.
#[derive(Debug, Clone, Copy)]
pub struct ListTask {
    pub handler: HandlerId,
    pub vertex: VertexId,
    pub firing: u32,
    pub level: i64,
}

/// Incremental wave scheduler. The sorted vector is partitioned by two
/// cursors into already-dispatched, ready, and not-yet-schedulable regions;
/// the tail survives across waves until parameter feedback unblocks it.
#[derive(Debug, Default)]
pub struct ListScheduler {
    policy: SchedulingPolicy,
    sorted: Vec<ListTask>,
    last_scheduled: usize,
    last_schedulable: usize,
    /// Wave-local registry (handler, vertex, firing) -> index in `sorted`,
    /// kept separate from the handler task tables, which only ever hold
    /// schedule task ids.
    scratch: HashMap<(HandlerId, VertexId, u32), u32>,
}

impl ListScheduler {
    pub fn new(policy: SchedulingPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn clear(&mut self) {
        self.sorted.clear();
        self.scratch.clear();
        self.last_scheduled = 0;
        self.last_schedulable = 0;
    }

    /// Count of registered firings that could not be scheduled yet.
    pub fn blocked_len(&self) -> usize {
        self.sorted.len() - self.last_schedulable
    }

    /// Run one scheduling wave over the resolved portion of the firing tree.
    /// Returns the range of schedule task ids created (vertex and injected
    /// sync tasks), mapped and ordered.
    pub fn schedule(
        &mut self,
        model: &Model,
        tree: &mut FiringTree,
        platform: &Platform,
        schedule: &mut Schedule,
        mapper: &mut Mapper,
    ) -> Result<Range<u32>, SchedError> {
        // Reset the non-schedulable tail: it stays registered, its level is
        // recomputed this wave.
        self.last_scheduled = self.last_schedulable;
        self.scratch.clear();
        for k in self.last_schedulable..self.sorted.len() {
            let t = self.sorted[k];
            self.scratch
                .insert((t.handler, t.vertex, t.firing), k as u32);
        }

        // Register one entry per executable, unregistered firing; collect the
        // unresolved handlers for the marking pass.
        let mut unresolved: Vec<HandlerId> = Vec::new();
        self.add_handler(model, tree, tree.root(), &mut unresolved);
        for blocked in unresolved {
            let handler = tree.handler(blocked);
            if let (Some(parent), Some(vertex)) = (handler.parent, handler.parent_vertex) {
                let firing = handler.firing;
                self.mark_non_schedulable(model, tree, parent, vertex, firing)?;
            }
        }

        // Schedule levels for the whole unscheduled region.
        for k in self.last_schedulable..self.sorted.len() {
            self.compute_level(model, tree, platform, k)?;
        }

        // Order the region. Greedy keeps registration order and only pushes
        // the blocked entries to the tail.
        let tree_ro: &FiringTree = tree;
        let region = &mut self.sorted[self.last_schedulable..];
        match self.policy {
            SchedulingPolicy::List => {
                region.sort_by(|a, b| compare_list_tasks(model, tree_ro, a, b));
            }
            SchedulingPolicy::Greedy => {
                region.sort_by_key(|t| t.level == NOT_SCHEDULABLE);
            }
        }

        // Strip the blocked tail, invalidating its levels.
        let mut blocked = 0;
        while blocked < self.sorted.len() - self.last_schedulable {
            let k = self.sorted.len() - 1 - blocked;
            if self.sorted[k].level != NOT_SCHEDULABLE {
                break;
            }
            self.sorted[k].level = -1;
            blocked += 1;
        }
        self.last_schedulable = self.sorted.len() - blocked;

        // Materialize schedule tasks for the ready region and publish their
        // ids through the handler task tables.
        let first_new = schedule.len() as u32;
        for k in self.last_scheduled..self.last_schedulable {
            let t = self.sorted[k];
            let ix = schedule.add_task(TaskKind::Vertex {
                handler: t.handler,
                vertex: t.vertex,
                firing: t.firing,
            });
            if tree.handler(t.handler).is_resolved() {
                tree.register_task(t.handler, t.vertex, t.firing, ix);
            } else {
                let graph = model.graph(tree.handler(t.handler).graph);
                if let Some(slot) = graph.config_actors().iter().position(|c| *c == t.vertex) {
                    tree.register_config_task(t.handler, slot, ix);
                }
            }
        }

        // Resolve producer links, then map in list order. The mapper appends
        // sync tasks (already committed) behind the consumer they serve.
        self.link_predecessors(model, tree, schedule, first_new)?;
        let mut ix = first_new;
        while ix < schedule.len() as u32 {
            if schedule.task(ix).state == TaskState::Pending {
                mapper.map_task(model, tree, platform, schedule, ix)?;
            }
            ix += 1;
        }
        debug!(
            target: "sched",
            ready = schedule.len() as u32 - first_new,
            blocked = self.blocked_len(),
            "wave_scheduled"
        );
        Ok(first_new..schedule.len() as u32)
    }

    fn add_handler(
        &mut self,
        model: &Model,
        tree: &FiringTree,
        id: HandlerId,
        unresolved: &mut Vec<HandlerId>,
    ) {
        let handler = tree.handler(id);
        let graph = model.graph(handler.graph);
        if handler.is_resolved() {
            for v in graph.vertex_ids() {
                if !graph.vertex(v).kind.fires() {
                    continue;
                }
                for firing in 0..tree.rv(id, v) {
                    self.register(tree, id, v, firing);
                }
            }
            let children: Vec<HandlerId> = tree.children_of(id).collect();
            for child in children {
                self.add_handler(model, tree, child, unresolved);
            }
        } else {
            // Only the configuration firings of a blocked handler are
            // schedulable: they produce the missing parameter values.
            for (slot, cfg) in graph.config_actors().iter().enumerate() {
                if tree.config_task_ix(id, slot) == NO_TASK
                    && !self.scratch.contains_key(&(id, *cfg, 0))
                {
                    self.push_entry(id, *cfg, 0, CONFIG_LEVEL);
                }
            }
            unresolved.push(id);
        }
    }

    fn register(&mut self, tree: &FiringTree, handler: HandlerId, vertex: VertexId, firing: u32) {
        if tree.task_ix(handler, vertex, firing) != NO_TASK {
            return;
        }
        if self.scratch.contains_key(&(handler, vertex, firing)) {
            return;
        }
        self.push_entry(handler, vertex, firing, -1);
    }

    fn push_entry(&mut self, handler: HandlerId, vertex: VertexId, firing: u32, level: i64) {
        let ix = self.sorted.len() as u32;
        self.sorted.push(ListTask {
            handler,
            vertex,
            firing,
            level,
        });
        self.scratch.insert((handler, vertex, firing), ix);
    }

    /// Mark every firing consuming from `(vertex, firing)` as blocked.
    fn mark_non_schedulable(
        &mut self,
        model: &Model,
        tree: &FiringTree,
        handler: HandlerId,
        vertex: VertexId,
        firing: u32,
    ) -> Result<(), SchedError> {
        let graph = model.graph(tree.handler(handler).graph);
        let out_ports = graph.vertex(vertex).output_count() as u32;
        for port in 0..out_ports {
            let deps = deps::cons_deps(model, tree, handler, vertex, firing, port)?;
            for dep in deps.iter() {
                if dep.rate < 0 {
                    continue;
                }
                let Some(sink) = dep.vertex else { continue };
                for k in dep.firing_start..=dep.firing_end {
                    if let Some(ix) = self.scratch.get(&(dep.handler, sink, k)).copied() {
                        if self.sorted[ix as usize].level != NOT_SCHEDULABLE {
                            self.sorted[ix as usize].level = NOT_SCHEDULABLE;
                            self.mark_non_schedulable(model, tree, dep.handler, sink, k)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Critical-path level: the longest chain of best-case execution times
    /// hanging off this firing's consumers.
    fn compute_level(
        &mut self,
        model: &Model,
        tree: &FiringTree,
        platform: &Platform,
        ix: usize,
    ) -> Result<i64, SchedError> {
        let t = self.sorted[ix];
        if t.level >= 0 || t.level == NOT_SCHEDULABLE || t.level == CONFIG_LEVEL {
            return Ok(t.level);
        }
        let graph = model.graph(tree.handler(t.handler).graph);
        let out_ports = graph.vertex(t.vertex).output_count() as u32;
        let mut level: i64 = 0;
        for port in 0..out_ports {
            let dep_list = deps::cons_deps(model, tree, t.handler, t.vertex, t.firing, port)?;
            for dep in dep_list.iter() {
                if dep.rate < 0 {
                    // Consumer lives below an unresolved handler.
                    self.sorted[ix].level = NOT_SCHEDULABLE;
                    self.mark_non_schedulable(model, tree, t.handler, t.vertex, t.firing)?;
                    return Ok(NOT_SCHEDULABLE);
                }
                let Some(sink) = dep.vertex else { continue };
                let exec_time = best_exec_time(model, tree, platform, dep, sink)?;
                for k in dep.firing_start..=dep.firing_end {
                    let Some(sink_ix) = self.scratch.get(&(dep.handler, sink, k)).copied() else {
                        // Already dispatched in an earlier wave.
                        continue;
                    };
                    let sink_level = self.compute_level(model, tree, platform, sink_ix as usize)?;
                    if sink_level != NOT_SCHEDULABLE {
                        level = level.max(sink_level + exec_time);
                    }
                }
            }
        }
        self.sorted[ix].level = level;
        Ok(level)
    }
}

/// Minimum execution time of the sink over every PE it can map on.
fn best_exec_time(
    model: &Model,
    tree: &FiringTree,
    platform: &Platform,
    dep: &DependencyInfo,
    sink: VertexId,
) -> Result<i64, SchedError> {
    let graph = model.graph(tree.handler(dep.handler).graph);
    let vertex = graph.vertex(sink);
    let values = tree.param_values(dep.handler);
    let mask = vertex.rt.as_ref().map_or(u64::MAX, |rt| rt.pe_type_mask);
    let mut best: Option<i64> = None;
    for pe in platform.pes() {
        if !pe.enabled || pe.pe_type >= u64::BITS || (mask >> pe.pe_type) & 1 == 0 {
            continue;
        }
        let time = match &vertex.rt {
            Some(rt) => rt
                .timing_on(pe.pe_type, values)
                .map_err(core_firing::FiringError::from)?,
            None => core_graph::RtInfo::DEFAULT_TIMING,
        };
        if time <= 0 {
            return Err(SchedError::NullTiming {
                vertex: vertex.name.clone(),
            });
        }
        best = Some(best.map_or(time, |b: i64| b.min(time)));
    }
    best.ok_or_else(|| SchedError::NoMappablePe {
        vertex: vertex.name.clone(),
    })
}

/// Wave ordering: level first, then parent-firing lineage within the same
/// reference vertex, `Init` ahead of its `End`, then reverse-lexicographic
/// name.
fn compare_list_tasks(model: &Model, tree: &FiringTree, a: &ListTask, b: &ListTask) -> Ordering {
    match b.level.cmp(&a.level) {
        Ordering::Equal => {}
        ord => return ord,
    }
    let ga = tree.handler(a.handler).graph;
    let gb = tree.handler(b.handler).graph;
    if a.vertex == b.vertex && ga == gb {
        let (mut fa, mut fb) = (a.firing, b.firing);
        let (mut ha, mut hb) = (Some(a.handler), Some(b.handler));
        while let (Some(ca), Some(cb)) = (ha, hb) {
            if fa != fb {
                break;
            }
            fa = tree.handler(ca).firing;
            fb = tree.handler(cb).firing;
            ha = tree.handler(ca).parent;
            hb = tree.handler(cb).parent;
        }
        return fa.cmp(&fb);
    }
    let ka = model.graph(ga).vertex(a.vertex).kind;
    let kb = model.graph(gb).vertex(b.vertex).kind;
    if ka != kb && (ka == VertexKind::Init || kb == VertexKind::End) {
        return Ordering::Less;
    }
    let na = &model.graph(ga).vertex(a.vertex).name;
    let nb = &model.graph(gb).vertex(b.vertex).name;
    nb.cmp(na)
}

impl ListScheduler {
    /// Resolve each new task's producers through the execution-dependency
    /// traversal and link them with their window sizes.
    fn link_predecessors(
        &self,
        model: &Model,
        tree: &FiringTree,
        schedule: &mut Schedule,
        first_new: u32,
    ) -> Result<(), SchedError> {
        for task_ix in first_new..schedule.len() as u32 {
            let Some((handler, vertex, firing)) = schedule.task(task_ix).vertex_ref() else {
                continue;
            };
            if !tree.handler(handler).is_resolved() {
                // Config firing scheduled ahead of resolution: producers are
                // serialized by queue order and notification flags only.
                continue;
            }
            let graph = model.graph(tree.handler(handler).graph);
            let in_ports = graph.vertex(vertex).input_count() as u32;
            for port in 0..in_ports {
                let dep_list = deps::exec_deps(model, tree, handler, vertex, firing, port)?;
                for dep in dep_list.iter() {
                    let Some(source) = dep.vertex else { continue };
                    if dep.rate <= 0 {
                        continue;
                    }
                    for k in dep.firing_start..=dep.firing_end {
                        let pred = tree.task_ix(dep.handler, source, k);
                        if pred == NO_TASK || pred == task_ix {
                            continue;
                        }
                        let start = if k == dep.firing_start {
                            dep.memory_start as i64
                        } else {
                            0
                        };
                        let end = if k == dep.firing_end {
                            dep.memory_end as i64
                        } else {
                            dep.rate - 1
                        };
                        schedule.link(pred, task_ix, (end - start + 1) as u64, port);
                    }
                }
            }
        }
        Ok(())
    }
}
