//! FIFO allocation: logical edges to address/offset/count descriptors.
//!
//! Buffers live in a single monotone virtual address space; capacity is
//! accounted against the memory interface of the cluster the buffer is
//! charged to (the GRT's cluster in the default modes, the producer's in the
//! architecture-aware mode). An edge gets one buffer sized
//! `src_rate · rv(source)`, and each source firing owns the slice at
//! `firing · src_rate`; fork and duplicate firings re-point their output
//! slots into the parent buffer instead of allocating.
//!
//! Consumer counts come from count-only consumption-dependency traversals.
//! A count of zero means the consumer lives below an unresolved handler: the
//! descriptor ships with a single provisional reference and the FIFO joins
//! the *pending* list; once the consumer's handler resolves, the owning
//! runner gets `MemUpdateAddr` + `MemUpdateCount(count − 1)`.

use thiserror::Error;
use tracing::{debug, trace};

use core_comm::{Communicator, Fifo, FifoAttribute, Notification, RunnerNotification};
use core_firing::{FiringError, FiringTree, HandlerId, NO_ADDRESS, deps};
use core_graph::{EdgeId, Model, VertexId, VertexKind};
use core_platform::{MemoryPool, Platform};
use core_sched::Schedule;

/// Allocation mode selected at context creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocPolicy {
    /// Every producer-consumer pair gets its own FIFO.
    #[default]
    Default,
    /// Fork/duplicate/extern-in firings share the parent buffer and emit
    /// view descriptors only.
    DefaultNoSync,
    /// Buffers are charged to the memory interface closest to the producer.
    ArchiAware,
}

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("allocator exhausted on cluster {cluster}: {requested} bytes requested")]
    Exhausted { cluster: u32, requested: u64 },
    #[error("dependency resolution failed during allocation")]
    Firing(#[from] FiringError),
    #[error("task {0} is not an actor firing")]
    NotAVertexTask(u32),
}

/// Output FIFO whose consumer count is still unknown.
#[derive(Debug, Clone, Copy)]
struct PendingFifo {
    handler: HandlerId,
    vertex: VertexId,
    firing: u32,
    port: u32,
    edge: EdgeId,
    /// LRT owning the producer task, target of the deferred update.
    lrt: u32,
}

/// Input and output descriptor arrays of one job.
#[derive(Debug, Clone, Default)]
pub struct JobFifos {
    pub inputs: Vec<Fifo>,
    pub outputs: Vec<Fifo>,
}

#[derive(Debug)]
pub struct FifoAllocator {
    policy: AllocPolicy,
    cursor: u64,
    reserved_end: u64,
    cluster_used: Vec<u64>,
    pending: Vec<PendingFifo>,
}

impl FifoAllocator {
    pub fn new(policy: AllocPolicy, platform: &Platform) -> Self {
        Self {
            policy,
            cursor: 0,
            reserved_end: 0,
            cluster_used: vec![0; platform.clusters().len()],
            pending: Vec::new(),
        }
    }

    pub fn policy(&self) -> AllocPolicy {
        self.policy
    }

    /// Reserve and zero-fill the persistent-delay region. Called once at
    /// engine start; the region is never reclaimed before shutdown.
    pub fn allocate_persistent_delays(
        &mut self,
        model: &mut Model,
        platform: &Platform,
        pool: &MemoryPool,
    ) -> Result<(), AllocError> {
        let grt_cluster = platform
            .grt()
            .map(|pe| pe.cluster.index())
            .unwrap_or_default();
        for graph_id in model.graph_ids().collect::<Vec<_>>() {
            for edge_id in model.graph(graph_id).edge_ids().collect::<Vec<_>>() {
                let needs_memory = {
                    let edge = model.graph(graph_id).edge(edge_id);
                    match &edge.delay {
                        Some(delay) if delay.persistent => {
                            delay.value.value().map(|v| v as u64)
                        }
                        _ => None,
                    }
                };
                if let Some(size) = needs_memory {
                    let address = self.reserved_end;
                    pool.reserve_pinned(0, address, size);
                    self.reserved_end += size;
                    self.cluster_used[grt_cluster] += size;
                    model.set_delay_address(graph_id, edge_id, address);
                    debug!(
                        target: "alloc",
                        address,
                        size,
                        "persistent_delay_reserved"
                    );
                }
            }
        }
        self.cursor = self.reserved_end;
        Ok(())
    }

    /// Reset the cursor to the end of the reserved region for a fresh
    /// iteration.
    pub fn clear(&mut self) {
        self.cursor = self.reserved_end;
        for (ix, used) in self.cluster_used.iter_mut().enumerate() {
            *used = if ix == 0 { self.reserved_end } else { 0 };
        }
        self.pending.clear();
    }

    fn alloc(&mut self, platform: &Platform, cluster: u32, size: u64) -> Result<u64, AllocError> {
        let capacity = platform.cluster(core_platform::ClusterId(cluster)).memory_size;
        let used = &mut self.cluster_used[cluster as usize];
        if *used + size > capacity {
            return Err(AllocError::Exhausted {
                cluster,
                requested: size,
            });
        }
        *used += size;
        let address = self.cursor;
        self.cursor += size;
        trace!(target: "alloc", address, size, cluster, "virtual_allocated");
        Ok(address)
    }

    /// Cluster a new buffer is charged to.
    fn charge_cluster(&self, platform: &Platform, producer_pe: Option<u32>) -> u32 {
        match self.policy {
            AllocPolicy::ArchiAware => producer_pe
                .map(|pe| platform.pe(core_platform::PeId(pe)).cluster.0)
                .unwrap_or(0),
            _ => platform.grt().map(|pe| pe.cluster.0).unwrap_or(0),
        }
    }

    /// Build the input and output FIFO arrays for a scheduled firing, and
    /// bind output buffers into the handler's edge tables.
    pub fn build_job_fifos(
        &mut self,
        model: &Model,
        tree: &mut FiringTree,
        platform: &Platform,
        schedule: &Schedule,
        task_ix: u32,
    ) -> Result<JobFifos, AllocError> {
        let task = schedule.task(task_ix);
        let (handler, vertex_id, firing) = task
            .vertex_ref()
            .ok_or(AllocError::NotAVertexTask(task_ix))?;
        let graph_id = tree.handler(handler).graph;
        let mapped_lrt = task.mapped_pe.map(|pe| pe.0);
        let mut fifos = JobFifos::default();
        if !tree.handler(handler).is_resolved() {
            // Configuration firing launched ahead of resolution: rates are
            // not known yet, and such actors carry no data ports.
            return Ok(fifos);
        }

        // Input side first: producer buffers were bound when the producers
        // were launched. One descriptor per covered window; several windows
        // go behind a merge header.
        let in_ports = model.graph(graph_id).vertex(vertex_id).input_count() as u32;
        for port in 0..in_ports {
            let dep_list = deps::exec_deps(model, tree, handler, vertex_id, firing, port)?;
            let mut constituents = self.input_descriptors(model, tree, &dep_list);
            match constituents.len() {
                0 => fifos.inputs.push(Fifo::dummy()),
                1 => fifos.inputs.push(constituents.pop().expect("one descriptor")),
                _ => self.push_merge_input(platform, constituents, &mut fifos)?,
            }
        }

        // Fork and duplicate read without consuming: their downstream views
        // keep the producer buffer alive past the firing itself.
        if matches!(
            model.graph(graph_id).vertex(vertex_id).kind,
            VertexKind::Fork | VertexKind::Duplicate
        ) {
            for fifo in &mut fifos.inputs {
                if fifo.attribute == FifoAttribute::ROwn {
                    fifo.attribute = FifoAttribute::ROnly;
                }
            }
        }

        // A repeat whose rates match is pure plumbing: its output aliases
        // the input buffer, so the input becomes a read-only view carrying
        // both sides of the pass-through.
        if repeat_aliases_input(model, tree, handler, vertex_id) {
            for fifo in &mut fifos.inputs {
                if fifo.attribute == FifoAttribute::ROwn {
                    fifo.attribute = FifoAttribute::ROnly;
                    fifo.count = 2;
                }
            }
        }

        // Bind output buffers, honoring the view semantics of fork,
        // duplicate and external interfaces.
        self.bind_outputs(model, tree, platform, handler, vertex_id, firing, mapped_lrt)?;

        // Output descriptors with consumer counts.
        let out_ports = model.graph(graph_id).vertex(vertex_id).output_count() as u32;
        for port in 0..out_ports {
            let fifo = self.build_output_fifo(
                model,
                tree,
                handler,
                vertex_id,
                firing,
                port,
                mapped_lrt.unwrap_or(0),
            )?;
            fifos.outputs.push(fifo);
        }
        Ok(fifos)
    }

    /// One descriptor per covered window: a slice of a producer firing's
    /// buffer, or a slice of persistent delay storage. Null (zero-rate) and
    /// unresolved sentinels contribute nothing.
    fn input_descriptors(
        &self,
        model: &Model,
        tree: &FiringTree,
        dep_list: &core_firing::DependencyIterator,
    ) -> Vec<Fifo> {
        let mut constituents: Vec<Fifo> = Vec::new();
        for dep in dep_list.iter() {
            if let Some(fifo) = persistent_fifo(dep) {
                constituents.push(fifo);
                continue;
            }
            let Some(source) = dep.vertex else { continue };
            for k in dep.firing_start..=dep.firing_end {
                let mem_start = if k == dep.firing_start {
                    dep.memory_start
                } else {
                    0
                };
                let mem_end = if k == dep.firing_end {
                    dep.memory_end
                } else {
                    dep.rate as u32 - 1
                };
                constituents.push(self.input_fifo_for(
                    model,
                    tree,
                    dep.handler,
                    source,
                    dep.port,
                    k,
                    mem_start,
                    mem_end - mem_start + 1,
                ));
            }
        }
        constituents
    }

    /// Merge header followed by its constituents; the runner assembles the
    /// merged view before kernel invocation.
    fn push_merge_input(
        &mut self,
        platform: &Platform,
        constituents: Vec<Fifo>,
        fifos: &mut JobFifos,
    ) -> Result<(), AllocError> {
        let merged_size: u64 = constituents.iter().map(|f| u64::from(f.size)).sum();
        let cluster = self.charge_cluster(platform, None);
        let address = self.alloc(platform, cluster, merged_size)?;
        fifos.inputs.push(Fifo {
            address,
            offset: constituents.len() as u32,
            size: merged_size as u32,
            count: 1,
            attribute: FifoAttribute::RMerge,
        });
        fifos.inputs.extend(constituents);
        Ok(())
    }

    /// Descriptor for one producer-side window.
    #[allow(clippy::too_many_arguments)]
    fn input_fifo_for(
        &self,
        model: &Model,
        tree: &FiringTree,
        handler: HandlerId,
        source: VertexId,
        source_port: u32,
        firing: u32,
        mem_start: u32,
        size: u32,
    ) -> Fifo {
        let graph = model.graph(tree.handler(handler).graph);
        let Some(edge) = graph.vertex(source).output_edge(source_port as usize) else {
            return Fifo::dummy();
        };
        let slot = tree.edge_slot(handler, edge, firing);
        let e = graph.edge(edge);
        let external = graph.vertex(e.source).kind == VertexKind::ExternIn
            || graph.vertex(e.sink).kind == VertexKind::ExternOut;
        Fifo {
            address: slot.address,
            offset: slot.offset + mem_start,
            size,
            count: 0,
            attribute: if external {
                FifoAttribute::RExt
            } else {
                FifoAttribute::ROwn
            },
        }
    }

    /// Bind the output buffers of a firing into the handler edge tables.
    #[allow(clippy::too_many_arguments)]
    fn bind_outputs(
        &mut self,
        model: &Model,
        tree: &mut FiringTree,
        platform: &Platform,
        handler: HandlerId,
        vertex_id: VertexId,
        firing: u32,
        mapped_lrt: Option<u32>,
    ) -> Result<(), AllocError> {
        let graph_id = tree.handler(handler).graph;
        let graph = model.graph(graph_id);
        let vertex = graph.vertex(vertex_id);
        let repeat_alias = repeat_aliases_input(model, tree, handler, vertex_id);
        match vertex.kind {
            // A rate-matched repeat forwards its input buffer untouched; a
            // mismatched one falls through to a fresh allocation like any
            // other actor.
            VertexKind::Repeat if repeat_alias => {
                let input_dep = deps::exec_deps(model, tree, handler, vertex_id, firing, 0)?;
                let Some(dep) = input_dep.iter().next().copied() else {
                    return Ok(());
                };
                let Some(source) = dep.vertex else {
                    return Ok(());
                };
                let src_graph = model.graph(tree.handler(dep.handler).graph);
                let Some(src_edge) = src_graph.vertex(source).output_edge(dep.port as usize)
                else {
                    return Ok(());
                };
                let slot = tree.edge_slot(dep.handler, src_edge, dep.firing_start);
                if let Some(out_edge) = vertex.output_edge(0) {
                    tree.set_edge_address(handler, out_edge, firing, slot.address);
                    tree.set_edge_offset(handler, out_edge, firing, slot.offset + dep.memory_start);
                }
            }
            // Fork and duplicate never copy: their outputs are views into
            // the producer's buffer.
            VertexKind::Fork | VertexKind::Duplicate => {
                let input_dep = deps::exec_deps(model, tree, handler, vertex_id, firing, 0)?;
                let Some(dep) = input_dep.iter().next().copied() else {
                    return Ok(());
                };
                let (address, base_offset) = match dep.vertex {
                    Some(source) => {
                        let src_graph = model.graph(tree.handler(dep.handler).graph);
                        match src_graph.vertex(source).output_edge(dep.port as usize) {
                            Some(src_edge) => {
                                let slot = tree.edge_slot(dep.handler, src_edge, dep.firing_start);
                                (slot.address, slot.offset + dep.memory_start)
                            }
                            None => (NO_ADDRESS, 0),
                        }
                    }
                    None => (NO_ADDRESS, 0),
                };
                let mut offset = base_offset;
                let out_edges: Vec<EdgeId> = vertex.output_edges().collect();
                let duplicate = vertex.kind == VertexKind::Duplicate;
                for out_edge in out_edges {
                    tree.set_edge_address(handler, out_edge, firing, address);
                    tree.set_edge_offset(handler, out_edge, firing, offset);
                    if !duplicate {
                        offset += tree.src_rate(handler, out_edge) as u32;
                    }
                }
            }
            // External inputs are views onto the application buffer in the
            // sharing modes; the default mode stages them through an owned
            // copy like any other producer.
            VertexKind::ExternIn if self.policy != AllocPolicy::Default => {
                let address = vertex.extern_address.unwrap_or(NO_ADDRESS);
                if let Some(out_edge) = vertex.output_edge(0)
                    && tree.edge_slot(handler, out_edge, firing).address == NO_ADDRESS
                {
                    tree.set_edge_address(handler, out_edge, firing, address);
                }
            }
            _ => {
                let out_edges: Vec<EdgeId> = vertex.output_edges().collect();
                for out_edge in out_edges {
                    let sink = graph.edge(out_edge).sink;
                    if graph.vertex(sink).kind == VertexKind::ExternOut {
                        let address = graph.vertex(sink).extern_address.unwrap_or(NO_ADDRESS);
                        tree.set_edge_address(handler, out_edge, firing, address);
                        continue;
                    }
                    if tree.edge_slot(handler, out_edge, firing).address != NO_ADDRESS {
                        continue;
                    }
                    // One buffer for the whole edge, sliced per source
                    // firing.
                    let src_rate = tree.src_rate(handler, out_edge) as u64;
                    let source_rv = tree.rv(handler, graph.edge(out_edge).source);
                    let cluster = self.charge_cluster(platform, mapped_lrt);
                    let base = self.alloc(platform, cluster, src_rate * u64::from(source_rv))?;
                    for k in 0..source_rv {
                        tree.set_edge_address(handler, out_edge, k, base);
                        tree.set_edge_offset(handler, out_edge, k, (u64::from(k) * src_rate) as u32);
                    }
                }
            }
        }
        Ok(())
    }

    /// Output descriptor with its consumer count, pending bookkeeping for
    /// unresolved consumers.
    #[allow(clippy::too_many_arguments)]
    fn build_output_fifo(
        &mut self,
        model: &Model,
        tree: &FiringTree,
        handler: HandlerId,
        vertex_id: VertexId,
        firing: u32,
        port: u32,
        lrt: u32,
    ) -> Result<Fifo, AllocError> {
        let graph = model.graph(tree.handler(handler).graph);
        let vertex = graph.vertex(vertex_id);
        let Some(edge) = vertex.output_edge(port as usize) else {
            return Ok(Fifo::dummy());
        };
        let slot = tree.edge_slot(handler, edge, firing);
        let mut fifo = Fifo {
            address: slot.address,
            offset: slot.offset,
            size: tree.src_rate(handler, edge) as u32,
            count: 1,
            attribute: FifoAttribute::WOwn,
        };
        let cons_count = deps::cons_dep_count(model, tree, handler, vertex_id, firing, port)?;
        if cons_count == 0 {
            // Consumer handler unresolved: provisional single reference,
            // corrected later through MemUpdateAddr/MemUpdateCount.
            self.pending.push(PendingFifo {
                handler,
                vertex: vertex_id,
                firing,
                port,
                edge,
                lrt,
            });
        } else if cons_count < 0 {
            fifo.attribute = FifoAttribute::WSink;
            fifo.count = 0;
        } else {
            fifo.count = cons_count as u32;
        }
        let sink_kind = graph.vertex(graph.edge(edge).sink).kind;
        if (vertex.kind == VertexKind::ExternIn && vertex.extern_address == Some(fifo.address))
            || sink_kind == VertexKind::ExternOut
        {
            fifo.attribute = FifoAttribute::WExt;
        } else if matches!(vertex.kind, VertexKind::Fork | VertexKind::Duplicate) {
            fifo.attribute = FifoAttribute::RwOnly;
        } else if vertex.kind == VertexKind::Repeat
            && repeat_aliases_input(model, tree, handler, vertex_id)
        {
            fifo.attribute = FifoAttribute::WOnly;
        }
        Ok(fifo)
    }

    /// Re-examine pending FIFOs after parameter feedback; consumers that
    /// resolved get their counts pushed to the owning runner.
    pub fn update_pending(
        &mut self,
        model: &Model,
        tree: &FiringTree,
        comm: &Communicator,
        grt_ix: u32,
    ) -> Result<(), AllocError> {
        let mut remaining = Vec::with_capacity(self.pending.len());
        for entry in std::mem::take(&mut self.pending) {
            let count = deps::cons_dep_count(
                model,
                tree,
                entry.handler,
                entry.vertex,
                entry.firing,
                entry.port,
            )?;
            if count > 0 {
                let slot = tree.edge_slot(entry.handler, entry.edge, entry.firing);
                let _ = comm.notify(
                    entry.lrt,
                    RunnerNotification {
                        sender: grt_ix,
                        kind: Notification::MemUpdateAddr {
                            address: slot.address,
                        },
                    },
                );
                let _ = comm.notify(
                    entry.lrt,
                    RunnerNotification {
                        sender: grt_ix,
                        kind: Notification::MemUpdateCount {
                            count: count as u32 - 1,
                        },
                    },
                );
                debug!(
                    target: "alloc",
                    address = slot.address,
                    count,
                    lrt = entry.lrt,
                    "pending_fifo_resolved"
                );
            } else {
                remaining.push(entry);
            }
        }
        self.pending = remaining;
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// True when a repeat firing can forward its input buffer as-is: one input,
/// one output, identical rates.
fn repeat_aliases_input(
    model: &Model,
    tree: &FiringTree,
    handler: HandlerId,
    vertex_id: VertexId,
) -> bool {
    let graph = model.graph(tree.handler(handler).graph);
    let vertex = graph.vertex(vertex_id);
    if vertex.kind != VertexKind::Repeat {
        return false;
    }
    match (vertex.input_edge(0), vertex.output_edge(0)) {
        (Some(in_edge), Some(out_edge)) => {
            tree.snk_rate(handler, in_edge) == tree.src_rate(handler, out_edge)
        }
        _ => false,
    }
}

/// Descriptor for a dependency window resolved to persistent delay storage.
fn persistent_fifo(dep: &core_firing::DependencyInfo) -> Option<Fifo> {
    dep.delay_address.map(|address| Fifo {
        address,
        offset: dep.memory_start,
        size: dep.memory_end - dep.memory_start + 1,
        count: 0,
        attribute: FifoAttribute::ROnly,
    })
}
