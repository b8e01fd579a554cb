//! PE mapping policies and cross-cluster sync-task injection.

use crate::task::{PredLink, Schedule, TaskKind};
use crate::{MappingPolicy, SchedError};
use core_firing::FiringTree;
use core_graph::{Model, RtInfo, Vertex};
use core_platform::{ClusterId, PeId, Platform};
use tracing::trace;

#[derive(Debug, Default)]
pub struct Mapper {
    policy: MappingPolicy,
    rr_cursor: usize,
}

impl Mapper {
    pub fn new(policy: MappingPolicy) -> Self {
        Self {
            policy,
            rr_cursor: 0,
        }
    }

    /// Choose a PE and time window for one pending vertex task, injecting
    /// send/receive tasks for every predecessor living on another cluster.
    pub fn map_task(
        &mut self,
        model: &Model,
        tree: &FiringTree,
        platform: &Platform,
        schedule: &mut Schedule,
        ix: u32,
    ) -> Result<(), SchedError> {
        let Some((handler, vertex_id, _)) = schedule.task(ix).vertex_ref() else {
            return Ok(());
        };
        let graph = model.graph(tree.handler(handler).graph);
        let vertex = graph.vertex(vertex_id);
        let mask = vertex.rt.as_ref().map_or(u64::MAX, |rt| rt.pe_type_mask);
        let values: Vec<i64> = tree.param_values(handler).to_vec();
        let min_start = schedule
            .task(ix)
            .predecessors
            .iter()
            .map(|l| schedule.task(l.task).end_time)
            .max()
            .unwrap_or(0);

        let (pe, mut start, mut end) = match self.policy {
            MappingPolicy::BestFit => {
                best_fit(platform, schedule, ix, vertex, mask, &values, min_start)?
            }
            MappingPolicy::RoundRobin => round_robin(
                platform,
                schedule,
                vertex,
                mask,
                &values,
                min_start,
                &mut self.rr_cursor,
            )?,
        };

        // Data produced on another cluster travels through an injected
        // send/receive pair chained behind the producer.
        let cluster = platform.pe(pe).cluster;
        let cross: Vec<PredLink> = schedule
            .task(ix)
            .predecessors
            .iter()
            .filter(|l| {
                l.size > 0
                    && schedule.task(l.task).mapped_pe.is_some_and(|p| {
                        platform.pe(p).cluster != cluster
                    })
            })
            .copied()
            .collect();
        for link in cross {
            let src_cluster = platform
                .pe(schedule.task(link.task).mapped_pe.expect("mapped"))
                .cluster;
            let bus = platform.bus(src_cluster, cluster)?;
            let send = insert_comm_task(
                platform,
                schedule,
                src_cluster,
                TaskKind::SyncSend {
                    size: link.size,
                    kernel_ix: bus.send_kernel,
                    input_port: link.port,
                    successor: ix,
                },
                link.task,
                com_time(link.size, bus.write_speed),
                link.size,
            )?;
            let recv = insert_comm_task(
                platform,
                schedule,
                cluster,
                TaskKind::SyncReceive {
                    size: link.size,
                    kernel_ix: bus.recv_kernel,
                    input_port: link.port,
                    successor: ix,
                },
                send,
                com_time(link.size, bus.read_speed),
                link.size,
            )?;
            schedule.relink_predecessor(ix, link.task, recv);
            let recv_end = schedule.task(recv).end_time;
            if recv_end > start {
                let offset = recv_end - start;
                start += offset;
                end += offset;
            }
        }
        schedule.commit_mapping(ix, pe, start, end);
        Ok(())
    }
}

fn com_time(size: u64, speed: u64) -> u64 {
    if speed == 0 {
        return size;
    }
    size.div_ceil(speed)
}

fn exec_time_on(
    vertex: &Vertex,
    pe_type: u32,
    values: &[i64],
) -> Result<i64, SchedError> {
    let time = match &vertex.rt {
        Some(rt) => rt
            .timing_on(pe_type, values)
            .map_err(core_firing::FiringError::from)?,
        None => RtInfo::DEFAULT_TIMING,
    };
    if time <= 0 {
        return Err(SchedError::NullTiming {
            vertex: vertex.name.clone(),
        });
    }
    Ok(time)
}

/// Best PE of one cluster by earliest end time, smallest idle gap on tie.
fn best_pe_in_cluster(
    platform: &Platform,
    schedule: &Schedule,
    cluster: ClusterId,
    min_start: u64,
    exec_time: impl Fn(u32) -> Result<Option<i64>, SchedError>,
) -> Result<Option<(PeId, u64, u64)>, SchedError> {
    let mut best: Option<(PeId, u64, u64, u64)> = None;
    for pe_id in &platform.cluster(cluster).pes {
        let pe = platform.pe(*pe_id);
        if !pe.enabled {
            continue;
        }
        let Some(exec) = exec_time(pe.pe_type)? else {
            continue;
        };
        let ready = schedule.end_time(*pe_id);
        let start = ready.max(min_start);
        let idle = start - ready;
        let end = start + exec as u64;
        let better = match &best {
            None => true,
            Some((_, _, best_end, best_idle)) => {
                end < *best_end || (end == *best_end && idle < *best_idle)
            }
        };
        if better {
            best = Some((*pe_id, start, end, idle));
        }
    }
    Ok(best.map(|(pe, start, end, _)| (pe, start, end)))
}

/// Best-fit across clusters: per-cluster best PE, then pick the cluster
/// minimizing end time plus the inbound data-transfer cost.
fn best_fit(
    platform: &Platform,
    schedule: &Schedule,
    ix: u32,
    vertex: &Vertex,
    mask: u64,
    values: &[i64],
    min_start: u64,
) -> Result<(PeId, u64, u64), SchedError> {
    let mut best: Option<(PeId, u64, u64, u64)> = None;
    for cluster in platform.clusters() {
        if !platform.cluster_supports(cluster.ix, mask) {
            continue;
        }
        let found = best_pe_in_cluster(platform, schedule, cluster.ix, min_start, |pe_type| {
            if pe_type >= u64::BITS || (mask >> pe_type) & 1 == 0 {
                return Ok(None);
            }
            exec_time_on(vertex, pe_type, values).map(Some)
        })?;
        let Some((pe, start, end)) = found else {
            continue;
        };
        let mut transfer = 0u64;
        for link in &schedule.task(ix).predecessors {
            if let Some(pred_pe) = schedule.task(link.task).mapped_pe {
                transfer = transfer.saturating_add(platform.transfer_cost(pred_pe, pe, link.size));
            }
        }
        let cost = end.saturating_add(transfer);
        if best.as_ref().is_none_or(|(_, _, _, c)| cost < *c) {
            best = Some((pe, start, end, cost));
        }
    }
    let (pe, start, end, _) = best.ok_or_else(|| SchedError::NoMappablePe {
        vertex: vertex.name.clone(),
    })?;
    trace!(target: "sched", task = ix, pe = pe.index(), "best_fit_chosen");
    Ok((pe, start, end))
}

/// Cycle through the mappable PEs, ignoring cost.
fn round_robin(
    platform: &Platform,
    schedule: &Schedule,
    vertex: &Vertex,
    mask: u64,
    values: &[i64],
    min_start: u64,
    cursor: &mut usize,
) -> Result<(PeId, u64, u64), SchedError> {
    let mappable: Vec<PeId> = platform
        .pes()
        .iter()
        .filter(|pe| pe.enabled && pe.pe_type < u64::BITS && (mask >> pe.pe_type) & 1 == 1)
        .map(|pe| pe.virtual_ix)
        .collect();
    if mappable.is_empty() {
        return Err(SchedError::NoMappablePe {
            vertex: vertex.name.clone(),
        });
    }
    let pe = mappable[*cursor % mappable.len()];
    *cursor += 1;
    let exec = exec_time_on(vertex, platform.pe(pe).pe_type, values)?;
    let start = schedule.end_time(pe).max(min_start);
    Ok((pe, start, start + exec as u64))
}

/// Create, place and commit one sync task on the given cluster.
fn insert_comm_task(
    platform: &Platform,
    schedule: &mut Schedule,
    cluster: ClusterId,
    kind: TaskKind,
    pred: u32,
    com_time: u64,
    size: u64,
) -> Result<u32, SchedError> {
    let min_start = schedule.task(pred).end_time;
    let found = best_pe_in_cluster(platform, schedule, cluster, min_start, |_| {
        Ok(Some(com_time.max(1) as i64))
    })?;
    let Some((pe, start, end)) = found else {
        return Err(SchedError::NoMappablePe {
            vertex: "sync".into(),
        });
    };
    let ix = schedule.add_task(kind);
    schedule.link(pred, ix, size, 0);
    schedule.commit_mapping(ix, pe, start, end);
    trace!(
        target: "sched",
        task = ix,
        pe = pe.index(),
        cluster = cluster.index(),
        "sync_task_injected"
    );
    Ok(ix)
}
