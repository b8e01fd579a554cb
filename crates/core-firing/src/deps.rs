//! Execution- and consumption-dependency traversal.
//!
//! Given one firing of an actor and one of its ports, these traversals
//! enumerate the producer firings covering the consumed byte window
//! (execution dependencies) or the consumer firings covering the produced
//! window (consumption dependencies). The walk crosses hierarchy boundaries
//! in both directions, chains through materialized delays and their
//! setter/getter edges, and splits windows that straddle the delay boundary.
//!
//! Sinks are pluggable: pass a callback, collect into a
//! [`DependencyIterator`], or count only. An unresolved child handler on the
//! path emits a sentinel dependency (`rate == -1`) instead of recursing.

use crate::handler::{FiringTree, HandlerId};
use crate::FiringError;
use core_graph::{EdgeId, Graph, Model, VertexId, VertexKind};
use core_math::floor_div_i64;
use smallvec::SmallVec;

/// One producer- or consumer-side dependency of a firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyInfo {
    /// Target vertex; `None` for a zero-rate (null) dependency, an
    /// unresolved sentinel, or a persistent-delay window.
    pub vertex: Option<VertexId>,
    /// Handler in whose context `vertex` and the firing range live.
    pub handler: HandlerId,
    /// Rate on the target side; `-1` marks an unresolved sentinel.
    pub rate: i64,
    /// Port index on the target vertex.
    pub port: u32,
    pub memory_start: u32,
    pub memory_end: u32,
    pub firing_start: u32,
    pub firing_end: u32,
    /// Reserved-region address when the window resolves to persistent delay
    /// storage instead of a producer/consumer firing; `memory_start` /
    /// `memory_end` are then offsets within the region.
    pub delay_address: Option<u64>,
}

impl DependencyInfo {
    fn null(handler: HandlerId) -> Self {
        Self {
            vertex: None,
            handler,
            rate: 0,
            port: 0,
            memory_start: 0,
            memory_end: 0,
            firing_start: 0,
            firing_end: 0,
            delay_address: None,
        }
    }

    fn unresolved(handler: HandlerId) -> Self {
        Self {
            vertex: None,
            handler,
            rate: -1,
            port: u32::MAX,
            memory_start: u32::MAX,
            memory_end: u32::MAX,
            firing_start: u32::MAX,
            firing_end: u32::MAX,
            delay_address: None,
        }
    }

    fn persistent(handler: HandlerId, address: u64, lower: i64, upper: i64) -> Self {
        Self {
            vertex: None,
            handler,
            rate: 0,
            port: u32::MAX,
            memory_start: lower as u32,
            memory_end: upper as u32,
            firing_start: 0,
            firing_end: 0,
            delay_address: Some(address),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.rate < 0
    }

    pub fn is_null(&self) -> bool {
        self.vertex.is_none() && self.rate == 0 && self.delay_address.is_none()
    }

    pub fn is_persistent(&self) -> bool {
        self.delay_address.is_some()
    }

    /// Number of distinct target firings covered.
    pub fn firing_count(&self) -> u32 {
        if self.vertex.is_none() {
            0
        } else {
            self.firing_end - self.firing_start + 1
        }
    }
}

/// Collected dependency sequence; restartable by re-iterating.
#[derive(Debug, Default, Clone)]
pub struct DependencyIterator {
    deps: SmallVec<[DependencyInfo; 2]>,
}

impl DependencyIterator {
    pub fn iter(&self) -> impl Iterator<Item = &DependencyInfo> {
        self.deps.iter()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn has_unresolved(&self) -> bool {
        self.deps.iter().any(DependencyInfo::is_unresolved)
    }

    /// Total number of distinct producer/consumer firings.
    pub fn total_firings(&self) -> u32 {
        self.deps.iter().map(DependencyInfo::firing_count).sum()
    }
}

impl<'a> IntoIterator for &'a DependencyIterator {
    type Item = &'a DependencyInfo;
    type IntoIter = std::slice::Iter<'a, DependencyInfo>;
    fn into_iter(self) -> Self::IntoIter {
        self.deps.iter()
    }
}

// --- public entry points -----------------------------------------------------

/// Walk the execution dependencies of `(vertex, firing)` on its input port
/// `port`, invoking `f` per dependency. Returns the dependency count.
pub fn for_each_exec_dep(
    model: &Model,
    tree: &FiringTree,
    handler: HandlerId,
    vertex: VertexId,
    firing: u32,
    port: u32,
    f: &mut dyn FnMut(&DependencyInfo),
) -> Result<i32, FiringError> {
    let g = model.graph(tree.handler(handler).graph);
    let Some(edge) = g.vertex(vertex).input_edge(port as usize) else {
        return Ok(0);
    };
    let snk_rate = tree.snk_rate(handler, edge);
    exec_rec(
        model,
        tree,
        edge,
        snk_rate * i64::from(firing),
        snk_rate * (i64::from(firing) + 1) - 1,
        handler,
        f,
    )
}

pub fn exec_deps(
    model: &Model,
    tree: &FiringTree,
    handler: HandlerId,
    vertex: VertexId,
    firing: u32,
    port: u32,
) -> Result<DependencyIterator, FiringError> {
    let mut iter = DependencyIterator::default();
    for_each_exec_dep(model, tree, handler, vertex, firing, port, &mut |dep| {
        iter.deps.push(*dep)
    })?;
    Ok(iter)
}

/// Count-only query: number of distinct producer firings feeding the port.
pub fn exec_dep_count(
    model: &Model,
    tree: &FiringTree,
    handler: HandlerId,
    vertex: VertexId,
    firing: u32,
    port: u32,
) -> Result<i32, FiringError> {
    for_each_exec_dep(model, tree, handler, vertex, firing, port, &mut |_| {})
}

/// Walk the consumption dependencies of `(vertex, firing)` on its output
/// port `port`.
pub fn for_each_cons_dep(
    model: &Model,
    tree: &FiringTree,
    handler: HandlerId,
    vertex: VertexId,
    firing: u32,
    port: u32,
    f: &mut dyn FnMut(&DependencyInfo),
) -> Result<i32, FiringError> {
    let g = model.graph(tree.handler(handler).graph);
    let Some(edge) = g.vertex(vertex).output_edge(port as usize) else {
        return Ok(0);
    };
    let src_rate = tree.src_rate(handler, edge);
    cons_rec(
        model,
        tree,
        edge,
        src_rate * i64::from(firing),
        src_rate * (i64::from(firing) + 1) - 1,
        handler,
        f,
    )
}

pub fn cons_deps(
    model: &Model,
    tree: &FiringTree,
    handler: HandlerId,
    vertex: VertexId,
    firing: u32,
    port: u32,
) -> Result<DependencyIterator, FiringError> {
    let mut iter = DependencyIterator::default();
    for_each_cons_dep(model, tree, handler, vertex, firing, port, &mut |dep| {
        iter.deps.push(*dep)
    })?;
    Ok(iter)
}

pub fn cons_dep_count(
    model: &Model,
    tree: &FiringTree,
    handler: HandlerId,
    vertex: VertexId,
    firing: u32,
    port: u32,
) -> Result<i32, FiringError> {
    for_each_cons_dep(model, tree, handler, vertex, firing, port, &mut |_| {})
}

// --- execution side ----------------------------------------------------------

fn create_exec_dep(
    graph: &Graph,
    edge: EdgeId,
    lower: i64,
    upper: i64,
    src_rate: i64,
    delay: i64,
    handler: HandlerId,
) -> DependencyInfo {
    if src_rate == 0 {
        return DependencyInfo::null(handler);
    }
    let e = graph.edge(edge);
    DependencyInfo {
        vertex: Some(e.source),
        handler,
        rate: src_rate,
        port: e.source_port,
        firing_start: ((lower - delay) / src_rate) as u32,
        memory_start: ((lower - delay) % src_rate) as u32,
        firing_end: ((upper - delay) / src_rate) as u32,
        memory_end: ((upper - delay) % src_rate) as u32,
        delay_address: None,
    }
}

fn exec_rec(
    model: &Model,
    tree: &FiringTree,
    edge: EdgeId,
    lower: i64,
    upper: i64,
    handler: HandlerId,
    f: &mut dyn FnMut(&DependencyInfo),
) -> Result<i32, FiringError> {
    let g = model.graph(tree.handler(handler).graph);
    if tree.snk_rate(handler, edge) == 0 {
        f(&DependencyInfo::null(handler));
        return Ok(0);
    }
    let mut edge = edge;
    let mut lower = lower;
    let mut upper = upper;
    let mut kind = g.vertex(g.edge(edge).source).kind;
    // Reading from a delay pivot: chain onto the delayed edge with the index
    // translation that puts the getter window at the end of the iteration.
    if kind == VertexKind::Delay {
        let pivot = g.edge(edge).source;
        let delay_edge = g
            .vertex(pivot)
            .delay_edge()
            .ok_or(FiringError::InvalidWindow { lower, upper })?;
        let de = g.edge(delay_edge);
        let src_rate = tree.src_rate(handler, edge);
        let snk_rate = tree.snk_rate(handler, delay_edge);
        let src_rv = i64::from(tree.rv(handler, de.source));
        let snk_rv = i64::from(tree.rv(handler, de.sink));
        let offset = if g.vertex(de.sink).kind == VertexKind::Output {
            src_rate * src_rv - snk_rate
        } else {
            snk_rate * snk_rv
        };
        lower += offset;
        upper += offset;
        edge = delay_edge;
        kind = g.vertex(g.edge(edge).source).kind;
    }
    let mut has_delay = g.edge(edge).delay.is_some();
    let mut delay = if has_delay {
        tree.delay_value(handler, edge)
    } else {
        0
    };
    // Window entirely inside the initial tokens: read from the setter, or
    // straight from the reserved region for a persistent delay.
    if has_delay && upper < delay {
        let d = g.edge(edge).delay().expect("delay checked");
        if d.persistent {
            f(&DependencyInfo::persistent(
                handler,
                d.address.unwrap_or_default(),
                lower,
                upper,
            ));
            return Ok(1);
        }
        let (setter, sport) = d.setter.ok_or(FiringError::InvalidWindow { lower, upper })?;
        edge = g
            .vertex(setter)
            .output_edge(sport as usize)
            .ok_or(FiringError::InvalidWindow { lower, upper })?;
        kind = g.vertex(g.edge(edge).source).kind;
        has_delay = false;
        delay = 0;
    }
    if lower >= delay {
        match kind {
            VertexKind::Input => exec_input(model, tree, edge, lower, upper, delay, handler, f),
            VertexKind::Graph => exec_graph(model, tree, edge, lower, upper, delay, handler, f),
            _ => {
                let src_rate = tree.src_rate(handler, edge);
                let dep = create_exec_dep(g, edge, lower, upper, src_rate, delay, handler);
                f(&dep);
                Ok((dep.firing_end.wrapping_sub(dep.firing_start) + 1) as i32)
            }
        }
    } else if has_delay {
        // Mixed window: setter (or persistent region) below the delay,
        // source part above.
        let d = g.edge(edge).delay().expect("delay checked");
        let below = if d.persistent {
            f(&DependencyInfo::persistent(
                handler,
                d.address.unwrap_or_default(),
                lower,
                delay - 1,
            ));
            1
        } else {
            let (setter, sport) =
                d.setter.ok_or(FiringError::InvalidWindow { lower, upper })?;
            let setter_edge = g
                .vertex(setter)
                .output_edge(sport as usize)
                .ok_or(FiringError::InvalidWindow { lower, upper })?;
            exec_rec(model, tree, setter_edge, lower, delay - 1, handler, f)?
        };
        let above = exec_rec(model, tree, edge, delay, upper, handler, f)?;
        Ok(below + above)
    } else {
        Err(FiringError::InvalidWindow { lower, upper })
    }
}

/// Source is an input interface: translate into the parent handler on the
/// matching graph-level edge, once per interface repetition.
#[allow(clippy::too_many_arguments)]
fn exec_input(
    model: &Model,
    tree: &FiringTree,
    edge: EdgeId,
    lower: i64,
    upper: i64,
    delay: i64,
    handler: HandlerId,
    f: &mut dyn FnMut(&DependencyInfo),
) -> Result<i32, FiringError> {
    let h = tree.handler(handler);
    let g = model.graph(h.graph);
    let src_rate = tree.src_rate(handler, edge);
    let parent = h.parent.ok_or(FiringError::InvalidWindow { lower, upper })?;
    let parent_vertex = h
        .parent_vertex
        .ok_or(FiringError::InvalidWindow { lower, upper })?;
    let iface = g.edge(edge).source;
    let iface_ix = g
        .input_interfaces()
        .iter()
        .position(|v| *v == iface)
        .ok_or(FiringError::InvalidWindow { lower, upper })?;
    let upper_edge = model
        .graph(tree.handler(parent).graph)
        .vertex(parent_vertex)
        .input_edge(iface_ix)
        .ok_or(FiringError::InvalidWindow { lower, upper })?;
    let upper_lcons = src_rate * i64::from(h.firing);
    let firing_start = (lower - delay) / src_rate;
    let firing_end = (upper - delay) / src_rate;
    let lower_mod = (lower - delay) % src_rate;
    let upper_mod = (upper - delay) % src_rate;
    let mut count = 0;
    for k in firing_start..=firing_end {
        let start = if k == firing_start { lower_mod } else { 0 };
        let end = if k == firing_end { upper_mod } else { src_rate - 1 };
        count += exec_rec(
            model,
            tree,
            upper_edge,
            upper_lcons + start,
            upper_lcons + end,
            parent,
            f,
        )?;
    }
    Ok(count)
}

/// Source is a hierarchical vertex: recurse into each source firing's child
/// handler through its output interface's inner edge.
#[allow(clippy::too_many_arguments)]
fn exec_graph(
    model: &Model,
    tree: &FiringTree,
    edge: EdgeId,
    lower: i64,
    upper: i64,
    delay: i64,
    handler: HandlerId,
    f: &mut dyn FnMut(&DependencyInfo),
) -> Result<i32, FiringError> {
    let g = model.graph(tree.handler(handler).graph);
    let e = g.edge(edge);
    let src_rate = tree.src_rate(handler, edge);
    let graph_vertex = e.source;
    let child_graph_id = g
        .vertex(graph_vertex)
        .subgraph
        .ok_or(FiringError::InvalidWindow { lower, upper })?;
    let child_g = model.graph(child_graph_id);
    let out_iface = child_g.output_interfaces()[e.source_port as usize];
    let inner_edge = child_g
        .interface_inner_edge(out_iface)
        .ok_or(FiringError::InvalidWindow { lower, upper })?;
    let firing_start = (lower - delay) / src_rate;
    let firing_end = (upper - delay) / src_rate;
    let lower_mod = (lower - delay) % src_rate;
    let upper_mod = (upper - delay) % src_rate;
    let mut count = 0;
    for k in firing_start..=firing_end {
        let child = tree.child(model, handler, graph_vertex, k as u32);
        match child {
            Some(ch) if tree.handler(ch).is_resolved() => {
                let if_delay = tree.delay_value(ch, inner_edge);
                let if_src_rate = tree.src_rate(ch, inner_edge)
                    * i64::from(tree.rv(ch, child_g.edge(inner_edge).source));
                let start = if k == firing_start {
                    lower_mod + if_delay
                } else {
                    if_delay
                };
                let end = if k == firing_end {
                    upper_mod + if_delay - src_rate
                } else {
                    if_delay - 1
                };
                count += exec_rec(
                    model,
                    tree,
                    inner_edge,
                    if_src_rate - src_rate + start,
                    if_src_rate + end,
                    ch,
                    f,
                )?;
            }
            _ => f(&DependencyInfo::unresolved(handler)),
        }
    }
    Ok(count)
}

// --- consumption side --------------------------------------------------------

fn create_cons_dep(
    graph: &Graph,
    edge: EdgeId,
    lower: i64,
    upper: i64,
    snk_rate: i64,
    delay: i64,
    handler: HandlerId,
) -> DependencyInfo {
    if snk_rate == 0 {
        return DependencyInfo::null(handler);
    }
    let e = graph.edge(edge);
    let delayed_lower = lower + delay;
    let delayed_upper = upper + delay;
    DependencyInfo {
        vertex: Some(e.sink),
        handler,
        rate: snk_rate,
        port: e.sink_port,
        firing_start: floor_div_i64(delayed_lower, snk_rate) as u32,
        memory_start: delayed_lower.rem_euclid(snk_rate) as u32,
        firing_end: floor_div_i64(delayed_upper, snk_rate) as u32,
        memory_end: delayed_upper.rem_euclid(snk_rate) as u32,
        delay_address: None,
    }
}

fn cons_rec(
    model: &Model,
    tree: &FiringTree,
    edge: EdgeId,
    lower: i64,
    upper: i64,
    handler: HandlerId,
    f: &mut dyn FnMut(&DependencyInfo),
) -> Result<i32, FiringError> {
    let g = model.graph(tree.handler(handler).graph);
    let e = g.edge(edge);
    let sink = e.sink;
    let sink_kind = g.vertex(sink).kind;
    let snk_rate = tree.snk_rate(handler, edge);
    let src_rate = tree.src_rate(handler, edge);
    if src_rate == 0 {
        f(&DependencyInfo::null(handler));
        return Ok(0);
    }
    let has_delay = e.delay.is_some();
    let delay = if has_delay {
        tree.delay_value(handler, edge)
    } else {
        0
    };
    // Writing into a delay pivot (we are the setter): chain onto the delayed
    // edge, shifting indices so the initial tokens land first.
    if sink_kind == VertexKind::Delay {
        let delay_edge = g
            .vertex(sink)
            .delay_edge()
            .ok_or(FiringError::InvalidWindow { lower, upper })?;
        let next_delay = tree.delay_value(handler, delay_edge);
        let offset = next_delay - delay;
        return cons_rec(
            model,
            tree,
            delay_edge,
            lower - offset,
            upper - offset,
            handler,
            f,
        );
    }
    let src_rv = i64::from(tree.rv(handler, e.source));
    let snk_rv = i64::from(tree.rv(handler, sink));
    let total_rate = if sink_kind == VertexKind::Output {
        src_rate * src_rv + delay
    } else {
        snk_rate * snk_rv
    };
    let delayed_total = if sink_kind == VertexKind::Output {
        total_rate
    } else {
        total_rate - delay
    };
    let getter_edge = |g: &Graph| -> Result<EdgeId, FiringError> {
        let d = g.edge(edge).delay().ok_or(FiringError::InvalidWindow { lower, upper })?;
        let (getter, gport) = d.getter.ok_or(FiringError::InvalidWindow { lower, upper })?;
        g.vertex(getter)
            .input_edge(gport as usize)
            .ok_or(FiringError::InvalidWindow { lower, upper })
    };
    if has_delay && lower >= delayed_total {
        // Entirely past the iteration's consumption: the getter reads it, or
        // it becomes next iteration's persistent tokens.
        let d = e.delay().expect("delay checked");
        if d.persistent {
            f(&DependencyInfo::persistent(
                handler,
                d.address.unwrap_or_default(),
                lower - delayed_total,
                upper - delayed_total,
            ));
            return Ok(1);
        }
        let ge = getter_edge(g)?;
        cons_rec(
            model,
            tree,
            ge,
            lower - delayed_total,
            upper - delayed_total,
            handler,
            f,
        )
    } else if upper < delayed_total {
        match sink_kind {
            VertexKind::Output => {
                cons_output(model, tree, edge, lower, upper, total_rate, handler, f)
            }
            VertexKind::Graph => cons_graph(model, tree, edge, lower, upper, delay, handler, f),
            _ => {
                let dep = create_cons_dep(g, edge, lower, upper, snk_rate, delay, handler);
                f(&dep);
                Ok((dep.firing_end.wrapping_sub(dep.firing_start) + 1) as i32)
            }
        }
    } else if has_delay {
        // Window straddles the boundary: sink part, then getter or
        // persistent part.
        let d = e.delay().expect("delay checked");
        let sink_part = cons_rec(model, tree, edge, lower, total_rate - delay - 1, handler, f)?;
        let tail = if d.persistent {
            f(&DependencyInfo::persistent(
                handler,
                d.address.unwrap_or_default(),
                0,
                upper - delayed_total,
            ));
            1
        } else {
            let ge = getter_edge(g)?;
            cons_rec(model, tree, ge, 0, upper - delayed_total, handler, f)?
        };
        Ok(sink_part + tail)
    } else {
        Err(FiringError::InvalidWindow { lower, upper })
    }
}

/// Sink is an output interface: decide per §"output interface" whether the
/// window dies inside the firing (void), forwards to the parent, goes to the
/// getter, or both.
#[allow(clippy::too_many_arguments)]
fn cons_output(
    model: &Model,
    tree: &FiringTree,
    edge: EdgeId,
    lower: i64,
    upper: i64,
    total_rate: i64,
    handler: HandlerId,
    f: &mut dyn FnMut(&DependencyInfo),
) -> Result<i32, FiringError> {
    let h = tree.handler(handler);
    let g = model.graph(h.graph);
    let e = g.edge(edge);
    let src_rate = tree.src_rate(handler, edge);
    let src_rv = i64::from(tree.rv(handler, e.source));
    let snk_rate = tree.snk_rate(handler, edge);
    let has_delay = e.delay.is_some();
    let delay = if has_delay {
        tree.delay_value(handler, edge)
    } else {
        0
    };
    let mem_start = (lower + delay) % total_rate;
    let mem_end = (upper + delay) % total_rate;
    let min_valid_w_delay = src_rate * src_rv - snk_rate;
    let min_valid_wo_delay = min_valid_w_delay + delay;
    if mem_end < min_valid_w_delay {
        // Overwritten before the interface forwards: void dependency.
        return Ok(-1);
    }
    let forward = |f: &mut dyn FnMut(&DependencyInfo)| -> Result<i32, FiringError> {
        let parent = h.parent.ok_or(FiringError::InvalidWindow { lower, upper })?;
        let parent_vertex = h
            .parent_vertex
            .ok_or(FiringError::InvalidWindow { lower, upper })?;
        let iface_ix = g
            .output_interfaces()
            .iter()
            .position(|v| *v == e.sink)
            .ok_or(FiringError::InvalidWindow { lower, upper })?;
        let upper_edge = model
            .graph(tree.handler(parent).graph)
            .vertex(parent_vertex)
            .output_edge(iface_ix)
            .ok_or(FiringError::InvalidWindow { lower, upper })?;
        let parent_lprod = snk_rate * i64::from(h.firing);
        cons_rec(
            model,
            tree,
            upper_edge,
            parent_lprod + 0.max(mem_start - min_valid_wo_delay),
            parent_lprod + (mem_end - min_valid_wo_delay),
            parent,
            f,
        )
    };
    let getter = |f: &mut dyn FnMut(&DependencyInfo),
                  lo: i64,
                  hi: i64|
     -> Result<i32, FiringError> {
        let d = e.delay().ok_or(FiringError::InvalidWindow { lower, upper })?;
        let (gv, gport) = d.getter.ok_or(FiringError::InvalidWindow { lower, upper })?;
        let ge = g
            .vertex(gv)
            .input_edge(gport as usize)
            .ok_or(FiringError::InvalidWindow { lower, upper })?;
        cons_rec(model, tree, ge, lo, hi, handler, f)
    };
    if mem_start >= min_valid_wo_delay || (delay == 0 && mem_end >= min_valid_wo_delay) {
        forward(&mut *f)
    } else if has_delay && mem_end < min_valid_wo_delay {
        getter(
            &mut *f,
            0.max(mem_start - min_valid_w_delay),
            mem_end - min_valid_w_delay,
        )
    } else if has_delay {
        let getter_part = getter(&mut *f, mem_start - min_valid_w_delay, delay - 1)?;
        Ok(getter_part + forward(&mut *f)?)
    } else {
        Err(FiringError::InvalidWindow { lower, upper })
    }
}

/// Sink is a hierarchical vertex: recurse into each consumer firing's child
/// handler through its input interface's inner edge, repeating the interface
/// window for every full internal repetition.
#[allow(clippy::too_many_arguments)]
fn cons_graph(
    model: &Model,
    tree: &FiringTree,
    edge: EdgeId,
    lower: i64,
    upper: i64,
    delay: i64,
    handler: HandlerId,
    f: &mut dyn FnMut(&DependencyInfo),
) -> Result<i32, FiringError> {
    let g = model.graph(tree.handler(handler).graph);
    let e = g.edge(edge);
    let snk_rate = tree.snk_rate(handler, edge);
    let graph_vertex = e.sink;
    let child_graph_id = g
        .vertex(graph_vertex)
        .subgraph
        .ok_or(FiringError::InvalidWindow { lower, upper })?;
    let child_g = model.graph(child_graph_id);
    let in_iface = child_g.input_interfaces()[e.sink_port as usize];
    let inner_edge = child_g
        .interface_inner_edge(in_iface)
        .ok_or(FiringError::InvalidWindow { lower, upper })?;
    let firing_start = floor_div_i64(lower + delay, snk_rate);
    let firing_end = floor_div_i64(upper + delay, snk_rate);
    let mut count = 0;
    for k in firing_start..=firing_end {
        let child = tree.child(model, handler, graph_vertex, k as u32);
        match child {
            Some(ch) if tree.handler(ch).is_resolved() => {
                let adjusted = tree.snk_rate(ch, inner_edge)
                    * i64::from(tree.rv(ch, child_g.edge(inner_edge).sink));
                let full_reps = adjusted / snk_rate;
                let lp = if k == firing_start {
                    (lower + delay).rem_euclid(snk_rate)
                } else {
                    0
                };
                let up = if k == firing_end {
                    (upper + delay).rem_euclid(snk_rate)
                } else {
                    snk_rate - 1
                };
                for i in 0..full_reps {
                    let offset = i * snk_rate;
                    count += cons_rec(model, tree, inner_edge, lp + offset, up + offset, ch, f)?;
                }
                let tail_lower = lp + full_reps * snk_rate;
                if snk_rate * full_reps != adjusted && tail_lower < adjusted {
                    let tail_upper = (up + full_reps * snk_rate).min(adjusted - 1);
                    count += cons_rec(model, tree, inner_edge, tail_lower, tail_upper, ch, f)?;
                }
            }
            _ => f(&DependencyInfo::unresolved(handler)),
        }
    }
    Ok(count)
}
