//! Hierarchical PiSDF graph model.
//!
//! Graphs are arenas: vertices, edges and parameters live in dense vectors
//! indexed by newtype ids, and every cross-reference is a back-index, never
//! an owning pointer. Removal is out-of-order erase (swap with the last
//! element, rewrite references to the moved one). The hierarchy is a second
//! arena of graphs inside [`Model`]; a `Graph`-kind vertex points down at its
//! child graph, the child points back up at `(graph, vertex)`, and cycles
//! cannot form because children are always freshly created.
//!
//! Rate, timing and parameter expressions are compiled on entry against the
//! owning graph's parameter scope: static parameters fold away, every other
//! kind binds to its slot in the per-firing value table maintained by the
//! firing handlers.

use thiserror::Error;
use tracing::debug;

mod edge;
mod graph;
mod param;
mod vertex;

pub use edge::{Delay, Edge};
pub use graph::Graph;
pub use param::{Param, ParamKind};
pub use vertex::{RtInfo, Vertex, VertexKind};

use core_expr::{ExprError, Expression, RpnToken};

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Graph position in the model arena.
    GraphId
);
arena_id!(
    /// Vertex position inside its graph (dense, may be reused after erase).
    VertexId
);
arena_id!(
    /// Edge position inside its graph.
    EdgeId
);
arena_id!(
    /// Parameter position inside its graph; doubles as the parameter's slot
    /// in handler value tables.
    ParamId
);

/// Graph construction / mutation failures. All of these are fatal at build
/// time and carry the offending element's name.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph [{graph}]: unknown vertex reference")]
    UnknownVertex { graph: String },
    #[error("graph [{graph}]: unknown edge reference")]
    UnknownEdge { graph: String },
    #[error("graph [{graph}]: unknown parameter reference")]
    UnknownParam { graph: String },
    #[error("unknown graph reference")]
    UnknownGraph,
    #[error("vertex [{vertex}]: port {port} out of range")]
    PortOutOfRange { vertex: String, port: u32 },
    #[error("vertex [{vertex}]: port {port} already connected")]
    PortOccupied { vertex: String, port: u32 },
    #[error("vertex [{vertex}]: port {port} not connected")]
    PortUnconnected { vertex: String, port: u32 },
    #[error("graph [{graph}]: duplicate parameter name [{name}]")]
    DuplicateParamName { graph: String, name: String },
    #[error("graph [{graph}]: persistent delay must not have setter or getter")]
    PersistentDelayEndpoints { graph: String },
    #[error("graph [{graph}]: edge already carries a delay")]
    EdgeAlreadyDelayed { graph: String },
    #[error("vertex [{vertex}]: still connected, detach edges first")]
    VertexConnected { vertex: String },
    #[error("parameter [{name}]: static expression does not reduce to a constant")]
    StaticParamNotConstant { name: String },
    #[error("parameter [{name}]: inherited parameter declared on the root graph")]
    InheritedAtRoot { name: String },
    #[error("vertex [{vertex}]: only configuration actors write output parameters")]
    NotAConfigActor { vertex: String },
    #[error("parameter [{name}]: already written by configuration actor [{vertex}]")]
    ParamAlreadyBound { name: String, vertex: String },
    #[error("parameter [{name}]: still referenced, cannot remove")]
    ParamReferenced { name: String },
    #[error("graph [{graph}]: moved edge rates must be constant")]
    NonConstantMove { graph: String },
    #[error("graph [{graph}]: expression rejected")]
    Expression {
        graph: String,
        #[source]
        source: ExprError,
    },
}

/// Parameter declaration passed to [`Model::add_param`].
#[derive(Debug, Clone, Copy)]
pub enum ParamSpec<'a> {
    Static(&'a [RpnToken]),
    Dynamic,
    DynamicDependent(&'a [RpnToken]),
    /// Inherits the value of the given parameter of the parent graph.
    Inherited(ParamId),
}

/// The whole application: an arena of graphs rooted at [`Model::root`].
#[derive(Debug, Clone)]
pub struct Model {
    graphs: Vec<Graph>,
    root: GraphId,
}

impl Model {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            graphs: vec![Graph::new(root_name.into(), None)],
            root: GraphId(0),
        }
    }

    pub fn root(&self) -> GraphId {
        self.root
    }

    pub fn graph(&self, id: GraphId) -> &Graph {
        &self.graphs[id.index()]
    }

    pub(crate) fn graph_mut(&mut self, id: GraphId) -> &mut Graph {
        &mut self.graphs[id.index()]
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }

    pub fn graph_ids(&self) -> impl Iterator<Item = GraphId> {
        (0..self.graphs.len() as u32).map(GraphId)
    }

    /// True when no graph in the hierarchy declares a dynamic parameter.
    pub fn is_fully_static(&self) -> bool {
        self.graphs.iter().all(|g| !g.is_dynamic())
    }

    // --- construction --------------------------------------------------------

    /// Create a subgraph: a `Graph`-kind vertex in `parent` with one port per
    /// interface, and a child graph pre-populated with its boundary
    /// interfaces (`in_<i>` / `out_<i>`), so the interface count always
    /// matches the hierarchical vertex's edge count.
    pub fn add_subgraph(
        &mut self,
        parent: GraphId,
        name: impl Into<String>,
        input_interfaces: usize,
        output_interfaces: usize,
    ) -> Result<(GraphId, VertexId), GraphError> {
        self.check_graph(parent)?;
        let name = name.into();
        let child_id = GraphId(self.graphs.len() as u32);
        let vertex = self.graph_mut(parent).add_vertex(
            name.clone(),
            VertexKind::Graph,
            input_interfaces,
            output_interfaces,
        );
        self.graph_mut(parent).vertex_mut(vertex).subgraph = Some(child_id);
        let mut child = Graph::new(name, Some((parent, vertex)));
        for i in 0..input_interfaces {
            child.add_vertex(format!("in_{i}"), VertexKind::Input, 0, 1);
        }
        for i in 0..output_interfaces {
            child.add_vertex(format!("out_{i}"), VertexKind::Output, 1, 0);
        }
        self.graphs.push(child);
        Ok((child_id, vertex))
    }

    pub fn add_vertex(
        &mut self,
        graph: GraphId,
        name: impl Into<String>,
        kind: VertexKind,
        in_ports: usize,
        out_ports: usize,
    ) -> Result<VertexId, GraphError> {
        self.check_graph(graph)?;
        Ok(self.graph_mut(graph).add_vertex(name, kind, in_ports, out_ports))
    }

    pub fn add_edge(
        &mut self,
        graph: GraphId,
        source: VertexId,
        source_port: u32,
        src_rate: &[RpnToken],
        sink: VertexId,
        sink_port: u32,
        snk_rate: &[RpnToken],
    ) -> Result<EdgeId, GraphError> {
        self.check_graph(graph)?;
        let g = self.graph_mut(graph);
        let src_rate = g.compile(src_rate)?;
        let snk_rate = g.compile(snk_rate)?;
        g.add_edge(source, source_port, src_rate, sink, sink_port, snk_rate)
    }

    pub fn add_param(
        &mut self,
        graph: GraphId,
        name: impl Into<String>,
        spec: ParamSpec<'_>,
    ) -> Result<ParamId, GraphError> {
        self.check_graph(graph)?;
        let name = name.into();
        let kind = match spec {
            ParamSpec::Static(tokens) => {
                let expr = self.graph(graph).compile(tokens)?;
                let value = expr
                    .value()
                    .ok_or_else(|| GraphError::StaticParamNotConstant { name: name.clone() })?;
                ParamKind::Static {
                    value: value as i64,
                }
            }
            ParamSpec::Dynamic => ParamKind::Dynamic,
            ParamSpec::DynamicDependent(tokens) => {
                let expr = self.graph(graph).compile(tokens)?;
                ParamKind::DynamicDependent { expr }
            }
            ParamSpec::Inherited(parent_param) => {
                let (parent_graph, _) = self
                    .graph(graph)
                    .parent
                    .ok_or_else(|| GraphError::InheritedAtRoot { name: name.clone() })?;
                if parent_param.index() >= self.graph(parent_graph).param_count() {
                    return Err(GraphError::UnknownParam {
                        graph: self.graph(parent_graph).name.clone(),
                    });
                }
                ParamKind::Inherited {
                    parent: parent_param,
                }
            }
        };
        self.graph_mut(graph).add_param(name, kind)
    }

    pub fn add_delay(
        &mut self,
        graph: GraphId,
        edge: EdgeId,
        value: &[RpnToken],
        persistent: bool,
        setter: Option<(VertexId, u32)>,
        getter: Option<(VertexId, u32)>,
    ) -> Result<(), GraphError> {
        self.check_graph(graph)?;
        let g = self.graph_mut(graph);
        let value = g.compile(value)?;
        g.add_delay(edge, value, persistent, setter, getter)
    }

    /// Register runtime information: kernel, supported PE types and per-type
    /// timing expressions.
    pub fn set_rt_info(
        &mut self,
        graph: GraphId,
        vertex: VertexId,
        kernel_ix: u32,
        pe_type_mask: u64,
        timings: &[(u32, &[RpnToken])],
    ) -> Result<(), GraphError> {
        self.check_graph(graph)?;
        let compiled: Result<Vec<_>, _> = timings
            .iter()
            .map(|(pe_type, tokens)| {
                self.graph(graph)
                    .compile(tokens)
                    .map(|expr| (*pe_type, expr))
            })
            .collect();
        self.graph_mut(graph).set_rt_info(
            vertex,
            RtInfo {
                kernel_ix,
                pe_type_mask,
                timings: compiled?,
            },
        )
    }

    /// Declare `param` as written at runtime by the configuration actor
    /// `vertex`. A dynamic parameter accepts exactly one writer.
    pub fn bind_output_param(
        &mut self,
        graph: GraphId,
        vertex: VertexId,
        param: ParamId,
    ) -> Result<(), GraphError> {
        self.check_graph(graph)?;
        let g = self.graph(graph);
        let v = g.vertex(vertex);
        if v.kind != VertexKind::Config {
            return Err(GraphError::NotAConfigActor {
                vertex: v.name.clone(),
            });
        }
        for other in g.config_actors() {
            if g.vertex(*other).output_params.contains(&param) {
                return Err(GraphError::ParamAlreadyBound {
                    name: g.param(param).name.clone(),
                    vertex: g.vertex(*other).name.clone(),
                });
            }
        }
        self.graph_mut(graph)
            .vertex_mut(vertex)
            .output_params
            .push(param);
        Ok(())
    }

    /// Record the reserved memory slice of a persistent delay. Warns and
    /// overwrites if the delay already had an address.
    pub fn set_delay_address(&mut self, graph: GraphId, edge: EdgeId, address: u64) {
        if let Some(delay) = &mut self.graphs[graph.index()].edges[edge.index()].delay {
            if delay.address.is_some() {
                tracing::warn!(target: "graph", address, "delay_address_overwritten");
            }
            delay.address = Some(address);
        }
    }

    /// Pin an `ExternIn`/`ExternOut` vertex to its application buffer.
    pub fn set_extern_address(
        &mut self,
        graph: GraphId,
        vertex: VertexId,
        address: u64,
    ) -> Result<(), GraphError> {
        self.check_graph(graph)?;
        self.graph_mut(graph).vertex_mut(vertex).extern_address = Some(address);
        Ok(())
    }

    /// Declare `param` as a kernel input of `vertex` (its value is copied
    /// into the job message's input parameter array).
    pub fn bind_input_param(
        &mut self,
        graph: GraphId,
        vertex: VertexId,
        param: ParamId,
    ) -> Result<(), GraphError> {
        self.check_graph(graph)?;
        self.graph_mut(graph)
            .vertex_mut(vertex)
            .input_params
            .push(param);
        Ok(())
    }

    // --- removal / transfer --------------------------------------------------

    pub fn remove_edge(&mut self, graph: GraphId, edge: EdgeId) -> Result<(), GraphError> {
        self.check_graph(graph)?;
        self.graph_mut(graph).remove_edge(edge)
    }

    /// Remove a vertex. A hierarchical vertex drops its whole subtree of
    /// graphs from the arena.
    pub fn remove_vertex(&mut self, graph: GraphId, vertex: VertexId) -> Result<(), GraphError> {
        self.check_graph(graph)?;
        let subgraph = self.graph(graph).vertex(vertex).subgraph;
        self.graph_mut(graph).remove_vertex(vertex)?;
        self.fix_parent_link_after_swap(graph, vertex);
        if let Some(child) = subgraph {
            self.remove_graph_subtree(child);
        }
        Ok(())
    }

    /// Remove a parameter (out-of-order erase). Fails while any expression,
    /// inherited child parameter or config binding still references it.
    pub fn remove_param(&mut self, graph: GraphId, param: ParamId) -> Result<(), GraphError> {
        self.check_graph(graph)?;
        let g = self.graph(graph);
        if param.index() >= g.param_count() {
            return Err(GraphError::UnknownParam {
                graph: g.name.clone(),
            });
        }
        let name = g.param(param).name.clone();
        if self.param_is_referenced(graph, param) {
            return Err(GraphError::ParamReferenced { name });
        }
        let g = self.graph_mut(graph);
        g.params.swap_remove(param.index());
        let old = ParamId(g.params.len() as u32);
        if param != old {
            // Rewire references to the parameter that slid into the hole.
            let (from, to) = (old.index(), param.index());
            for e in &mut g.edges {
                e.src_rate.remap_value_index(from, to);
                e.snk_rate.remap_value_index(from, to);
                if let Some(d) = &mut e.delay {
                    d.value.remap_value_index(from, to);
                }
            }
            for p in &mut g.params {
                if let ParamKind::DynamicDependent { expr } = &mut p.kind {
                    expr.remap_value_index(from, to);
                }
            }
            for v in &mut g.vertices {
                if let Some(rt) = &mut v.rt {
                    for (_, expr) in &mut rt.timings {
                        expr.remap_value_index(from, to);
                    }
                }
                for list in [&mut v.input_params, &mut v.output_params] {
                    for entry in list.iter_mut() {
                        if *entry == old {
                            *entry = param;
                        }
                    }
                }
            }
            let children: Vec<GraphId> = self
                .graph(graph)
                .subgraphs()
                .iter()
                .filter_map(|v| self.graph(graph).vertex(*v).subgraph)
                .collect();
            for child in children {
                for p in &mut self.graph_mut(child).params {
                    if let ParamKind::Inherited { parent } = &mut p.kind
                        && *parent == old
                    {
                        *parent = param;
                    }
                }
            }
        }
        Ok(())
    }

    /// Transfer a disconnected vertex to another graph. Ownership and index
    /// move atomically; the returned id is the vertex's identity in `to`.
    pub fn move_vertex_to(
        &mut self,
        from: GraphId,
        vertex: VertexId,
        to: GraphId,
    ) -> Result<VertexId, GraphError> {
        self.check_graph(from)?;
        self.check_graph(to)?;
        let v = self.graph(from).vertex(vertex);
        if v.input_edges().next().is_some() || v.output_edges().next().is_some() {
            return Err(GraphError::VertexConnected {
                vertex: v.name.clone(),
            });
        }
        let moved = v.clone();
        let kind = moved.kind;
        let subgraph = moved.subgraph;
        self.graph_mut(from).remove_vertex(vertex)?;
        self.fix_parent_link_after_swap(from, vertex);
        let new_id = self
            .graph_mut(to)
            .add_vertex(moved.name.clone(), kind, 0, 0);
        *self.graph_mut(to).vertex_mut(new_id) = moved;
        if let Some(child) = subgraph {
            self.graph_mut(child).parent = Some((to, new_id));
        }
        Ok(new_id)
    }

    /// Transfer an edge to another graph, reattaching it between `source` and
    /// `sink` (ids in the target graph, same ports). Rates must be constant:
    /// dynamic rate expressions are bound to the source graph's parameter
    /// slots and cannot be re-scoped.
    pub fn move_edge_to(
        &mut self,
        from: GraphId,
        edge: EdgeId,
        to: GraphId,
        source: VertexId,
        sink: VertexId,
    ) -> Result<EdgeId, GraphError> {
        self.check_graph(from)?;
        self.check_graph(to)?;
        let e = self.graph(from).edge(edge).clone();
        if e.src_rate.is_dynamic() || e.snk_rate.is_dynamic() {
            return Err(GraphError::NonConstantMove {
                graph: self.graph(from).name.clone(),
            });
        }
        self.graph_mut(from).remove_edge(edge)?;
        self.graph_mut(to).add_edge(
            source,
            e.source_port,
            e.src_rate,
            sink,
            e.sink_port,
            e.snk_rate,
        )
    }

    // --- validation ----------------------------------------------------------

    /// Whole-model structural check run before a runtime context is created:
    /// every port of every vertex connected, every dynamic parameter written
    /// by exactly one configuration actor.
    pub fn validate(&self) -> Result<(), GraphError> {
        for g in &self.graphs {
            for v in &g.vertices {
                for (port, slot) in v.inputs.iter().enumerate() {
                    if slot.is_none() {
                        return Err(GraphError::PortUnconnected {
                            vertex: v.name.clone(),
                            port: port as u32,
                        });
                    }
                }
                for (port, slot) in v.outputs.iter().enumerate() {
                    if slot.is_none() {
                        return Err(GraphError::PortUnconnected {
                            vertex: v.name.clone(),
                            port: port as u32,
                        });
                    }
                }
            }
            for (ix, p) in g.params.iter().enumerate() {
                if matches!(p.kind, ParamKind::Dynamic) {
                    let writers = g
                        .config_actors()
                        .iter()
                        .filter(|c| g.vertex(**c).output_params.contains(&ParamId(ix as u32)))
                        .count();
                    if writers != 1 {
                        return Err(GraphError::ParamReferenced {
                            name: p.name.clone(),
                        });
                    }
                }
            }
        }
        debug!(target: "graph", graphs = self.graphs.len(), "model_validated");
        Ok(())
    }

    // --- internals -----------------------------------------------------------

    fn check_graph(&self, graph: GraphId) -> Result<(), GraphError> {
        if graph.index() >= self.graphs.len() {
            return Err(GraphError::UnknownGraph);
        }
        Ok(())
    }

    fn param_is_referenced(&self, graph: GraphId, param: ParamId) -> bool {
        let g = self.graph(graph);
        let ix = param.index();
        let in_edges = g.edges.iter().any(|e| {
            e.src_rate.reads_value_index(ix)
                || e.snk_rate.reads_value_index(ix)
                || e.delay
                    .as_ref()
                    .is_some_and(|d| d.value.reads_value_index(ix))
        });
        let in_params = g.params.iter().any(|p| match &p.kind {
            ParamKind::DynamicDependent { expr } => expr.reads_value_index(ix),
            _ => false,
        });
        let in_vertices = g.vertices.iter().any(|v| {
            v.input_params.contains(&param)
                || v.output_params.contains(&param)
                || v.rt.as_ref().is_some_and(|rt| {
                    rt.timings.iter().any(|(_, expr)| expr.reads_value_index(ix))
                })
        });
        let in_children = g.subgraphs().iter().any(|v| {
            g.vertex(*v).subgraph.is_some_and(|child| {
                self.graph(child)
                    .params
                    .iter()
                    .any(|p| matches!(p.kind, ParamKind::Inherited { parent } if parent == param))
            })
        });
        in_edges || in_params || in_vertices || in_children
    }

    /// After `Graph::remove_vertex` swapped the last vertex into a hole, a
    /// hierarchical vertex may have changed id; its child's up-link follows.
    fn fix_parent_link_after_swap(&mut self, graph: GraphId, hole: VertexId) {
        if hole.index() < self.graph(graph).vertex_count()
            && let Some(child) = self.graph(graph).vertex(hole).subgraph
        {
            self.graph_mut(child).parent = Some((graph, hole));
        }
    }

    /// Drop a graph and all of its descendants from the arena, keeping every
    /// remaining id coherent (swap-remove with `GraphId` rewrites).
    fn remove_graph_subtree(&mut self, root: GraphId) {
        let mut doomed = vec![root];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let g = doomed[cursor];
            for v in self.graph(g).subgraphs().to_vec() {
                if let Some(child) = self.graph(g).vertex(v).subgraph {
                    doomed.push(child);
                }
            }
            cursor += 1;
        }
        // Remove highest indices first so pending entries stay valid.
        doomed.sort_by(|a, b| b.cmp(a));
        for id in doomed {
            self.graphs.swap_remove(id.index());
            if id.index() < self.graphs.len() {
                let old = GraphId(self.graphs.len() as u32);
                for g in &mut self.graphs {
                    if g.parent.is_some_and(|(p, _)| p == old)
                        && let Some((_, v)) = g.parent
                    {
                        g.parent = Some((id, v));
                    }
                    for vertex in &mut g.vertices {
                        if vertex.subgraph == Some(old) {
                            vertex.subgraph = Some(id);
                        }
                    }
                }
                if self.root == old {
                    self.root = id;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_expr::RpnToken;

    fn rate(n: i64) -> Vec<RpnToken> {
        vec![RpnToken::literal(n)]
    }

    fn two_actor_chain() -> (Model, VertexId, VertexId, EdgeId) {
        let mut model = Model::new("app");
        let root = model.root();
        let a = model
            .add_vertex(root, "A", VertexKind::Normal, 0, 1)
            .unwrap();
        let b = model
            .add_vertex(root, "B", VertexKind::Normal, 1, 0)
            .unwrap();
        let e = model
            .add_edge(root, a, 0, &rate(2), b, 0, &rate(1))
            .unwrap();
        (model, a, b, e)
    }

    #[test]
    fn edge_connects_dense_ports_once() {
        let (mut model, a, b, _) = two_actor_chain();
        let root = model.root();
        let err = model.add_edge(root, a, 0, &rate(1), b, 0, &rate(1));
        assert!(matches!(err, Err(GraphError::PortOccupied { port: 0, .. })));
        let err = model.add_edge(root, a, 1, &rate(1), b, 0, &rate(1));
        assert!(matches!(err, Err(GraphError::PortOutOfRange { port: 1, .. })));
    }

    #[test]
    fn duplicate_param_names_rejected() {
        let mut model = Model::new("app");
        let root = model.root();
        model
            .add_param(root, "n", ParamSpec::Static(&rate(4)))
            .unwrap();
        let err = model.add_param(root, "n", ParamSpec::Dynamic);
        assert!(matches!(err, Err(GraphError::DuplicateParamName { .. })));
    }

    #[test]
    fn static_param_folds_into_rates() {
        let mut model = Model::new("app");
        let root = model.root();
        model
            .add_param(root, "n", ParamSpec::Static(&rate(4)))
            .unwrap();
        let a = model
            .add_vertex(root, "A", VertexKind::Normal, 0, 1)
            .unwrap();
        let b = model
            .add_vertex(root, "B", VertexKind::Normal, 1, 0)
            .unwrap();
        let e = model
            .add_edge(root, a, 0, &[RpnToken::param("n")], b, 0, &rate(1))
            .unwrap();
        assert_eq!(model.graph(root).edge(e).src_rate.value(), Some(4.0));
    }

    #[test]
    fn persistent_delay_rejects_endpoints() {
        let (mut model, a, _, e) = two_actor_chain();
        let root = model.root();
        let err = model.add_delay(root, e, &rate(2), true, Some((a, 0)), None);
        assert!(matches!(
            err,
            Err(GraphError::PersistentDelayEndpoints { .. })
        ));
    }

    #[test]
    fn plain_delay_gets_init_end_bracket() {
        let (mut model, _, _, e) = two_actor_chain();
        let root = model.root();
        model.add_delay(root, e, &rate(2), false, None, None).unwrap();
        let g = model.graph(root);
        let delay = g.edge(e).delay.as_ref().unwrap();
        let pivot = delay.vertex.unwrap();
        assert_eq!(g.vertex(pivot).kind, VertexKind::Delay);
        let (setter, _) = delay.setter.unwrap();
        let (getter, _) = delay.getter.unwrap();
        assert_eq!(g.vertex(setter).kind, VertexKind::Init);
        assert_eq!(g.vertex(getter).kind, VertexKind::End);
        // init -> pivot -> end edges exist and carry the delay value as rate.
        let setter_edge = g.vertex(setter).output_edge(0).unwrap();
        assert_eq!(g.edge(setter_edge).snk_rate.value(), Some(2.0));
    }

    #[test]
    fn persistent_delay_has_no_vertices() {
        let (mut model, _, _, e) = two_actor_chain();
        let root = model.root();
        let before = model.graph(root).vertex_count();
        model.add_delay(root, e, &rate(2), true, None, None).unwrap();
        assert_eq!(model.graph(root).vertex_count(), before);
        assert!(model.graph(root).edge(e).delay.as_ref().unwrap().persistent);
    }

    #[test]
    fn out_of_order_vertex_erase_fixes_references() {
        let mut model = Model::new("app");
        let root = model.root();
        let a = model
            .add_vertex(root, "A", VertexKind::Normal, 0, 1)
            .unwrap();
        let junk = model
            .add_vertex(root, "junk", VertexKind::Normal, 0, 0)
            .unwrap();
        let b = model
            .add_vertex(root, "B", VertexKind::Normal, 1, 0)
            .unwrap();
        model
            .add_edge(root, a, 0, &rate(1), b, 0, &rate(1))
            .unwrap();
        model.remove_vertex(root, junk).unwrap();
        // B moved into junk's slot; the edge must still resolve by name.
        let g = model.graph(root);
        let e = g.edge(EdgeId(0));
        assert_eq!(g.vertex(e.sink).name, "B");
        assert_eq!(e.sink, junk);
        assert_eq!(g.vertex(e.sink).input_edge(0), Some(EdgeId(0)));
    }

    #[test]
    fn subgraph_interfaces_match_vertex_ports() {
        let mut model = Model::new("app");
        let root = model.root();
        let (child, vertex) = model.add_subgraph(root, "sub", 2, 1).unwrap();
        assert_eq!(model.graph(root).vertex(vertex).input_count(), 2);
        assert_eq!(model.graph(root).vertex(vertex).output_count(), 1);
        assert_eq!(model.graph(child).input_interfaces().len(), 2);
        assert_eq!(model.graph(child).output_interfaces().len(), 1);
        assert_eq!(model.graph(child).parent, Some((root, vertex)));
    }

    #[test]
    fn dynamic_param_requires_exactly_one_writer() {
        let mut model = Model::new("app");
        let root = model.root();
        let p = model.add_param(root, "p", ParamSpec::Dynamic).unwrap();
        let cfg = model
            .add_vertex(root, "cfg", VertexKind::Config, 0, 0)
            .unwrap();
        assert!(model.validate().is_err());
        model.bind_output_param(root, cfg, p).unwrap();
        model.validate().unwrap();
        let cfg2 = model
            .add_vertex(root, "cfg2", VertexKind::Config, 0, 0)
            .unwrap();
        let err = model.bind_output_param(root, cfg2, p);
        assert!(matches!(err, Err(GraphError::ParamAlreadyBound { .. })));
    }

    #[test]
    fn remove_param_refuses_referenced_then_remaps() {
        let mut model = Model::new("app");
        let root = model.root();
        let unused = model.add_param(root, "unused", ParamSpec::Dynamic).unwrap();
        let p = model.add_param(root, "p", ParamSpec::Dynamic).unwrap();
        let a = model
            .add_vertex(root, "A", VertexKind::Normal, 0, 1)
            .unwrap();
        let b = model
            .add_vertex(root, "B", VertexKind::Normal, 1, 0)
            .unwrap();
        let e = model
            .add_edge(root, a, 0, &[RpnToken::param("p")], b, 0, &rate(1))
            .unwrap();
        let err = model.remove_param(root, p);
        assert!(matches!(err, Err(GraphError::ParamReferenced { .. })));
        model.remove_param(root, unused).unwrap();
        // "p" slid from slot 1 to slot 0; the rate expression must follow.
        let g = model.graph(root);
        assert_eq!(g.param(ParamId(0)).name, "p");
        assert!(g.edge(e).src_rate.reads_value_index(0));
        assert!(!g.edge(e).src_rate.reads_value_index(1));
    }

    #[test]
    fn move_vertex_transfers_ownership() {
        let mut model = Model::new("app");
        let root = model.root();
        let (child, _) = model.add_subgraph(root, "sub", 0, 0).unwrap();
        let v = model
            .add_vertex(root, "lonely", VertexKind::Normal, 0, 0)
            .unwrap();
        let moved = model.move_vertex_to(root, v, child).unwrap();
        assert_eq!(model.graph(child).vertex(moved).name, "lonely");
        // Root no longer owns a vertex named "lonely".
        assert!(
            model
                .graph(root)
                .vertex_ids()
                .all(|id| model.graph(root).vertex(id).name != "lonely")
        );
    }

    #[test]
    fn removing_hierarchical_vertex_drops_subtree() {
        let mut model = Model::new("app");
        let root = model.root();
        let (child, vertex) = model.add_subgraph(root, "sub", 0, 0).unwrap();
        model.add_subgraph(child, "grandchild", 0, 0).unwrap();
        assert_eq!(model.graph_count(), 3);
        model.remove_vertex(root, vertex).unwrap();
        assert_eq!(model.graph_count(), 1);
    }
}
