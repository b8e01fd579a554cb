//! Per-graph storage and intra-graph mutation.
//!
//! A graph owns its vertices, edges and parameters in dense vectors; identity
//! is the index, removal is out-of-order erase with reference fixup. The
//! public mutation surface lives on [`crate::Model`], which adds the
//! cross-graph checks (hierarchy, inherited parameters); the methods here
//! enforce the purely local invariants:
//!
//! * a port carries at most one edge, port indices are dense `0..n`;
//! * parameter names are unique within the graph;
//! * a persistent delay has no setter and no getter;
//! * setter/getter vertices live in the same graph as the delayed edge.

use crate::edge::{Delay, Edge};
use crate::param::{Param, ParamKind};
use crate::vertex::{RtInfo, Vertex, VertexKind};
use crate::{EdgeId, GraphError, GraphId, ParamId, VertexId};
use core_expr::{Binding, Expression, RpnToken};

#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    /// Containing graph and the `Graph`-kind vertex that represents this
    /// graph inside it. `None` for the root.
    pub parent: Option<(GraphId, VertexId)>,
    pub(crate) vertices: Vec<Vertex>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) params: Vec<Param>,
    /// `Input`-kind boundary vertices, in port order.
    pub(crate) input_interfaces: Vec<VertexId>,
    /// `Output`-kind boundary vertices, in port order.
    pub(crate) output_interfaces: Vec<VertexId>,
    /// `Config`-kind vertices, registration order.
    pub(crate) config_actors: Vec<VertexId>,
    /// `Graph`-kind vertices, registration order.
    pub(crate) subgraphs: Vec<VertexId>,
}

impl Graph {
    pub(crate) fn new(name: String, parent: Option<(GraphId, VertexId)>) -> Self {
        Self {
            name,
            parent,
            vertices: Vec::new(),
            edges: Vec::new(),
            params: Vec::new(),
            input_interfaces: Vec::new(),
            output_interfaces: Vec::new(),
            config_actors: Vec::new(),
            subgraphs: Vec::new(),
        }
    }

    // --- queries -------------------------------------------------------------

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.index()]
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.vertices[id.index()]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.index()]
    }

    pub fn param(&self, id: ParamId) -> &Param {
        &self.params[id.index()]
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> {
        (0..self.vertices.len() as u32).map(VertexId)
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> {
        (0..self.edges.len() as u32).map(EdgeId)
    }

    pub fn param_ids(&self) -> impl Iterator<Item = ParamId> {
        (0..self.params.len() as u32).map(ParamId)
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn input_interfaces(&self) -> &[VertexId] {
        &self.input_interfaces
    }

    pub fn output_interfaces(&self) -> &[VertexId] {
        &self.output_interfaces
    }

    pub fn config_actors(&self) -> &[VertexId] {
        &self.config_actors
    }

    pub fn subgraphs(&self) -> &[VertexId] {
        &self.subgraphs
    }

    /// Position of a `Graph`-kind vertex in the subgraph registration order.
    pub fn subgraph_slot(&self, vertex: VertexId) -> Option<usize> {
        self.subgraphs.iter().position(|v| *v == vertex)
    }

    /// A graph is dynamic iff it declares a `Dynamic` parameter
    /// (equivalently, iff it hosts at least one configuration actor).
    pub fn is_dynamic(&self) -> bool {
        self.params
            .iter()
            .any(|p| matches!(p.kind, ParamKind::Dynamic))
    }

    /// The single edge inside this graph attached to an interface vertex.
    pub fn interface_inner_edge(&self, interface: VertexId) -> Option<EdgeId> {
        let vertex = self.vertex(interface);
        match vertex.kind {
            VertexKind::Input => vertex.output_edge(0),
            VertexKind::Output => vertex.input_edge(0),
            _ => None,
        }
    }

    /// Compile scope of this graph: static parameters fold to constants,
    /// every other kind binds to its slot in the handler value table.
    pub fn scope(&self) -> Vec<Binding<'_>> {
        self.params
            .iter()
            .enumerate()
            .map(|(ix, p)| match p.kind {
                ParamKind::Static { value } => Binding::Constant(&p.name, value as f64),
                _ => Binding::Dynamic(&p.name, ix),
            })
            .collect()
    }

    pub(crate) fn compile(&self, tokens: &[RpnToken]) -> Result<Expression, GraphError> {
        Expression::compile(tokens, &self.scope()).map_err(|source| GraphError::Expression {
            graph: self.name.clone(),
            source,
        })
    }

    // --- mutation ------------------------------------------------------------

    pub(crate) fn add_vertex(
        &mut self,
        name: impl Into<String>,
        kind: VertexKind,
        in_ports: usize,
        out_ports: usize,
    ) -> VertexId {
        let id = VertexId(self.vertices.len() as u32);
        self.vertices
            .push(Vertex::new(name.into(), kind, in_ports, out_ports));
        match kind {
            VertexKind::Config => self.config_actors.push(id),
            VertexKind::Graph => self.subgraphs.push(id),
            VertexKind::Input => self.input_interfaces.push(id),
            VertexKind::Output => self.output_interfaces.push(id),
            _ => {}
        }
        id
    }

    pub(crate) fn add_edge(
        &mut self,
        source: VertexId,
        source_port: u32,
        src_rate: Expression,
        sink: VertexId,
        sink_port: u32,
        snk_rate: Expression,
    ) -> Result<EdgeId, GraphError> {
        self.check_port(source, source_port, false)?;
        self.check_port(sink, sink_port, true)?;
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            source,
            source_port,
            src_rate,
            sink,
            sink_port,
            snk_rate,
            delay: None,
        });
        self.vertices[source.index()].outputs[source_port as usize] = Some(id);
        self.vertices[sink.index()].inputs[sink_port as usize] = Some(id);
        Ok(id)
    }

    fn check_port(&self, vertex: VertexId, port: u32, input: bool) -> Result<(), GraphError> {
        let v = self
            .vertices
            .get(vertex.index())
            .ok_or_else(|| GraphError::UnknownVertex {
                graph: self.name.clone(),
            })?;
        let slots = if input { &v.inputs } else { &v.outputs };
        match slots.get(port as usize) {
            None => Err(GraphError::PortOutOfRange {
                vertex: v.name.clone(),
                port,
            }),
            Some(Some(_)) => Err(GraphError::PortOccupied {
                vertex: v.name.clone(),
                port,
            }),
            Some(None) => Ok(()),
        }
    }

    pub(crate) fn add_param(&mut self, name: String, kind: ParamKind) -> Result<ParamId, GraphError> {
        if self.params.iter().any(|p| p.name == name) {
            return Err(GraphError::DuplicateParamName {
                graph: self.name.clone(),
                name,
            });
        }
        let id = ParamId(self.params.len() as u32);
        self.params.push(Param { name, kind });
        Ok(id)
    }

    pub(crate) fn add_delay(
        &mut self,
        edge: EdgeId,
        value: Expression,
        persistent: bool,
        setter: Option<(VertexId, u32)>,
        getter: Option<(VertexId, u32)>,
    ) -> Result<(), GraphError> {
        let edge_ref = self
            .edges
            .get(edge.index())
            .ok_or_else(|| GraphError::UnknownEdge {
                graph: self.name.clone(),
            })?;
        if edge_ref.delay.is_some() {
            return Err(GraphError::EdgeAlreadyDelayed {
                graph: self.name.clone(),
            });
        }
        if persistent && (setter.is_some() || getter.is_some()) {
            return Err(GraphError::PersistentDelayEndpoints {
                graph: self.name.clone(),
            });
        }
        if persistent {
            self.edges[edge.index()].delay = Some(Delay {
                value,
                persistent,
                setter: None,
                getter: None,
                vertex: None,
                address: None,
            });
            return Ok(());
        }
        // Non-persistent delays are materialized: setter -> pivot -> getter,
        // with implicit Init/End standing in for missing endpoints.
        let (src_name, snk_name) = {
            let e = &self.edges[edge.index()];
            (
                self.vertices[e.source.index()].name.clone(),
                self.vertices[e.sink.index()].name.clone(),
            )
        };
        let base = format!("{src_name}_{snk_name}");
        let setter = match setter {
            Some(endpoint) => {
                self.check_port(endpoint.0, endpoint.1, false)?;
                endpoint
            }
            None => {
                let init = self.add_vertex(format!("init_{base}"), VertexKind::Init, 0, 1);
                (init, 0)
            }
        };
        let getter = match getter {
            Some(endpoint) => {
                self.check_port(endpoint.0, endpoint.1, true)?;
                endpoint
            }
            None => {
                let end = self.add_vertex(format!("end_{base}"), VertexKind::End, 1, 0);
                (end, 0)
            }
        };
        let pivot = self.add_vertex(format!("delay_{base}"), VertexKind::Delay, 1, 1);
        self.vertices[pivot.index()].delay_edge = Some(edge);
        self.add_edge(setter.0, setter.1, value.clone(), pivot, 0, value.clone())?;
        self.add_edge(pivot, 0, value.clone(), getter.0, getter.1, value.clone())?;
        self.edges[edge.index()].delay = Some(Delay {
            value,
            persistent,
            setter: Some(setter),
            getter: Some(getter),
            vertex: Some(pivot),
            address: None,
        });
        Ok(())
    }

    pub(crate) fn set_rt_info(&mut self, vertex: VertexId, rt: RtInfo) -> Result<(), GraphError> {
        let v = self
            .vertices
            .get_mut(vertex.index())
            .ok_or_else(|| GraphError::UnknownVertex {
                graph: self.name.clone(),
            })?;
        v.rt = Some(rt);
        Ok(())
    }

    /// Out-of-order erase of an edge; the edge moved into the hole gets its
    /// port back-references updated. Fails while a materialized delay still
    /// hangs off the edge.
    pub(crate) fn remove_edge(&mut self, edge: EdgeId) -> Result<(), GraphError> {
        let e = self
            .edges
            .get(edge.index())
            .ok_or_else(|| GraphError::UnknownEdge {
                graph: self.name.clone(),
            })?;
        if e.delay.as_ref().is_some_and(|d| d.vertex.is_some()) {
            return Err(GraphError::EdgeAlreadyDelayed {
                graph: self.name.clone(),
            });
        }
        let (src, src_port, snk, snk_port) = (e.source, e.source_port, e.sink, e.sink_port);
        self.vertices[src.index()].outputs[src_port as usize] = None;
        self.vertices[snk.index()].inputs[snk_port as usize] = None;
        self.edges.swap_remove(edge.index());
        // Fix the back-references of the edge that slid into the freed index.
        if edge.index() < self.edges.len() {
            let moved = &self.edges[edge.index()];
            let (ms, msp, mk, mkp) = (moved.source, moved.source_port, moved.sink, moved.sink_port);
            self.vertices[ms.index()].outputs[msp as usize] = Some(edge);
            self.vertices[mk.index()].inputs[mkp as usize] = Some(edge);
            let old = EdgeId(self.edges.len() as u32);
            for v in &mut self.vertices {
                if v.delay_edge == Some(old) {
                    v.delay_edge = Some(edge);
                }
            }
        }
        Ok(())
    }

    /// Out-of-order erase of a vertex. The vertex must be fully disconnected;
    /// the vertex moved into the hole has every reference to it rewritten.
    pub(crate) fn remove_vertex(&mut self, vertex: VertexId) -> Result<(), GraphError> {
        let v = self
            .vertices
            .get(vertex.index())
            .ok_or_else(|| GraphError::UnknownVertex {
                graph: self.name.clone(),
            })?;
        if v.input_edges().next().is_some() || v.output_edges().next().is_some() {
            return Err(GraphError::VertexConnected {
                vertex: v.name.clone(),
            });
        }
        let kind = v.kind;
        self.unregister(vertex, kind);
        self.vertices.swap_remove(vertex.index());
        if vertex.index() < self.vertices.len() {
            let old = VertexId(self.vertices.len() as u32);
            for e in &mut self.edges {
                if e.source == old {
                    e.source = vertex;
                }
                if e.sink == old {
                    e.sink = vertex;
                }
                if let Some(delay) = &mut e.delay {
                    if let Some(s) = &mut delay.setter
                        && s.0 == old
                    {
                        s.0 = vertex;
                    }
                    if let Some(g) = &mut delay.getter
                        && g.0 == old
                    {
                        g.0 = vertex;
                    }
                    if delay.vertex == Some(old) {
                        delay.vertex = Some(vertex);
                    }
                }
            }
            for list in [
                &mut self.config_actors,
                &mut self.subgraphs,
                &mut self.input_interfaces,
                &mut self.output_interfaces,
            ] {
                for entry in list.iter_mut() {
                    if *entry == old {
                        *entry = vertex;
                    }
                }
            }
        }
        Ok(())
    }

    fn unregister(&mut self, vertex: VertexId, kind: VertexKind) {
        let list = match kind {
            VertexKind::Config => &mut self.config_actors,
            VertexKind::Graph => &mut self.subgraphs,
            VertexKind::Input => &mut self.input_interfaces,
            VertexKind::Output => &mut self.output_interfaces,
            _ => return,
        };
        list.retain(|v| *v != vertex);
    }
}
