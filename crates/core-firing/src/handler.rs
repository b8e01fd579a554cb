//! Firing handlers: per-(sub)graph-firing resolution state.
//!
//! A handler holds the concrete parameter values visible inside one firing of
//! a graph, the repetition vector computed from them, the task-index table
//! filled by the scheduler, per-edge buffer address/offset tables filled by
//! the allocator, and one child handler per firing of each subgraph. A
//! handler is *resolved* once every dynamic parameter has received its value;
//! until then it blocks scheduling of everything below it.
//!
//! Handlers live in a flat arena ([`FiringTree`]) and refer to each other by
//! id, mirroring the arena style of the graph model.

use crate::{FiringError, brv};
use core_graph::{EdgeId, GraphId, Model, ParamId, ParamKind, VertexId};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u32);

impl HandlerId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Sentinel for an unset task index.
pub const NO_TASK: u32 = u32::MAX;

/// Sentinel for an unset buffer address.
pub const NO_ADDRESS: u64 = u64::MAX;

#[derive(Debug, Clone, Copy)]
pub struct EdgeSlot {
    pub address: u64,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EdgeRates {
    pub src: i64,
    pub snk: i64,
    pub delay: i64,
}

#[derive(Debug)]
pub struct Handler {
    pub graph: GraphId,
    /// Firing index of this graph instance within its parent context.
    pub firing: u32,
    pub parent: Option<HandlerId>,
    /// The `Graph`-kind vertex in the parent graph that this handler fires.
    pub parent_vertex: Option<VertexId>,
    values: Vec<i64>,
    value_set: Vec<bool>,
    pending_dynamic: usize,
    resolved: bool,
    rv: Vec<u32>,
    rates: Vec<EdgeRates>,
    task_ix: Vec<Vec<u32>>,
    /// Task slots for configuration actors, usable before resolution (config
    /// firings are what produce the missing parameter values). Indexed by
    /// config registration order.
    config_task_ix: Vec<u32>,
    /// Per subgraph slot (graph registration order), one child per firing.
    children: Vec<Vec<HandlerId>>,
    /// Per edge, one slot per source firing.
    edge_slots: Vec<Vec<EdgeSlot>>,
}

impl Handler {
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn pending_dynamic(&self) -> usize {
        self.pending_dynamic
    }
}

/// Arena of handlers for one iteration, rooted at the root graph's single
/// firing.
#[derive(Debug)]
pub struct FiringTree {
    handlers: Vec<Handler>,
    root: HandlerId,
}

impl FiringTree {
    /// Build the tree for a fresh iteration. Handlers of static (sub)graphs
    /// resolve immediately and cascade into their children; handlers with
    /// dynamic parameters stay pending until `set_param_value` completes
    /// them.
    pub fn new(model: &Model) -> Result<Self, FiringError> {
        let mut tree = Self {
            handlers: Vec::new(),
            root: HandlerId(0),
        };
        tree.create_handler(model, model.root(), 0, None, None)?;
        Ok(tree)
    }

    pub fn root(&self) -> HandlerId {
        self.root
    }

    pub fn handler(&self, id: HandlerId) -> &Handler {
        &self.handlers[id.index()]
    }

    pub fn handler_ids(&self) -> impl Iterator<Item = HandlerId> {
        (0..self.handlers.len() as u32).map(HandlerId)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// True when every handler in the tree is resolved.
    pub fn all_resolved(&self) -> bool {
        self.handlers.iter().all(|h| h.resolved)
    }

    fn create_handler(
        &mut self,
        model: &Model,
        graph: GraphId,
        firing: u32,
        parent: Option<HandlerId>,
        parent_vertex: Option<VertexId>,
    ) -> Result<HandlerId, FiringError> {
        let g = model.graph(graph);
        let id = HandlerId(self.handlers.len() as u32);
        let mut values = vec![0i64; g.param_count()];
        let mut value_set = vec![false; g.param_count()];
        let mut pending = 0usize;
        for (ix, param) in g.params().iter().enumerate() {
            match &param.kind {
                ParamKind::Static { value } => {
                    values[ix] = *value;
                    value_set[ix] = true;
                }
                ParamKind::Inherited { parent: parent_param } => {
                    // Parents resolve before children are created.
                    let parent_handler = &self.handlers[parent.expect("root inherits").index()];
                    values[ix] = parent_handler.values[parent_param.index()];
                    value_set[ix] = true;
                }
                ParamKind::Dynamic => pending += 1,
                ParamKind::DynamicDependent { .. } => {}
            }
        }
        let config_count = g.config_actors().len();
        self.handlers.push(Handler {
            graph,
            firing,
            parent,
            parent_vertex,
            values,
            value_set,
            pending_dynamic: pending,
            resolved: false,
            rv: Vec::new(),
            rates: Vec::new(),
            task_ix: Vec::new(),
            config_task_ix: vec![NO_TASK; config_count],
            children: Vec::new(),
            edge_slots: Vec::new(),
        });
        if pending == 0 {
            self.finalize(model, id)?;
        } else {
            trace!(
                target: "firing",
                graph = model.graph(graph).name.as_str(),
                firing,
                pending,
                "handler_awaiting_parameters"
            );
        }
        Ok(id)
    }

    /// Write a runtime parameter value. Fails when the slot was already
    /// resolved. Completing the last pending slot finalizes the handler
    /// (dependent parameters, rates, repetition vector, children).
    pub fn set_param_value(
        &mut self,
        model: &Model,
        id: HandlerId,
        param: ParamId,
        value: i64,
    ) -> Result<(), FiringError> {
        let name = model.graph(self.handlers[id.index()].graph).param(param).name.clone();
        let handler = &mut self.handlers[id.index()];
        if handler.value_set[param.index()] {
            return Err(FiringError::AlreadyResolved { name });
        }
        handler.values[param.index()] = value;
        handler.value_set[param.index()] = true;
        handler.pending_dynamic -= 1;
        debug!(target: "firing", param = name.as_str(), value, "parameter_resolved");
        if handler.pending_dynamic == 0 {
            self.finalize(model, id)?;
        }
        Ok(())
    }

    /// Compute everything that required the full parameter table.
    fn finalize(&mut self, model: &Model, id: HandlerId) -> Result<(), FiringError> {
        let graph = self.handlers[id.index()].graph;
        let g = model.graph(graph);
        // Dependent parameters, in declaration order.
        for ix in 0..g.param_count() {
            if let ParamKind::DynamicDependent { expr } = &g.params()[ix].kind {
                let value = expr.evaluate_i64(&self.handlers[id.index()].values)?;
                let handler = &mut self.handlers[id.index()];
                handler.values[ix] = value;
                handler.value_set[ix] = true;
            }
        }
        let values = self.handlers[id.index()].values.clone();
        let rates: Vec<EdgeRates> = g
            .edge_ids()
            .map(|e| {
                let edge = g.edge(e);
                Ok(EdgeRates {
                    src: edge.src_rate.evaluate_i64(&values)?,
                    snk: edge.snk_rate.evaluate_i64(&values)?,
                    delay: match &edge.delay {
                        Some(d) => d.value.evaluate_i64(&values)?,
                        None => 0,
                    },
                })
            })
            .collect::<Result<_, FiringError>>()?;
        let rv = brv::compute(g, &values)?;
        {
            let handler = &mut self.handlers[id.index()];
            handler.task_ix = rv.iter().map(|r| vec![NO_TASK; *r as usize]).collect();
            // Config firings scheduled before resolution keep their slots.
            for (slot, vertex) in g.config_actors().iter().enumerate() {
                let registered = handler.config_task_ix[slot];
                if registered != NO_TASK && !handler.task_ix[vertex.index()].is_empty() {
                    handler.task_ix[vertex.index()][0] = registered;
                }
            }
            handler.edge_slots = g
                .edge_ids()
                .map(|e| {
                    let source = g.edge(e).source;
                    vec![
                        EdgeSlot {
                            address: NO_ADDRESS,
                            offset: 0,
                        };
                        rv[source.index()] as usize
                    ]
                })
                .collect();
            handler.rates = rates;
            handler.rv = rv;
            handler.resolved = true;
        }
        // One child handler per firing of each subgraph.
        let subgraph_slots: Vec<(VertexId, GraphId, u32)> = g
            .subgraphs()
            .iter()
            .filter_map(|v| {
                g.vertex(*v)
                    .subgraph
                    .map(|child| (*v, child, self.handlers[id.index()].rv[v.index()]))
            })
            .collect();
        let mut children = Vec::with_capacity(subgraph_slots.len());
        for (vertex, child_graph, count) in subgraph_slots {
            let mut firings = Vec::with_capacity(count as usize);
            for k in 0..count {
                firings.push(self.create_handler(model, child_graph, k, Some(id), Some(vertex))?);
            }
            children.push(firings);
        }
        self.handlers[id.index()].children = children;
        debug!(
            target: "firing",
            graph = model.graph(graph).name.as_str(),
            firing = self.handlers[id.index()].firing,
            "handler_resolved"
        );
        Ok(())
    }

    // --- resolved-state queries ---------------------------------------------

    fn resolved(&self, id: HandlerId) -> &Handler {
        debug_assert!(self.handlers[id.index()].resolved);
        &self.handlers[id.index()]
    }

    pub fn rv(&self, id: HandlerId, vertex: VertexId) -> u32 {
        self.resolved(id).rv[vertex.index()]
    }

    pub fn src_rate(&self, id: HandlerId, edge: EdgeId) -> i64 {
        self.resolved(id).rates[edge.index()].src
    }

    pub fn snk_rate(&self, id: HandlerId, edge: EdgeId) -> i64 {
        self.resolved(id).rates[edge.index()].snk
    }

    pub fn delay_value(&self, id: HandlerId, edge: EdgeId) -> i64 {
        self.resolved(id).rates[edge.index()].delay
    }

    pub fn param_values(&self, id: HandlerId) -> &[i64] {
        &self.handlers[id.index()].values
    }

    /// Child handler for firing `k` of the hierarchical vertex.
    pub fn child(
        &self,
        model: &Model,
        id: HandlerId,
        vertex: VertexId,
        firing: u32,
    ) -> Option<HandlerId> {
        let handler = &self.handlers[id.index()];
        let slot = model.graph(handler.graph).subgraph_slot(vertex)?;
        handler
            .children
            .get(slot)
            .and_then(|firings| firings.get(firing as usize))
            .copied()
    }

    pub fn children_of(&self, id: HandlerId) -> impl Iterator<Item = HandlerId> + '_ {
        self.handlers[id.index()]
            .children
            .iter()
            .flatten()
            .copied()
    }

    // --- task index table ----------------------------------------------------

    pub fn task_ix(&self, id: HandlerId, vertex: VertexId, firing: u32) -> u32 {
        self.resolved(id).task_ix[vertex.index()][firing as usize]
    }

    pub fn register_task(&mut self, id: HandlerId, vertex: VertexId, firing: u32, task: u32) {
        self.handlers[id.index()].task_ix[vertex.index()][firing as usize] = task;
    }

    /// Task slot of a configuration actor, valid even before resolution.
    pub fn config_task_ix(&self, id: HandlerId, config_slot: usize) -> u32 {
        self.handlers[id.index()].config_task_ix[config_slot]
    }

    pub fn register_config_task(&mut self, id: HandlerId, config_slot: usize, task: u32) {
        self.handlers[id.index()].config_task_ix[config_slot] = task;
    }

    // --- edge allocation table ----------------------------------------------

    pub fn edge_slot(&self, id: HandlerId, edge: EdgeId, firing: u32) -> EdgeSlot {
        self.resolved(id).edge_slots[edge.index()][firing as usize]
    }

    pub fn set_edge_address(&mut self, id: HandlerId, edge: EdgeId, firing: u32, address: u64) {
        self.handlers[id.index()].edge_slots[edge.index()][firing as usize].address = address;
    }

    pub fn set_edge_offset(&mut self, id: HandlerId, edge: EdgeId, firing: u32, offset: u32) {
        self.handlers[id.index()].edge_slots[edge.index()][firing as usize].offset = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_expr::RpnToken;
    use core_graph::{ParamSpec, VertexKind};

    fn rate(n: i64) -> Vec<RpnToken> {
        vec![RpnToken::literal(n)]
    }

    #[test]
    fn static_model_resolves_on_construction() {
        let mut model = Model::new("app");
        let root = model.root();
        let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
        let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
        model.add_edge(root, a, 0, &rate(2), b, 0, &rate(1)).unwrap();
        let tree = FiringTree::new(&model).unwrap();
        assert!(tree.all_resolved());
        assert_eq!(tree.rv(tree.root(), a), 1);
        assert_eq!(tree.rv(tree.root(), b), 2);
    }

    #[test]
    fn dynamic_param_blocks_until_set() {
        let mut model = Model::new("app");
        let root = model.root();
        let p = model.add_param(root, "p", ParamSpec::Dynamic).unwrap();
        let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
        let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
        model
            .add_edge(root, a, 0, &[RpnToken::param("p")], b, 0, &rate(1))
            .unwrap();
        let mut tree = FiringTree::new(&model).unwrap();
        let h = tree.root();
        assert!(!tree.handler(h).is_resolved());
        tree.set_param_value(&model, h, p, 3).unwrap();
        assert!(tree.handler(h).is_resolved());
        assert_eq!(tree.rv(h, b), 3);
        let err = tree.set_param_value(&model, h, p, 4);
        assert!(matches!(err, Err(FiringError::AlreadyResolved { .. })));
    }

    #[test]
    fn dependent_param_computed_at_resolution() {
        let mut model = Model::new("app");
        let root = model.root();
        let p = model.add_param(root, "p", ParamSpec::Dynamic).unwrap();
        let twice = vec![
            RpnToken::param("p"),
            RpnToken::literal(2),
            RpnToken::Op(core_expr::Operator::Mul),
        ];
        model
            .add_param(root, "q", ParamSpec::DynamicDependent(&twice))
            .unwrap();
        let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
        let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
        model
            .add_edge(root, a, 0, &[RpnToken::param("q")], b, 0, &rate(1))
            .unwrap();
        let mut tree = FiringTree::new(&model).unwrap();
        tree.set_param_value(&model, tree.root(), p, 5).unwrap();
        assert_eq!(tree.param_values(tree.root())[1], 10);
        assert_eq!(tree.rv(tree.root(), b), 10);
    }

    #[test]
    fn children_created_per_subgraph_firing() {
        let mut model = Model::new("app");
        let root = model.root();
        let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
        let (child, sub) = model.add_subgraph(root, "sub", 1, 0).unwrap();
        model.add_edge(root, a, 0, &rate(1), sub, 0, &rate(2)).unwrap();
        // Inside: interface -> X consuming 2 per firing.
        let iface = model.graph(child).input_interfaces()[0];
        let x = model.add_vertex(child, "X", VertexKind::Normal, 1, 0).unwrap();
        model.add_edge(child, iface, 0, &rate(2), x, 0, &rate(2)).unwrap();
        let tree = FiringTree::new(&model).unwrap();
        // rv(A) = 2, rv(sub) = 1 in root.
        assert_eq!(tree.rv(tree.root(), sub), 1);
        let ch = tree.child(&model, tree.root(), sub, 0).unwrap();
        assert!(tree.handler(ch).is_resolved());
        assert_eq!(tree.rv(ch, x), 1);
    }

    #[test]
    fn inherited_param_copies_parent_value() {
        let mut model = Model::new("app");
        let root = model.root();
        let n = model.add_param(root, "n", ParamSpec::Static(&rate(3))).unwrap();
        let (child, sub) = model.add_subgraph(root, "sub", 0, 0).unwrap();
        model.add_param(child, "n", ParamSpec::Inherited(n)).unwrap();
        let x = model.add_vertex(child, "X", VertexKind::Normal, 0, 1).unwrap();
        let y = model.add_vertex(child, "Y", VertexKind::Normal, 1, 0).unwrap();
        model
            .add_edge(child, x, 0, &[RpnToken::param("n")], y, 0, &rate(1))
            .unwrap();
        let tree = FiringTree::new(&model).unwrap();
        let ch = tree.child(&model, tree.root(), sub, 0).unwrap();
        assert_eq!(tree.param_values(ch), &[3]);
        assert_eq!(tree.rv(ch, y), 3);
    }
}
