//! Vertices: named nodes with a subtype tag, dense port arrays and optional
//! runtime information.

use crate::{EdgeId, GraphId, ParamId};
use core_expr::Expression;

/// Subtype tag driving allocator / scheduler behavior. Dispatch happens via
/// `match` at the few call sites that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexKind {
    Normal,
    /// Configuration actor: fires first and produces parameter values.
    Config,
    /// Materialized delay pivot between setter and getter edges.
    Delay,
    Fork,
    Join,
    Repeat,
    Duplicate,
    Tail,
    Head,
    ExternIn,
    ExternOut,
    /// Implicit producer of initial delay tokens.
    Init,
    /// Implicit consumer of final delay tokens.
    End,
    /// Hierarchical vertex owning a subgraph.
    Graph,
    /// Input interface of a subgraph (degenerate boundary vertex).
    Input,
    /// Output interface of a subgraph.
    Output,
}

impl VertexKind {
    /// True for kinds that become schedulable firings. Interfaces are rate
    /// adapters, `Graph` vertices expand into their children, and `Delay`
    /// pivots only exist for dependency chaining.
    pub fn fires(self) -> bool {
        !matches!(
            self,
            VertexKind::Graph | VertexKind::Input | VertexKind::Output | VertexKind::Delay
        )
    }
}

/// Mapping constraints and per-PE-type timing of an actor.
#[derive(Debug, Clone)]
pub struct RtInfo {
    /// Index of the compute kernel in the platform registry.
    pub kernel_ix: u32,
    /// Bitmask over PE type indices the actor may run on.
    pub pe_type_mask: u64,
    /// Timing expression per PE type, in cycles. Types absent from the list
    /// fall back to [`RtInfo::DEFAULT_TIMING`].
    pub timings: Vec<(u32, Expression)>,
}

impl RtInfo {
    pub const DEFAULT_TIMING: i64 = 100;

    pub fn supports_pe_type(&self, pe_type: u32) -> bool {
        pe_type < u64::BITS && (self.pe_type_mask >> pe_type) & 1 == 1
    }

    /// Execution time in cycles on the given PE type under the given
    /// parameter values. PE types with no registered expression use the
    /// default; expressions were compiled against the owning graph scope, so
    /// evaluation errors propagate.
    pub fn timing_on(&self, pe_type: u32, values: &[i64]) -> Result<i64, core_expr::ExprError> {
        match self.timings.iter().find(|(t, _)| *t == pe_type) {
            Some((_, expr)) => expr.evaluate_i64(values),
            None => Ok(Self::DEFAULT_TIMING),
        }
    }
}

/// A named node owned by exactly one graph. Port arrays are dense: every slot
/// must be connected by exactly one edge before the model is executed.
#[derive(Debug, Clone)]
pub struct Vertex {
    pub name: String,
    pub kind: VertexKind,
    pub(crate) inputs: Vec<Option<EdgeId>>,
    pub(crate) outputs: Vec<Option<EdgeId>>,
    /// Parameters read by rate/timing expressions or the kernel.
    pub input_params: Vec<ParamId>,
    /// Parameters written at runtime (configuration actors only).
    pub output_params: Vec<ParamId>,
    pub rt: Option<RtInfo>,
    /// Child graph when `kind == Graph`.
    pub subgraph: Option<GraphId>,
    /// Fixed application buffer backing an `ExternIn`/`ExternOut` vertex.
    pub extern_address: Option<u64>,
    /// Owning edge when `kind == Delay`.
    pub(crate) delay_edge: Option<EdgeId>,
}

impl Vertex {
    pub(crate) fn new(name: String, kind: VertexKind, in_ports: usize, out_ports: usize) -> Self {
        Self {
            name,
            kind,
            inputs: vec![None; in_ports],
            outputs: vec![None; out_ports],
            input_params: Vec::new(),
            output_params: Vec::new(),
            rt: None,
            subgraph: None,
            extern_address: None,
            delay_edge: None,
        }
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Edge connected on the given input port, if any.
    pub fn input_edge(&self, port: usize) -> Option<EdgeId> {
        self.inputs.get(port).copied().flatten()
    }

    pub fn output_edge(&self, port: usize) -> Option<EdgeId> {
        self.outputs.get(port).copied().flatten()
    }

    pub fn input_edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.inputs.iter().filter_map(|e| *e)
    }

    pub fn output_edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.outputs.iter().filter_map(|e| *e)
    }

    /// For `Delay`-kind pivots: the edge whose delay this vertex reifies.
    pub fn delay_edge(&self) -> Option<EdgeId> {
        self.delay_edge
    }

    /// True when every port slot is connected.
    pub fn ports_complete(&self) -> bool {
        self.inputs.iter().all(Option::is_some) && self.outputs.iter().all(Option::is_some)
    }
}
