//! Edges and delays.

use crate::VertexId;
use core_expr::Expression;

/// Directed rate-annotated connection between two ports of the same graph.
#[derive(Debug, Clone)]
pub struct Edge {
    pub source: VertexId,
    pub source_port: u32,
    /// Production rate, evaluated in the containing graph's parameter scope.
    pub src_rate: Expression,
    pub sink: VertexId,
    pub sink_port: u32,
    /// Consumption rate, same scope.
    pub snk_rate: Expression,
    pub delay: Option<Delay>,
}

/// Initial tokens on an edge.
///
/// A persistent delay keeps its storage across iterations and must not carry
/// a setter or getter. A non-persistent delay is materialized as a `Delay`
/// pivot vertex whose input edge comes from the setter and whose output edge
/// feeds the getter; when the application supplies neither, implicit
/// `Init`/`End` vertices take those roles.
#[derive(Debug, Clone)]
pub struct Delay {
    pub value: Expression,
    pub persistent: bool,
    pub setter: Option<(VertexId, u32)>,
    pub getter: Option<(VertexId, u32)>,
    /// Materialized pivot vertex (non-persistent delays only).
    pub vertex: Option<VertexId>,
    /// Reserved memory slice, assigned once by the allocator at engine start
    /// for persistent delays.
    pub address: Option<u64>,
}

impl Edge {
    pub fn delay(&self) -> Option<&Delay> {
        self.delay.as_ref()
    }

    /// Convenience for the many sites that treat "no delay" as zero tokens.
    pub fn has_delay(&self) -> bool {
        self.delay.is_some()
    }
}
