//! Repetition-vector computation.
//!
//! Per weakly connected component of the graph, assemble the topology matrix
//! (one row per valid edge: `+src_rate` in the source column, `-snk_rate` in
//! the sink column) and compute its right nullspace over exact rationals with
//! the largest-pivot elimination. The minimal positive integer solution is
//! obtained by scaling with the lcm of the denominators. Interface and
//! configuration-actor rates then scale whole components uniformly so that
//! one graph firing consumes exactly what its boundary provides.

use crate::FiringError;
use core_graph::{EdgeId, Graph, VertexId, VertexKind};
use core_math::{Rational, ceil_div};
use tracing::debug;

struct EdgeRate {
    src: i64,
    snk: i64,
}

/// Compute the repetition value per vertex of `graph` under the given
/// parameter values. Interfaces and configuration actors always count one
/// firing; vertices whose every connected rate is zero count zero.
pub fn compute(graph: &Graph, values: &[i64]) -> Result<Vec<u32>, FiringError> {
    let n = graph.vertex_count();
    let mut rv = vec![0u32; n];

    let rates: Vec<EdgeRate> = graph
        .edge_ids()
        .map(|e| {
            let edge = graph.edge(e);
            Ok(EdgeRate {
                src: edge.src_rate.evaluate_i64(values)?,
                snk: edge.snk_rate.evaluate_i64(values)?,
            })
        })
        .collect::<Result<_, FiringError>>()?;

    // A vertex is executable when at least one rate on its side of a
    // connected edge is non-zero; a vertex with no ports at all fires once.
    let mut executable = vec![false; n];
    for v in graph.vertex_ids() {
        let vertex = graph.vertex(v);
        let has_nonzero = vertex.input_edges().any(|e| rates[e.index()].snk != 0)
            || vertex.output_edges().any(|e| rates[e.index()].src != 0);
        // A vertex without any port (standalone actor, portless subgraph)
        // still fires once per graph firing.
        let portless = vertex.input_count() == 0
            && vertex.output_count() == 0
            && !matches!(vertex.kind, VertexKind::Input | VertexKind::Output);
        executable[v.index()] = has_nonzero || portless;
    }

    let in_matrix = |v: VertexId| {
        executable[v.index()]
            && !matches!(
                graph.vertex(v).kind,
                VertexKind::Input | VertexKind::Output | VertexKind::Config
            )
    };

    let valid_edge = |e: EdgeId| {
        let edge = graph.edge(e);
        edge.source != edge.sink && in_matrix(edge.source) && in_matrix(edge.sink)
    };

    // Union-find over matrix vertices to carve out components.
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut Vec<usize>, x: usize) -> usize {
        if parent[x] != x {
            let root = find(parent, parent[x]);
            parent[x] = root;
        }
        parent[x]
    }
    for e in graph.edge_ids() {
        if valid_edge(e) {
            let edge = graph.edge(e);
            let (a, b) = (
                find(&mut parent, edge.source.index()),
                find(&mut parent, edge.sink.index()),
            );
            if a != b {
                parent[a] = b;
            }
        }
    }

    let mut roots: Vec<usize> = Vec::new();
    for v in graph.vertex_ids() {
        if in_matrix(v) {
            let root = find(&mut parent, v.index());
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
    }

    for root in roots {
        let members: Vec<VertexId> = graph
            .vertex_ids()
            .filter(|v| in_matrix(*v) && find(&mut parent, v.index()) == root)
            .collect();
        let edges: Vec<EdgeId> = graph
            .edge_ids()
            .filter(|e| valid_edge(*e) && find(&mut parent, graph.edge(*e).source.index()) == root)
            .collect();
        let counts = nullspace(graph, &members, &edges, &rates)?;
        for (v, count) in members.iter().zip(&counts) {
            rv[v.index()] = *count;
        }
        // Interface / config rate matching may scale the whole component up.
        let scale = boundary_scale(graph, &members, &rates, &rv);
        if scale > 1 {
            for v in &members {
                rv[v.index()] = (u64::from(rv[v.index()]) * scale) as u32;
            }
        }
    }

    // Boundary vertices and configuration actors fire once per graph firing,
    // as do portless actors that never entered the matrix.
    for v in graph.vertex_ids() {
        let vertex = graph.vertex(v);
        match vertex.kind {
            VertexKind::Input | VertexKind::Output | VertexKind::Config => rv[v.index()] = 1,
            _ => {
                if vertex.input_count() == 0 && vertex.output_count() == 0 {
                    rv[v.index()] = 1;
                }
            }
        }
    }

    debug!(
        target: "brv",
        graph = graph.name.as_str(),
        rv = ?rv,
        "repetition_vector_computed"
    );
    Ok(rv)
}

/// Minimal positive integer nullspace of the component's topology matrix.
fn nullspace(
    graph: &Graph,
    members: &[VertexId],
    edges: &[EdgeId],
    rates: &[EdgeRate],
) -> Result<Vec<u32>, FiringError> {
    let cols = members.len();
    let rows = edges.len();
    if rows == 0 {
        // Isolated executable vertex: one firing.
        return Ok(vec![1; cols]);
    }
    let col_of = |v: VertexId| members.iter().position(|m| *m == v).unwrap_or(0);

    let mut m = vec![Rational::ZERO; rows * cols];
    for (row, e) in edges.iter().enumerate() {
        let edge = graph.edge(*e);
        m[row * cols + col_of(edge.source)] = Rational::from_int(rates[e.index()].src);
        m[row * cols + col_of(edge.sink)] = Rational::from_int(-rates[e.index()].snk);
    }

    // Gaussian elimination, pivot = largest absolute value in the current
    // column; on tie keep the current row.
    for i in 0..rows.min(cols) {
        let mut pivot = m[i * cols + i].abs();
        let mut pivot_row = i;
        for t in (i + 1)..rows {
            let candidate = m[t * cols + i].abs();
            if candidate > pivot {
                pivot = candidate;
                pivot_row = t;
            }
        }
        if pivot.is_zero() {
            break;
        }
        if pivot_row != i {
            for k in 0..cols {
                m.swap(i * cols + k, pivot_row * cols + k);
            }
        }
        let diag = m[i * cols + i];
        for k in i..cols {
            m[i * cols + k] = m[i * cols + k].checked_div(diag)?;
        }
        for j in (i + 1)..rows {
            let factor = m[j * cols + i];
            if !factor.is_zero() {
                for k in 0..cols {
                    let delta = factor * m[i * cols + k];
                    m[j * cols + k] -= delta;
                }
            }
        }
    }

    // Back substitution; free variables default to one firing.
    let mut result = vec![Rational::from_int(1); cols];
    for i in (0..rows.min(cols)).rev() {
        let mut val = Rational::ZERO;
        for k in (i + 1)..cols {
            val += result[k] * m[i * cols + k];
        }
        if !val.is_zero() {
            let diag = m[i * cols + i];
            if diag.is_zero() {
                return Err(FiringError::NullTopologyPivot {
                    graph: graph.name.clone(),
                    column: i,
                });
            }
            result[i] = val.abs().checked_div(diag)?;
        }
    }

    let mut scale = 1i64;
    for r in &result {
        scale = core_math::lcm_i64(scale, r.denominator());
    }
    Ok(result
        .iter()
        .map(|r| ((*r * Rational::from_int(scale)).abs().to_i64()) as u32)
        .collect())
}

/// Uniform component scale factor imposed by interface and config rates: the
/// tokens an interface (or one-shot config actor) provides per graph firing
/// must be fully consumed by the component's iteration.
fn boundary_scale(graph: &Graph, members: &[VertexId], rates: &[EdgeRate], rv: &[u32]) -> u64 {
    let mut scale = 1u64;
    let member = |v: VertexId| members.contains(&v);
    for e in graph.edge_ids() {
        let edge = graph.edge(e);
        let (src_kind, snk_kind) = (
            graph.vertex(edge.source).kind,
            graph.vertex(edge.sink).kind,
        );
        // Boundary producer feeding the component.
        if matches!(src_kind, VertexKind::Input | VertexKind::Config) && member(edge.sink) {
            let provided = rates[e.index()].src as u64;
            let consumed = rates[e.index()].snk as u64 * u64::from(rv[edge.sink.index()]);
            if consumed > 0 && provided > consumed * scale {
                scale = scale.max(ceil_div(provided, consumed));
            }
        }
        // Boundary consumer drained by the component.
        if matches!(snk_kind, VertexKind::Output | VertexKind::Config) && member(edge.source) {
            let requested = rates[e.index()].snk as u64;
            let produced = rates[e.index()].src as u64 * u64::from(rv[edge.source.index()]);
            if produced > 0 && requested > produced * scale {
                scale = scale.max(ceil_div(requested, produced));
            }
        }
    }
    scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_expr::RpnToken;
    use core_graph::{Model, VertexKind};

    fn rate(n: i64) -> Vec<RpnToken> {
        vec![RpnToken::literal(n)]
    }

    #[test]
    fn chain_rates_balance() {
        // A --2:3--> B: rv(A)=3, rv(B)=2
        let mut model = Model::new("app");
        let root = model.root();
        let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
        let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
        model.add_edge(root, a, 0, &rate(2), b, 0, &rate(3)).unwrap();
        let rv = compute(model.graph(root), &[]).unwrap();
        assert_eq!(rv[a.index()], 3);
        assert_eq!(rv[b.index()], 2);
    }

    #[test]
    fn fork_join_balances() {
        // A(4) -> F -> {2, 2} -> J(4) -> B(4)
        let mut model = Model::new("app");
        let root = model.root();
        let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
        let f = model.add_vertex(root, "F", VertexKind::Fork, 1, 2).unwrap();
        let j = model.add_vertex(root, "J", VertexKind::Join, 2, 1).unwrap();
        let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
        model.add_edge(root, a, 0, &rate(4), f, 0, &rate(4)).unwrap();
        model.add_edge(root, f, 0, &rate(2), j, 0, &rate(2)).unwrap();
        model.add_edge(root, f, 1, &rate(2), j, 1, &rate(2)).unwrap();
        model.add_edge(root, j, 0, &rate(4), b, 0, &rate(4)).unwrap();
        let rv = compute(model.graph(root), &[]).unwrap();
        assert_eq!(
            [rv[a.index()], rv[f.index()], rv[j.index()], rv[b.index()]],
            [1, 1, 1, 1]
        );
    }

    #[test]
    fn isolated_vertex_fires_once() {
        let mut model = Model::new("app");
        let root = model.root();
        let v = model.add_vertex(root, "solo", VertexKind::Normal, 0, 0).unwrap();
        let rv = compute(model.graph(root), &[]).unwrap();
        assert_eq!(rv[v.index()], 1);
    }

    #[test]
    fn zero_rate_vertex_never_fires() {
        let mut model = Model::new("app");
        let root = model.root();
        let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
        let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
        model.add_edge(root, a, 0, &rate(0), b, 0, &rate(0)).unwrap();
        let rv = compute(model.graph(root), &[]).unwrap();
        assert_eq!(rv[a.index()], 0);
        assert_eq!(rv[b.index()], 0);
    }

    #[test]
    fn dynamic_rate_uses_value_table() {
        use core_graph::ParamSpec;
        let mut model = Model::new("app");
        let root = model.root();
        model.add_param(root, "p", ParamSpec::Dynamic).unwrap();
        let a = model.add_vertex(root, "A", VertexKind::Normal, 0, 1).unwrap();
        let b = model.add_vertex(root, "B", VertexKind::Normal, 1, 0).unwrap();
        model
            .add_edge(root, a, 0, &[RpnToken::param("p")], b, 0, &rate(1))
            .unwrap();
        let rv = compute(model.graph(root), &[3]).unwrap();
        assert_eq!(rv[a.index()], 1);
        assert_eq!(rv[b.index()], 3);
    }

    #[test]
    fn config_actor_fires_once_and_scales_consumers() {
        // CFG --4:1--> A : config provides 4 tokens once, A fires 4 times.
        let mut model = Model::new("app");
        let root = model.root();
        let cfg = model.add_vertex(root, "cfg", VertexKind::Config, 0, 1).unwrap();
        let a = model.add_vertex(root, "A", VertexKind::Normal, 1, 0).unwrap();
        model.add_edge(root, cfg, 0, &rate(4), a, 0, &rate(1)).unwrap();
        let rv = compute(model.graph(root), &[]).unwrap();
        assert_eq!(rv[cfg.index()], 1);
        assert_eq!(rv[a.index()], 4);
    }
}
