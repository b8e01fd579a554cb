//! Trace exporters: DOT graph structure, XML and SVG Gantt of a schedule.
//!
//! These are post-hoc diagnostics addressed purely by file path from the
//! trace configuration; nothing in the engine depends on their output.

use core_graph::{Model, VertexKind};
use core_platform::Platform;
use core_sched::{Schedule, TaskKind};
use std::fmt::Write;

/// Render the whole model as a DOT digraph, one cluster per (sub)graph.
pub fn export_dot(model: &Model) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph {} {{", sanitize(&model.graph(model.root()).name));
    let _ = writeln!(out, "    rankdir = LR;");
    for graph_id in model.graph_ids() {
        let graph = model.graph(graph_id);
        let _ = writeln!(out, "    subgraph cluster_{} {{", graph_id.0);
        let _ = writeln!(out, "        label = \"{}\";", graph.name);
        for v in graph.vertex_ids() {
            let vertex = graph.vertex(v);
            let shape = match vertex.kind {
                VertexKind::Config => "house",
                VertexKind::Input | VertexKind::Output => "cds",
                VertexKind::Graph => "box3d",
                VertexKind::Delay => "circle",
                _ => "box",
            };
            let _ = writeln!(
                out,
                "        v{}_{} [label = \"{}\", shape = {}];",
                graph_id.0,
                v.0,
                vertex.name,
                shape
            );
        }
        for e in graph.edge_ids() {
            let edge = graph.edge(e);
            let delay = edge
                .delay
                .as_ref()
                .map(|d| format!(", delay = {}", d.value))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "        v{g}_{} -> v{g}_{} [label = \"{}:{}{}\"];",
                edge.source.0,
                edge.sink.0,
                edge.src_rate,
                edge.snk_rate,
                delay,
                g = graph_id.0,
            );
        }
        let _ = writeln!(out, "    }}");
    }
    let _ = writeln!(out, "}}");
    out
}

/// Schedule as the XML Gantt flavour consumed by the companion tooling.
pub fn export_gantt_xml(schedule: &Schedule, _platform: &Platform) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<data>");
    let _ = writeln!(out, "    <gantt>");
    for task in schedule.tasks() {
        let Some(pe) = task.mapped_pe else { continue };
        let title = task_title(task.ix, &task.kind);
        let _ = writeln!(
            out,
            "        <event start=\"{}\" end=\"{}\" mapping=\"PE{}\" title=\"{}\"/>",
            task.start_time, task.end_time, pe.index(), title
        );
    }
    let _ = writeln!(out, "    </gantt>");
    let _ = writeln!(out, "</data>");
    out
}

/// Schedule as a self-contained SVG: one lane per PE, one rect per task.
pub fn export_gantt_svg(schedule: &Schedule, platform: &Platform) -> String {
    const LANE_HEIGHT: u64 = 28;
    const LANE_GAP: u64 = 6;
    let makespan = schedule.makespan().max(1);
    let width = 960u64;
    let scale = width as f64 / makespan as f64;
    let lanes = platform.lrt_count() as u64;
    let height = lanes * (LANE_HEIGHT + LANE_GAP) + LANE_GAP;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\">",
        width + 80,
        height
    );
    for lane in 0..lanes {
        let y = LANE_GAP + lane * (LANE_HEIGHT + LANE_GAP);
        let _ = writeln!(
            out,
            "  <text x=\"4\" y=\"{}\" font-size=\"11\">PE{}</text>",
            y + LANE_HEIGHT / 2,
            lane
        );
    }
    for task in schedule.tasks() {
        let Some(pe) = task.mapped_pe else { continue };
        let y = LANE_GAP + pe.index() as u64 * (LANE_HEIGHT + LANE_GAP);
        let x = 60.0 + task.start_time as f64 * scale;
        let w = ((task.end_time - task.start_time) as f64 * scale).max(1.0);
        let fill = match task.kind {
            TaskKind::Vertex { .. } => "#6a9fb5",
            TaskKind::SyncSend { .. } => "#d28445",
            TaskKind::SyncReceive { .. } => "#ac4142",
        };
        let _ = writeln!(
            out,
            "  <rect x=\"{x:.1}\" y=\"{y}\" width=\"{w:.1}\" height=\"{LANE_HEIGHT}\" \
             fill=\"{fill}\" stroke=\"#333\"><title>{}</title></rect>",
            task_title(task.ix, &task.kind)
        );
    }
    let _ = writeln!(out, "</svg>");
    out
}

fn task_title(ix: u32, kind: &TaskKind) -> String {
    match kind {
        TaskKind::Vertex { firing, .. } => format!("task_{ix}_firing_{firing}"),
        TaskKind::SyncSend { .. } => format!("send_{ix}"),
        TaskKind::SyncReceive { .. } => format!("recv_{ix}"),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_expr::RpnToken;

    #[test]
    fn dot_lists_every_vertex_and_edge() {
        let mut model = Model::new("demo");
        let root = model.root();
        let a = model
            .add_vertex(root, "producer", VertexKind::Normal, 0, 1)
            .unwrap();
        let b = model
            .add_vertex(root, "consumer", VertexKind::Normal, 1, 0)
            .unwrap();
        model
            .add_edge(root, a, 0, &[RpnToken::literal(2)], b, 0, &[RpnToken::literal(1)])
            .unwrap();
        let dot = export_dot(&model);
        assert!(dot.contains("digraph demo"));
        assert!(dot.contains("producer"));
        assert!(dot.contains("consumer"));
        assert!(dot.contains("2:1"));
    }
}
