//! Cascade entrypoint: runs a built-in demo application on the PiSDF
//! engine, mostly as an executable smoke test and a template for embedders.

use anyhow::Result;
use clap::Parser;
use core_config::load_from;
use core_expr::RpnToken;
use core_graph::{Model, ParamSpec, VertexKind};
use core_platform::{KernelRegistry, Platform};
use core_runtime::{create_runtime_context, export_dot, quit, run};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "cascade", version, about = "Cascade dataflow engine demo")]
struct Args {
    /// Demo application to run.
    #[arg(long, default_value = "pipeline")]
    demo: Demo,
    /// Optional configuration file path (overrides discovery of
    /// `cascade.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Override the configured iteration count.
    #[arg(long)]
    iterations: Option<u64>,
    /// Write the application graph as DOT before running.
    #[arg(long)]
    dot: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Demo {
    /// Static fork/join pipeline.
    Pipeline,
    /// Dynamic graph resolved through a configuration actor.
    Dynamic,
}

fn configure_logging() -> Result<WorkerGuard> {
    let log_dir = Path::new(".");
    let log_path = log_dir.join("cascade.log");
    if log_path.exists() {
        let _ = std::fs::remove_file(&log_path);
    }
    let file_appender = tracing_appender::rolling::never(log_dir, "cascade.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn single_cluster_platform(pe_count: usize) -> Platform {
    let mut platform = Platform::new();
    let cluster = platform.add_cluster(16 << 20);
    let grt = platform.add_pe(cluster, 0, true);
    for _ in 1..pe_count {
        platform.add_pe(cluster, 0, true);
    }
    platform.set_grt(grt);
    platform
}

fn rate(n: i64) -> Vec<RpnToken> {
    vec![RpnToken::literal(n)]
}

type Sink = Arc<Mutex<Vec<u8>>>;

/// Source -> fork -> two workers -> join -> sink, all static rates.
fn build_pipeline(kernels: &mut KernelRegistry, sink: Sink) -> Result<Model> {
    let mut model = Model::new("pipeline");
    let root = model.root();
    let src = model.add_vertex(root, "source", VertexKind::Normal, 0, 1)?;
    let fork = model.add_vertex(root, "fork", VertexKind::Fork, 1, 2)?;
    let hi = model.add_vertex(root, "scale_hi", VertexKind::Normal, 1, 1)?;
    let lo = model.add_vertex(root, "scale_lo", VertexKind::Normal, 1, 1)?;
    let join = model.add_vertex(root, "join", VertexKind::Join, 2, 1)?;
    let out = model.add_vertex(root, "sink", VertexKind::Normal, 1, 0)?;
    model.add_edge(root, src, 0, &rate(8), fork, 0, &rate(8))?;
    model.add_edge(root, fork, 0, &rate(4), hi, 0, &rate(4))?;
    model.add_edge(root, fork, 1, &rate(4), lo, 0, &rate(4))?;
    model.add_edge(root, hi, 0, &rate(4), join, 0, &rate(4))?;
    model.add_edge(root, lo, 0, &rate(4), join, 1, &rate(4))?;
    model.add_edge(root, join, 0, &rate(8), out, 0, &rate(8))?;

    let source = kernels.register(Box::new(|_p, _op, _i, outputs: &mut [&mut [u8]]| {
        for (i, byte) in outputs[0].iter_mut().enumerate() {
            *byte = i as u8;
        }
    }));
    let double = kernels.register(Box::new(
        |_p: &[i64], _op: &mut [i64], inputs: &[&[u8]], outputs: &mut [&mut [u8]]| {
            for (o, i) in outputs[0].iter_mut().zip(inputs[0]) {
                *o = i.wrapping_mul(2);
            }
        },
    ));
    let halve = kernels.register(Box::new(
        |_p: &[i64], _op: &mut [i64], inputs: &[&[u8]], outputs: &mut [&mut [u8]]| {
            for (o, i) in outputs[0].iter_mut().zip(inputs[0]) {
                *o = i / 2;
            }
        },
    ));
    let joiner = kernels.register(Box::new(
        |_p: &[i64], _op: &mut [i64], inputs: &[&[u8]], outputs: &mut [&mut [u8]]| {
            let mut cursor = 0;
            for input in inputs {
                outputs[0][cursor..cursor + input.len()].copy_from_slice(input);
                cursor += input.len();
            }
        },
    ));
    let collect = kernels.register(Box::new(
        move |_p: &[i64], _op: &mut [i64], inputs: &[&[u8]], _o: &mut [&mut [u8]]| {
            sink.lock().unwrap().extend_from_slice(inputs[0]);
        },
    ));
    model.set_rt_info(root, src, source, 1, &[])?;
    model.set_rt_info(root, hi, double, 1, &[])?;
    model.set_rt_info(root, lo, halve, 1, &[])?;
    model.set_rt_info(root, join, joiner, 1, &[])?;
    model.set_rt_info(root, out, collect, 1, &[])?;
    Ok(model)
}

/// One configuration actor picks the burst length each iteration.
fn build_dynamic(kernels: &mut KernelRegistry, sink: Sink) -> Result<Model> {
    let mut model = Model::new("dynamic");
    let root = model.root();
    let p = model.add_param(root, "burst", ParamSpec::Dynamic)?;
    let cfg = model.add_vertex(root, "decide", VertexKind::Config, 0, 0)?;
    model.bind_output_param(root, cfg, p)?;
    let gen_vx = model.add_vertex(root, "generate", VertexKind::Normal, 0, 1)?;
    let out = model.add_vertex(root, "sink", VertexKind::Normal, 1, 0)?;
    model.add_edge(
        root,
        gen_vx,
        0,
        &[RpnToken::param("burst")],
        out,
        0,
        &rate(1),
    )?;

    let decide = kernels.register(Box::new(
        |_p: &[i64], out_params: &mut [i64], _i: &[&[u8]], _o: &mut [&mut [u8]]| {
            out_params[0] = 4;
        },
    ));
    let generate = kernels.register(Box::new(|_p, _op, _i, outputs: &mut [&mut [u8]]| {
        for (i, byte) in outputs[0].iter_mut().enumerate() {
            *byte = 100 + i as u8;
        }
    }));
    let collect = kernels.register(Box::new(
        move |_p: &[i64], _op: &mut [i64], inputs: &[&[u8]], _o: &mut [&mut [u8]]| {
            sink.lock().unwrap().extend_from_slice(inputs[0]);
        },
    ));
    model.set_rt_info(root, cfg, decide, 1, &[])?;
    model.set_rt_info(root, gen_vx, generate, 1, &[])?;
    model.set_rt_info(root, out, collect, 1, &[])?;
    Ok(model)
}

fn main() -> Result<()> {
    let _log_guard = configure_logging()?;
    let args = Args::parse();
    let mut config = load_from(args.config.clone())?;
    if let Some(iterations) = args.iterations {
        config.file.engine.loop_count = iterations;
    }
    info!(target: "runtime", demo = ?args.demo, "startup");

    let mut kernels = KernelRegistry::new();
    let collected: Sink = Arc::new(Mutex::new(Vec::new()));
    let model = match args.demo {
        Demo::Pipeline => build_pipeline(&mut kernels, collected.clone())?,
        Demo::Dynamic => build_dynamic(&mut kernels, collected.clone())?,
    };
    if let Some(path) = &args.dot {
        std::fs::write(path, export_dot(&model))?;
    }
    let platform = single_cluster_platform(2);
    let mut ctx = create_runtime_context(model, platform, kernels, config)?;
    run(&mut ctx)?;
    let iterations = ctx.iterations_done();
    quit(ctx);
    let collected = collected.lock().unwrap();
    println!(
        "ran {iterations} iteration(s), sink received {} bytes: {:?}",
        collected.len(),
        &collected[..collected.len().min(16)]
    );
    Ok(())
}
