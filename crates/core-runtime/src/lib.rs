//! Runtime driver, task launcher and worker runners.
//!
//! The engine itself is single-threaded: driver, scheduler, allocator and
//! launcher all run on the GRT thread. Each LRT is a worker thread consuming
//! its own message queue. The GRT blocks in exactly two places: the
//! parameter channel while configuration actors resolve dynamic parameters,
//! and the completion barrier at the end of an iteration.

use thiserror::Error;

mod driver;
mod export;
mod launcher;
mod runner;

pub use driver::{RuntimeContext, create_runtime_context, quit, run};
pub use export::{export_dot, export_gantt_svg, export_gantt_xml};
pub use launcher::{PendingParam, TaskLauncher};
pub use runner::{StampBoard, spawn_runner};

use core_alloc::AllocError;
use core_comm::CommError;
use core_firing::FiringError;
use core_graph::GraphError;
use core_platform::PlatformError;
use core_sched::SchedError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("graph rejected")]
    Graph(#[from] GraphError),
    #[error("firing resolution failed")]
    Firing(#[from] FiringError),
    #[error("scheduling failed")]
    Sched(#[from] SchedError),
    #[error("FIFO allocation failed")]
    Alloc(#[from] AllocError),
    #[error("runner protocol failed")]
    Comm(#[from] CommError),
    #[error("platform rejected")]
    Platform(#[from] PlatformError),
    #[error("deadlock: wave completed with no ready task and unresolved handlers remain")]
    Deadlock,
    #[error("the single-rate runtime is not built; use the PiSDF runtime")]
    UnsupportedRuntime,
    #[error("trace export failed")]
    Io(#[from] std::io::Error),
}
