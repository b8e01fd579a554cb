//! List-based scheduling and PE mapping.
//!
//! A scheduling *wave* turns the resolved portion of the firing tree into
//! mapped, time-ordered [`ScheduleTask`]s: register one list entry per
//! not-yet-scheduled firing, compute critical-path levels over consumption
//! dependencies, sort, strip what depends on unresolved handlers, then map
//! each ready firing onto a PE (best-fit or round-robin), injecting
//! send/receive sync tasks when data crosses a cluster boundary. Waves are
//! incremental: firings blocked on dynamic parameters stay in the list and
//! become schedulable once parameter feedback resolves their handler.

use thiserror::Error;

mod list;
mod mapper;
mod task;

pub use list::{ListScheduler, ListTask};
pub use mapper::Mapper;
pub use task::{NO_SYNC, PredLink, Schedule, ScheduleTask, TaskKind, TaskState};

use core_firing::FiringError;
use core_platform::PlatformError;

/// Wave-ordering policy. `List` sorts by critical-path level; `Greedy` keeps
/// registration order and only strips the non-schedulable tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingPolicy {
    #[default]
    List,
    Greedy,
}

/// PE-selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MappingPolicy {
    #[default]
    BestFit,
    RoundRobin,
}

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("no mappable processing element for vertex [{vertex}]")]
    NoMappablePe { vertex: String },
    #[error("vertex [{vertex}] has null execution time on a mappable cluster")]
    NullTiming { vertex: String },
    #[error("dependency resolution failed")]
    Firing(#[from] FiringError),
    #[error("platform description rejected")]
    Platform(#[from] PlatformError),
}
