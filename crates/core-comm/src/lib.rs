//! Runner message protocol and queues.
//!
//! The GRT talks to each LRT runner through a lossless FIFO: job messages go
//! into a per-LRT mailbox (indexed, so a later `JobAdd` notification can
//! reference them), notifications go through a channel. Runners answer on two
//! shared upstream channels: one dedicated to parameter feedback from
//! configuration actors, one for task-completion stamps. Queues are
//! single-consumer by contract; the only locks live here and in the memory
//! pool, never on the scheduling path.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::trace;

/// FIFO access attribute, as seen by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoAttribute {
    /// Read side of an owned buffer; decrements the count, frees at zero.
    ROwn,
    /// Write side of a freshly allocated buffer.
    WOwn,
    /// Read from an external (application-provided) buffer.
    RExt,
    /// Write to an external buffer.
    WExt,
    /// Read without taking ownership (fork/duplicate views).
    ROnly,
    /// Write into a view of an existing buffer, no allocation.
    WOnly,
    /// Read-write view, no ownership transfer (sync chains).
    RwOnly,
    /// Virtual read assembled from several adjacent producer FIFOs; the
    /// header's `offset` field holds the number of constituent descriptors
    /// that follow it in the input array.
    RMerge,
    /// Producer without a resolved consumer yet; count managed
    /// asynchronously via `MemUpdateAddr`/`MemUpdateCount`.
    WSink,
    /// Placeholder descriptor carrying no data.
    Dummy,
}

/// Immutable FIFO descriptor passed by value in job messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fifo {
    pub address: u64,
    pub offset: u32,
    pub size: u32,
    /// Outstanding-reader count; a buffer is physically freed when its count
    /// reaches zero.
    pub count: u32,
    pub attribute: FifoAttribute,
}

impl Fifo {
    pub fn dummy() -> Self {
        Self {
            address: 0,
            offset: 0,
            size: 0,
            count: 0,
            attribute: FifoAttribute::Dummy,
        }
    }
}

/// One dispatched firing, fully described.
#[derive(Debug, Clone)]
pub struct JobMessage {
    pub task_ix: u32,
    pub exec_ix: u32,
    pub kernel_ix: u32,
    pub n_params_out: u32,
    pub input_params: Vec<i64>,
    pub input_fifos: Vec<Fifo>,
    pub output_fifos: Vec<Fifo>,
    /// Minimum `(lrt, exec_ix)` pairs that must be finished before start.
    pub exec_constraints: Vec<(u32, u32)>,
    /// Per LRT: broadcast our completion stamp there.
    pub notify_flags: Vec<bool>,
}

/// GRT -> runner notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    JobAdd { message_ix: u32 },
    BroadcastJobstamp { exec_ix: u32 },
    Clear,
    Reset,
    Repeat,
    LrtStartIteration,
    LrtEndIteration,
    MemUpdateAddr { address: u64 },
    MemUpdateCount { count: u32 },
}

/// Envelope carrying the sending LRT's virtual index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerNotification {
    pub sender: u32,
    pub kind: Notification,
}

/// Runner -> GRT messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrtMessage {
    /// Parameter values produced by a configuration firing.
    JobSentParam {
        sender: u32,
        task_ix: u32,
        values: Vec<i64>,
    },
    /// Completion stamp of a local job.
    FinishedTask { sender: u32, exec_ix: u32 },
}

#[derive(Debug, Error)]
pub enum CommError {
    #[error("unexpected message on the parameter channel: {0:?}")]
    ProtocolViolation(GrtMessage),
    #[error("runner channels closed")]
    Disconnected,
    #[error("runner endpoint {0} already taken")]
    EndpointTaken(u32),
}

type JobStore = Arc<Mutex<Vec<JobMessage>>>;

/// The runner-side half of the queues, handed to each runner thread once.
#[derive(Debug)]
pub struct RunnerEndpoint {
    pub lrt: u32,
    pub notifications: Receiver<RunnerNotification>,
    pub jobs: JobStore,
    pub params: Sender<GrtMessage>,
    pub finished: Sender<GrtMessage>,
}

impl RunnerEndpoint {
    pub fn job(&self, message_ix: u32) -> Option<JobMessage> {
        self.jobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(message_ix as usize)
            .cloned()
    }
}

/// GRT-side communicator owning every queue.
#[derive(Debug)]
pub struct Communicator {
    notif_tx: Vec<Sender<RunnerNotification>>,
    endpoints: Vec<Option<RunnerEndpoint>>,
    jobs: Vec<JobStore>,
    param_tx: Sender<GrtMessage>,
    param_rx: Receiver<GrtMessage>,
    finished_tx: Sender<GrtMessage>,
    finished_rx: Receiver<GrtMessage>,
}

impl Communicator {
    pub fn new(lrt_count: usize) -> Self {
        let (param_tx, param_rx) = unbounded();
        let (finished_tx, finished_rx) = unbounded();
        let mut notif_tx = Vec::with_capacity(lrt_count);
        let mut endpoints = Vec::with_capacity(lrt_count);
        let mut jobs = Vec::with_capacity(lrt_count);
        for lrt in 0..lrt_count {
            let (tx, rx) = unbounded();
            let store: JobStore = Arc::new(Mutex::new(Vec::new()));
            notif_tx.push(tx);
            jobs.push(store.clone());
            endpoints.push(Some(RunnerEndpoint {
                lrt: lrt as u32,
                notifications: rx,
                jobs: store,
                params: param_tx.clone(),
                finished: finished_tx.clone(),
            }));
        }
        Self {
            notif_tx,
            endpoints,
            jobs,
            param_tx,
            param_rx,
            finished_tx,
            finished_rx,
        }
    }

    /// Hand the receiving half of one LRT's queues to its runner thread.
    pub fn take_endpoint(&mut self, lrt: u32) -> Result<RunnerEndpoint, CommError> {
        self.endpoints[lrt as usize]
            .take()
            .ok_or(CommError::EndpointTaken(lrt))
    }

    /// Store a job message in the LRT's mailbox, returning its index for the
    /// follow-up `JobAdd`.
    pub fn push_job(&self, lrt: u32, message: JobMessage) -> u32 {
        let mut store = self.jobs[lrt as usize]
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        store.push(message);
        (store.len() - 1) as u32
    }

    pub fn notify(&self, lrt: u32, notification: RunnerNotification) -> Result<(), CommError> {
        trace!(target: "comm", lrt, kind = ?notification.kind, "notification_pushed");
        self.notif_tx[lrt as usize]
            .send(notification)
            .map_err(|_| CommError::Disconnected)
    }

    pub fn broadcast(&self, sender: u32, kind: Notification) -> Result<(), CommError> {
        for lrt in 0..self.notif_tx.len() {
            self.notify(lrt as u32, RunnerNotification { sender, kind })?;
        }
        Ok(())
    }

    /// Block on the parameter channel until a configuration actor reports.
    /// Any other message kind on this channel is a protocol violation.
    pub fn pop_param(&self) -> Result<(u32, Vec<i64>), CommError> {
        match self.param_rx.recv() {
            Ok(GrtMessage::JobSentParam {
                task_ix, values, ..
            }) => Ok((task_ix, values)),
            Ok(other) => Err(CommError::ProtocolViolation(other)),
            Err(_) => Err(CommError::Disconnected),
        }
    }

    /// Block until the next completion stamp.
    pub fn pop_finished(&self) -> Result<(u32, u32), CommError> {
        match self.finished_rx.recv() {
            Ok(GrtMessage::FinishedTask { sender, exec_ix }) => Ok((sender, exec_ix)),
            Ok(other) => Err(CommError::ProtocolViolation(other)),
            Err(_) => Err(CommError::Disconnected),
        }
    }

    /// Sender handles for components that report like a runner (tests).
    pub fn param_sender(&self) -> Sender<GrtMessage> {
        self.param_tx.clone()
    }

    pub fn finished_sender(&self) -> Sender<GrtMessage> {
        self.finished_tx.clone()
    }

    /// Drop job mailboxes from the previous iteration.
    pub fn clear_jobs(&self) {
        for store in &self.jobs {
            store.lock().unwrap_or_else(|p| p.into_inner()).clear();
        }
    }

    pub fn lrt_count(&self) -> usize {
        self.notif_tx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_mailbox_indices_are_stable() {
        let mut comm = Communicator::new(1);
        let endpoint = comm.take_endpoint(0).unwrap();
        let job = JobMessage {
            task_ix: 7,
            exec_ix: 0,
            kernel_ix: 1,
            n_params_out: 0,
            input_params: vec![],
            input_fifos: vec![],
            output_fifos: vec![],
            exec_constraints: vec![],
            notify_flags: vec![false],
        };
        let ix = comm.push_job(0, job.clone());
        comm.notify(0, RunnerNotification {
            sender: 0,
            kind: Notification::JobAdd { message_ix: ix },
        })
        .unwrap();
        let note = endpoint.notifications.recv().unwrap();
        let Notification::JobAdd { message_ix } = note.kind else {
            panic!("expected JobAdd");
        };
        assert_eq!(endpoint.job(message_ix).unwrap().task_ix, 7);
    }

    #[test]
    fn param_channel_rejects_foreign_messages() {
        let comm = Communicator::new(1);
        comm.param_sender()
            .send(GrtMessage::FinishedTask {
                sender: 0,
                exec_ix: 3,
            })
            .unwrap();
        assert!(matches!(
            comm.pop_param(),
            Err(CommError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn second_endpoint_take_fails() {
        let mut comm = Communicator::new(1);
        comm.take_endpoint(0).unwrap();
        assert!(matches!(comm.take_endpoint(0), Err(CommError::EndpointTaken(0))));
    }
}
