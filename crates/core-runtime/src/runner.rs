//! In-process worker runners, one thread per LRT.
//!
//! A runner is a cooperative single-threaded loop over its own notification
//! queue. `JobAdd` fetches the referenced job message, blocks on its
//! execution constraints (cross-LRT stamps), assembles input buffers
//! (including `RMerge` views), invokes the kernel, publishes outputs, then
//! stamps completion. Everything else on the queue is bookkeeping:
//! iteration markers, deferred count updates, parameter reset.

use core_comm::{Fifo, FifoAttribute, GrtMessage, Notification, RunnerEndpoint};
use core_platform::{KernelRegistry, MemoryPool};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

/// Shared completion stamps: per LRT, the highest finished exec index.
/// Runners block here to honor execution constraints.
#[derive(Debug)]
pub struct StampBoard {
    stamps: Mutex<Vec<Option<u32>>>,
    signal: Condvar,
}

impl StampBoard {
    pub fn new(lrt_count: usize) -> Self {
        Self {
            stamps: Mutex::new(vec![None; lrt_count]),
            signal: Condvar::new(),
        }
    }

    pub fn record(&self, lrt: u32, exec_ix: u32) {
        let mut stamps = self.stamps.lock().unwrap_or_else(|p| p.into_inner());
        let slot = &mut stamps[lrt as usize];
        if slot.is_none_or(|s| s < exec_ix) {
            *slot = Some(exec_ix);
        }
        self.signal.notify_all();
    }

    /// Block until the runner of `lrt` has finished local exec index
    /// `exec_ix`.
    pub fn wait_for(&self, lrt: u32, exec_ix: u32) {
        let mut stamps = self.stamps.lock().unwrap_or_else(|p| p.into_inner());
        while stamps[lrt as usize].is_none_or(|s| s < exec_ix) {
            stamps = self
                .signal
                .wait(stamps)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    pub fn reset(&self) {
        let mut stamps = self.stamps.lock().unwrap_or_else(|p| p.into_inner());
        stamps.fill(None);
    }
}

/// Spawn the worker thread for one LRT. The thread exits when the GRT drops
/// its side of the queues.
pub fn spawn_runner(
    endpoint: RunnerEndpoint,
    pool: Arc<MemoryPool>,
    kernels: Arc<KernelRegistry>,
    board: Arc<StampBoard>,
) -> JoinHandle<()> {
    let lrt = endpoint.lrt;
    std::thread::Builder::new()
        .name(format!("lrt-{lrt}"))
        .spawn(move || runner_loop(endpoint, pool, kernels, board))
        .expect("spawn runner thread")
}

fn runner_loop(
    endpoint: RunnerEndpoint,
    pool: Arc<MemoryPool>,
    kernels: Arc<KernelRegistry>,
    board: Arc<StampBoard>,
) {
    let lrt = endpoint.lrt;
    // Address remembered between a MemUpdateAddr / MemUpdateCount pair.
    let mut update_address: Option<u64> = None;
    debug!(target: "runner", lrt, "runner_started");
    loop {
        let notification = match endpoint.notifications.recv() {
            Ok(n) => n,
            Err(_) => break,
        };
        match notification.kind {
            Notification::JobAdd { message_ix } => {
                let Some(job) = endpoint.job(message_ix) else {
                    warn!(target: "runner", lrt, message_ix, "job_message_missing");
                    continue;
                };
                run_job(&endpoint, &pool, &kernels, &board, lrt, job);
            }
            Notification::BroadcastJobstamp { exec_ix } => {
                board.record(lrt, exec_ix);
            }
            Notification::MemUpdateAddr { address } => {
                update_address = Some(address);
            }
            Notification::MemUpdateCount { count } => {
                if let Some(address) = update_address.take() {
                    pool.add_count(0, address, count);
                    trace!(target: "runner", lrt, address, count, "deferred_count_applied");
                } else {
                    warn!(target: "runner", lrt, count, "count_update_without_address");
                }
            }
            Notification::LrtStartIteration => {
                trace!(target: "runner", lrt, "iteration_started");
            }
            Notification::LrtEndIteration => {
                trace!(target: "runner", lrt, "iteration_ended");
            }
            Notification::Clear | Notification::Reset => {
                update_address = None;
            }
            Notification::Repeat => {}
        }
    }
    debug!(target: "runner", lrt, "runner_stopped");
}

fn run_job(
    endpoint: &RunnerEndpoint,
    pool: &MemoryPool,
    kernels: &KernelRegistry,
    board: &StampBoard,
    lrt: u32,
    job: core_comm::JobMessage,
) {
    // Honor cross-LRT ordering before touching any buffer.
    for (wait_lrt, wait_ix) in &job.exec_constraints {
        board.wait_for(*wait_lrt, *wait_ix);
    }

    let (inputs, owned_reads) = gather_inputs(pool, &job.input_fifos);
    let mut outputs: Vec<Vec<u8>> = job
        .output_fifos
        .iter()
        .map(|f| vec![0u8; f.size as usize])
        .collect();
    let mut output_params = vec![0i64; job.n_params_out as usize];

    let executed = if let Some(kernel) = kernels.get(job.kernel_ix) {
        let input_refs: Vec<&[u8]> = inputs.iter().map(Vec::as_slice).collect();
        let mut output_refs: Vec<&mut [u8]> =
            outputs.iter_mut().map(Vec::as_mut_slice).collect();
        kernel(&job.input_params, &mut output_params, &input_refs, &mut output_refs);
        true
    } else if job.kernel_ix != u32::MAX {
        warn!(target: "runner", lrt, kernel = job.kernel_ix, "unknown_kernel");
        false
    } else if inputs.len() == 1
        && outputs.len() == 1
        && inputs[0].len() == outputs[0].len()
    {
        // Kernel-less single-port plumbing (repeat, sync chains) copies
        // through.
        outputs[0].copy_from_slice(&inputs[0]);
        true
    } else {
        // Kernel-less fork/duplicate: outputs are views into the producer's
        // buffer, the bytes are already in place.
        false
    };

    for (fifo, data) in job.output_fifos.iter().zip(&outputs) {
        match fifo.attribute {
            FifoAttribute::Dummy => {}
            FifoAttribute::RwOnly | FifoAttribute::ROnly => {
                if executed {
                    pool.write(0, fifo.address, u64::from(fifo.offset), data);
                }
            }
            _ => {
                if executed {
                    pool.write(0, fifo.address, u64::from(fifo.offset), data);
                }
                pool.add_count(0, fifo.address, fifo.count);
            }
        }
    }

    // Drop our read references; buffers free once every consumer passed.
    for address in owned_reads {
        pool.release(0, address);
    }

    if job.n_params_out > 0 {
        let _ = endpoint.params.send(GrtMessage::JobSentParam {
            sender: lrt,
            task_ix: job.task_ix,
            values: output_params,
        });
    }
    board.record(lrt, job.exec_ix);
    let _ = endpoint.finished.send(GrtMessage::FinishedTask {
        sender: lrt,
        exec_ix: job.exec_ix,
    });
    trace!(target: "runner", lrt, task = job.task_ix, exec = job.exec_ix, "job_finished");
}

/// Materialize the input buffers. An `RMerge` header is followed by its
/// constituents; they are concatenated into one logical input.
fn gather_inputs(pool: &MemoryPool, fifos: &[Fifo]) -> (Vec<Vec<u8>>, Vec<u64>) {
    let mut inputs = Vec::new();
    let mut owned_reads = Vec::new();
    let mut ix = 0;
    while ix < fifos.len() {
        let fifo = &fifos[ix];
        match fifo.attribute {
            FifoAttribute::RMerge => {
                let constituents = fifo.offset as usize;
                let mut merged = Vec::with_capacity(fifo.size as usize);
                for sub in &fifos[ix + 1..ix + 1 + constituents] {
                    merged.extend(pool.read(
                        0,
                        sub.address,
                        u64::from(sub.offset),
                        sub.size as usize,
                    ));
                    if sub.attribute == FifoAttribute::ROwn {
                        owned_reads.push(sub.address);
                    }
                }
                // Publish the merged view at the header's address so later
                // readers of the merge buffer see it assembled.
                pool.write(0, fifo.address, 0, &merged);
                inputs.push(merged);
                ix += 1 + constituents;
            }
            FifoAttribute::Dummy => {
                inputs.push(Vec::new());
                ix += 1;
            }
            _ => {
                inputs.push(pool.read(
                    0,
                    fifo.address,
                    u64::from(fifo.offset),
                    fifo.size as usize,
                ));
                if fifo.attribute == FifoAttribute::ROwn {
                    owned_reads.push(fifo.address);
                }
                ix += 1;
            }
        }
    }
    (inputs, owned_reads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_board_orders_waits() {
        let board = Arc::new(StampBoard::new(2));
        let waiter = {
            let board = board.clone();
            std::thread::spawn(move || {
                board.wait_for(0, 3);
                true
            })
        };
        board.record(0, 1);
        board.record(0, 3);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn merge_inputs_concatenate() {
        let pool = MemoryPool::new(1);
        pool.write(0, 100, 0, &[1, 2]);
        pool.write(0, 200, 0, &[3, 4]);
        let fifos = [
            Fifo {
                address: 500,
                offset: 2,
                size: 4,
                count: 1,
                attribute: FifoAttribute::RMerge,
            },
            Fifo {
                address: 100,
                offset: 0,
                size: 2,
                count: 0,
                attribute: FifoAttribute::ROnly,
            },
            Fifo {
                address: 200,
                offset: 0,
                size: 2,
                count: 0,
                attribute: FifoAttribute::ROnly,
            },
        ];
        let (inputs, owned) = gather_inputs(&pool, &fifos);
        assert_eq!(inputs, vec![vec![1, 2, 3, 4]]);
        assert!(owned.is_empty());
        assert_eq!(pool.read(0, 500, 0, 4), vec![1, 2, 3, 4]);
    }
}
