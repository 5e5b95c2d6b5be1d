//! Bounded OS-thread worker pool.
//!
//! Per-file work is dominated by waiting on child subprocesses and blocking
//! tag I/O, so plain threads are the right scheduling model; there is no
//! async runtime anywhere in the core. Tasks flow through a bounded
//! channel of capacity `2 * workers`: once the window is full, `submit`
//! blocks the planner's feed, which keeps peak outstanding work O(workers)
//! regardless of plan size.
//!
//! Cancellation is cooperative: tasks observe a [`CancelToken`] at their
//! boundaries (and pass it to child processes); the pool itself never
//! interrupts a running task. Pausing holds a gate the workers check
//! between tasks; in-flight tasks run to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::{Error, Result};

/// Cooperative cancellation flag shared across the run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Binary gate the dispatcher holds while paused.
#[derive(Debug, Clone)]
pub struct PauseGate {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self {
            state: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        let (lock, _) = &*self.state;
        if let Ok(mut paused) = lock.lock() {
            *paused = true;
        }
    }

    pub fn resume(&self) {
        let (lock, cvar) = &*self.state;
        if let Ok(mut paused) = lock.lock() {
            *paused = false;
        }
        cvar.notify_all();
    }

    /// Block while the gate is held.
    pub fn wait_ready(&self) {
        let (lock, cvar) = &*self.state;
        if let Ok(mut paused) = lock.lock() {
            while *paused {
                match cvar.wait(paused) {
                    Ok(guard) => paused = guard,
                    Err(_) => return,
                }
            }
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of worker threads fed through a bounded channel.
pub struct WorkerPool {
    tx: Option<SyncSender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads. Submissions beyond `2 * workers` in flight
    /// block the submitter.
    pub fn new(workers: usize, gate: PauseGate) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = sync_channel::<Job>(2 * workers);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|i| {
                let rx = Arc::clone(&rx);
                let gate = gate.clone();
                std::thread::Builder::new()
                    .name(format!("pac-worker-{i}"))
                    .spawn(move || worker_loop(rx, gate))
                    .expect("spawning a worker thread")
            })
            .collect();

        Self {
            tx: Some(tx),
            workers: handles,
        }
    }

    /// Hand a task to the pool, blocking while the window is full.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::Pool("pool already shut down".into()))?;
        tx.send(Box::new(job))
            .map_err(|_| Error::Pool("all workers exited".into()))
    }

    /// Close the queue and wait for every queued task to finish.
    pub fn join(mut self) -> Result<()> {
        self.tx.take();
        let mut failed = 0usize;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(Error::Pool(format!("{failed} worker(s) panicked")));
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<Job>>>, gate: PauseGate) {
    loop {
        gate.wait_ready();
        let job = {
            let Ok(guard) = rx.lock() else { return };
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => return, // queue closed and drained
        }
    }
}
