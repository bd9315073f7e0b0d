//! Single-slot background task queue for deferred decodes.
//!
//! One thread runs submitted jobs strictly in FIFO order, so at most one decode is ever in
//! flight. [`DecodeWorker::cancel_and_wait`] discards queued jobs and blocks until the job
//! currently running (if any) has returned.

use std::io;
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender, unbounded};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Task {
    Run(Job),
    Barrier(Sender<()>),
    Shutdown,
}

pub struct DecodeWorker {
    tx: Sender<Task>,
    rx: Receiver<Task>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DecodeWorker {
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (tx, rx) = unbounded::<Task>();
        let worker_rx = rx.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(worker_rx))?;
        Ok(Self {
            tx,
            rx,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue `job` behind everything already submitted.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Task::Run(Box::new(job))).is_ok()
    }

    /// Drop every queued job, then wait for the running one to finish.
    ///
    /// Returns the number of discarded jobs. Called from the worker thread itself it only
    /// discards, since waiting there would never return.
    pub fn cancel_and_wait(&self) -> usize {
        let mut cancelled = 0;
        while let Ok(task) = self.rx.try_recv() {
            match task {
                Task::Run(_) => cancelled += 1,
                Task::Barrier(done) => {
                    let _ = done.send(());
                }
                Task::Shutdown => {
                    let _ = self.tx.send(Task::Shutdown);
                    break;
                }
            }
        }
        if cancelled > 0 {
            tracing::debug!(cancelled, "discarded queued decode jobs");
        }
        self.wait_idle();
        cancelled
    }

    /// Block until every job submitted so far has run.
    pub fn wait_idle(&self) {
        if thread::current().id() == self.thread_id {
            return;
        }
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        if self.tx.send(Task::Barrier(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(Task::Shutdown);
        if thread::current().id() == self.thread_id {
            return;
        }
        let handle = self
            .handle
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("decode worker panicked");
            }
        }
    }
}

fn run(rx: Receiver<Task>) {
    while let Ok(task) = rx.recv() {
        match task {
            Task::Run(job) => job(),
            Task::Barrier(done) => {
                let _ = done.send(());
            }
            Task::Shutdown => break,
        }
    }
    tracing::debug!("decode worker exiting");
}
