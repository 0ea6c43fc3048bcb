//! Synchronous-looking futures over a background worker pool (spec §5,
//! §9 "Exceptions for control flow"/async design note), grounded in
//! `rdms::thread::Thread`'s gen-server pattern: a pool of worker threads
//! takes closures off an `mpsc` channel and replies on a one-shot
//! channel, and callers block on [`Handle::wait`] at the documented
//! suspension points instead of the contract exposing `async fn`.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A value that will become available once the worker pool finishes the
/// job that produces it. `.wait()` blocks the calling thread; this is
/// the synchronous substitute for `async fn` described in spec §9.
pub struct Handle<T> {
    rx: mpsc::Receiver<Result<T>>,
}

impl<T> Handle<T> {
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| Error::unexpected("worker pool dropped without a reply"))?
    }
}

/// Fixed-size thread pool executing submitted closures (spec §5: "an
/// internal worker pool"). Sized from `num_cpus` the same way the
/// teacher sizes its background threads.
pub struct WorkerPool {
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            let rx = Arc::clone(&rx);
            workers.push(thread::spawn(move || loop {
                let job = {
                    let rx = rx.lock().unwrap();
                    rx.recv()
                };
                match job {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            }));
        }
        WorkerPool { tx: Some(tx), workers }
    }

    pub fn with_default_size() -> Self {
        WorkerPool::new(num_cpus::get())
    }

    /// Submits `job` and returns a [`Handle`] that resolves to its
    /// result once a worker runs it.
    pub fn submit<T, F>(&self, job: F) -> Handle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();
        let task: Job = Box::new(move || {
            let _ = result_tx.send(job());
        });
        // A full/disconnected pool should not panic the caller; surface
        // it as an Unexpected error the first time `.wait()` is called.
        let sent = self.tx.as_ref().map(|tx| tx.send(task));
        if !matches!(sent, Some(Ok(()))) {
            let (tx, rx) = mpsc::channel();
            let _ = tx.send(Err(Error::unexpected("worker pool is shut down")));
            return Handle { rx };
        }
        Handle { rx: result_rx }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Close the job channel first so worker threads observe a
        // disconnected `recv()` and exit their loop instead of blocking
        // `join()` forever.
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
