use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use crate::foundation::error::{LumaError, LumaResult};
use crate::graph::pipeline::Pipeline;

type Job = Box<dyn FnOnce(&mut Pipeline) + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

/// Cloneable entry point to a [`ProcessingQueue`] usable from any thread.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<Message>,
    thread: ThreadId,
}

impl QueueHandle {
    /// Whether the calling thread is the queue's own thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Enqueue `job` and return immediately.
    pub fn run_async(&self, job: impl FnOnce(&mut Pipeline) + Send + 'static) -> LumaResult<()> {
        self.tx
            .send(Message::Run(Box::new(job)))
            .map_err(|_| LumaError::queue("processing queue has shut down"))
    }

    /// Run `job` on the queue and wait for its result. Jobs run in submission order, so
    /// this also waits for everything enqueued before it.
    ///
    /// Calling this from the queue's own thread would deadlock and is rejected.
    pub fn run_sync<R: Send + 'static>(
        &self,
        job: impl FnOnce(&mut Pipeline) -> R + Send + 'static,
    ) -> LumaResult<R> {
        if self.is_current() {
            return Err(LumaError::queue(
                "run_sync called from the processing queue itself",
            ));
        }
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        self.run_async(move |pipeline| {
            let _ = done_tx.send(job(pipeline));
        })?;
        done_rx
            .recv()
            .map_err(|_| LumaError::queue("processing queue stopped before the job finished"))
    }
}

/// The single serialized execution context that owns a [`Pipeline`].
///
/// Every graph mutation and GPU call happens on the queue's thread; other threads
/// marshal work onto it through a [`QueueHandle`]. Dropping the queue drains pending
/// jobs and joins the thread.
pub struct ProcessingQueue {
    handle: QueueHandle,
    join: Option<JoinHandle<Pipeline>>,
}

impl ProcessingQueue {
    /// Move `pipeline` onto a new thread named `label`.
    pub fn spawn(mut pipeline: Pipeline, label: &str) -> LumaResult<Self> {
        let (tx, rx) = mpsc::channel::<Message>();
        let join = thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                pipeline.bind_to_current_thread();
                tracing::debug!(backend = pipeline.backend_name(), "processing queue started");
                while let Ok(message) = rx.recv() {
                    match message {
                        Message::Run(job) => job(&mut pipeline),
                        Message::Shutdown => break,
                    }
                }
                tracing::debug!("processing queue stopped");
                pipeline
            })?;
        let handle = QueueHandle {
            tx,
            thread: join.thread().id(),
        };
        Ok(Self {
            handle,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn is_current(&self) -> bool {
        self.handle.is_current()
    }

    pub fn run_async(&self, job: impl FnOnce(&mut Pipeline) + Send + 'static) -> LumaResult<()> {
        self.handle.run_async(job)
    }

    pub fn run_sync<R: Send + 'static>(
        &self,
        job: impl FnOnce(&mut Pipeline) -> R + Send + 'static,
    ) -> LumaResult<R> {
        self.handle.run_sync(job)
    }

    /// Finish pending jobs, stop the thread and hand the pipeline back, confined to the
    /// calling thread.
    pub fn shutdown(mut self) -> LumaResult<Pipeline> {
        let mut pipeline = self.stop()?;
        pipeline.bind_to_current_thread();
        Ok(pipeline)
    }

    fn stop(&mut self) -> LumaResult<Pipeline> {
        let join = self
            .join
            .take()
            .ok_or_else(|| LumaError::queue("processing queue already stopped"))?;
        let _ = self.handle.tx.send(Message::Shutdown);
        join.join()
            .map_err(|_| LumaError::queue("processing queue thread panicked"))
    }
}

impl Drop for ProcessingQueue {
    fn drop(&mut self) {
        if self.join.is_some()
            && let Err(err) = self.stop()
        {
            tracing::warn!(error = %err, "processing queue did not stop cleanly");
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/graph/queue.rs"]
mod tests;
