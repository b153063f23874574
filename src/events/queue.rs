//! Serial callback execution context.
//!
//! Completion callbacks and event handlers never run on the I/O task or under
//! a lock: they are posted here and executed one at a time, in posting order,
//! by a dedicated task.
//!
//! ```text
//! I/O task ──────┐
//! Timer tasks ───┼─► mpsc::UnboundedSender<Callback> ─► Callback Task
//! Session API ───┘
//! ```

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Handle for posting callbacks. Cheaply cloneable.
#[derive(Clone)]
pub struct CallbackQueue {
    tx: mpsc::UnboundedSender<Callback>,
}

impl CallbackQueue {
    /// Post a callback.
    ///
    /// If the callback task has already stopped, the callback runs inline so
    /// that a completion is never lost.
    pub fn dispatch<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(mpsc::error::SendError(callback)) = self.tx.send(Box::new(callback)) {
            callback();
        }
    }
}

/// Spawn the callback task.
///
/// The task ends once every `CallbackQueue` clone has been dropped and the
/// remaining callbacks have run.
pub fn spawn_callback_queue() -> (CallbackQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Callback>();

    let task = tokio::spawn(async move {
        while let Some(callback) = rx.recv().await {
            callback();
        }
    });

    (CallbackQueue { tx }, task)
}
