//! Async/sync bridge.
//!
//! One dedicated thread owns a tokio current-thread runtime and drives it
//! until [`AsyncBridge::stop`] is called. Any other thread can hand it a
//! future and block until the future completes; the loop thread interleaves
//! all submitted futures cooperatively.
//!
//! The blocking UI thread never awaits anything itself: it submits work from
//! short-lived worker threads and receives results over a channel.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;

const LOOP_THREAD_NAME: &str = "deskpilot-bridge";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("async loop unavailable (bridge stopped)")]
    LoopUnavailable,

    #[error("blocking wait issued from the bridge loop thread")]
    OnLoopThread,

    #[error("task panicked: {}", panic_message(.0))]
    TaskPanicked(Box<dyn Any + Send + 'static>),

    #[error("failed to start bridge loop: {0}")]
    Spawn(#[source] std::io::Error),
}

impl BridgeError {
    /// Returns the original panic payload, if this error carries one.
    /// Pass it to `std::panic::resume_unwind` to re-raise the panic.
    pub fn into_panic(self) -> Option<Box<dyn Any + Send + 'static>> {
        match self {
            BridgeError::TaskPanicked(payload) => Some(payload),
            _ => None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

struct LoopState {
    stopped: bool,
    shutdown: Option<oneshot::Sender<()>>,
}

/// Handle to the background loop. Cheap to share behind an `Arc`.
pub struct AsyncBridge {
    handle: Handle,
    tracker: TaskTracker,
    state: Mutex<LoopState>,
    loop_thread: ThreadId,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    next_task_id: AtomicU64,
}

impl AsyncBridge {
    /// Spawn the loop thread and start driving the runtime.
    pub fn start() -> Result<Self, BridgeError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(BridgeError::Spawn)?;
        let handle = runtime.handle().clone();
        let tracker = TaskTracker::new();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let loop_tracker = tracker.clone();
        let join_handle = thread::Builder::new()
            .name(LOOP_THREAD_NAME.into())
            .spawn(move || {
                tracing::debug!("bridge loop started");
                runtime.block_on(async move {
                    // A dropped sender also counts as a stop request.
                    let _ = shutdown_rx.await;
                    loop_tracker.close();
                    tracing::debug!(in_flight = loop_tracker.len(), "bridge draining");
                    loop_tracker.wait().await;
                });
                tracing::debug!("bridge loop exited");
            })
            .map_err(BridgeError::Spawn)?;

        Ok(Self {
            handle,
            tracker,
            state: Mutex::new(LoopState {
                stopped: false,
                shutdown: Some(shutdown_tx),
            }),
            loop_thread: join_handle.thread().id(),
            join_handle: Mutex::new(Some(join_handle)),
            next_task_id: AtomicU64::new(1),
        })
    }

    /// Runtime handle of the loop, for fire-and-forget spawns.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        !self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stopped
    }

    /// Schedule `work` on the loop thread without blocking.
    pub fn submit<F>(&self, work: F) -> Result<BridgeTask<F::Output>, BridgeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let finished = Arc::new(AtomicBool::new(false));
        let (slot_tx, slot_rx) = std_mpsc::sync_channel(1);

        // Holding the state lock across the spawn makes "check stopped, then
        // spawn" atomic with respect to `stop`.
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.stopped {
            return Err(BridgeError::LoopUnavailable);
        }
        let done = finished.clone();
        self.tracker.spawn_on(
            async move {
                let outcome = AssertUnwindSafe(work).catch_unwind().await;
                let _ = slot_tx.send(outcome);
                done.store(true, Ordering::Release);
            },
            &self.handle,
        );
        drop(state);

        tracing::trace!(task_id = id, "bridge task scheduled");
        Ok(BridgeTask {
            slot: slot_rx,
            finished,
            loop_thread: self.loop_thread,
        })
    }

    /// Schedule `work` and block the calling thread until it finishes.
    ///
    /// The future's output comes back untouched, so a `Result` produced by
    /// the work keeps its original error value. A panic inside the work is
    /// returned as [`BridgeError::TaskPanicked`] with the original payload.
    pub fn submit_and_wait<F>(&self, work: F) -> Result<F::Output, BridgeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if thread::current().id() == self.loop_thread {
            return Err(BridgeError::OnLoopThread);
        }
        self.submit(work)?.wait()
    }

    /// Ask the loop to finish. Running tasks are allowed to complete; new
    /// submissions fail with [`BridgeError::LoopUnavailable`].
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.stopped {
            return;
        }
        state.stopped = true;
        if let Some(tx) = state.shutdown.take() {
            let _ = tx.send(());
        }
        tracing::info!("bridge stop requested");
    }

    /// Stop the loop and wait for its thread to exit.
    pub fn join(&self) -> Result<(), BridgeError> {
        self.stop();
        if thread::current().id() == self.loop_thread {
            return Err(BridgeError::OnLoopThread);
        }
        let handle = self
            .join_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.join().map_err(BridgeError::TaskPanicked)?;
        }
        Ok(())
    }
}

impl Drop for AsyncBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One unit of work scheduled on the loop. The completion slot is written
/// once by the loop thread and read once by whoever calls [`BridgeTask::wait`].
pub struct BridgeTask<T> {
    slot: std_mpsc::Receiver<std::thread::Result<T>>,
    finished: Arc<AtomicBool>,
    loop_thread: ThreadId,
}

impl<T> BridgeTask<T> {
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Block until the work completes and take its result.
    pub fn wait(self) -> Result<T, BridgeError> {
        if thread::current().id() == self.loop_thread {
            return Err(BridgeError::OnLoopThread);
        }
        match self.slot.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(BridgeError::TaskPanicked(payload)),
            // The task was dropped without running to completion.
            Err(_) => Err(BridgeError::LoopUnavailable),
        }
    }
}
