//! The only sanctioned way into client state.
//!
//! The client's interface tree and renderer belong to one thread. The
//! [`OwnerContext`] moves a [`HostClient`] onto a dedicated thread and serves
//! two kinds of requests from other threads: run a closure against the
//! client, or hand over the next rendered frame.
//!
//! Both calls block the caller until the owner thread answers, so calling
//! either of them *from* the owner thread would wait on itself forever. That
//! is asserted against instead of deadlocking.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::RgbaImage;
use thiserror::Error;
use tokio::sync::oneshot;

use super::host::HostClient;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// Frame pacing of the owner thread (50 fps).
pub const FRAME_INTERVAL_MS: u64 = 20;

type OwnerTask<H> = Box<dyn FnOnce(&mut H) + Send + 'static>;

enum OwnerCommand<H> {
    Execute(OwnerTask<H>),
    NextFrame(oneshot::Sender<RgbaImage>),
    Shutdown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("owner context has shut down")]
    OwnerTerminated,
    #[error("owner context stopped before rendering the requested frame")]
    FrameDropped,
}

struct OwnerInner<H> {
    sender: mpsc::Sender<OwnerCommand<H>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    owner_thread: ThreadId,
}

impl<H> Drop for OwnerInner<H> {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if self.sender.send(OwnerCommand::Shutdown).is_err() {
                log_debug!("owner context already stopped");
            }

            // The last handle can be released by a task running on the owner
            // thread itself; it exits on its own once the loop sees Shutdown.
            if thread::current().id() == self.owner_thread {
                return;
            }

            if let Err(join_err) = handle.join() {
                log_error!("Failed to join owner context thread: {join_err:?}");
            }
        }
    }
}

/// Handle to the thread that owns the client. Cheap to clone.
pub struct OwnerContext<H> {
    inner: Arc<OwnerInner<H>>,
}

impl<H> Clone for OwnerContext<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: HostClient> OwnerContext<H> {
    pub fn spawn(host: H) -> Result<Self> {
        Self::with_frame_interval(host, Duration::from_millis(FRAME_INTERVAL_MS))
    }

    pub fn with_frame_interval(host: H, frame_interval: Duration) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<OwnerCommand<H>>();

        let worker = thread::Builder::new()
            .name("client-owner".into())
            .spawn(move || owner_loop(host, command_rx, frame_interval))
            .context("failed to spawn owner context thread")?;
        let owner_thread = worker.thread().id();

        log_info!(
            "Owner context started (frame interval {}ms)",
            frame_interval.as_millis()
        );

        Ok(Self {
            inner: Arc::new(OwnerInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
                owner_thread,
            }),
        })
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.inner.owner_thread
    }

    /// Runs `computation` on the owner thread and blocks until it returns.
    ///
    /// A panic inside `computation` is re-raised on the calling thread; the
    /// owner thread keeps serving.
    ///
    /// # Panics
    ///
    /// Panics when called from the owner thread, or from inside an async
    /// runtime (use `spawn_blocking`).
    pub fn run_on_owner_context<F, T>(&self, computation: F) -> Result<T, BridgeError>
    where
        F: FnOnce(&mut H) -> T + Send + 'static,
        T: Send + 'static,
    {
        assert!(
            !self.is_owner_thread(),
            "run_on_owner_context called on the owner thread; this would deadlock"
        );

        let (reply_tx, reply_rx) = oneshot::channel();
        let task: OwnerTask<H> = Box::new(move |host| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| computation(host)));
            if reply_tx.send(result).is_err() {
                log_debug!("owner context caller dropped before receiving result");
            }
        });

        self.inner
            .sender
            .send(OwnerCommand::Execute(task))
            .map_err(|_| BridgeError::OwnerTerminated)?;

        match reply_rx.blocking_recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(BridgeError::OwnerTerminated),
        }
    }

    /// Blocks until the owner thread renders its next frame and returns it.
    ///
    /// The listener is registered before the frame is requested, so the frame
    /// returned is always one drawn after this call started.
    ///
    /// # Panics
    ///
    /// Panics when called from the owner thread: that thread is the one that
    /// would have to draw the frame.
    pub fn await_next_frame(&self) -> Result<RgbaImage, BridgeError> {
        assert!(
            !self.is_owner_thread(),
            "await_next_frame called on the owner thread; this would deadlock"
        );

        let (frame_tx, frame_rx) = oneshot::channel();
        self.inner
            .sender
            .send(OwnerCommand::NextFrame(frame_tx))
            .map_err(|_| BridgeError::OwnerTerminated)?;

        frame_rx.blocking_recv().map_err(|_| BridgeError::FrameDropped)
    }
}

fn owner_loop<H: HostClient>(
    mut host: H,
    commands: mpsc::Receiver<OwnerCommand<H>>,
    frame_interval: Duration,
) {
    let mut frame_listeners: Vec<oneshot::Sender<RgbaImage>> = Vec::new();
    let mut next_frame_at = Instant::now() + frame_interval;

    loop {
        let wait = next_frame_at.saturating_duration_since(Instant::now());
        match commands.recv_timeout(wait) {
            Ok(OwnerCommand::Execute(task)) => task(&mut host),
            Ok(OwnerCommand::NextFrame(listener)) => frame_listeners.push(listener),
            Ok(OwnerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        if now >= next_frame_at {
            // Only draw when someone is waiting on the frame.
            if !frame_listeners.is_empty() {
                let frame = host.render_frame();
                log_debug!(
                    "Rendered {}x{} frame for {} listener(s)",
                    frame.width(),
                    frame.height(),
                    frame_listeners.len()
                );
                for listener in frame_listeners.drain(..) {
                    let _ = listener.send(frame.clone());
                }
            }
            next_frame_at = now + frame_interval;
        }
    }

    log_info!("Owner context shutting down");
}
