//! Session handle for controlling and observing a running monitor.

use std::sync::Arc;

use parking_lot::Mutex;
use ratewatch_types::Flag;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use crate::history::History;
use crate::state::{MonitorState, Shared};

/// A handle to a running monitor session.
///
/// Returned by [`crate::Monitor::start`]. Handles are cheap to clone and all
/// clones control the same session. Dropping every handle does not stop the
/// session; call [`stop`](Self::stop) or [`shutdown`](Self::shutdown).
///
/// # Example
///
/// ```rust,no_run
/// # use ratewatch_monitor::SessionHandle;
/// # async fn run(handle: SessionHandle) {
/// let mut updates = handle.subscribe();
/// while updates.changed().await.is_ok() {
///     let state = updates.borrow().clone();
///     if state.tick >= 10 {
///         break;
///     }
/// }
/// handle.shutdown().await;
/// # }
/// ```
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) shared: Arc<Shared>,
    pub(crate) task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    pub(crate) fn new(shared: Arc<Shared>, task: JoinHandle<()>) -> Self {
        Self {
            shared,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Stop the session.
    ///
    /// No `on_update` call starts after this returns, and an in-flight fetch
    /// is abandoned. Calling it again, or from inside `on_update`, is fine.
    ///
    /// From any other thread this waits for a running `on_update` call to
    /// return, so a slow callback makes `stop` slow.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Stop the session and wait for its task to finish.
    ///
    /// Only the first caller across clones waits; later calls return at once.
    pub async fn shutdown(self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "Monitor session panicked");
                }
            }
        }
    }

    /// Watch every update the session publishes.
    ///
    /// The receiver starts at the latest state. Flag expiry between ticks
    /// also publishes a new state.
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.shared.state_tx.subscribe()
    }

    /// The most recently published state.
    pub fn state(&self) -> MonitorState {
        self.shared.state_tx.borrow().clone()
    }

    /// Flags active right now.
    pub fn active_flags(&self) -> Vec<Flag> {
        self.shared.flags.lock().active(Instant::now())
    }

    /// A copy of the rate history recorded so far.
    pub fn history(&self) -> History {
        self.shared.history.read().clone()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
