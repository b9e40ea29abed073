//! Session state shared between the session task and its handles.

use std::cell::Cell;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use ratewatch_types::{Flag, Snapshot};
use serde::Serialize;
use tokio::sync::watch;

use crate::alerts::Alert;
use crate::flags::FlagSet;
use crate::history::History;
use crate::source::SourceMode;

/// What subscribers and outputs see after every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorState {
    /// Number of completed ticks. Zero until the first snapshot.
    pub tick: u64,
    /// Latest snapshot.
    pub snapshot: Option<Snapshot>,
    /// Active flags, ordered by key.
    pub flags: Vec<Flag>,
    /// Source mode after the latest tick.
    pub mode: SourceMode,
    /// Alerts triggered by the latest tick.
    pub alerts: Vec<Alert>,
}

impl MonitorState {
    /// True if the latest snapshot carries no live data or the source has
    /// given up on the provider for now.
    pub fn is_degraded(&self) -> bool {
        self.mode == SourceMode::Hybrid
            || self
                .snapshot
                .as_ref()
                .is_some_and(|s| !s.provenance.has_live_data())
    }

    /// Whether `key` has an active flag.
    pub fn is_flagged(&self, key: &str) -> bool {
        self.flags.iter().any(|f| f.key == key)
    }
}

/// State owned by one session.
///
/// Only the session task mutates `flags` and `history`; handles read them.
pub(crate) struct Shared {
    /// Stop flag. Held while `on_update` runs, so `stop()` from another
    /// thread waits for the callback and a stop from inside it re-enters.
    pub(crate) stopped: ReentrantMutex<Cell<bool>>,
    pub(crate) stop_tx: watch::Sender<bool>,
    pub(crate) state_tx: watch::Sender<MonitorState>,
    pub(crate) flags: Mutex<FlagSet>,
    pub(crate) history: RwLock<History>,
}

impl Shared {
    pub(crate) fn new(flags: FlagSet, history: History) -> (Self, watch::Receiver<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, _) = watch::channel(MonitorState::default());
        let shared = Self {
            stopped: ReentrantMutex::new(Cell::new(false)),
            stop_tx,
            state_tx,
            flags: Mutex::new(flags),
            history: RwLock::new(history),
        };
        (shared, stop_rx)
    }

    /// Mark the session stopped. Returns false if it already was.
    pub(crate) fn stop(&self) -> bool {
        let gate = self.stopped.lock();
        if gate.replace(true) {
            return false;
        }
        drop(gate);
        self.stop_tx.send_replace(true);
        true
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.lock().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewatch_types::Provenance;
    use std::time::Duration;

    #[test]
    fn default_state_is_empty() {
        let state = MonitorState::default();
        assert_eq!(state.tick, 0);
        assert!(state.snapshot.is_none());
        assert!(!state.is_degraded());
    }

    #[test]
    fn synthetic_snapshot_is_degraded() {
        let state = MonitorState {
            tick: 1,
            snapshot: Some(
                Snapshot::builder()
                    .provenance(Provenance::Synthetic)
                    .rate("EUR", 1.0)
                    .build(),
            ),
            ..Default::default()
        };
        assert!(state.is_degraded());
    }

    #[test]
    fn state_serializes_to_json() {
        let state = MonitorState {
            tick: 3,
            snapshot: Some(Snapshot::builder().timestamp_ms(5).rate("EUR", 0.9).build()),
            mode: SourceMode::Hybrid,
            ..Default::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["tick"], 3);
        assert_eq!(json["mode"], "hybrid");
        assert_eq!(json["snapshot"]["provenance"], "live");
        assert_eq!(json["snapshot"]["rates"]["EUR"], 0.9);
    }

    #[test]
    fn stop_from_another_thread_waits_for_the_gate() {
        let (shared, _stop_rx) =
            Shared::new(FlagSet::new(Duration::from_secs(1)), History::new(2));
        let shared = std::sync::Arc::new(shared);

        // Held as during an `on_update` call.
        let gate = shared.stopped.lock();
        let stopper = {
            let shared = shared.clone();
            std::thread::spawn(move || shared.stop())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!stopper.is_finished());
        assert!(!gate.get());

        drop(gate);
        assert!(stopper.join().unwrap());
        assert!(shared.is_stopped());
    }

    #[test]
    fn stop_is_idempotent_and_reentrant() {
        let (shared, stop_rx) = Shared::new(FlagSet::new(Duration::from_secs(1)), History::new(2));

        let gate = shared.stopped.lock();
        assert!(!gate.get());
        // Same thread, lock already held.
        assert!(shared.stop());
        drop(gate);

        assert!(!shared.stop());
        assert!(shared.is_stopped());
        assert!(*stop_rx.borrow());
    }
}
