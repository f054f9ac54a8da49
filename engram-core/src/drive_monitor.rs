//! Optical drive monitor (spec.md §4.1).
//!
//! Polls a pluggable [`OpticalDriveSource`] on a ticker and emits ordered
//! `(drive_id, event, volume_label)` events through the [`EventBroadcaster`].
//! Per spec.md §9 "Background polling -> cancellable loops", the poll loop
//! is bound to a shutdown channel and exits promptly rather than running a
//! detached, unkillable task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::broadcaster::EventBroadcaster;

/// One optical drive's disc presence at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveSnapshot {
    pub drive_id: String,
    pub has_disc: bool,
    pub volume_label: String,
}

/// Hardware abstraction the monitor polls. Production code backs this
/// with OS drive enumeration; tests back it with a fixed or scripted
/// sequence of snapshots.
pub trait OpticalDriveSource: Send + Sync {
    fn enumerate(&self) -> Vec<DriveSnapshot>;

    /// Best-effort tray eject. Never blocks the poll loop; a platform
    /// without drive access (or without a real optical drive) simply
    /// returns `false`.
    fn eject(&self, drive_id: &str) -> bool;
}

/// [`OpticalDriveSource`] backed by nothing: used where the host has no
/// optical media API available (most non-Windows CI and container
/// environments). Always reports zero drives.
#[derive(Debug, Default)]
pub struct NullDriveSource;

impl OpticalDriveSource for NullDriveSource {
    fn enumerate(&self) -> Vec<DriveSnapshot> {
        Vec::new()
    }

    fn eject(&self, drive_id: &str) -> bool {
        debug!(drive_id, "eject requested but no drive source is configured");
        false
    }
}

pub struct DriveMonitor {
    source: Arc<dyn OpticalDriveSource>,
    broadcaster: Arc<EventBroadcaster>,
    poll_interval: Duration,
    states: SyncMutex<HashMap<String, bool>>,
    shutdown_tx: SyncMutex<Option<mpsc::Sender<()>>>,
}

impl DriveMonitor {
    pub fn new(
        source: Arc<dyn OpticalDriveSource>,
        broadcaster: Arc<EventBroadcaster>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            broadcaster,
            poll_interval,
            states: SyncMutex::new(HashMap::new()),
            shutdown_tx: SyncMutex::new(None),
        }
    }

    /// Enumerates drives once, establishes the empty/present baseline, and
    /// emits a synthetic `inserted` for anything already holding a disc.
    /// Spawns the poll loop and returns immediately.
    pub fn start(self: &Arc<Self>) {
        if self.shutdown_tx.lock().is_some() {
            return;
        }

        let mut states = self.states.lock();
        let mut already_present = Vec::new();
        for snapshot in self.source.enumerate() {
            states.insert(snapshot.drive_id.clone(), snapshot.has_disc);
            if snapshot.has_disc {
                already_present.push(snapshot);
            }
        }
        drop(states);

        info!(
            drives = self.states.lock().len(),
            "drive monitor started"
        );

        for snapshot in already_present {
            self.broadcaster
                .drive_event(&snapshot.drive_id, true, &snapshot.volume_label);
        }

        let (tx, rx) = mpsc::channel(1);
        *self.shutdown_tx.lock() = Some(tx);

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.poll_loop(rx).await;
        });
    }

    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            // A closed sender is enough; the loop selects on recv() and a
            // dropped sender resolves that immediately.
            drop(tx);
        }
        info!("drive monitor stopped");
    }

    pub fn eject(&self, drive_id: &str) -> bool {
        self.source.eject(drive_id)
    }

    async fn poll_loop(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once(),
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!("drive monitor poll loop exiting");
    }

    fn poll_once(&self) {
        let snapshots = self.source.enumerate();
        let mut states = self.states.lock();
        for snapshot in snapshots {
            let previous = states.get(&snapshot.drive_id).copied();
            match previous {
                None => {
                    states.insert(snapshot.drive_id.clone(), snapshot.has_disc);
                    if snapshot.has_disc {
                        self.broadcaster
                            .drive_event(&snapshot.drive_id, true, &snapshot.volume_label);
                    }
                }
                Some(had_disc) if had_disc != snapshot.has_disc => {
                    states.insert(snapshot.drive_id.clone(), snapshot.has_disc);
                    self.broadcaster.drive_event(
                        &snapshot.drive_id,
                        snapshot.has_disc,
                        &snapshot.volume_label,
                    );
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        ticks: Vec<Vec<DriveSnapshot>>,
        index: AtomicUsize,
    }

    impl OpticalDriveSource for ScriptedSource {
        fn enumerate(&self) -> Vec<DriveSnapshot> {
            let i = self.index.fetch_add(1, Ordering::SeqCst);
            self.ticks.get(i.min(self.ticks.len() - 1)).cloned().unwrap_or_default()
        }

        fn eject(&self, _drive_id: &str) -> bool {
            true
        }
    }

    #[test]
    fn poll_once_emits_inserted_then_removed() {
        let source = Arc::new(ScriptedSource {
            ticks: vec![
                vec![DriveSnapshot {
                    drive_id: "E:".into(),
                    has_disc: false,
                    volume_label: String::new(),
                }],
                vec![DriveSnapshot {
                    drive_id: "E:".into(),
                    has_disc: true,
                    volume_label: "MY_MOVIE".into(),
                }],
                vec![DriveSnapshot {
                    drive_id: "E:".into(),
                    has_disc: false,
                    volume_label: String::new(),
                }],
            ],
            index: AtomicUsize::new(0),
        });
        let bus = Arc::new(EventBroadcaster::new());
        let monitor = Arc::new(DriveMonitor::new(source, bus, Duration::from_secs(2)));

        // seed baseline (tick 0: empty)
        monitor.states.lock().insert("E:".into(), false);
        monitor.poll_once(); // tick 1: inserted
        monitor.poll_once(); // tick 2: removed

        assert_eq!(monitor.states.lock().get("E:"), Some(&false));
    }

    #[test]
    fn null_source_reports_no_drives() {
        let source = NullDriveSource;
        assert!(source.enumerate().is_empty());
        assert!(!source.eject("E:"));
    }
}
