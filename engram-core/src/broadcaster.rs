//! Event broadcaster: one-to-many fan-out of state changes (spec.md §4.7).
//!
//! Subscribers are tracked as a "few writers, many readers" list behind a
//! lock; broadcasts iterate a snapshot and never hold the lock while
//! sending, so a slow subscriber cannot stall delivery to the others
//! (spec.md §5 "Concurrent shared lists → channels + snapshots").

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{ContentType, JobState, TitleState};

/// One title as surfaced in a `titles_discovered` event payload.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredTitle {
    pub title_id: i64,
    pub title_index: u32,
    pub duration_seconds: u32,
    pub is_selected: bool,
}

/// Tagged event records fanned out to subscribers. Optional fields are
/// serialized only when `Some` (`skip_serializing_if`), per spec.md §4.7's
/// field-omission rule: downstream consumers do a shallow merge over
/// previous state, so an omitted field must not become an overwriting
/// null/zero.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    DriveEvent {
        drive_id: String,
        event: &'static str,
        volume_label: String,
    },
    JobUpdate {
        job_id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<JobState>,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress_percent: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_speed: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_title: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_titles: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_type: Option<ContentType>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detected_title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detected_season: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        review_reason: Option<String>,
    },
    TitleUpdate {
        job_id: i64,
        title_id: i64,
        state: TitleState,
        #[serde(skip_serializing_if = "Option::is_none")]
        matched_episode: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        match_confidence: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        organized_from: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        organized_to: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_extra: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    TitlesDiscovered {
        job_id: i64,
        titles: Vec<DiscoveredTitle>,
        content_type: ContentType,
        #[serde(skip_serializing_if = "Option::is_none")]
        detected_title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detected_season: Option<u32>,
    },
    SubtitleEvent {
        job_id: i64,
        status: &'static str,
        downloaded: u32,
        total: u32,
        failed_count: u32,
    },
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Event>,
}

/// An opaque subscriber handle. Dropping it, or letting the receiver lag
/// behind and fail to keep up, removes the subscription on the next
/// broadcast.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

#[derive(Debug, Default)]
pub struct EventBroadcaster {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(Subscriber { id, tx });
        debug!(subscriber_id = id, "subscriber joined");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.remove(subscription.id);
    }

    fn remove(&self, id: u64) {
        self.subscribers.write().retain(|s| s.id != id);
        debug!(subscriber_id = id, "subscriber removed");
    }

    /// Best-effort, at-most-once, per-subscriber-ordered delivery
    /// (spec.md §4.7). A dead subscriber is dropped and never blocks
    /// delivery to the others.
    pub fn broadcast(&self, event: Event) {
        let snapshot: Vec<(u64, mpsc::UnboundedSender<Event>)> = self
            .subscribers
            .read()
            .iter()
            .map(|s| (s.id, s.tx.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(event.clone()).is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            warn!(subscriber_id = id, "dropping dead subscriber");
            self.remove(id);
        }
    }

    pub fn drive_event(&self, drive_id: &str, inserted: bool, volume_label: &str) {
        self.broadcast(Event::DriveEvent {
            drive_id: drive_id.to_string(),
            event: if inserted { "inserted" } else { "removed" },
            volume_label: volume_label.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_per_subscriber() {
        let bus = EventBroadcaster::new();
        let mut sub = bus.subscribe();

        bus.drive_event("E:", true, "SOME_LABEL");
        bus.drive_event("E:", false, "");

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert!(matches!(first, Event::DriveEvent { event: "inserted", .. }));
        assert!(matches!(second, Event::DriveEvent { event: "removed", .. }));
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_block_others() {
        let bus = EventBroadcaster::new();
        let mut survivor = bus.subscribe();
        {
            let _dropped = bus.subscribe();
        } // receiver dropped, sender now dangling

        bus.drive_event("E:", true, "X");
        // second broadcast triggers cleanup of the dead subscriber
        bus.drive_event("E:", true, "Y");

        assert!(survivor.recv().await.is_some());
        assert!(survivor.recv().await.is_some());
        assert_eq!(bus.subscribers.read().len(), 1);
    }
}
