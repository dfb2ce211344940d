//! External collaborator traits.
//!
//! The core is deliberately ignorant of music library management, the
//! audio HTTP origin, and persistence; it calls out to these narrow
//! interfaces instead. Each concern gets its own `async_trait`, with a
//! blanket combined-trait impl where a single bootstrap-time value happens
//! to implement more than one of them.

use async_trait::async_trait;

/// A resolved item to hand to `play_url`, e.g. a queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub item_id: String,
    pub title: String,
}

/// Opaque queue handle, identifying the active playback queue for a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    pub queue_id: String,
}

/// Error returned by [`QueueController::preload_next_url`] when there is no
/// further content to play; the decoder-ready handoff treats this as a
/// silent no-op rather than an error condition worth surfacing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("queue is empty")]
pub struct QueueEmpty;

/// The external queue/playlist controller.
#[async_trait]
pub trait QueueController: Send + Sync {
    /// Returns the queue currently active for the given player.
    async fn get_active_queue(&self, player_id: &str) -> Option<QueueHandle>;

    /// Resumes playback of `queue_id`. Used by `sync` to restart a
    /// playing leader so a fresh multi-client stream session is formed.
    async fn resume(&self, queue_id: &str, fade_in: bool);

    /// Resolves the next URL for the given player's queue's decoder-ready
    /// handoff, or [`QueueEmpty`] if there is none.
    async fn preload_next_url(
        &self,
        player_id: &str,
    ) -> Result<(String, Option<QueueItem>, bool), QueueEmpty>;
}

/// A multi-client streaming job handle.
#[async_trait]
pub trait StreamingJobSource: Send + Sync {
    /// Looks up the active job for a queue, if any.
    async fn get(&self, queue_id: &str) -> Option<StreamingJobInfo>;
}

/// Snapshot of a streaming job's state relevant to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingJobInfo {
    pub job_id: String,
    pub pending: bool,
    pub running: bool,
}

/// Persistent key-value cache for last-known power/volume.
///
/// Key scheme: `slimproto_prev_state.<player_id>` holds a `(powered,
/// volume)` pair, matching the original provider's cache key convention.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_prev_state(&self, player_id: &str) -> Option<(bool, u8)>;
    async fn set_prev_state(&self, player_id: &str, powered: bool, volume: u8);
}

/// The LAN auto-discovery beacon. Lifecycle is tied to the server:
/// `start` is called once at bootstrap, `stop` once at shutdown.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn start(
        &self,
        bind_ip: std::net::IpAddr,
        slimproto_port: u16,
        cli_port: Option<u16>,
        cli_json_ip: Option<std::net::IpAddr>,
        server_name: &str,
        server_id: &str,
    );
    async fn stop(&self);
}

/// Convenience trait for a collaborator implementing both queue control
/// and streaming job resolution, the combination the Command Orchestrator
/// most often needs together.
pub trait PlaybackCollaborators: QueueController + StreamingJobSource {}
impl<T: QueueController + StreamingJobSource> PlaybackCollaborators for T {}

pub mod memory;

#[cfg(test)]
pub mod fakes {
    //! In-memory fakes for this crate's own test suite. Not intended for
    //! production use outside tests.

    use super::*;
    use dashmap::DashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeCache {
        state: DashMap<String, (bool, u8)>,
    }

    #[async_trait]
    impl Cache for FakeCache {
        async fn get_prev_state(&self, player_id: &str) -> Option<(bool, u8)> {
            self.state.get(player_id).map(|v| *v)
        }

        async fn set_prev_state(&self, player_id: &str, powered: bool, volume: u8) {
            self.state.insert(player_id.to_string(), (powered, volume));
        }
    }

    #[derive(Default)]
    pub struct FakeQueueController {
        pub next_urls: DashMap<String, (String, Option<QueueItem>, bool)>,
        pub resumed: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl QueueController for FakeQueueController {
        async fn get_active_queue(&self, player_id: &str) -> Option<QueueHandle> {
            Some(QueueHandle {
                queue_id: format!("queue-{player_id}"),
            })
        }

        async fn resume(&self, queue_id: &str, fade_in: bool) {
            self.resumed
                .lock()
                .unwrap()
                .push((queue_id.to_string(), fade_in));
        }

        async fn preload_next_url(
            &self,
            player_id: &str,
        ) -> Result<(String, Option<QueueItem>, bool), QueueEmpty> {
            self.next_urls.get(player_id).map(|v| v.clone()).ok_or(QueueEmpty)
        }
    }

    #[derive(Default)]
    pub struct FakeStreamingJobSource {
        pub jobs: DashMap<String, StreamingJobInfo>,
    }

    #[async_trait]
    impl StreamingJobSource for FakeStreamingJobSource {
        async fn get(&self, queue_id: &str) -> Option<StreamingJobInfo> {
            self.jobs.get(queue_id).map(|v| v.clone())
        }
    }

    #[tokio::test]
    async fn fake_cache_round_trips_prev_state() {
        let cache = FakeCache::default();
        cache.set_prev_state("p1", true, 42).await;
        assert_eq!(cache.get_prev_state("p1").await, Some((true, 42)));
        assert_eq!(cache.get_prev_state("missing").await, None);
    }

    #[tokio::test]
    async fn fake_queue_controller_reports_queue_empty() {
        let queue = FakeQueueController::default();
        assert_eq!(queue.preload_next_url("p1").await, Err(QueueEmpty));
    }
}
