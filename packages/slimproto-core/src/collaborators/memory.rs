//! Minimal in-memory collaborator implementations.
//!
//! A standalone deployment with no external music library, streaming
//! server, or persistence layer wired in still needs something to hand
//! `bootstrap_services`. These cover that: a `DashMap`-backed cache that
//! actually persists for the process lifetime, and queue/streaming stubs
//! that report "nothing queued" rather than panicking. A deployment with
//! a real library/cache backend replaces these with its own impls of the
//! same traits.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Cache, QueueController, QueueEmpty, QueueHandle, QueueItem, StreamingJobInfo, StreamingJobSource};

/// Process-lifetime cache of last-known power/volume per player.
#[derive(Default)]
pub struct InMemoryCache {
    state: DashMap<String, (bool, u8)>,
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_prev_state(&self, player_id: &str) -> Option<(bool, u8)> {
        self.state.get(player_id).map(|entry| *entry)
    }

    async fn set_prev_state(&self, player_id: &str, powered: bool, volume: u8) {
        self.state.insert(player_id.to_string(), (powered, volume));
    }
}

/// Queue controller stub that never has anything queued. A deployment
/// with a real music library wires its own [`QueueController`] impl in
/// place of this at bootstrap.
#[derive(Default)]
pub struct EmptyQueueController;

#[async_trait]
impl QueueController for EmptyQueueController {
    async fn get_active_queue(&self, _player_id: &str) -> Option<QueueHandle> {
        None
    }

    async fn resume(&self, _queue_id: &str, _fade_in: bool) {}

    async fn preload_next_url(
        &self,
        _player_id: &str,
    ) -> Result<(String, Option<QueueItem>, bool), QueueEmpty> {
        Err(QueueEmpty)
    }
}

/// Streaming job source stub reporting no active jobs.
#[derive(Default)]
pub struct NoJobsStreamingSource;

#[async_trait]
impl StreamingJobSource for NoJobsStreamingSource {
    async fn get(&self, _queue_id: &str) -> Option<StreamingJobInfo> {
        None
    }
}
