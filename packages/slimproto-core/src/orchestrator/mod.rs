//! Command Orchestrator: the public API surface, and the sink for
//! every [`SessionMessage`] the read loops produce.
//!
//! Commands always target a leader (solo players are their own leader).
//! Sending a command to a follower id is rejected — callers resolve the
//! leader themselves or let [`GroupError::CommandSentToFollower`] tell
//! them they got it backwards. Fan-out to a leader's followers uses
//! structured concurrency (`futures::future::join_all`), mirroring the
//! `join_slaves_to_coordinator`/`stop_speakers` pattern elsewhere in this
//! workspace, so one slow follower cannot stall the others.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;

use crate::collaborators::{Cache, QueueController, StreamingJobSource};
use crate::drift::DriftController;
use crate::error::GroupError;
use crate::events::EventEmitter;
use crate::frame::Transition;
use crate::registry::{PlayerRegistry, TransportState};
use crate::session::SessionMessage;
use crate::sync_group::SyncGroupManager;

pub struct CommandOrchestrator {
    registry: Arc<PlayerRegistry>,
    sync_group: Arc<SyncGroupManager>,
    drift: Arc<DriftController>,
    queue: Arc<dyn QueueController>,
    #[allow(dead_code)] // resolved via `queue`; kept for the collaborator seam
    streaming_jobs: Arc<dyn StreamingJobSource>,
    #[allow(dead_code)] // reserved for cache writes triggered outside registration
    cache: Arc<dyn Cache>,
    emitter: Arc<dyn EventEmitter>,
    starting: DashMap<String, ()>,
}

impl CommandOrchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<PlayerRegistry>,
        sync_group: Arc<SyncGroupManager>,
        drift: Arc<DriftController>,
        queue: Arc<dyn QueueController>,
        streaming_jobs: Arc<dyn StreamingJobSource>,
        cache: Arc<dyn Cache>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            registry,
            sync_group,
            drift,
            queue,
            streaming_jobs,
            cache,
            emitter,
            starting: DashMap::new(),
        }
    }

    fn require_leader(&self, player_id: &str) -> Result<(), GroupError> {
        let player = self
            .registry
            .get(player_id)
            .ok_or_else(|| GroupError::UnknownPlayer(player_id.to_string()))?;
        if player.synced_to.is_some() {
            return Err(GroupError::CommandSentToFollower(player_id.to_string()));
        }
        Ok(())
    }

    /// Starts streaming `url` to `player_id` and every follower in its
    /// group. Always sends, even if already playing — a new `play_url`
    /// always means a new track, so it sends `stop` first to guarantee a
    /// clean transition off whatever was playing before.
    pub async fn play_url(&self, player_id: &str, url: &str, autostart: bool) -> Result<(), GroupError> {
        self.require_leader(player_id)?;
        let group = self.sync_group.fan_out(player_id);

        let sessions: Vec<_> = group
            .iter()
            .filter_map(|id| self.registry.session(id))
            .collect();
        join_all(sessions.iter().map(|s| s.stop())).await;
        join_all(
            sessions
                .iter()
                .map(|s| s.play_url(url, true, Transition::None, 0, autostart)),
        )
        .await;

        for id in &group {
            self.registry.update(id, |p| {
                p.state = TransportState::Playing;
                p.current_url = Some(url.to_string());
            });
        }
        Ok(())
    }

    /// Stops `player_id`'s group. A no-op if already idle.
    pub async fn stop(&self, player_id: &str) -> Result<(), GroupError> {
        self.require_leader(player_id)?;
        let Some(player) = self.registry.get(player_id) else {
            return Err(GroupError::UnknownPlayer(player_id.to_string()));
        };
        if player.state == TransportState::Idle {
            return Ok(());
        }

        let group = self.sync_group.fan_out(player_id);
        let sessions: Vec<_> = group
            .iter()
            .filter_map(|id| self.registry.session(id))
            .collect();
        join_all(sessions.iter().map(|s| s.stop())).await;

        for id in &group {
            self.registry.update(id, |p| p.state = TransportState::Idle);
        }
        Ok(())
    }

    /// Pauses `player_id`'s group. A no-op unless currently playing.
    pub async fn pause(&self, player_id: &str) -> Result<(), GroupError> {
        self.require_leader(player_id)?;
        let Some(player) = self.registry.get(player_id) else {
            return Err(GroupError::UnknownPlayer(player_id.to_string()));
        };
        if player.state != TransportState::Playing {
            return Ok(());
        }

        let group = self.sync_group.fan_out(player_id);
        let sessions: Vec<_> = group
            .iter()
            .filter_map(|id| self.registry.session(id))
            .collect();
        join_all(sessions.iter().map(|s| s.pause())).await;

        for id in &group {
            self.registry.update(id, |p| p.state = TransportState::Paused);
        }
        Ok(())
    }

    /// Resumes `player_id`'s group. A no-op unless currently paused.
    pub async fn resume(&self, player_id: &str) -> Result<(), GroupError> {
        self.require_leader(player_id)?;
        let Some(player) = self.registry.get(player_id) else {
            return Err(GroupError::UnknownPlayer(player_id.to_string()));
        };
        if player.state != TransportState::Paused {
            return Ok(());
        }

        let group = self.sync_group.fan_out(player_id);
        let sessions: Vec<_> = group
            .iter()
            .filter_map(|id| self.registry.session(id))
            .collect();
        join_all(sessions.iter().map(|s| s.resume())).await;

        for id in &group {
            self.registry.update(id, |p| p.state = TransportState::Playing);
        }
        Ok(())
    }

    /// Powers `player_id`'s group on or off.
    pub async fn power(&self, player_id: &str, on: bool) -> Result<(), GroupError> {
        self.require_leader(player_id)?;
        let group = self.sync_group.fan_out(player_id);
        let sessions: Vec<_> = group
            .iter()
            .filter_map(|id| self.registry.session(id))
            .collect();
        join_all(sessions.iter().map(|s| s.power(on))).await;
        for id in &group {
            self.registry.update(id, |p| p.powered = on);
        }
        Ok(())
    }

    /// Sets volume (0-100) on `player_id` only — unlike transport commands,
    /// volume is per-device even within a sync group.
    pub async fn volume_set(&self, player_id: &str, volume: u8) -> Result<(), GroupError> {
        let Some(session) = self.registry.session(player_id) else {
            return Err(GroupError::UnknownPlayer(player_id.to_string()));
        };
        let _ = session.volume_set(volume).await;
        self.registry.update(player_id, |p| p.volume = volume.min(100));
        Ok(())
    }

    /// Mutes or unmutes `player_id` only.
    pub async fn mute(&self, player_id: &str, muted: bool) -> Result<(), GroupError> {
        let Some(player) = self.registry.get(player_id) else {
            return Err(GroupError::UnknownPlayer(player_id.to_string()));
        };
        let Some(session) = self.registry.session(player_id) else {
            return Err(GroupError::UnknownPlayer(player_id.to_string()));
        };
        let _ = session.mute(muted, player.volume).await;
        self.registry.update(player_id, |p| p.muted = muted);
        Ok(())
    }

    /// Dispatches one inbound [`SessionMessage`] from a session read loop.
    /// Intended to be called in a loop by a single task draining the
    /// channel every `run_connection` sends into, so no two messages are
    /// ever processed concurrently.
    pub async fn handle_session_message(&self, message: SessionMessage) {
        match message {
            SessionMessage::Connected { session, helo } => {
                let player_id = crate::utils::mac_to_player_id(&helo.mac);
                self.registry.register(player_id, &helo, session).await;
            }
            SessionMessage::Disconnected { session } => {
                if let Some(player_id) = session.player_id() {
                    self.registry.deregister(&player_id).await;
                    self.drift.forget(&player_id);
                }
            }
            SessionMessage::Heartbeat { session, stat } => {
                if let Some(player_id) = session.player_id() {
                    self.registry
                        .record_heartbeat(&player_id, stat.jiffies, stat.elapsed_milliseconds);
                    self.drift.on_heartbeat(&player_id).await;
                }
            }
            SessionMessage::DecoderReady { session } => {
                if let Some(player_id) = session.player_id() {
                    self.handle_decoder_ready(&player_id).await;
                }
            }
            SessionMessage::BufferReady { session, jiffies } => {
                if let Some(player_id) = session.player_id() {
                    self.handle_buffer_ready(&player_id, jiffies).await;
                }
            }
            SessionMessage::OutputUnderrun { session } => {
                if let Some(player_id) = session.player_id() {
                    self.handle_output_underrun(&player_id).await;
                }
            }
        }
    }

    /// Decoder-ready handoff: preload the next queue item so playback
    /// continues gaplessly, fanning the new URL out to every member of the
    /// group the same way a fresh `play_url` would. A no-op if the queue
    /// has nothing further, or if `player_id` is itself a follower — a
    /// follower's decoder-ready is driven by its leader's handoff, not its
    /// own. `autostart` is always `true` here regardless of whether the
    /// queue reports a crossfade transition: the handoff always continues
    /// playback immediately, crossfade only changes how the two tracks
    /// overlap.
    async fn handle_decoder_ready(&self, player_id: &str) {
        let Some(player) = self.registry.get(player_id) else {
            return;
        };
        if player.synced_to.is_some() {
            return;
        }
        let Ok((url, _item, _crossfade)) = self.queue.preload_next_url(player_id).await else {
            return;
        };

        let group = self.sync_group.fan_out(player_id);
        let sessions: Vec<_> = group
            .iter()
            .filter_map(|id| self.registry.session(id))
            .collect();
        join_all(
            sessions
                .iter()
                .map(|s| s.play_url(&url, false, Transition::None, 0, true)),
        )
        .await;

        for id in &group {
            self.registry.update(id, |p| {
                p.state = TransportState::Playing;
                p.current_url = Some(url.clone());
            });
        }
    }

    /// Buffer-coordinated start. Only the first group member to
    /// report buffer-ready drives the coordination; later reports for the
    /// same group while one is already in flight just mark readiness.
    async fn handle_buffer_ready(&self, player_id: &str, jiffies: u32) {
        self.registry.update(player_id, |p| p.jiffies = jiffies);
        self.drift.mark_buffer_ready(player_id);

        let Some(player) = self.registry.get(player_id) else {
            return;
        };
        let leader_id = player.synced_to.clone().unwrap_or_else(|| player_id.to_string());
        let group = self.sync_group.fan_out(&leader_id);
        if group.len() <= 1 {
            return;
        }

        if self.starting.insert(leader_id.clone(), ()).is_some() {
            return;
        }
        self.drift.coordinated_start(&group).await;
        self.starting.remove(&leader_id);
    }

    /// Output-underrun recovery: a leader's (or solo player's)
    /// underrun stops its whole group unconditionally; a follower's
    /// underrun just rejoins it to the still-playing leader.
    async fn handle_output_underrun(&self, player_id: &str) {
        let Some(player) = self.registry.get(player_id) else {
            return;
        };
        match player.synced_to.clone() {
            None => {
                let _ = self.stop(player_id).await;
            }
            Some(leader_id) => {
                if !self.registry.is_connected(&leader_id) {
                    return;
                }
                let Some(leader) = self.registry.get(&leader_id) else {
                    return;
                };
                if let (Some(url), Some(session)) =
                    (leader.current_url.clone(), self.registry.session(player_id))
                {
                    let _ = session
                        .play_url(&url, true, Transition::None, 0, true)
                        .await;
                    self.registry.update(player_id, |p| {
                        p.state = TransportState::Playing;
                        p.current_url = Some(url);
                    });
                }
            }
        }
    }

    #[must_use]
    pub fn emitter(&self) -> &Arc<dyn EventEmitter> {
        &self.emitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::{FakeCache, FakeQueueController, FakeStreamingJobSource};
    use crate::events::NoopEventEmitter;
    use crate::frame::Helo;
    use crate::session::Session;

    fn helo() -> Helo {
        Helo {
            device_id: 1,
            revision: 1,
            mac: [0u8; 6],
            uuid: [0u8; 16],
            wlan_channel_list: 0,
            bytes_received: 0,
            language: *b"en",
            capabilities: String::new(),
        }
    }

    async fn fake_session() -> Arc<Session> {
        let (_client, server) = tokio::io::duplex(64);
        let (_read, write) = tokio::io::split(server);
        Arc::new(Session::new(Box::new(write)))
    }

    async fn setup(ids: &[&str]) -> (Arc<PlayerRegistry>, CommandOrchestrator) {
        let registry = Arc::new(PlayerRegistry::new(
            Arc::new(NoopEventEmitter),
            Arc::new(FakeCache::default()),
        ));
        for id in ids {
            registry
                .register(id.to_string(), &helo(), fake_session().await)
                .await;
        }
        let emitter: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let queue: Arc<dyn QueueController> = Arc::new(FakeQueueController::default());
        let sync_group = Arc::new(SyncGroupManager::new(
            Arc::clone(&registry),
            Arc::clone(&emitter),
            Arc::clone(&queue),
        ));
        let drift = Arc::new(DriftController::new(Arc::clone(&registry)));
        let orchestrator = CommandOrchestrator::new(
            Arc::clone(&registry),
            sync_group,
            drift,
            queue,
            Arc::new(FakeStreamingJobSource::default()),
            Arc::new(FakeCache::default()),
            emitter,
        );
        (registry, orchestrator)
    }

    #[tokio::test]
    async fn play_url_rejects_command_sent_to_follower() {
        let (registry, orchestrator) = setup(&["leader", "follower"]).await;
        registry.update("follower", |p| p.synced_to = Some("leader".to_string()));
        let err = orchestrator.play_url("follower", "http://x", true).await.unwrap_err();
        assert_eq!(err, GroupError::CommandSentToFollower("follower".to_string()));
    }

    #[tokio::test]
    async fn play_url_marks_leader_and_followers_playing() {
        let (registry, orchestrator) = setup(&["leader", "follower"]).await;
        registry.update("follower", |p| p.synced_to = Some("leader".to_string()));
        registry.update("leader", |p| p.followers.insert("follower".to_string()));
        orchestrator.play_url("leader", "http://x", true).await.unwrap();
        assert_eq!(registry.get("leader").unwrap().state, TransportState::Playing);
        assert_eq!(registry.get("follower").unwrap().state, TransportState::Playing);
        assert_eq!(registry.get("leader").unwrap().current_url, Some("http://x".to_string()));
    }

    #[tokio::test]
    async fn stop_when_already_idle_is_a_no_op() {
        let (_registry, orchestrator) = setup(&["leader"]).await;
        assert!(orchestrator.stop("leader").await.is_ok());
    }

    #[tokio::test]
    async fn pause_when_not_playing_is_a_no_op() {
        let (registry, orchestrator) = setup(&["leader"]).await;
        orchestrator.pause("leader").await.unwrap();
        assert_eq!(registry.get("leader").unwrap().state, TransportState::Idle);
    }

    #[tokio::test]
    async fn unknown_player_is_rejected() {
        let (_registry, orchestrator) = setup(&["leader"]).await;
        let err = orchestrator.stop("ghost").await.unwrap_err();
        assert_eq!(err, GroupError::UnknownPlayer("ghost".to_string()));
    }

    #[tokio::test]
    async fn output_underrun_on_leader_stops_group() {
        let (registry, orchestrator) = setup(&["leader", "follower"]).await;
        registry.update("follower", |p| p.synced_to = Some("leader".to_string()));
        registry.update("leader", |p| {
            p.followers.insert("follower".to_string());
            p.state = TransportState::Playing;
        });
        registry.update("follower", |p| p.state = TransportState::Playing);
        orchestrator.handle_output_underrun("leader").await;
        assert_eq!(registry.get("leader").unwrap().state, TransportState::Idle);
        assert_eq!(registry.get("follower").unwrap().state, TransportState::Idle);
    }

    #[tokio::test]
    async fn output_underrun_on_follower_rejoins_leaders_stream() {
        let (registry, orchestrator) = setup(&["leader", "follower"]).await;
        registry.update("follower", |p| p.synced_to = Some("leader".to_string()));
        registry.update("leader", |p| {
            p.followers.insert("follower".to_string());
            p.state = TransportState::Playing;
            p.current_url = Some("http://stream".to_string());
        });
        orchestrator.handle_output_underrun("follower").await;
        assert_eq!(registry.get("follower").unwrap().state, TransportState::Playing);
        assert_eq!(
            registry.get("follower").unwrap().current_url,
            Some("http://stream".to_string())
        );
    }

    #[tokio::test]
    async fn decoder_ready_is_a_no_op_when_queue_is_empty() {
        let (_registry, orchestrator) = setup(&["leader"]).await;
        orchestrator.handle_decoder_ready("leader").await;
    }

    #[tokio::test]
    async fn decoder_ready_fans_out_to_whole_group() {
        let registry = Arc::new(PlayerRegistry::new(
            Arc::new(NoopEventEmitter),
            Arc::new(FakeCache::default()),
        ));
        for id in ["leader", "follower"] {
            registry
                .register(id.to_string(), &helo(), fake_session().await)
                .await;
        }
        registry.update("follower", |p| p.synced_to = Some("leader".to_string()));
        registry.update("leader", |p| p.followers.insert("follower".to_string()));

        let emitter: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let queue = Arc::new(FakeQueueController::default());
        queue
            .next_urls
            .insert("leader".to_string(), ("http://next".to_string(), None, false));
        let sync_group = Arc::new(SyncGroupManager::new(
            Arc::clone(&registry),
            Arc::clone(&emitter),
            Arc::clone(&queue) as Arc<dyn QueueController>,
        ));
        let drift = Arc::new(DriftController::new(Arc::clone(&registry)));
        let orchestrator = CommandOrchestrator::new(
            Arc::clone(&registry),
            sync_group,
            drift,
            Arc::clone(&queue) as Arc<dyn QueueController>,
            Arc::new(FakeStreamingJobSource::default()),
            Arc::new(FakeCache::default()),
            emitter,
        );

        orchestrator.handle_decoder_ready("leader").await;
        assert_eq!(
            registry.get("leader").unwrap().current_url,
            Some("http://next".to_string())
        );
        assert_eq!(
            registry.get("follower").unwrap().current_url,
            Some("http://next".to_string())
        );
        assert_eq!(registry.get("follower").unwrap().state, TransportState::Playing);
    }

    #[tokio::test]
    async fn decoder_ready_is_a_no_op_for_a_follower() {
        let (registry, orchestrator) = setup(&["leader", "follower"]).await;
        registry.update("follower", |p| p.synced_to = Some("leader".to_string()));
        orchestrator.handle_decoder_ready("follower").await;
        assert_eq!(registry.get("follower").unwrap().state, TransportState::Idle);
    }

    #[tokio::test]
    async fn output_underrun_on_follower_with_disconnected_leader_stays_idle() {
        let (registry, orchestrator) = setup(&["leader", "follower"]).await;
        registry.update("follower", |p| p.synced_to = Some("leader".to_string()));
        registry.update("leader", |p| {
            p.followers.insert("follower".to_string());
            p.state = TransportState::Playing;
            p.current_url = Some("http://stream".to_string());
        });
        registry.deregister("leader").await;
        orchestrator.handle_output_underrun("follower").await;
        assert_eq!(registry.get("follower").unwrap().state, TransportState::Idle);
    }
}
