//! Player Registry: the single writer of the Player table.
//!
//! Holds one [`Player`] record per stable player id and the live
//! [`Session`] handle currently serving it, if connected. Reattachment on
//! reconnect evicts the incumbent session (if still present) rather than
//! running two sessions for one player id side by side.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::collaborators::Cache;
use crate::events::{EventEmitter, GroupEvent};
use crate::frame::Helo;
use crate::protocol_constants::DEFAULT_PLAYER_VOLUME;
use crate::session::Session;
use crate::utils::now_millis;

/// Transport state a player reports through `STAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Playing,
    Paused,
}

/// A registered SlimProto player.
#[derive(Debug, Clone)]
pub struct Player {
    pub player_id: String,
    pub name: String,
    pub model: String,
    pub capabilities: String,
    pub powered: bool,
    pub volume: u8,
    pub muted: bool,
    pub state: TransportState,
    /// URL currently (or most recently) streaming, set by the Command
    /// Orchestrator on `play_url` and consulted when a follower needs to
    /// rejoin after an output underrun.
    pub current_url: Option<String>,
    /// Elapsed playback position last reported, in milliseconds.
    pub elapsed_milliseconds: u64,
    /// Wall-clock time (`now_millis()`) the elapsed position was captured,
    /// used to extrapolate current position between heartbeats.
    pub elapsed_measured_at: u64,
    pub jiffies: u32,
    /// Leader this player currently follows, if any.
    pub synced_to: Option<String>,
    /// Followers currently synced to this player, if it is a leader.
    pub followers: HashSet<String>,
    /// Other player ids this one is compatible to sync with, recomputed by
    /// the registry whenever the player set changes.
    pub can_sync_with: HashSet<String>,
    /// Acoustic offset applied to this player's own correction math.
    pub sync_adjust_ms: i64,
}

impl Player {
    fn from_helo(player_id: String, helo: &Helo, volume: u8) -> Self {
        Self {
            player_id,
            name: format!("Squeezebox {}", &helo.mac.iter().last().copied().unwrap_or(0)),
            model: format!("device-id-{}", helo.device_id),
            capabilities: helo.capabilities.clone(),
            powered: true,
            volume,
            muted: false,
            state: TransportState::Idle,
            current_url: None,
            elapsed_milliseconds: 0,
            elapsed_measured_at: now_millis(),
            jiffies: 0,
            synced_to: None,
            followers: HashSet::new(),
            can_sync_with: HashSet::new(),
            sync_adjust_ms: 0,
        }
    }

    /// Extrapolates current elapsed position from the last heartbeat.
    #[must_use]
    pub fn elapsed_now(&self, now: u64) -> u64 {
        self.elapsed_milliseconds + now.saturating_sub(self.elapsed_measured_at)
    }

    /// True if this player is a leader of at least one follower.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        !self.followers.is_empty()
    }
}

/// Owns the Player table and the live session handles serving it.
pub struct PlayerRegistry {
    players: DashMap<String, Player>,
    sessions: DashMap<String, Arc<Session>>,
    emitter: Arc<dyn EventEmitter>,
    cache: Arc<dyn Cache>,
}

impl PlayerRegistry {
    #[must_use]
    pub fn new(emitter: Arc<dyn EventEmitter>, cache: Arc<dyn Cache>) -> Self {
        Self {
            players: DashMap::new(),
            sessions: DashMap::new(),
            emitter,
            cache,
        }
    }

    /// Registers a newly-connected session, creating the player record on
    /// first sight or refreshing it on reconnect. If a session is already
    /// registered for this player id it is evicted (disconnected) first —
    /// reconnecting hardware replaces, it does not duplicate.
    pub async fn register(&self, player_id: String, helo: &Helo, session: Arc<Session>) {
        if let Some((_, old)) = self.sessions.remove(&player_id) {
            old.disconnect().await;
        }

        let (powered, volume) = self
            .cache
            .get_prev_state(&player_id)
            .await
            .unwrap_or((false, DEFAULT_PLAYER_VOLUME));

        self.players
            .entry(player_id.clone())
            .and_modify(|p| {
                p.capabilities = helo.capabilities.clone();
            })
            .or_insert_with(|| {
                let mut player = Player::from_helo(player_id.clone(), helo, volume);
                player.powered = powered;
                player
            });

        self.sessions.insert(player_id.clone(), session);
        self.recompute_can_sync_with();
        self.emitter
            .emit(GroupEvent::PlayerUpdated { player_id }.into());
    }

    /// Marks a session gone. The Player record and its sync membership are
    /// left exactly as they were: a disconnected follower is simply left
    /// stopped/idle, nothing is promoted or torn down on its behalf.
    /// Last-known power/volume is written back to the cache.
    pub async fn deregister(&self, player_id: &str) {
        self.sessions.remove(player_id);
        if let Some(player) = self.players.get(player_id) {
            self.cache
                .set_prev_state(player_id, player.powered, player.volume)
                .await;
        }
        self.recompute_can_sync_with();
    }

    #[must_use]
    pub fn session(&self, player_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(player_id).map(|s| Arc::clone(&s))
    }

    #[must_use]
    pub fn is_connected(&self, player_id: &str) -> bool {
        self.sessions.contains_key(player_id)
    }

    #[must_use]
    pub fn get(&self, player_id: &str) -> Option<Player> {
        self.players.get(player_id).map(|p| p.clone())
    }

    #[must_use]
    pub fn all_player_ids(&self) -> Vec<String> {
        self.players.iter().map(|p| p.key().clone()).collect()
    }

    /// Applies a mutation to a player record and emits `PlayerUpdated`.
    /// Returns `false` if the player id is unknown.
    pub fn update<F: FnOnce(&mut Player)>(&self, player_id: &str, f: F) -> bool {
        let Some(mut player) = self.players.get_mut(player_id) else {
            return false;
        };
        f(&mut player);
        drop(player);
        self.emitter.emit(
            GroupEvent::PlayerUpdated {
                player_id: player_id.to_string(),
            }
            .into(),
        );
        true
    }

    /// Records a heartbeat's position and jiffies without emitting an
    /// event — heartbeats arrive far too often for `PlayerUpdated` to be a
    /// useful signal for each one.
    pub fn record_heartbeat(&self, player_id: &str, jiffies: u32, elapsed_milliseconds: u32) {
        if let Some(mut player) = self.players.get_mut(player_id) {
            player.jiffies = jiffies;
            player.elapsed_milliseconds = u64::from(elapsed_milliseconds);
            player.elapsed_measured_at = now_millis();
        }
    }

    /// Recomputes every player's `can_sync_with` set: any two connected
    /// players may sync with each other. Called whenever registration
    /// changes the set of connected players.
    pub fn recompute_can_sync_with(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for id in &ids {
            if let Some(mut player) = self.players.get_mut(id) {
                player.can_sync_with = ids.iter().filter(|other| *other != id).cloned().collect();
            }
        }
    }
}
