//! Sync Group Manager: leader/follower group lifecycle.
//!
//! Groups are many-to-one and acyclic: a player is either a solo leader, a
//! leader with one or more followers, or a follower of exactly one leader.
//! Followers may never themselves have followers.

use std::sync::Arc;

use crate::collaborators::QueueController;
use crate::error::GroupError;
use crate::events::{EventEmitter, GroupEvent};
use crate::registry::{PlayerRegistry, TransportState};

pub struct SyncGroupManager {
    registry: Arc<PlayerRegistry>,
    emitter: Arc<dyn EventEmitter>,
    queue: Arc<dyn QueueController>,
}

impl SyncGroupManager {
    #[must_use]
    pub fn new(
        registry: Arc<PlayerRegistry>,
        emitter: Arc<dyn EventEmitter>,
        queue: Arc<dyn QueueController>,
    ) -> Self {
        Self {
            registry,
            emitter,
            queue,
        }
    }

    /// Joins `child_id` to `leader_id`'s group.
    ///
    /// A no-op if the two ids are equal. Rejects forming a three-level
    /// chain: `leader_id` must not itself be a follower, and `child_id`
    /// must not itself currently lead any followers.
    pub async fn sync(&self, child_id: &str, leader_id: &str) -> Result<(), GroupError> {
        if child_id == leader_id {
            return Ok(());
        }

        let child = self
            .registry
            .get(child_id)
            .ok_or_else(|| GroupError::UnknownPlayer(child_id.to_string()))?;
        let leader = self
            .registry
            .get(leader_id)
            .ok_or_else(|| GroupError::UnknownPlayer(leader_id.to_string()))?;

        if leader.synced_to.is_some() {
            return Err(GroupError::TransitiveSyncRejected(
                child_id.to_string(),
                leader_id.to_string(),
            ));
        }
        if child.is_leader() {
            return Err(GroupError::TransitiveSyncRejected(
                child_id.to_string(),
                leader_id.to_string(),
            ));
        }

        if let Some(previous_leader) = child.synced_to.clone() {
            self.detach(child_id, &previous_leader);
        }

        self.registry.update(leader_id, |leader| {
            leader.followers.insert(child_id.to_string());
        });
        self.registry.update(child_id, |child| {
            child.synced_to = Some(leader_id.to_string());
        });

        if leader.state == TransportState::Playing {
            if let Some(handle) = self.queue.get_active_queue(leader_id).await {
                self.queue.resume(&handle.queue_id, false).await;
            }
        }

        self.emitter.emit(
            GroupEvent::Synced {
                child_id: child_id.to_string(),
                leader_id: leader_id.to_string(),
            }
            .into(),
        );
        Ok(())
    }

    /// Removes `child_id` from its group, if any. A no-op if it is
    /// not currently following anyone.
    pub async fn unsync(&self, child_id: &str) -> Result<(), GroupError> {
        let Some(child) = self.registry.get(child_id) else {
            return Err(GroupError::UnknownPlayer(child_id.to_string()));
        };
        let Some(leader_id) = child.synced_to.clone() else {
            return Ok(());
        };

        self.detach(child_id, &leader_id);
        self.emitter
            .emit(GroupEvent::Unsynced { child_id: child_id.to_string() }.into());
        Ok(())
    }

    fn detach(&self, child_id: &str, leader_id: &str) {
        self.registry.update(leader_id, |leader| {
            leader.followers.remove(child_id);
        });
        self.registry.update(child_id, |child| {
            child.synced_to = None;
        });
    }

    /// Resolves the full fan-out for a command targeting `player_id`:
    /// itself plus every follower if it is a leader, or just itself if it
    /// is solo. Callers enforce separately that a command may not target a
    /// follower directly.
    #[must_use]
    pub fn fan_out(&self, player_id: &str) -> Vec<String> {
        let Some(player) = self.registry.get(player_id) else {
            return Vec::new();
        };
        let mut ids = vec![player_id.to_string()];
        ids.extend(player.followers.iter().cloned());
        ids
    }
}
