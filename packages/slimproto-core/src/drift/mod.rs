//! Drift Controller: keeps synced followers within the deadband of
//! their leader's playback position, and coordinates a synchronized start
//! across a whole group.
//!
//! Drift is estimated from a sliding window of samples, each comparing a
//! follower's extrapolated elapsed position against its leader's at the
//! same wall-clock instant. A correction is only issued once enough
//! samples have accumulated and the follower is not still cooling down
//! from a previous correction.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::time::{interval, timeout, Instant};

use crate::frame::{StrmCommand, StrmSubcommand};
use crate::protocol_constants::{
    BUFFER_READY_POLL_MILLIS, BUFFER_READY_TIMEOUT_MILLIS, MIN_DEVIATION_ADJUST_MS,
    MIN_REQUIRED_PLAYPOINTS, PAUSE_FOR_BACKOFF_BASE_SECS, PLAYPOINT_MAX_AGE_SECS,
    POST_START_BACKOFF_SECS, SKIP_AHEAD_BACKOFF_SECS, UNPAUSE_AT_JIFFIES_OFFSET,
};
use crate::registry::{PlayerRegistry, TransportState};
use crate::utils::now_millis;

/// A single drift observation: leader-minus-follower elapsed, in
/// milliseconds, at the wall-clock instant it was taken. Positive means
/// the follower is ahead of the leader.
#[derive(Debug, Clone, Copy)]
struct DriftSample {
    measured_at: u64,
    diff_ms: i64,
}

/// Upper bound on samples retained per follower; old samples are pruned by
/// age well before this is reached under normal heartbeat cadence.
const SAMPLE_RING_CAPACITY: usize = 16;

pub struct DriftController {
    registry: Arc<PlayerRegistry>,
    samples: DashMap<String, VecDeque<DriftSample>>,
    backoff_until: DashMap<String, u64>,
    buffer_ready: DashMap<String, ()>,
}

impl DriftController {
    #[must_use]
    pub fn new(registry: Arc<PlayerRegistry>) -> Self {
        Self {
            registry,
            samples: DashMap::new(),
            backoff_until: DashMap::new(),
            buffer_ready: DashMap::new(),
        }
    }

    /// Feeds a heartbeat from `follower_id` into its drift sample ring and
    /// issues a correction if the running mean exceeds the deadband. A
    /// no-op if `follower_id` is not currently synced to anyone, or its
    /// leader hasn't reported a position yet.
    pub async fn on_heartbeat(&self, follower_id: &str) {
        let Some(follower) = self.registry.get(follower_id) else {
            return;
        };
        let Some(leader_id) = follower.synced_to.clone() else {
            return;
        };
        let Some(leader) = self.registry.get(&leader_id) else {
            return;
        };
        if follower.state != TransportState::Playing || leader.state != TransportState::Playing {
            return;
        }

        let now = now_millis();
        let diff_ms = follower.elapsed_now(now) as i64 - leader.elapsed_now(now) as i64;

        let mean = {
            let mut ring = self.samples.entry(follower_id.to_string()).or_default();
            ring.push_back(DriftSample {
                measured_at: now,
                diff_ms,
            });
            while ring.len() > SAMPLE_RING_CAPACITY {
                ring.pop_front();
            }
            let max_age_ms = PLAYPOINT_MAX_AGE_SECS * 1000;
            while ring
                .front()
                .is_some_and(|s| now.saturating_sub(s.measured_at) > max_age_ms)
            {
                ring.pop_front();
            }

            if ring.len() < MIN_REQUIRED_PLAYPOINTS {
                return;
            }
            ring.iter().map(|s| s.diff_ms).sum::<i64>() / ring.len() as i64
        };

        if mean.unsigned_abs() < MIN_DEVIATION_ADJUST_MS as u64 {
            return;
        }

        if self
            .backoff_until
            .get(follower_id)
            .is_some_and(|until| *until > now)
        {
            return;
        }

        let Some(session) = self.registry.session(follower_id) else {
            return;
        };

        let (subcommand, millis, backoff_ms) = if mean > 0 {
            // Follower is ahead: pause it for the overshoot.
            let millis = mean as u32;
            let backoff_secs = PAUSE_FOR_BACKOFF_BASE_SECS + (mean.unsigned_abs() as f64 / 1000.0);
            (StrmSubcommand::Pause, millis, (backoff_secs * 1000.0) as u64)
        } else {
            // Follower is behind: skip it ahead.
            let millis = (-mean) as u32;
            (StrmSubcommand::SkipAhead, millis, SKIP_AHEAD_BACKOFF_SECS * 1000)
        };

        let _ = session
            .send_strm(&StrmCommand::correction(subcommand, millis))
            .await;

        self.backoff_until
            .insert(follower_id.to_string(), now + backoff_ms);
        self.samples.remove(follower_id);
    }

    /// Records that `player_id` has reached `STMl` (buffer ready), for
    /// [`Self::coordinated_start`] to poll.
    pub fn mark_buffer_ready(&self, player_id: &str) {
        self.buffer_ready.insert(player_id.to_string(), ());
    }

    fn clear_buffer_ready(&self, player_id: &str) {
        self.buffer_ready.remove(player_id);
    }

    /// Waits for every player in `group` to signal buffer-ready (polling
    /// every [`BUFFER_READY_POLL_MILLIS`], up to
    /// [`BUFFER_READY_TIMEOUT_MILLIS`]), then sends each member its own
    /// `strm 'u'` unpause-at, computed from that member's own last-known
    /// jiffies plus [`UNPAUSE_AT_JIFFIES_OFFSET`] — every device's jiffies
    /// clock is independent, so one shared timestamp would not land at the
    /// same wall-clock instant on every member. Starts anyway once the
    /// timeout elapses, even if some members never signaled readiness.
    pub async fn coordinated_start(&self, group: &[String]) {
        let deadline = Duration::from_millis(BUFFER_READY_TIMEOUT_MILLIS);
        let poll = Duration::from_millis(BUFFER_READY_POLL_MILLIS);
        let wait_all_ready = async {
            let mut ticker = interval(poll);
            loop {
                if group.iter().all(|id| self.buffer_ready.contains_key(id)) {
                    return;
                }
                ticker.tick().await;
            }
        };
        let _ = timeout(deadline, wait_all_ready).await;

        let now = now_millis();
        let sends = group.iter().filter_map(|id| {
            let session = self.registry.session(id)?;
            let jiffies = self.registry.get(id).map(|p| p.jiffies).unwrap_or(0);
            let command = StrmCommand::unpause_at(jiffies + UNPAUSE_AT_JIFFIES_OFFSET);
            Some(async move { session.send_strm(&command).await })
        });
        join_all(sends).await;

        for id in group {
            self.clear_buffer_ready(id);
            self.backoff_until
                .insert(id.clone(), now + POST_START_BACKOFF_SECS * 1000);
        }
    }

    /// Drops all tracked state for a player, called on disconnect or
    /// unsync so stale samples don't leak into a future pairing.
    pub fn forget(&self, player_id: &str) {
        self.samples.remove(player_id);
        self.backoff_until.remove(player_id);
        self.buffer_ready.remove(player_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::FakeCache;
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

    async fn registry_with(ids: &[&str]) -> Arc<PlayerRegistry> {
        let registry = Arc::new(PlayerRegistry::new(
            Arc::new(NoopEventEmitter),
            Arc::new(FakeCache::default()),
        ));
        for id in ids {
            registry
                .register(id.to_string(), &helo(), fake_session().await)
                .await;
        }
        registry
    }

    #[tokio::test]
    async fn fewer_than_minimum_samples_does_not_correct() {
        let registry = registry_with(&["leader", "follower"]).await;
        registry.update("follower", |p| p.synced_to = Some("leader".to_string()));
        let drift = DriftController::new(Arc::clone(&registry));
        for _ in 0..(MIN_REQUIRED_PLAYPOINTS - 1) {
            drift.on_heartbeat("follower").await;
        }
        assert!(drift.samples.get("follower").is_some());
        assert!(drift.backoff_until.get("follower").is_none());
    }

    #[tokio::test]
    async fn within_deadband_never_triggers_backoff() {
        let registry = registry_with(&["leader", "follower"]).await;
        registry.update("follower", |p| p.synced_to = Some("leader".to_string()));
        registry.update("leader", |p| {
            p.elapsed_milliseconds = 1000;
            p.elapsed_measured_at = now_millis();
        });
        registry.update("follower", |p| {
            p.elapsed_milliseconds = 1005; // 5ms ahead, inside the 10ms deadband
            p.elapsed_measured_at = now_millis();
        });
        let drift = DriftController::new(Arc::clone(&registry));
        for _ in 0..8 {
            drift.on_heartbeat("follower").await;
        }
        assert!(drift.backoff_until.get("follower").is_none());
    }

    #[tokio::test]
    async fn sustained_lead_beyond_deadband_pauses_follower() {
        let registry = registry_with(&["leader", "follower"]).await;
        registry.update("follower", |p| p.synced_to = Some("leader".to_string()));
        registry.update("leader", |p| {
            p.elapsed_milliseconds = 1000;
            p.elapsed_measured_at = now_millis();
        });
        registry.update("follower", |p| {
            p.elapsed_milliseconds = 1050; // 50ms ahead
            p.elapsed_measured_at = now_millis();
        });
        let drift = DriftController::new(Arc::clone(&registry));
        for _ in 0..MIN_REQUIRED_PLAYPOINTS {
            drift.on_heartbeat("follower").await;
        }
        assert!(drift.backoff_until.get("follower").is_some());
        assert!(drift.samples.get("follower").is_none());
    }

    #[tokio::test]
    async fn backoff_suppresses_immediate_repeat_correction() {
        let registry = registry_with(&["leader", "follower"]).await;
        registry.update("follower", |p| p.synced_to = Some("leader".to_string()));
        registry.update("leader", |p| {
            p.elapsed_milliseconds = 1000;
            p.elapsed_measured_at = now_millis();
        });
        registry.update("follower", |p| {
            p.elapsed_milliseconds = 1050;
            p.elapsed_measured_at = now_millis();
        });
        let drift = DriftController::new(Arc::clone(&registry));
        for _ in 0..MIN_REQUIRED_PLAYPOINTS {
            drift.on_heartbeat("follower").await;
        }
        let first_backoff = *drift.backoff_until.get("follower").unwrap();
        drift.on_heartbeat("follower").await;
        assert_eq!(*drift.backoff_until.get("follower").unwrap(), first_backoff);
    }

    #[tokio::test]
    async fn forget_clears_all_tracked_state() {
        let registry = registry_with(&["leader", "follower"]).await;
        let drift = DriftController::new(Arc::clone(&registry));
        drift.mark_buffer_ready("follower");
        drift.backoff_until.insert("follower".to_string(), u64::MAX);
        drift.samples.entry("follower".to_string()).or_default();
        drift.forget("follower");
        assert!(drift.samples.get("follower").is_none());
        assert!(drift.backoff_until.get("follower").is_none());
        assert!(!drift.buffer_ready.contains_key("follower"));
    }

    #[tokio::test(start_paused = true)]
    async fn coordinated_start_times_out_and_starts_anyway() {
        let registry = registry_with(&["leader", "follower"]).await;
        let drift = DriftController::new(Arc::clone(&registry));
        drift.mark_buffer_ready("leader"); // follower never signals
        drift
            .coordinated_start(&["leader".to_string(), "follower".to_string()])
            .await;
        assert!(drift.backoff_until.get("leader").is_some());
        assert!(drift.backoff_until.get("follower").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn coordinated_start_computes_unpause_at_from_each_members_own_jiffies() {
        use tokio::io::AsyncReadExt;

        let registry = Arc::new(PlayerRegistry::new(
            Arc::new(NoopEventEmitter),
            Arc::new(FakeCache::default()),
        ));

        let (mut leader_client, leader_server) = tokio::io::duplex(4096);
        let (_leader_read, leader_write) = tokio::io::split(leader_server);
        registry
            .register("leader".to_string(), &helo(), Arc::new(Session::new(Box::new(leader_write))))
            .await;
        registry.update("leader", |p| p.jiffies = 1_000);

        let (mut follower_client, follower_server) = tokio::io::duplex(4096);
        let (_follower_read, follower_write) = tokio::io::split(follower_server);
        registry
            .register(
                "follower".to_string(),
                &helo(),
                Arc::new(Session::new(Box::new(follower_write))),
            )
            .await;
        registry.update("follower", |p| p.jiffies = 9_000);

        let drift = DriftController::new(Arc::clone(&registry));
        drift.mark_buffer_ready("leader");
        drift.mark_buffer_ready("follower");
        drift
            .coordinated_start(&["leader".to_string(), "follower".to_string()])
            .await;

        let mut leader_frame = [0u8; 16];
        leader_client.read_exact(&mut leader_frame).await.unwrap();
        let leader_gain = u32::from_be_bytes(leader_frame[8..12].try_into().unwrap());
        assert_eq!(leader_gain, 1_000 + UNPAUSE_AT_JIFFIES_OFFSET);

        let mut follower_frame = [0u8; 16];
        follower_client.read_exact(&mut follower_frame).await.unwrap();
        let follower_gain = u32::from_be_bytes(follower_frame[8..12].try_into().unwrap());
        assert_eq!(follower_gain, 9_000 + UNPAUSE_AT_JIFFIES_OFFSET);
    }
}
