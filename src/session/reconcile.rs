//! Scene reconciliation bookkeeping.
//!
//! Tracks the client's scene catch-up and the entities it has heard about
//! but never seen spawned. All times are clock seconds.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::core::constants::REMOVED_ID_MEMORY;
use crate::core::{NetConfig, NetworkId};

/// Progress of the full-state catch-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SceneSyncState {
    /// Not requested yet.
    Idle,
    /// Request sent at `at`, no snapshot yet.
    Requested {
        /// When the last request was sent.
        at: f64,
    },
    /// Snapshot applied.
    Complete,
}

/// Outstanding recovery of one unknown entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissingObjectRequest {
    /// Entity id.
    pub network_id: NetworkId,
    /// When the last request was sent.
    pub last_request_time: f64,
    /// Requests sent so far.
    pub attempt_count: u32,
}

/// Requests to re-send and requests given up, from one retry pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RetryBatch {
    /// Ids to request again.
    pub resend: Vec<NetworkId>,
    /// Ids dropped after exhausting their attempts, with the attempt count.
    pub abandoned: Vec<(NetworkId, u32)>,
}

/// Client-side reconciliation state.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    scene: SceneSyncState,
    missing: BTreeMap<NetworkId, MissingObjectRequest>,
    removed: BTreeSet<NetworkId>,
    retry_interval: f64,
    max_attempts: Option<u32>,
    scene_retry_interval: f64,
}

impl Reconciliation {
    /// Create from session configuration.
    pub fn new(config: &NetConfig) -> Self {
        Self {
            scene: SceneSyncState::Idle,
            missing: BTreeMap::new(),
            removed: BTreeSet::new(),
            retry_interval: config.missing_object_retry_interval.as_secs_f64(),
            max_attempts: config.missing_object_max_attempts,
            scene_retry_interval: config.scene_sync_retry_interval.as_secs_f64(),
        }
    }

    /// Catch-up progress.
    pub fn scene_state(&self) -> SceneSyncState {
        self.scene
    }

    /// Check if the snapshot has been applied.
    pub fn is_complete(&self) -> bool {
        self.scene == SceneSyncState::Complete
    }

    /// Record that a scene sync request was sent.
    pub fn mark_requested(&mut self, now: f64) {
        self.scene = SceneSyncState::Requested { at: now };
    }

    /// Record that the snapshot was applied.
    pub fn mark_complete(&mut self) {
        self.scene = SceneSyncState::Complete;
    }

    /// Check if an unanswered scene sync request should be sent again.
    pub fn scene_sync_due(&self, now: f64) -> bool {
        match self.scene {
            SceneSyncState::Requested { at } => now - at >= self.scene_retry_interval,
            _ => false,
        }
    }

    /// An update referenced an unknown entity.
    ///
    /// Returns `true` when a first request should be sent now. Before
    /// reconciliation completes unknown ids are expected and ignored, as are
    /// ids that were removed.
    pub fn note_missing(&mut self, id: NetworkId, now: f64) -> bool {
        if !self.is_complete() || self.removed.contains(&id) || self.missing.contains_key(&id) {
            return false;
        }
        debug!(id = %id, "requesting missing object");
        self.missing.insert(
            id,
            MissingObjectRequest {
                network_id: id,
                last_request_time: now,
                attempt_count: 1,
            },
        );
        true
    }

    /// The entity arrived. Returns `true` if a request was outstanding.
    pub fn resolve(&mut self, id: NetworkId) -> bool {
        self.missing.remove(&id).is_some()
    }

    /// The entity was removed; late updates for it are ignored.
    pub fn forget(&mut self, id: NetworkId) {
        self.missing.remove(&id);
        self.removed.insert(id);
        while self.removed.len() > REMOVED_ID_MEMORY {
            self.removed.pop_first();
        }
    }

    /// Check if `id` was removed.
    pub fn was_removed(&self, id: NetworkId) -> bool {
        self.removed.contains(&id)
    }

    /// Advance outstanding requests whose retry interval elapsed.
    pub fn due_retries(&mut self, now: f64) -> RetryBatch {
        let mut batch = RetryBatch::default();
        let interval = self.retry_interval;
        let max_attempts = self.max_attempts;

        self.missing.retain(|id, request| {
            if now - request.last_request_time < interval {
                return true;
            }
            if max_attempts.is_some_and(|max| request.attempt_count >= max) {
                warn!(id = %id, attempts = request.attempt_count, "giving up on missing object");
                batch.abandoned.push((*id, request.attempt_count));
                return false;
            }
            request.attempt_count += 1;
            request.last_request_time = now;
            batch.resend.push(*id);
            true
        });
        batch
    }

    /// Outstanding request for `id`.
    pub fn missing(&self, id: NetworkId) -> Option<&MissingObjectRequest> {
        self.missing.get(&id)
    }

    /// Number of outstanding requests.
    pub fn pending_missing(&self) -> usize {
        self.missing.len()
    }

    /// Drop every outstanding request.
    pub fn clear_missing(&mut self) {
        self.missing.clear();
    }
}
