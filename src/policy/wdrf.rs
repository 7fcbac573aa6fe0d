//! Weighted Dominant Resource Fairness.
//!
//! Users are ranked by their weighted dominant share,
//! `max_r(allocation[r] / capacity[r] / weight[r])`, and the lowest-ranked user
//! with an admissible queue head runs next. With all-ones weights this is
//! plain DRF progressive filling: every admission raises the winner's dominant
//! share, letting the other users catch up.

use super::{scan_ranking, AllocationPolicy, OrderedUserIndex};
use crate::cluster::ClusterState;
use crate::resources::ResourceVector;
use crate::task::UserId;

#[derive(Debug)]
pub struct WdrfPolicy {
    /// Per-user weight vectors aligned with the engine's dense user indices.
    /// Users beyond the supplied table fall back to all-ones weights.
    weights: Vec<ResourceVector>,
    ranking: OrderedUserIndex,
}

impl WdrfPolicy {
    /// Plain DRF: every user weighted equally.
    pub fn new() -> Self {
        Self::with_weights(Vec::new())
    }

    /// Weighted DRF. `weights` is indexed by dense user id; the caller derives
    /// it externally (typically each user's mean usage normalized by the
    /// system mean) and must register users with the engine in the same order.
    pub fn with_weights(weights: Vec<ResourceVector>) -> Self {
        WdrfPolicy {
            weights,
            ranking: OrderedUserIndex::new(),
        }
    }

    fn weight(&self, user: UserId) -> ResourceVector {
        self.weights
            .get(user)
            .copied()
            .unwrap_or(ResourceVector::new(1.0, 1.0))
    }

    fn dominant_share(&self, state: &ClusterState, user: UserId) -> f64 {
        let weight = self.weight(user);
        let capacity = state.capacity();
        let weighted_capacity = ResourceVector::from_fn(|r| capacity[r] * weight[r]);
        state.user(user).allocation.max_ratio(&weighted_capacity)
    }

    fn reinsert(&mut self, state: &ClusterState, user: UserId) {
        let key = self.dominant_share(state, user);
        self.ranking.insert(user, key);
    }
}

impl Default for WdrfPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationPolicy for WdrfPolicy {
    fn register_user(&mut self, state: &ClusterState, user: UserId) {
        self.reinsert(state, user);
    }

    fn pick_task(&mut self, state: &ClusterState) -> Option<UserId> {
        let outcome = scan_ranking(state, self.ranking.iter(), |_, _, _| true);
        for user in outcome.evicted {
            self.ranking.remove(user);
        }
        outcome.picked
    }

    fn on_admit(&mut self, state: &ClusterState, user: UserId) {
        self.reinsert(state, user);
    }

    fn on_release(&mut self, state: &ClusterState, user: UserId) {
        self.reinsert(state, user);
    }
}
