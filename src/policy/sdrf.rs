//! SDRF: a two-regime discipline layering private reservations over a shared
//! credibility pool.
//!
//! Regime 1 serves users against their own reserved resources, ranked by how
//! much of the reservation they have consumed; it only admits tasks that fit
//! entirely inside the reservation. Once a user is at or past their
//! reservation (or reservations are disabled), admission falls through to
//! regime 2, where users compete on dominant credibility share, an
//! exponentially smoothed memory of how much they have been running beyond
//! their reservation. Users who go idle keep their credibility in a side
//! table so that re-entry resumes from the decayed value instead of zero.

use super::{scan_ranking, AllocationPolicy, OrderedUserIndex};
use crate::cluster::ClusterState;
use crate::credibility::{tau_from_delta, CredibilityElement, CredibilityQueue};
use crate::resources::Resource;
use crate::task::UserId;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug)]
pub struct SdrfPolicy {
    tau: f64,
    /// Whether regime 1 (private reservations) participates in admission.
    reserved_regime: bool,
    /// Regime-1 ranking: users strictly inside their reservation, keyed by
    /// `max_r(allocation[r] / reservation[r])`.
    reservation_ranking: OrderedUserIndex,
    /// Regime-2 ranking: one decaying element per non-idle user.
    shared_pool: CredibilityQueue,
    /// Credibility preserved for users currently absent from the shared pool.
    idle: HashMap<UserId, CredibilityElement>,
}

impl SdrfPolicy {
    /// `delta` in `[0, 1)` is the operator memory parameter; the decay time
    /// constant is derived from it once per simulation. With `reserved_regime`
    /// disabled (or all-zero reservations, the same-share configuration) the
    /// discipline is pure credibility ranking.
    pub fn new(delta: f64, reserved_regime: bool) -> Self {
        SdrfPolicy {
            tau: tau_from_delta(delta),
            reserved_regime,
            reservation_ranking: OrderedUserIndex::new(),
            shared_pool: CredibilityQueue::new(),
            idle: HashMap::new(),
        }
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// Recompute the user's regime-1 key. Users are kept in the ranking only
    /// while every per-resource ratio is strictly below one; a zero
    /// reservation never qualifies (0/0 and x/0 both fail the bound).
    fn refresh_reservation(&mut self, state: &ClusterState, user: UserId) {
        self.reservation_ranking.remove(user);
        let user_state = state.user(user);
        let mut key = 0.0_f64;
        for resource in Resource::ALL {
            let ratio = user_state.allocation[resource] / user_state.reservation[resource];
            if !(ratio < 1.0) {
                return;
            }
            key = key.max(ratio);
        }
        self.reservation_ranking.insert(user, key);
    }

    /// Remove-then-reinsert the user's credibility element with a freshly
    /// captured relative allocation. The element is decayed to the current
    /// clock before the target changes so the elapsed time is applied against
    /// the old value.
    fn refresh_credibility(&mut self, state: &ClusterState, user: UserId) {
        let now = state.current_time();
        let mut element = self
            .shared_pool
            .remove(user, now)
            .or_else(|| self.idle.remove(&user))
            .unwrap_or_else(|| {
                let relative = state.user(user).allocation - state.user(user).reservation;
                CredibilityElement::new(user, now, self.tau, state.capacity(), relative)
            });
        element.decay_to(now);
        let relative = state.user(user).allocation - state.user(user).reservation;
        element.set_relative_allocation(relative);
        self.shared_pool.add(element);
    }

    fn refresh(&mut self, state: &ClusterState, user: UserId) {
        if self.reserved_regime {
            self.refresh_reservation(state, user);
        }
        self.refresh_credibility(state, user);
    }

    fn pick_from_reservations(&mut self, state: &ClusterState) -> Option<UserId> {
        let outcome = scan_ranking(state, self.reservation_ranking.iter(), |state, user, task| {
            let user_state = state.user(user);
            (user_state.allocation + task.demand).fits_within(&user_state.reservation)
        });
        for user in outcome.evicted {
            self.reservation_ranking.remove(user);
        }
        outcome.picked
    }

    fn pick_from_shared_pool(&mut self, state: &ClusterState) -> Option<UserId> {
        let now = state.current_time();
        let outcome = scan_ranking(
            state,
            self.shared_pool.ordered_scan(now).map(|e| e.user()),
            |_, _, _| true,
        );
        for user in outcome.evicted {
            if let Some(element) = self.shared_pool.remove(user, now) {
                self.idle.insert(user, element);
            }
        }
        outcome.picked
    }

    #[cfg(test)]
    fn idle_credibility(&self, user: UserId) -> Option<&CredibilityElement> {
        self.idle.get(&user)
    }
}

impl AllocationPolicy for SdrfPolicy {
    fn register_user(&mut self, state: &ClusterState, user: UserId) {
        self.refresh(state, user);
    }

    fn pick_task(&mut self, state: &ClusterState) -> Option<UserId> {
        if self.reserved_regime {
            if let Some(user) = self.pick_from_reservations(state) {
                trace!(user, "admitting from reservation regime");
                return Some(user);
            }
        }
        self.pick_from_shared_pool(state)
    }

    fn on_admit(&mut self, state: &ClusterState, user: UserId) {
        self.refresh(state, user);
    }

    fn on_release(&mut self, state: &ClusterState, user: UserId) {
        self.refresh(state, user);
    }
}
