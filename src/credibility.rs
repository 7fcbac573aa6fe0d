//! Time-decaying credibility bookkeeping for the shared-pool regime.
//!
//! Every user eligible for the shared pool owns a [`CredibilityElement`] whose
//! per-resource credibility tracks the user's relative allocation through an
//! exponential decay. The [`CredibilityQueue`] keeps the elements ordered by
//! their dominant credibility share, recomputing keys lazily against the
//! caller's clock: a key is a continuous function of time, so the ranking is
//! only materialized for the instant a read happens at.

use crate::resources::{Resource, ResourceVector};
use crate::task::{SimTime, UserId};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Derive the decay time constant from the operator memory parameter
/// `delta` in `[0, 1)`. `delta == 0` yields `tau == 0`, meaning no memory at
/// all: credibility jumps straight to its target on every observation.
pub fn tau_from_delta(delta: f64) -> f64 {
    if delta <= 0.0 {
        0.0
    } else {
        -1.0 / delta.ln()
    }
}

/// Per-user decaying credibility state.
///
/// `relative_allocation` is captured when the element is (re)inserted and held
/// fixed between updates; allocation changes always trigger an
/// update-before-change through the owning policy, so the value is never stale
/// when a decay transition reads it.
#[derive(Debug, Clone)]
pub struct CredibilityElement {
    user: UserId,
    update_time: SimTime,
    tau: f64,
    capacity: ResourceVector,
    credibility: ResourceVector,
    relative_allocation: ResourceVector,
}

impl CredibilityElement {
    pub fn new(
        user: UserId,
        now: SimTime,
        tau: f64,
        capacity: ResourceVector,
        relative_allocation: ResourceVector,
    ) -> Self {
        CredibilityElement {
            user,
            update_time: now,
            tau,
            capacity,
            credibility: ResourceVector::ZERO,
            relative_allocation,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn update_time(&self) -> SimTime {
        self.update_time
    }

    pub fn credibility(&self) -> ResourceVector {
        self.credibility
    }

    pub fn relative_allocation(&self) -> ResourceVector {
        self.relative_allocation
    }

    /// Advance the element's credibility to `now`.
    ///
    /// Applies `credibility += alpha * (relative_allocation - credibility)`
    /// with `alpha = 1 - e^(-dt/tau)`. With `tau == 0` the element has no
    /// memory and jumps straight to the target, elapsed time notwithstanding.
    /// Re-deriving at the same timestamp is idempotent; decaying into the past
    /// is an engine bug.
    pub fn decay_to(&mut self, now: SimTime) {
        assert!(
            now >= self.update_time,
            "credibility cannot decay into the past ({now} < {})",
            self.update_time
        );
        if self.tau == 0.0 {
            self.credibility = self.relative_allocation;
        } else if now > self.update_time {
            let alpha = 1.0 - (-(now - self.update_time) / self.tau).exp();
            for resource in Resource::ALL {
                let target = self.relative_allocation[resource];
                self.credibility[resource] += alpha * (target - self.credibility[resource]);
            }
        }
        self.update_time = now;
    }

    /// Replace the recorded relative allocation. Callers must decay to the
    /// current clock first so the pending elapsed time is applied against the
    /// old value. Without memory (`tau == 0`) the credibility tracks the
    /// target instantly, so it jumps here as well.
    pub fn set_relative_allocation(&mut self, relative_allocation: ResourceVector) {
        self.relative_allocation = relative_allocation;
        if self.tau == 0.0 {
            self.credibility = relative_allocation;
        }
    }

    /// Ranking key: the largest per-resource credibility share.
    pub fn dominant_share(&self) -> f64 {
        self.credibility.max_ratio(&self.capacity)
    }
}

/// Ranking entry ordered by (dominant share, user id).
#[derive(Debug, Clone, Copy)]
struct RankKey {
    share: f64,
    user: UserId,
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.share
            .total_cmp(&other.share)
            .then_with(|| self.user.cmp(&other.user))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankKey {}

/// Ordered container of [`CredibilityElement`]s with lazily recomputed keys.
///
/// All reads take an explicit `now`; the queue decays every element to that
/// instant (idempotently) before exposing an order. Within one instant the
/// ranking is cached, which matches the engine's admission loop: time only
/// moves between scans, never during one.
#[derive(Debug, Default)]
pub struct CredibilityQueue {
    elements: HashMap<UserId, CredibilityElement>,
    ranking: BTreeSet<RankKey>,
    synced_at: Option<SimTime>,
}

impl CredibilityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.elements.contains_key(&user)
    }

    /// Insert an element, replacing any existing entry for the same user. The
    /// caller is expected to have decayed the element to its current clock.
    pub fn add(&mut self, element: CredibilityElement) {
        let user = element.user();
        if let Some(existing) = self.elements.remove(&user) {
            self.ranking.remove(&RankKey {
                share: existing.dominant_share(),
                user,
            });
        }
        self.ranking.insert(RankKey {
            share: element.dominant_share(),
            user,
        });
        self.elements.insert(user, element);
    }

    /// Remove the user's element, decayed to `now`, so the caller can park it
    /// in an idle table instead of losing the accumulated credibility.
    pub fn remove(&mut self, user: UserId, now: SimTime) -> Option<CredibilityElement> {
        let mut element = self.elements.remove(&user)?;
        let removed = self.ranking.remove(&RankKey {
            share: element.dominant_share(),
            user,
        });
        debug_assert!(removed, "ranking entry missing for user {user}");
        element.decay_to(now);
        Some(element)
    }

    /// Freshly decayed element with the smallest dominant share.
    pub fn peek_min(&mut self, now: SimTime) -> Option<&CredibilityElement> {
        self.sync(now);
        let key = self.ranking.first()?;
        self.elements.get(&key.user)
    }

    /// Remove and return the element with the smallest dominant share.
    pub fn pop_min(&mut self, now: SimTime) -> Option<CredibilityElement> {
        self.sync(now);
        let user = self.ranking.first()?.user;
        self.remove(user, now)
    }

    /// Elements in ascending (dominant share, user id) order, each decayed to
    /// `now`. Used for the capacity-aware linear scan during admission.
    pub fn ordered_scan(&mut self, now: SimTime) -> impl Iterator<Item = &CredibilityElement> {
        self.sync(now);
        self.ranking.iter().map(|key| &self.elements[&key.user])
    }

    /// Decay every element to `now` and rebuild the ranking. Cached per
    /// instant; decay idempotence makes repeated syncs at the same `now` free.
    fn sync(&mut self, now: SimTime) {
        if self.synced_at == Some(now) {
            return;
        }
        self.ranking.clear();
        for element in self.elements.values_mut() {
            element.decay_to(now);
            self.ranking.insert(RankKey {
                share: element.dominant_share(),
                user: element.user(),
            });
        }
        self.synced_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(user: UserId, tau: f64, relative: ResourceVector) -> CredibilityElement {
        CredibilityElement::new(user, 0.0, tau, ResourceVector::new(10.0, 10.0), relative)
    }

    #[test]
    fn tau_derivation_boundaries() {
        assert_eq!(tau_from_delta(0.0), 0.0);
        let tau = tau_from_delta(0.5);
        assert!((tau - 1.0 / std::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn decay_is_idempotent_at_a_timestamp() {
        let mut a = element(0, 2.0, ResourceVector::new(4.0, 0.0));
        a.decay_to(3.0);
        let once = a.credibility();
        a.decay_to(3.0);
        assert_eq!(a.credibility(), once);
    }

    #[test]
    fn split_decay_matches_single_step() {
        let mut split = element(0, 2.0, ResourceVector::new(4.0, 2.0));
        let mut single = split.clone();
        split.decay_to(1.5);
        split.decay_to(5.0);
        single.decay_to(5.0);
        let diff = split.credibility() - single.credibility();
        for resource in Resource::ALL {
            assert!(diff[resource].abs() < 1e-9);
        }
    }

    #[test]
    fn zero_tau_jumps_to_target() {
        let mut a = element(0, 0.0, ResourceVector::new(4.0, 1.0));
        a.decay_to(0.0);
        assert_eq!(a.credibility(), ResourceVector::new(4.0, 1.0));
    }

    #[test]
    fn ordered_scan_ranks_by_dominant_share_then_user() {
        let mut queue = CredibilityQueue::new();
        queue.add(element(1, 0.0, ResourceVector::new(6.0, 0.0)));
        queue.add(element(0, 0.0, ResourceVector::new(2.0, 3.0)));
        queue.add(element(2, 0.0, ResourceVector::new(2.0, 3.0)));
        let order: Vec<UserId> = queue.ordered_scan(1.0).map(|e| e.user()).collect();
        assert_eq!(order, vec![0, 2, 1]);
    }

    #[test]
    fn remove_returns_decayed_element() {
        let mut queue = CredibilityQueue::new();
        queue.add(element(7, 2.0, ResourceVector::new(4.0, 0.0)));
        let parked = queue.remove(7, 10.0).expect("element present");
        assert_eq!(parked.update_time(), 10.0);
        assert!(parked.credibility()[Resource::Cpu] > 3.9);
        assert!(queue.is_empty());
        assert!(queue.remove(7, 10.0).is_none());
    }

    #[test]
    fn pop_min_drains_in_order() {
        let mut queue = CredibilityQueue::new();
        queue.add(element(0, 0.0, ResourceVector::new(5.0, 0.0)));
        queue.add(element(1, 0.0, ResourceVector::new(1.0, 0.0)));
        assert_eq!(queue.pop_min(0.0).unwrap().user(), 1);
        assert_eq!(queue.pop_min(0.0).unwrap().user(), 0);
        assert!(queue.pop_min(0.0).is_none());
    }
}
