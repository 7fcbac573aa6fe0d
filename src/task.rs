//! Task records and the per-engine user registry.

use crate::resources::ResourceVector;
use std::collections::HashMap;

/// Dense user index assigned by [`UserRegistry`] on first sight.
pub type UserId = usize;

/// Simulated time. The clock unit is whatever the trace uses (microseconds for
/// the cluster traces this crate was built around); the engine never interprets
/// it beyond ordering and differences.
pub type SimTime = f64;

/// A unit of work travelling through the simulation.
///
/// The arrival fields (`user`, ids, `submit_time`, `duration`, `demand`) are
/// fixed at ingestion. `start_time` and `finish_time` are written exactly once,
/// at admission, after which the task is immutable again and moves from pending
/// to running to finished.
#[derive(Debug, Clone)]
pub struct Task {
    /// Dense user index, resolved through the engine's registry.
    pub user: UserId,
    /// External user identifier, carried through to the output log.
    pub user_id: String,
    /// External task identifier.
    pub task_id: String,
    pub submit_time: SimTime,
    pub duration: SimTime,
    pub demand: ResourceVector,
    /// Simulated start, assigned at admission.
    pub start_time: Option<SimTime>,
    /// Simulated finish, `start_time + duration`, assigned at admission.
    pub finish_time: Option<SimTime>,
    /// Monotonically increasing sequence number stamped by the engine at
    /// submission; used only for stable ordering when tasks otherwise tie.
    pub seq: u64,
}

impl Task {
    pub fn new(
        user: UserId,
        user_id: impl Into<String>,
        task_id: impl Into<String>,
        submit_time: SimTime,
        duration: SimTime,
        demand: ResourceVector,
    ) -> Self {
        Task {
            user,
            user_id: user_id.into(),
            task_id: task_id.into(),
            submit_time,
            duration,
            demand,
            start_time: None,
            finish_time: None,
            seq: 0,
        }
    }
}

/// Stable mapping from external user identifiers to dense indices.
///
/// Indices are assigned on first sight, monotonically increasing, and never
/// reused. The registry is owned by an engine instance rather than being
/// process-wide, so independent simulations can run concurrently in the same
/// process without sharing counters.
#[derive(Debug, Default)]
pub struct UserRegistry {
    index: HashMap<String, UserId>,
    names: Vec<String>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the dense index for `name`, assigning the next free index on
    /// first sight.
    pub fn resolve(&mut self, name: &str) -> UserId {
        if let Some(&user) = self.index.get(name) {
            return user;
        }
        let user = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), user);
        user
    }

    pub fn get(&self, name: &str) -> Option<UserId> {
        self.index.get(name).copied()
    }

    pub fn name(&self, user: UserId) -> Option<&str> {
        self.names.get(user).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
