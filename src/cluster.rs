//! Cluster accounting shared between the engine and the allocation policies.
//!
//! The engine owns a [`ClusterState`] and mutates it on admission and release;
//! policies only ever read it when recomputing ranking keys or scanning for an
//! admissible task.

use crate::resources::ResourceVector;
use crate::task::{SimTime, Task, UserId};
use std::collections::VecDeque;

/// Per-user bookkeeping indexed by dense user id.
#[derive(Debug)]
pub struct UserState {
    /// Sum of demands of this user's currently running tasks.
    pub allocation: ResourceVector,
    /// Static private reservation; the zero vector in same-share configurations.
    pub reservation: ResourceVector,
    pending: VecDeque<Task>,
}

impl UserState {
    fn new(reservation: ResourceVector) -> Self {
        UserState {
            allocation: ResourceVector::ZERO,
            reservation,
            pending: VecDeque::new(),
        }
    }

    pub fn pending_head(&self) -> Option<&Task> {
        self.pending.front()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// System-wide accounting read by policies during admission scans.
#[derive(Debug)]
pub struct ClusterState {
    capacity: ResourceVector,
    consumed: ResourceVector,
    current_time: SimTime,
    users: Vec<UserState>,
}

impl ClusterState {
    pub fn new(capacity: ResourceVector) -> Self {
        ClusterState {
            capacity,
            consumed: ResourceVector::ZERO,
            current_time: 0.0,
            users: Vec::new(),
        }
    }

    pub fn capacity(&self) -> ResourceVector {
        self.capacity
    }

    pub fn consumed(&self) -> ResourceVector {
        self.consumed
    }

    /// Resources still free for admission, `capacity - consumed`.
    pub fn residual(&self) -> ResourceVector {
        self.capacity - self.consumed
    }

    pub fn current_time(&self) -> SimTime {
        self.current_time
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn user(&self, user: UserId) -> &UserState {
        &self.users[user]
    }

    /// Head of the user's FIFO pending queue, if any.
    pub fn pending_head(&self, user: UserId) -> Option<&Task> {
        self.users.get(user).and_then(UserState::pending_head)
    }

    pub(crate) fn set_time(&mut self, time: SimTime) {
        debug_assert!(time >= self.current_time, "simulated clock went backwards");
        self.current_time = time;
    }

    /// Register `user` (and any gap below it) with the given reservation.
    /// Existing users keep their reservation.
    pub(crate) fn ensure_user(&mut self, user: UserId, reservation: ResourceVector) {
        while self.users.len() <= user {
            let reservation = if self.users.len() == user {
                reservation
            } else {
                ResourceVector::ZERO
            };
            self.users.push(UserState::new(reservation));
        }
    }

    pub(crate) fn set_reservation(&mut self, user: UserId, reservation: ResourceVector) {
        self.users[user].reservation = reservation;
    }

    pub(crate) fn push_pending(&mut self, task: Task) {
        self.users[task.user].pending.push_back(task);
    }

    pub(crate) fn pop_pending(&mut self, user: UserId) -> Option<Task> {
        self.users[user].pending.pop_front()
    }

    pub(crate) fn record_admission(&mut self, user: UserId, demand: ResourceVector) {
        self.consumed += demand;
        self.users[user].allocation += demand;
    }

    pub(crate) fn record_release(&mut self, user: UserId, demand: ResourceVector) {
        self.consumed -= demand;
        self.users[user].allocation -= demand;
    }
}
