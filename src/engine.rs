//! Discrete-event arrival engine.
//!
//! The engine owns the simulated clock, the per-user FIFO queues, and the
//! running-task heap, and drives everything from two event kinds: a task
//! arriving and a task finishing. The time the system takes to make an
//! allocation decision is considered negligible, so between events the engine
//! always reaches a quiescent state where no admissible task is waiting for
//! resources that are actually free.

use crate::cluster::ClusterState;
use crate::error::{Result, SimError};
use crate::policy::{AllocationPolicy, Policy};
use crate::resources::{Resource, ResourceVector};
use crate::task::{SimTime, Task, UserId, UserRegistry};
use crate::trace::TaskRecord;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Tolerance absorbing float residue in the accounting invariants. Demands are
/// added and later subtracted as the exact same f64 values, so anything beyond
/// this is a real bookkeeping bug.
const ACCOUNTING_EPS: f64 = 1e-6;

/// Running task ordered as a min-heap entry by (finish time, sequence number).
#[derive(Debug)]
struct RunningEntry {
    task: Task,
}

impl RunningEntry {
    fn finish_time(&self) -> SimTime {
        self.task
            .finish_time
            .expect("running task must have a finish time")
    }
}

impl Ord for RunningEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (earliest finish first).
        other
            .finish_time()
            .total_cmp(&self.finish_time())
            .then_with(|| other.task.seq.cmp(&self.task.seq))
    }
}

impl PartialOrd for RunningEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RunningEntry {
    fn eq(&self, other: &Self) -> bool {
        self.task.seq == other.task.seq
    }
}

impl Eq for RunningEntry {}

/// Thread-safe hand-off log of finished tasks, emitted in nondecreasing
/// finish-time order.
///
/// The engine appends; a writer stage may concurrently drain without ever
/// touching engine state. For small runs the log can simply be snapshotted
/// after the simulation completes.
#[derive(Debug, Clone, Default)]
pub struct FinishedLog {
    inner: Arc<Mutex<VecDeque<Task>>>,
}

impl FinishedLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, task: Task) {
        self.inner.lock().push_back(task);
    }

    /// Remove and return everything currently logged.
    pub fn drain(&self) -> Vec<Task> {
        self.inner.lock().drain(..).collect()
    }

    /// Copy of the log without draining it.
    pub fn snapshot(&self) -> Vec<Task> {
        self.inner.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Simulates a task arrival process under a pluggable allocation policy.
///
/// Tasks enter through [`submit`](ArrivalEngine::submit) in chronological
/// order; [`advance_to`](ArrivalEngine::advance_to) moves the clock while
/// interleaving admissions and releases; finished tasks come out through the
/// shared [`FinishedLog`] with their simulated start and finish times.
#[derive(Debug)]
pub struct ArrivalEngine {
    state: ClusterState,
    policy: Policy,
    registry: UserRegistry,
    reservations: HashMap<String, ResourceVector>,
    running: BinaryHeap<RunningEntry>,
    finished: FinishedLog,
    next_seq: u64,
    strict_demands: bool,
    tasks_submitted: u64,
    tasks_finished: u64,
}

impl ArrivalEngine {
    pub fn new(capacity: ResourceVector, policy: Policy) -> Self {
        ArrivalEngine {
            state: ClusterState::new(capacity),
            policy,
            registry: UserRegistry::new(),
            reservations: HashMap::new(),
            running: BinaryHeap::new(),
            finished: FinishedLog::new(),
            next_seq: 0,
            strict_demands: false,
            tasks_submitted: 0,
            tasks_finished: 0,
        }
    }

    /// Static per-user reservations looked up by external user id when a user
    /// is first resolved. Users without an entry get the zero vector.
    pub fn with_reservations(mut self, reservations: HashMap<String, ResourceVector>) -> Self {
        self.reservations = reservations;
        self
    }

    /// Reject tasks whose demand exceeds total capacity instead of letting
    /// them pend forever. Off by default: traces are normally pre-filtered,
    /// and an oversized task is the caller's mistake, not the engine's.
    pub fn with_strict_demands(mut self, strict: bool) -> Self {
        self.strict_demands = strict;
        self
    }

    /// Start the simulated clock at `t` instead of zero, typically the
    /// trace's first submit time. Idle-user credibility decays from the
    /// moment a user is registered, so starting the clock at the trace epoch
    /// keeps users from accruing eons of idleness before their first task.
    pub fn with_start_time(mut self, t: SimTime) -> Self {
        self.state.set_time(t);
        self
    }

    /// Resolve an external user id to its dense index, registering the user
    /// (with their configured reservation) with the engine and the policy on
    /// first sight.
    pub fn resolve_user(&mut self, name: &str) -> UserId {
        let user = self.registry.resolve(name);
        if user >= self.state.num_users() {
            let reservation = self
                .reservations
                .get(name)
                .copied()
                .unwrap_or(ResourceVector::ZERO);
            self.state.ensure_user(user, reservation);
            self.policy.register_user(&self.state, user);
        }
        user
    }

    pub fn registry(&self) -> &UserRegistry {
        &self.registry
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn current_time(&self) -> SimTime {
        self.state.current_time()
    }

    pub fn finished_log(&self) -> FinishedLog {
        self.finished.clone()
    }

    pub fn tasks_submitted(&self) -> u64 {
        self.tasks_submitted
    }

    pub fn tasks_finished(&self) -> u64 {
        self.tasks_finished
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    /// Override a user's reservation before any of their tasks run.
    pub fn set_reservation(&mut self, user: UserId, reservation: ResourceVector) {
        self.state.set_reservation(user, reservation);
    }

    /// Enqueue a task and (re)register its user with the active policy.
    ///
    /// Tasks must arrive in nondecreasing submit order; a violation is fatal
    /// and invalidates the whole run.
    pub fn submit(&mut self, mut task: Task) -> Result<()> {
        if task.submit_time < self.state.current_time() {
            return Err(SimError::OutOfOrderSubmission {
                task_id: task.task_id,
                submit_time: task.submit_time,
                current_time: self.state.current_time(),
            });
        }
        if self.strict_demands && !task.demand.fits_within(&self.state.capacity()) {
            return Err(SimError::ImpossibleDemand {
                task_id: task.task_id,
                demand: task.demand,
                capacity: self.state.capacity(),
            });
        }
        self.state.ensure_user(task.user, ResourceVector::ZERO);
        task.seq = self.next_seq;
        self.next_seq += 1;
        self.tasks_submitted += 1;
        let user = task.user;
        trace!(user, task = %task.task_id, time = task.submit_time, "task submitted");
        self.state.push_pending(task);
        self.policy.register_user(&self.state, user);
        Ok(())
    }

    /// Advance the clock to `t`, interleaving admissions with the release of
    /// every running task finishing at or before `t`.
    ///
    /// Releasing resources can immediately unblock admission, so the admission
    /// loop runs to exhaustion before each release and again after it; the
    /// engine is quiescent whenever this returns.
    pub fn advance_to(&mut self, t: SimTime) -> Result<()> {
        loop {
            self.admit_all()?;
            match self.running.peek() {
                Some(entry) if entry.finish_time() <= t => self.release_next()?,
                _ => break,
            }
        }
        if t.is_finite() && t > self.state.current_time() {
            self.state.set_time(t);
        }
        Ok(())
    }

    /// Run every remaining event: admissions until blocked, then releases,
    /// until no task is left running. The clock ends at the last finish time.
    pub fn drain(&mut self) -> Result<()> {
        loop {
            self.admit_all()?;
            if self.running.is_empty() {
                return Ok(());
            }
            self.release_next()?;
        }
    }

    /// Consume a chronologically ordered stream of tasks, advancing the clock
    /// to each submit time before enqueueing. With a `time_limit`, ingestion
    /// stops at the first task past the limit and tasks still running at the
    /// limit stay unfinished; without one, the engine drains completely.
    pub fn simulate<I>(&mut self, tasks: I, time_limit: Option<SimTime>) -> Result<()>
    where
        I: IntoIterator<Item = Task>,
    {
        for task in tasks {
            if let Some(limit) = time_limit {
                if task.submit_time > limit {
                    return self.advance_to(limit);
                }
            }
            self.advance_to(task.submit_time)?;
            self.submit(task)?;
        }
        self.finish_run(time_limit)
    }

    /// [`simulate`](ArrivalEngine::simulate) over raw trace records, resolving
    /// external user ids through the engine's registry as they appear.
    pub fn simulate_trace<I>(&mut self, records: I, time_limit: Option<SimTime>) -> Result<()>
    where
        I: IntoIterator<Item = Result<TaskRecord>>,
    {
        for record in records {
            let record = record?;
            if let Some(limit) = time_limit {
                if record.submit_time > limit {
                    return self.advance_to(limit);
                }
            }
            let duration = record.duration();
            let demand = record.demand();
            let user = self.resolve_user(&record.user_id);
            let task = Task::new(
                user,
                record.user_id,
                record.task_id,
                record.submit_time,
                duration,
                demand,
            );
            self.advance_to(task.submit_time)?;
            self.submit(task)?;
        }
        self.finish_run(time_limit)
    }

    fn finish_run(&mut self, time_limit: Option<SimTime>) -> Result<()> {
        match time_limit {
            Some(limit) => self.advance_to(limit),
            None => self.drain(),
        }
    }

    /// Admission loop: ask the policy for candidates until none is admissible.
    fn admit_all(&mut self) -> Result<()> {
        while let Some(user) = self.policy.pick_task(&self.state) {
            let Some(head) = self.state.pending_head(user) else {
                warn!(user, "policy proposed a user with an empty queue");
                break;
            };
            // Policies only propose tasks they believe fit, but the engine
            // re-verifies against the residual capacity before committing.
            if !head.demand.fits_within(&self.state.residual()) {
                warn!(
                    user,
                    task = %head.task_id,
                    "policy proposed a task exceeding residual capacity"
                );
                break;
            }
            self.admit(user)?;
        }
        Ok(())
    }

    fn admit(&mut self, user: UserId) -> Result<()> {
        let mut task = self
            .state
            .pop_pending(user)
            .expect("admitted user must have a pending task");
        let now = self.state.current_time();
        task.start_time = Some(now);
        task.finish_time = Some(now + task.duration);
        self.state.record_admission(user, task.demand);
        self.check_capacity()?;
        trace!(
            user,
            task = %task.task_id,
            start = now,
            finish = task.finish_time.unwrap_or_default(),
            "task admitted"
        );
        self.running.push(RunningEntry { task });
        self.policy.on_admit(&self.state, user);
        Ok(())
    }

    /// Release the earliest-finishing running task, stepping the clock to its
    /// finish time and returning its resources.
    fn release_next(&mut self) -> Result<()> {
        let entry = self
            .running
            .pop()
            .expect("release requires a running task");
        let task = entry.task;
        let user = task.user;
        let finish = task
            .finish_time
            .expect("running task must have a finish time");
        self.state.set_time(finish);
        self.state.record_release(user, task.demand);
        self.check_allocation(user)?;
        self.tasks_finished += 1;
        trace!(user, task = %task.task_id, time = finish, "task finished");
        self.finished.push(task);
        self.policy.on_release(&self.state, user);
        Ok(())
    }

    fn check_capacity(&self) -> Result<()> {
        let consumed = self.state.consumed();
        let capacity = self.state.capacity();
        for resource in Resource::ALL {
            if consumed[resource] > capacity[resource] + ACCOUNTING_EPS {
                return Err(SimError::CapacityViolation {
                    detail: format!(
                        "consumed {consumed} exceeds capacity {capacity} on {resource}"
                    ),
                });
            }
        }
        Ok(())
    }

    fn check_allocation(&self, user: UserId) -> Result<()> {
        let allocation = self.state.user(user).allocation;
        for resource in Resource::ALL {
            if allocation[resource] < -ACCOUNTING_EPS {
                return Err(SimError::CapacityViolation {
                    detail: format!("user {user} allocation {allocation} negative on {resource}"),
                });
            }
        }
        Ok(())
    }

    /// Recompute the accounting sums from the running heap and compare them
    /// with the incremental bookkeeping. Exposed for tests and debugging.
    pub fn verify_accounting(&self) -> Result<()> {
        let mut consumed = ResourceVector::ZERO;
        let mut per_user: HashMap<UserId, ResourceVector> = HashMap::new();
        for entry in &self.running {
            consumed += entry.task.demand;
            *per_user.entry(entry.task.user).or_default() += entry.task.demand;
        }
        let recorded = self.state.consumed();
        for resource in Resource::ALL {
            if (recorded[resource] - consumed[resource]).abs() > ACCOUNTING_EPS {
                return Err(SimError::CapacityViolation {
                    detail: format!(
                        "consumed {recorded} diverges from running-task sum {consumed}"
                    ),
                });
            }
        }
        for user in 0..self.state.num_users() {
            let expected = per_user.get(&user).copied().unwrap_or(ResourceVector::ZERO);
            let recorded = self.state.user(user).allocation;
            for resource in Resource::ALL {
                if (recorded[resource] - expected[resource]).abs() > ACCOUNTING_EPS {
                    return Err(SimError::CapacityViolation {
                        detail: format!(
                            "user {user} allocation {recorded} diverges from running-task sum \
                             {expected}"
                        ),
                    });
                }
            }
        }
        debug!(
            running = self.running.len(),
            finished = self.tasks_finished,
            "accounting verified"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::WdrfPolicy;

    fn engine(capacity: ResourceVector) -> ArrivalEngine {
        ArrivalEngine::new(capacity, Policy::Wdrf(WdrfPolicy::new()))
    }

    fn task(
        engine: &mut ArrivalEngine,
        name: &str,
        id: &str,
        submit: f64,
        duration: f64,
        cpu: f64,
        memory: f64,
    ) -> Task {
        let user = engine.resolve_user(name);
        Task::new(user, name, id, submit, duration, ResourceVector::new(cpu, memory))
    }

    #[test]
    fn out_of_order_submission_is_fatal() {
        let mut engine = engine(ResourceVector::new(10.0, 10.0));
        let first = task(&mut engine, "a", "t1", 5.0, 1.0, 1.0, 1.0);
        let stale = task(&mut engine, "a", "t2", 2.0, 1.0, 1.0, 1.0);
        engine.submit(first).unwrap();
        engine.advance_to(5.0).unwrap();
        let err = engine.submit(stale).unwrap_err();
        assert!(matches!(err, SimError::OutOfOrderSubmission { .. }));
    }

    #[test]
    fn strict_mode_rejects_impossible_demands() {
        let mut engine =
            engine(ResourceVector::new(4.0, 4.0)).with_strict_demands(true);
        let oversized = task(&mut engine, "a", "t1", 0.0, 1.0, 5.0, 1.0);
        let err = engine.submit(oversized).unwrap_err();
        assert!(matches!(err, SimError::ImpossibleDemand { .. }));
    }

    #[test]
    fn admission_waits_for_release() {
        let mut engine = engine(ResourceVector::new(4.0, 4.0));
        let t1 = task(&mut engine, "a", "t1", 0.0, 10.0, 4.0, 4.0);
        let t2 = task(&mut engine, "b", "t2", 1.0, 5.0, 2.0, 2.0);
        engine.simulate(vec![t1, t2], None).unwrap();

        let finished = engine.finished_log().drain();
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].task_id, "t1");
        assert_eq!(finished[0].finish_time, Some(10.0));
        // t2 could not start until t1 released the whole cluster.
        assert_eq!(finished[1].start_time, Some(10.0));
        assert_eq!(finished[1].finish_time, Some(15.0));
        engine.verify_accounting().unwrap();
    }

    #[test]
    fn clock_is_monotonic_and_quiescent_between_events() {
        let mut engine = engine(ResourceVector::new(10.0, 10.0));
        let t1 = task(&mut engine, "a", "t1", 0.0, 3.0, 5.0, 5.0);
        engine.submit(t1).unwrap();
        engine.advance_to(1.0).unwrap();
        assert_eq!(engine.current_time(), 1.0);
        assert_eq!(engine.running_len(), 1);
        engine.advance_to(7.0).unwrap();
        assert_eq!(engine.current_time(), 7.0);
        assert_eq!(engine.running_len(), 0);
        engine.verify_accounting().unwrap();
    }

    #[test]
    fn time_limit_leaves_running_tasks_unfinished() {
        let mut engine = engine(ResourceVector::new(10.0, 10.0));
        let t1 = task(&mut engine, "a", "t1", 0.0, 100.0, 1.0, 1.0);
        let t2 = task(&mut engine, "a", "t2", 50.0, 1.0, 1.0, 1.0);
        engine.simulate(vec![t1, t2], Some(10.0)).unwrap();
        assert_eq!(engine.current_time(), 10.0);
        assert_eq!(engine.finished_log().len(), 0);
        assert_eq!(engine.running_len(), 1);
        // The second task never entered the run.
        assert_eq!(engine.tasks_submitted(), 1);
    }

    #[test]
    fn finished_log_is_ordered_by_finish_time() {
        let mut engine = engine(ResourceVector::new(10.0, 10.0));
        let mut tasks = Vec::new();
        for i in 0..6 {
            let duration = [7.0, 3.0, 5.0, 1.0, 4.0, 2.0][i];
            let name = if i % 2 == 0 { "a" } else { "b" };
            tasks.push(task(
                &mut engine,
                name,
                &format!("t{i}"),
                i as f64,
                duration,
                1.0,
                1.0,
            ));
        }
        engine.simulate(tasks, None).unwrap();
        let finished = engine.finished_log().drain();
        assert_eq!(finished.len(), 6);
        let finish_times: Vec<f64> = finished
            .iter()
            .map(|t| t.finish_time.unwrap())
            .collect();
        let mut sorted = finish_times.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(finish_times, sorted);
    }
}
