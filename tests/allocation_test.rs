// Scenario tests for the allocation disciplines: fairness outcomes, the
// reservation regime, and the degenerate configuration where SDRF must agree
// with plain DRF.

use sdrf_sim::{
    ArrivalEngine, Policy, ResourceVector, SdrfPolicy, Task, WdrfPolicy,
};
use std::collections::HashMap;

fn task(
    engine: &mut ArrivalEngine,
    user: &str,
    id: &str,
    submit: f64,
    duration: f64,
    cpu: f64,
    memory: f64,
) -> Task {
    let user_index = engine.resolve_user(user);
    Task::new(
        user_index,
        user,
        id,
        submit,
        duration,
        ResourceVector::new(cpu, memory),
    )
}

#[test]
fn wdrf_admits_non_contending_tasks_immediately() {
    let mut engine = ArrivalEngine::new(
        ResourceVector::new(10.0, 10.0),
        Policy::Wdrf(WdrfPolicy::new()),
    );
    let a = task(&mut engine, "a", "a1", 0.0, 5.0, 10.0, 0.0);
    let b = task(&mut engine, "b", "b1", 0.0, 5.0, 0.0, 10.0);
    engine.simulate(vec![a, b], None).unwrap();

    let finished = engine.finished_log().drain();
    assert_eq!(finished.len(), 2);
    for task in &finished {
        // No contention on a shared dimension: both start at t=0.
        assert_eq!(task.start_time, Some(0.0));
        assert_eq!(task.finish_time, Some(5.0));
    }
    engine.verify_accounting().unwrap();
}

#[test]
fn wdrf_prefers_the_lowest_dominant_share() {
    let mut engine = ArrivalEngine::new(
        ResourceVector::new(4.0, 4.0),
        Policy::Wdrf(WdrfPolicy::new()),
    );
    // The cluster is full until t=2. Two equal tasks queue up meanwhile; when
    // space frees, b's lower dominant share (a still runs a-big) wins the slot.
    let a_big = task(&mut engine, "a", "a-big", 0.0, 10.0, 1.0, 1.0);
    let filler = task(&mut engine, "c", "c-fill", 0.0, 2.0, 3.0, 3.0);
    let a_small = task(&mut engine, "a", "a-small", 1.0, 1.0, 2.0, 2.0);
    let b_small = task(&mut engine, "b", "b-small", 1.0, 1.0, 2.0, 2.0);
    engine
        .simulate(vec![a_big, filler, a_small, b_small], None)
        .unwrap();

    let finished = engine.finished_log().drain();
    let by_id = |id: &str| {
        finished
            .iter()
            .find(|t| t.task_id == id)
            .expect("task finished")
            .clone()
    };
    assert_eq!(by_id("b-small").start_time, Some(2.0));
    // a's task only fit after b's release, despite being submitted first.
    assert_eq!(by_id("a-small").start_time, Some(3.0));
}

#[test]
fn reservation_regime_serves_private_capacity_first() {
    let mut reservations = HashMap::new();
    reservations.insert("a".to_string(), ResourceVector::new(2.0, 2.0));
    reservations.insert("b".to_string(), ResourceVector::new(2.0, 2.0));

    let mut engine = ArrivalEngine::new(
        ResourceVector::new(4.0, 4.0),
        Policy::Sdrf(SdrfPolicy::new(0.5, true)),
    )
    .with_reservations(reservations);

    let a1 = task(&mut engine, "a", "a1", 0.0, 5.0, 2.0, 2.0);
    let b1 = task(&mut engine, "b", "b1", 0.0, 5.0, 2.0, 2.0);
    let a2 = task(&mut engine, "a", "a2", 0.0, 5.0, 1.0, 1.0);
    engine.submit(a1).unwrap();
    engine.submit(b1).unwrap();
    engine.submit(a2).unwrap();
    engine.advance_to(0.0).unwrap();

    // Both users fit inside their own reservation and run immediately; the
    // extra task for a exceeds a's reservation and the cluster is full.
    assert_eq!(engine.running_len(), 2);
    assert_eq!(engine.state().consumed(), ResourceVector::new(4.0, 4.0));

    // Once the first tasks finish, the pending task is admitted.
    engine.advance_to(6.0).unwrap();
    assert_eq!(engine.running_len(), 1);
    let finished = engine.finished_log().drain();
    assert_eq!(finished.len(), 2);

    engine.drain().unwrap();
    let finished = engine.finished_log().drain();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].task_id, "a2");
    assert_eq!(finished[0].start_time, Some(5.0));
    engine.verify_accounting().unwrap();
}

/// A deterministic but irregular workload touching both resource dimensions,
/// several users, and repeated idle/busy transitions.
fn build_workload(engine: &mut ArrivalEngine) -> Vec<Task> {
    let users = ["u0", "u1", "u2"];
    let mut tasks = Vec::new();
    let mut submit = 0.0;
    for i in 0..40 {
        let user = users[i % users.len()];
        let cpu = 1.0 + ((i * 7) % 5) as f64;
        let memory = 1.0 + ((i * 3) % 4) as f64;
        let duration = 2.0 + ((i * 11) % 9) as f64;
        tasks.push(task(
            engine,
            user,
            &format!("{user}-t{i}"),
            submit,
            duration,
            cpu,
            memory,
        ));
        if i % 4 == 3 {
            submit += 3.0;
        }
    }
    tasks
}

#[test]
fn same_share_sdrf_with_zero_delta_matches_plain_wdrf() {
    // Same-share: zero reservations for everyone; delta = 0 removes all
    // memory from the credibility, collapsing SDRF to equal-weight DRF.
    let mut wdrf_engine = ArrivalEngine::new(
        ResourceVector::new(6.0, 6.0),
        Policy::Wdrf(WdrfPolicy::new()),
    );
    let workload = build_workload(&mut wdrf_engine);
    wdrf_engine.simulate(workload, None).unwrap();
    let wdrf_finished = wdrf_engine.finished_log().drain();

    let mut sdrf_engine = ArrivalEngine::new(
        ResourceVector::new(6.0, 6.0),
        Policy::Sdrf(SdrfPolicy::new(0.0, false)),
    );
    let workload = build_workload(&mut sdrf_engine);
    sdrf_engine.simulate(workload, None).unwrap();
    let sdrf_finished = sdrf_engine.finished_log().drain();

    assert_eq!(wdrf_finished.len(), 40);
    assert_eq!(sdrf_finished.len(), 40);
    for (w, s) in wdrf_finished.iter().zip(&sdrf_finished) {
        assert_eq!(w.task_id, s.task_id);
        assert_eq!(w.start_time, s.start_time);
        assert_eq!(w.finish_time, s.finish_time);
    }
}

#[test]
fn capacity_is_never_exceeded_under_either_policy() {
    for policy in [
        Policy::Wdrf(WdrfPolicy::new()),
        Policy::Sdrf(SdrfPolicy::new(0.3, false)),
    ] {
        let capacity = ResourceVector::new(6.0, 6.0);
        let mut engine = ArrivalEngine::new(capacity, policy);
        let workload = build_workload(&mut engine);

        // Submit step by step so the invariants can be checked at every
        // quiescent point, not only at the end of the run.
        for task in workload {
            engine.advance_to(task.submit_time).unwrap();
            engine.submit(task).unwrap();
            engine.verify_accounting().unwrap();
            assert!(engine.state().consumed().fits_within(&capacity));
        }
        engine.drain().unwrap();
        engine.verify_accounting().unwrap();
        assert!(engine.state().consumed().fits_within(&capacity));

        let finished = engine.finished_log().drain();
        assert_eq!(finished.len(), 40);
        let mut last_finish = f64::NEG_INFINITY;
        for task in &finished {
            let start = task.start_time.unwrap();
            let finish = task.finish_time.unwrap();
            assert!(start >= task.submit_time);
            assert_eq!(finish, start + task.duration);
            assert!(finish >= last_finish, "finished log out of order");
            last_finish = finish;
        }
    }
}
