//! Time-weighted utilization statistics derived from a historical trace.
//!
//! A single event sweep over the trace's original start/finish times yields
//! mean and peak usage per resource, for the system and for every user. These
//! summaries seed the simulation inputs: user reservations (mean usage scaled
//! by the resource fraction), effective WDRF weights (user mean over system
//! mean), and the simulated cluster capacity itself.

use crate::error::Result;
use crate::resources::{Resource, ResourceVector};
use crate::trace::TraceReader;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Usage summary for one user, in first-seen order.
#[derive(Debug, Clone, Serialize)]
pub struct UserUsage {
    pub name: String,
    pub mean: ResourceVector,
    pub peak: ResourceVector,
}

/// System-wide and per-user usage derived from one pass over a trace.
#[derive(Debug, Clone, Serialize)]
pub struct SystemUtilization {
    pub span_start: f64,
    pub span_end: f64,
    pub system_mean: ResourceVector,
    pub system_peak: ResourceVector,
    users: Vec<UserUsage>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl SystemUtilization {
    /// Sweep the trace once, accumulating time-weighted usage levels.
    pub fn from_trace(path: impl AsRef<Path>) -> Result<SystemUtilization> {
        // (time, user index, signed demand): one event at start, one at finish.
        let mut events: Vec<(f64, usize, ResourceVector, bool)> = Vec::new();
        let mut names: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in TraceReader::open(path)? {
            let record = record?;
            let user = *index.entry(record.user_id.clone()).or_insert_with(|| {
                names.push(record.user_id.clone());
                names.len() - 1
            });
            let demand = record.demand();
            events.push((record.start_time, user, demand, true));
            events.push((record.finish_time, user, demand, false));
        }

        if events.is_empty() {
            return Ok(SystemUtilization {
                span_start: 0.0,
                span_end: 0.0,
                system_mean: ResourceVector::ZERO,
                system_peak: ResourceVector::ZERO,
                users: Vec::new(),
                index,
            });
        }

        events.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.3.cmp(&b.3)));
        let span_start = events[0].0;
        let span_end = events[events.len() - 1].0;
        let span = span_end - span_start;

        let mut system_level = ResourceVector::ZERO;
        let mut system_peak = ResourceVector::ZERO;
        let mut system_area = ResourceVector::ZERO;
        let mut user_level = vec![ResourceVector::ZERO; names.len()];
        let mut user_peak = vec![ResourceVector::ZERO; names.len()];
        let mut user_area = vec![ResourceVector::ZERO; names.len()];
        let mut previous_time = span_start;

        for (time, user, demand, is_start) in events {
            let elapsed = time - previous_time;
            if elapsed > 0.0 {
                system_area += system_level.scale(elapsed);
                for (area, level) in user_area.iter_mut().zip(&user_level) {
                    *area += level.scale(elapsed);
                }
                previous_time = time;
            }
            if is_start {
                system_level += demand;
                user_level[user] += demand;
                system_peak = system_peak.max(&system_level);
                user_peak[user] = user_peak[user].max(&user_level[user]);
            } else {
                system_level -= demand;
                user_level[user] -= demand;
            }
        }

        let normalize = |area: ResourceVector| {
            if span > 0.0 {
                area.scale(1.0 / span)
            } else {
                ResourceVector::ZERO
            }
        };

        let users = names
            .into_iter()
            .enumerate()
            .map(|(user, name)| UserUsage {
                name,
                mean: normalize(user_area[user]),
                peak: user_peak[user],
            })
            .collect();

        let utilization = SystemUtilization {
            span_start,
            span_end,
            system_mean: normalize(system_area),
            system_peak,
            users,
            index,
        };
        info!(
            users = utilization.users.len(),
            mean = %utilization.system_mean,
            peak = %utilization.system_peak,
            "trace utilization computed"
        );
        Ok(utilization)
    }

    /// Users in first-seen order, matching the dense indices an engine will
    /// assign when the same trace is replayed.
    pub fn users(&self) -> &[UserUsage] {
        &self.users
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn mean(&self, name: &str) -> Option<ResourceVector> {
        self.index.get(name).map(|&user| self.users[user].mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_trace(lines: &[&str]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "sdrf-sim-util-{}-{}.csv",
            std::process::id(),
            lines.len()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn sweep_computes_time_weighted_means_and_peaks() {
        // alice holds (2,4) over [0,10); bob holds (2,0) over [5,10).
        let path = write_trace(&[
            "0,0,10,alice,t1,2,4",
            "0,5,10,bob,t2,2,0",
        ]);
        let utilization = SystemUtilization::from_trace(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(utilization.span_start, 0.0);
        assert_eq!(utilization.span_end, 10.0);
        assert_eq!(utilization.system_peak, ResourceVector::new(4.0, 4.0));
        assert_eq!(utilization.system_mean, ResourceVector::new(3.0, 4.0));
        assert_eq!(
            utilization.mean("bob").unwrap(),
            ResourceVector::new(1.0, 0.0)
        );
        assert_eq!(utilization.users()[0].name, "alice");
    }

    #[test]
    fn empty_trace_yields_zero_usage() {
        let path = write_trace(&[]);
        let utilization = SystemUtilization::from_trace(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(utilization.num_users(), 0);
        assert!(utilization.system_mean.is_zero());
    }
}
