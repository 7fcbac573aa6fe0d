//! Simulation configuration.
//!
//! All knobs live in one serde-friendly struct so runs can be described either
//! on the command line or in a JSON file; unspecified fields keep their
//! defaults.

use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Allocation discipline to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorKind {
    Wdrf,
    Sdrf,
}

impl Default for AllocatorKind {
    fn default() -> Self {
        AllocatorKind::Sdrf
    }
}

/// Tunables for one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub allocator: AllocatorKind,
    /// SDRF memory parameter, in `[0, 1)`. Zero means no memory: credibility
    /// jumps straight to the current relative allocation.
    pub delta: f64,
    /// Cluster capacity (and reservations) as a fraction of the mean usage
    /// observed in the trace; e.g. 1.1 gives every user 10% headroom over
    /// their historical mean.
    pub resource_fraction: f64,
    /// Force all-zero reservations so the two-regime discipline collapses to
    /// pure credibility ranking; the baseline for comparing against WDRF.
    pub same_share: bool,
    /// Enable the private-reservation regime in front of the shared pool.
    pub reserved: bool,
    /// Weight WDRF by each user's mean usage normalized by the system mean.
    pub weighted: bool,
    /// Stop ingesting tasks past this simulated time and leave in-flight work
    /// unfinished. `None` drains the whole trace.
    pub time_limit: Option<f64>,
    /// Fail fast on tasks whose demand exceeds total capacity instead of
    /// letting them pend forever.
    pub strict_demands: bool,
    /// Bounded depth of the reader-to-engine channel.
    pub queue_depth: usize,
    /// How often (in finished tasks) the output writer flushes to disk.
    pub flush_every: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            allocator: AllocatorKind::default(),
            delta: 0.0,
            resource_fraction: 1.0,
            same_share: false,
            reserved: false,
            weighted: false,
            time_limit: None,
            strict_demands: false,
            queue_depth: 10_000,
            flush_every: 4096,
        }
    }
}

impl SimulationConfig {
    /// Load a JSON config file; missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<SimulationConfig> {
        let file = File::open(path)?;
        let config: SimulationConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| SimError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.delta) {
            return Err(SimError::InvalidConfig(format!(
                "delta must be in [0, 1), got {}",
                self.delta
            )));
        }
        if self.resource_fraction <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "resource fraction must be positive, got {}",
                self.resource_fraction
            )));
        }
        if self.queue_depth == 0 {
            return Err(SimError::InvalidConfig(
                "queue depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Default output file name encoding the run parameters, e.g.
    /// `task_sim_sdrf_1.10_d0.500-same_share.csv`.
    pub fn default_output_name(&self) -> String {
        let mut name = match self.allocator {
            AllocatorKind::Wdrf => format!("task_sim_wdrf_{:.2}", self.resource_fraction),
            AllocatorKind::Sdrf => format!(
                "task_sim_sdrf_{:.2}_d{:.3}",
                self.resource_fraction, self.delta
            ),
        };
        if self.weighted {
            name.push_str("-weighted");
        }
        if self.same_share {
            name.push_str("-same_share");
        }
        if self.reserved {
            name.push_str("-reserved");
        }
        name.push_str(".csv");
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SimulationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.allocator, AllocatorKind::Sdrf);
        assert_eq!(config.queue_depth, 10_000);
    }

    #[test]
    fn delta_out_of_range_is_rejected() {
        let config = SimulationConfig {
            delta: 1.0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn output_name_encodes_parameters() {
        let config = SimulationConfig {
            allocator: AllocatorKind::Sdrf,
            delta: 0.5,
            resource_fraction: 1.1,
            same_share: true,
            ..SimulationConfig::default()
        };
        assert_eq!(
            config.default_output_name(),
            "task_sim_sdrf_1.10_d0.500-same_share.csv"
        );
    }

    #[test]
    fn parses_partial_json() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{"allocator": "wdrf", "weighted": true}"#).unwrap();
        assert_eq!(config.allocator, AllocatorKind::Wdrf);
        assert!(config.weighted);
        assert_eq!(config.resource_fraction, 1.0);
    }
}
