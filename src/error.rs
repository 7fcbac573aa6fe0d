//! Error taxonomy for simulation runs.
//!
//! Everything here is fatal: the engine cannot recover mid-run and the only
//! remedy is to rerun the simulation with corrected input. Expected conditions
//! (empty queues, idle users, regime fallthrough) are plain control flow and
//! never surface as errors.

use crate::resources::ResourceVector;
use thiserror::Error;

/// Fatal conditions that abort a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    /// The task stream violated chronological submit order. This is a caller
    /// contract violation; the run is invalid and must be discarded.
    #[error(
        "task {task_id} submitted at {submit_time} behind the simulation clock \
         {current_time}; the trace must be ordered by submit time"
    )]
    OutOfOrderSubmission {
        task_id: String,
        submit_time: f64,
        current_time: f64,
    },

    /// Strict-demand validation rejected a task that could never be admitted.
    #[error("task {task_id} demands {demand} which can never fit the cluster capacity {capacity}")]
    ImpossibleDemand {
        task_id: String,
        demand: ResourceVector,
        capacity: ResourceVector,
    },

    /// Consumed resources exceeded capacity or an allocation went negative.
    /// Indicates a policy or engine bug, never expected in correct operation.
    #[error("cluster accounting violated: {detail}")]
    CapacityViolation { detail: String },

    /// A trace line could not be parsed.
    #[error("trace line {line}: {detail}")]
    MalformedRecord { line: usize, detail: String },

    /// Configuration rejected before the run started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
