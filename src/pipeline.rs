//! Producer/consumer wiring around the synchronous engine.
//!
//! The engine itself is single-threaded and deterministic; this module only
//! adds the I/O stages that let it process multi-million-task traces without
//! holding everything in memory. A named reader thread streams trace records
//! through a bounded channel so admission starts before the file is fully
//! read, and a named writer thread periodically drains the shared finished-task
//! log into the output file. Neither stage ever touches engine state.

use crate::config::{AllocatorKind, SimulationConfig};
use crate::engine::{ArrivalEngine, FinishedLog};
use crate::error::{Result, SimError};
use crate::policy::{Policy, SdrfPolicy, WdrfPolicy};
use crate::resources::ResourceVector;
use crate::trace::{write_finished_task, TaskRecord, TraceReader};
use crate::utilization::SystemUtilization;
use crossbeam_channel::{bounded, RecvTimeoutError};
use indicatif::ProgressBar;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// How long the writer sleeps between drains when no completion signal
/// arrives.
const WRITER_WAKE_INTERVAL: Duration = Duration::from_secs(1);

/// Summary of one completed simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub tasks_submitted: u64,
    pub tasks_finished: u64,
    pub tasks_written: u64,
    pub final_time: f64,
    pub num_users: usize,
    pub capacity: ResourceVector,
}

/// One trace-driven simulation run: utilization pass, engine construction,
/// and the reader/engine/writer pipeline.
pub struct SimulationPipeline {
    config: SimulationConfig,
    trace_path: PathBuf,
    output_path: PathBuf,
    progress: Option<ProgressBar>,
}

impl SimulationPipeline {
    pub fn new(
        config: SimulationConfig,
        trace_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
    ) -> Self {
        SimulationPipeline {
            config,
            trace_path: trace_path.as_ref().to_path_buf(),
            output_path: output_path.as_ref().to_path_buf(),
            progress: None,
        }
    }

    /// Tick a progress bar once per ingested record.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run the simulation to completion and return its summary.
    pub fn run(&self) -> Result<SimulationReport> {
        self.config.validate()?;

        let utilization = SystemUtilization::from_trace(&self.trace_path)?;
        let capacity = utilization
            .system_mean
            .scale(self.config.resource_fraction);
        info!(
            allocator = ?self.config.allocator,
            %capacity,
            users = utilization.num_users(),
            "starting simulation"
        );

        // The clock starts at the trace's first submit time so idle
        // credibility does not decay across the gap from zero.
        let start_time = TraceReader::open(&self.trace_path)?
            .next()
            .transpose()?
            .map(|record| record.submit_time)
            .unwrap_or(0.0);
        let mut engine = self
            .build_engine(&utilization, capacity)
            .with_start_time(start_time);
        // Register users in first-seen order so dense indices line up with the
        // utilization-derived weight table.
        for user in utilization.users() {
            engine.resolve_user(&user.name);
        }

        let reader = TraceReader::open(&self.trace_path)?;
        let (record_tx, record_rx) = bounded::<Result<TaskRecord>>(self.config.queue_depth);
        let reader_handle = thread::Builder::new()
            .name("trace-reader".to_string())
            .spawn(move || {
                for record in reader {
                    let failed = record.is_err();
                    if record_tx.send(record).is_err() || failed {
                        break;
                    }
                }
                // Dropping the sender is the end-of-stream sentinel.
            })?;

        let (done_tx, done_rx) = bounded::<()>(1);
        let writer_handle = self.spawn_writer(engine.finished_log(), done_rx)?;

        let progress = self.progress.clone();
        let records = record_rx.into_iter().inspect(|_| {
            if let Some(bar) = &progress {
                bar.inc(1);
            }
        });
        let outcome = engine.simulate_trace(records, self.config.time_limit);

        // Wake the writer for its final drain regardless of how the run ended,
        // then surface the engine error first if there was one.
        drop(done_tx);
        let written = writer_handle.join().expect("writer thread panicked");
        reader_handle.join().expect("reader thread panicked");
        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }
        outcome?;
        let tasks_written = written.map_err(SimError::Io)?;

        let report = SimulationReport {
            tasks_submitted: engine.tasks_submitted(),
            tasks_finished: engine.tasks_finished(),
            tasks_written,
            final_time: engine.current_time(),
            num_users: engine.registry().len(),
            capacity,
        };
        info!(
            submitted = report.tasks_submitted,
            finished = report.tasks_finished,
            final_time = report.final_time,
            "simulation complete"
        );
        Ok(report)
    }

    fn build_engine(
        &self,
        utilization: &SystemUtilization,
        capacity: ResourceVector,
    ) -> ArrivalEngine {
        let policy = match self.config.allocator {
            AllocatorKind::Wdrf => {
                let weights = if self.config.weighted {
                    utilization
                        .users()
                        .iter()
                        .map(|user| {
                            ResourceVector::from_fn(|r| user.mean[r] / utilization.system_mean[r])
                        })
                        .collect()
                } else {
                    Vec::new()
                };
                Policy::Wdrf(WdrfPolicy::with_weights(weights))
            }
            AllocatorKind::Sdrf => {
                Policy::Sdrf(SdrfPolicy::new(self.config.delta, self.config.reserved))
            }
        };

        let reservations = if self.config.allocator == AllocatorKind::Sdrf && !self.config.same_share
        {
            utilization
                .users()
                .iter()
                .map(|user| {
                    (
                        user.name.clone(),
                        user.mean.scale(self.config.resource_fraction),
                    )
                })
                .collect()
        } else {
            // Same-share (and WDRF): everyone competes with zero reservation.
            Default::default()
        };

        ArrivalEngine::new(capacity, policy)
            .with_reservations(reservations)
            .with_strict_demands(self.config.strict_demands)
    }

    /// Writer stage: wakes every second, or immediately on the completion
    /// signal, and appends whatever finished since the last drain.
    fn spawn_writer(
        &self,
        log: FinishedLog,
        done_rx: crossbeam_channel::Receiver<()>,
    ) -> Result<thread::JoinHandle<std::io::Result<u64>>> {
        let output_path = self.output_path.clone();
        let flush_every = self.config.flush_every.max(1);
        let handle = thread::Builder::new()
            .name("task-writer".to_string())
            .spawn(move || -> std::io::Result<u64> {
                let mut writer = BufWriter::new(File::create(&output_path)?);
                let mut written: u64 = 0;
                let mut unflushed = 0usize;
                loop {
                    let finished = matches!(
                        done_rx.recv_timeout(WRITER_WAKE_INTERVAL),
                        Ok(()) | Err(RecvTimeoutError::Disconnected)
                    );
                    for task in log.drain() {
                        write_finished_task(&mut writer, &task)?;
                        written += 1;
                        unflushed += 1;
                        if unflushed >= flush_every {
                            writer.flush()?;
                            unflushed = 0;
                        }
                    }
                    if finished {
                        writer.flush()?;
                        debug!(written, "output writer drained");
                        return Ok(written);
                    }
                }
            })?;
        Ok(handle)
    }
}
