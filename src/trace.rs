//! Trace file adapters: ordered task records in, finished tasks out.
//!
//! Both directions use the same seven-column CSV layout,
//! `submit_time,start_time,finish_time,user_id,task_id,cpu,memory`. On input
//! the start/finish columns describe the task's historical execution and only
//! contribute its duration; on output they carry the simulated times assigned
//! at admission. Lines are parsed by hand; the traces are plain
//! comma-separated numbers and ids with no quoting.

use crate::error::{Result, SimError};
use crate::resources::ResourceVector;
use crate::task::Task;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Lines, Write};
use std::path::Path;

/// One line of a task trace.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub submit_time: f64,
    pub start_time: f64,
    pub finish_time: f64,
    pub user_id: String,
    pub task_id: String,
    pub cpu: f64,
    pub memory: f64,
}

impl TaskRecord {
    /// Parse a `submit,start,finish,user,task,cpu,memory` line.
    pub fn parse(line: &str, line_number: usize) -> Result<TaskRecord> {
        let fields: Vec<&str> = line.trim().split(',').collect();
        if fields.len() != 7 {
            return Err(SimError::MalformedRecord {
                line: line_number,
                detail: format!("expected 7 fields, found {}", fields.len()),
            });
        }
        let number = |index: usize, name: &str| -> Result<f64> {
            fields[index].trim().parse::<f64>().map_err(|_| {
                SimError::MalformedRecord {
                    line: line_number,
                    detail: format!("invalid {name}: {:?}", fields[index]),
                }
            })
        };
        Ok(TaskRecord {
            submit_time: number(0, "submit_time")?,
            start_time: number(1, "start_time")?,
            finish_time: number(2, "finish_time")?,
            user_id: fields[3].trim().to_string(),
            task_id: fields[4].trim().to_string(),
            cpu: number(5, "cpu")?,
            memory: number(6, "memory")?,
        })
    }

    pub fn duration(&self) -> f64 {
        self.finish_time - self.start_time
    }

    pub fn demand(&self) -> ResourceVector {
        ResourceVector::new(self.cpu, self.memory)
    }
}

/// Streaming reader over a trace file, yielding one record per line.
pub struct TraceReader {
    lines: Lines<BufReader<File>>,
    line_number: usize,
}

impl TraceReader {
    pub fn open(path: impl AsRef<Path>) -> Result<TraceReader> {
        let file = File::open(path)?;
        Ok(TraceReader {
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }
}

impl Iterator for TraceReader {
    type Item = Result<TaskRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(TaskRecord::parse(&line, self.line_number));
        }
    }
}

/// Write one finished task in the trace layout, with the simulated times.
pub fn write_finished_task<W: Write>(writer: &mut W, task: &Task) -> io::Result<()> {
    writeln!(
        writer,
        "{},{},{},{},{},{},{}",
        task.submit_time,
        task.start_time.unwrap_or_default(),
        task.finish_time.unwrap_or_default(),
        task.user_id,
        task.task_id,
        task.demand[crate::resources::Resource::Cpu],
        task.demand[crate::resources::Resource::Memory],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Resource;

    #[test]
    fn parses_a_trace_line() {
        let record = TaskRecord::parse("100,150,250,alice,t-1,0.5,2.0", 1).unwrap();
        assert_eq!(record.user_id, "alice");
        assert_eq!(record.task_id, "t-1");
        assert_eq!(record.duration(), 100.0);
        assert_eq!(record.demand()[Resource::Memory], 2.0);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(
            TaskRecord::parse("1,2,3,user", 4),
            Err(SimError::MalformedRecord { line: 4, .. })
        ));
        assert!(matches!(
            TaskRecord::parse("1,2,3,u,t,abc,1", 9),
            Err(SimError::MalformedRecord { line: 9, .. })
        ));
    }

    #[test]
    fn round_trips_through_the_writer() {
        let mut task = Task::new(0, "alice", "t-1", 100.0, 50.0, ResourceVector::new(0.5, 2.0));
        task.start_time = Some(120.0);
        task.finish_time = Some(170.0);
        let mut buffer = Vec::new();
        write_finished_task(&mut buffer, &task).unwrap();
        let line = String::from_utf8(buffer).unwrap();
        let record = TaskRecord::parse(&line, 1).unwrap();
        assert_eq!(record.submit_time, 100.0);
        assert_eq!(record.start_time, 120.0);
        assert_eq!(record.finish_time, 170.0);
        assert_eq!(record.user_id, "alice");
    }
}
