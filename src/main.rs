// Command-line driver: replay a task trace under a chosen allocation
// discipline and save the simulated schedule next to it.

use indicatif::{ProgressBar, ProgressStyle};
use sdrf_sim::{AllocatorKind, SimulationConfig, SimulationPipeline};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Options parsed from program arguments.
struct CliOptions {
    trace_file: PathBuf,
    output_path: Option<PathBuf>,
    summary_path: Option<PathBuf>,
    config: SimulationConfig,
}

fn usage() -> ! {
    eprintln!(
        "usage: sdrf-sim <trace.csv> [output.csv] [options]\n\
         \n\
         options:\n\
           -a, --allocator <wdrf|sdrf>   discipline to simulate (default sdrf)\n\
           -d, --delta <value>           SDRF memory parameter in [0, 1)\n\
           -r, --resource <fraction>     capacity as a fraction of mean usage\n\
               --same-share              zero reservations for every user\n\
               --reserved                enable the private-reservation regime\n\
           -w, --weights                 weight WDRF by historical mean usage\n\
               --limit <time>            stop ingesting tasks past this time\n\
               --strict                  reject tasks larger than the cluster\n\
           -c, --config <file.json>      load options from a JSON file\n\
               --summary <file.json>     write the run report as JSON"
    );
    process::exit(2);
}

fn parse_cli_options() -> CliOptions {
    let mut trace_file = None;
    let mut output_path = None;
    let mut summary_path = None;
    let mut config = SimulationConfig::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let (key, inline_value) = match arg.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut value = |name: &str| -> String {
            inline_value.clone().or_else(|| args.next()).unwrap_or_else(|| {
                eprintln!("missing value for {name}");
                usage();
            })
        };
        match key.as_str() {
            "-a" | "--allocator" => {
                config.allocator = match value("--allocator").to_ascii_lowercase().as_str() {
                    "wdrf" | "drf" => AllocatorKind::Wdrf,
                    "sdrf" => AllocatorKind::Sdrf,
                    other => {
                        eprintln!("unknown allocator {other:?}");
                        usage();
                    }
                };
            }
            "-d" | "--delta" => {
                config.delta = parse_number(&value("--delta"), "--delta");
            }
            "-r" | "--resource" => {
                config.resource_fraction = parse_number(&value("--resource"), "--resource");
            }
            "--same-share" | "--same_share" => config.same_share = true,
            "--reserved" => config.reserved = true,
            "-w" | "--weights" | "--weighted" => config.weighted = true,
            "--limit" => config.time_limit = Some(parse_number(&value("--limit"), "--limit")),
            "--strict" => config.strict_demands = true,
            "-c" | "--config" => {
                let path = value("--config");
                config = match SimulationConfig::load(&path) {
                    Ok(config) => config,
                    Err(err) => {
                        eprintln!("cannot load {path}: {err}");
                        process::exit(2);
                    }
                };
            }
            "--summary" => summary_path = Some(PathBuf::from(value("--summary"))),
            "-h" | "--help" => usage(),
            _ if key.starts_with('-') => {
                eprintln!("unknown option {key:?}");
                usage();
            }
            _ if trace_file.is_none() => trace_file = Some(PathBuf::from(key.as_str())),
            _ if output_path.is_none() => output_path = Some(PathBuf::from(key.as_str())),
            _ => usage(),
        }
    }

    let Some(trace_file) = trace_file else {
        usage();
    };
    CliOptions {
        trace_file,
        output_path,
        summary_path,
        config,
    }
}

fn parse_number(value: &str, name: &str) -> f64 {
    value.parse().unwrap_or_else(|_| {
        eprintln!("invalid number for {name}: {value:?}");
        usage();
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = parse_cli_options();
    if let Err(err) = options.config.validate() {
        error!("{err}");
        process::exit(2);
    }

    let output_path = options.output_path.clone().unwrap_or_else(|| {
        let name = options.config.default_output_name();
        options
            .trace_file
            .parent()
            .map(|dir| dir.join(&name))
            .unwrap_or_else(|| PathBuf::from(name))
    });
    info!(
        trace = %options.trace_file.display(),
        output = %output_path.display(),
        "simulating task allocation"
    );

    let progress = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {pos} tasks ingested ({per_sec})")
            .expect("valid progress template"),
    );

    let pipeline = SimulationPipeline::new(options.config, &options.trace_file, &output_path)
        .with_progress(progress);
    let report = match pipeline.run() {
        Ok(report) => report,
        Err(err) => {
            error!("simulation failed: {err}");
            process::exit(1);
        }
    };

    info!(
        submitted = report.tasks_submitted,
        finished = report.tasks_finished,
        written = report.tasks_written,
        users = report.num_users,
        final_time = report.final_time,
        "done"
    );

    if let Some(summary_path) = options.summary_path {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&summary_path, json) {
                    error!("cannot write summary: {err}");
                    process::exit(1);
                }
            }
            Err(err) => {
                error!("cannot serialize summary: {err}");
                process::exit(1);
            }
        }
    }
}
