use chrono::NaiveDate;
use clap::{App, Arg};
use slog::{error, info};
use std::{path::Path, process, sync::Arc};
use tokio::runtime::Runtime;

use mdetl::{
    config::Config,
    error::ErrorKind,
    lock::InstanceLock,
    logging::{setup_logging, LoggingConfiguration},
    metrics::{start_metrics_scrape_endpoint, EtlMetricsCollector},
    workflow::{DailyWorkflow, WorkflowEngine},
    DATE_FORMAT,
};

// Exit codes, from most to least specific failure class.
const EXIT_SUCCESS: i32 = 0;
const EXIT_INPUT_VALIDATION: i32 = 1;
const EXIT_CONCURRENT_RUN: i32 = 2;
const EXIT_ETL_FAILURE: i32 = 3;
const EXIT_CONFIG_ERROR: i32 = 4;
const EXIT_UNEXPECTED: i32 = 5;

const DEFAULT_LOCK_FILE: &str = "/tmp/mdetl.lock";

fn date_validator(s: String) -> Result<(), String> {
    NaiveDate::parse_from_str(&s, DATE_FORMAT)
        .map(|_| ())
        .map_err(|e| format!("{}: {}", s, e))
}

fn port_validator(s: String) -> Result<(), String> {
    s.parse::<u16>().map(|_| ()).map_err(|e| e.to_string())
}

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let version = format!(
        "{} {} {}",
        env!("VERGEN_SEMVER"),
        env!("VERGEN_SHA_SHORT"),
        env!("VERGEN_BUILD_TIMESTAMP"),
    );

    let matches = App::new("mdetl")
        .about("Daily market data ETL: object-store CSV shards and SQL tick rows into a columnar store")
        .version(version.as_str())
        .arg(
            Arg::with_name("from")
                .long("from")
                .value_name("YYYYMMDD")
                .required(true)
                .validator(date_validator)
                .help("First business date of the inclusive range"),
        )
        .arg(
            Arg::with_name("to")
                .long("to")
                .value_name("YYYYMMDD")
                .required(true)
                .validator(date_validator)
                .help("Last business date of the inclusive range"),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("PATH")
                .required(true)
                .help("Path to the INI configuration file"),
        )
        .arg(
            Arg::with_name("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level override (TRACE, DEBUG, INFO, WARNING, ERROR, CRITICAL)"),
        )
        .arg(
            Arg::with_name("force-json-log-output")
                .long("force-json-log-output")
                .help("Force log output to JSON format even on a tty"),
        )
        .arg(
            Arg::with_name("lock-file")
                .long("lock-file")
                .value_name("PATH")
                .default_value(DEFAULT_LOCK_FILE)
                .help("Path of the single-instance lock file"),
        )
        .arg(
            Arg::with_name("metrics-port")
                .long("metrics-port")
                .value_name("PORT")
                .validator(port_validator)
                .help("Serve Prometheus metrics scrapes on this port"),
        )
        .get_matches();

    // The validators already guaranteed these parse.
    let from_date =
        NaiveDate::parse_from_str(matches.value_of("from").unwrap(), DATE_FORMAT).unwrap();
    let to_date = NaiveDate::parse_from_str(matches.value_of("to").unwrap(), DATE_FORMAT).unwrap();
    if from_date > to_date {
        eprintln!(
            "--from {} is after --to {}",
            from_date.format(DATE_FORMAT),
            to_date.format(DATE_FORMAT)
        );
        return EXIT_INPUT_VALIDATION;
    }

    let config = match Config::from_file(Path::new(matches.value_of("config").unwrap())) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let logging_configuration = LoggingConfiguration {
        force_json_output: config.logging.force_json
            || matches.is_present("force-json-log-output"),
        version_string: &version,
        log_level: matches
            .value_of("log-level")
            .unwrap_or(&config.logging.level),
    };
    let (logger, _guard) = match setup_logging(&logging_configuration) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("failed to set up logging: {}", e);
            return EXIT_UNEXPECTED;
        }
    };

    let lock_path = Path::new(matches.value_of("lock-file").unwrap());
    let _lock = match InstanceLock::acquire(lock_path, &logger) {
        Ok(lock) => lock,
        Err(e) => {
            error!(logger, "could not acquire single-instance lock"; "error" => e.to_string());
            return EXIT_CONCURRENT_RUN;
        }
    };

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(logger, "failed to create async runtime"; "error" => e.to_string());
            return EXIT_UNEXPECTED;
        }
    };

    let daily = DailyWorkflow::new(runtime.handle());
    let mut engine = WorkflowEngine::new(Arc::new(config), daily);

    if let Some(port) = matches.value_of("metrics-port") {
        let port: u16 = port.parse().unwrap();
        match EtlMetricsCollector::new() {
            Ok(collector) => {
                if let Err(e) = start_metrics_scrape_endpoint(port, runtime.handle()) {
                    error!(logger, "failed to start metrics endpoint"; "error" => e.to_string());
                    return EXIT_UNEXPECTED;
                }
                engine.set_metrics_collector(collector);
            }
            Err(e) => {
                error!(logger, "failed to register metrics"; "error" => e.to_string());
                return EXIT_UNEXPECTED;
            }
        }
    }

    match engine.execute(from_date, to_date, &logger) {
        Ok(result) => {
            let failed_days = result.days.iter().filter(|d| !d.succeeded()).count();
            info!(
                logger, "run finished";
                "days" => result.days.len(),
                "failed_days" => failed_days
            );
            if result.succeeded() {
                EXIT_SUCCESS
            } else {
                EXIT_ETL_FAILURE
            }
        }
        Err(e) => {
            error!(logger, "run aborted"; "error" => e.to_string());
            if e.kind() == ErrorKind::Config {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_UNEXPECTED
            }
        }
    }
}
