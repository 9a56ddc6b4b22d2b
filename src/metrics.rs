use anyhow::{Context, Result};
use http::Response;
use log::{error, info};
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::runtime::Handle;
use warp::Filter;

/// Starts listening on an HTTP endpoint so that Prometheus can scrape
/// metrics from this instance. The scrape task runs on the provided runtime
/// for the life of the process. Returns an error if something goes wrong
/// setting up the endpoint.
pub fn start_metrics_scrape_endpoint(port: u16, runtime_handle: &Handle) -> Result<()> {
    // This task runs until process exit, so the join handle is dropped.
    runtime_handle.spawn(async move {
        let endpoint = warp::get().and(warp::path("metrics")).map(|| {
            match handle_scrape() {
                Ok(body) => {
                    Response::builder()
                        // https://github.com/prometheus/docs/blob/master/content/docs/instrumenting/exposition_formats.md
                        .header("Content-Type", "text/plain; version=0.0.4")
                        .body(body)
                }
                Err(err) => {
                    error!("unable to scrape Prometheus metrics: {}", err);
                    Response::builder().status(500).body(vec![])
                }
            }
        });

        info!("serving metrics scrapes on 0.0.0.0:{}", port);
        warp::serve(endpoint)
            .run(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port))
            .await;
    });

    Ok(())
}

fn handle_scrape() -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .context("failed to encode metrics")?;
    Ok(buffer)
}

/// Counters describing one ETL run: days driven by the workflow engine and
/// subprocess outcomes within them.
#[derive(Clone, Debug)]
pub struct EtlMetricsCollector {
    pub days_started: IntCounter,
    pub days_finished: IntCounterVec,
    pub subprocesses_finished: IntCounterVec,
}

impl EtlMetricsCollector {
    pub fn new() -> Result<EtlMetricsCollector> {
        let days_started: IntCounter = register_int_counter!(
            "mdetl_days_started",
            "Number of business days the workflow engine started processing"
        )
        .context("failed to register metrics counter for started days")?;

        let days_finished = register_int_counter_vec!(
            "mdetl_days_finished",
            "Number of business days that finished, by status",
            &["status"]
        )
        .context("failed to register metrics counter for finished days")?;

        let subprocesses_finished = register_int_counter_vec!(
            "mdetl_subprocesses_finished",
            "Number of subprocess executions that finished, by subprocess and status",
            &["subprocess", "status"]
        )
        .context("failed to register metrics counter for finished subprocesses")?;

        Ok(EtlMetricsCollector {
            days_started,
            days_finished,
            subprocesses_finished,
        })
    }
}
