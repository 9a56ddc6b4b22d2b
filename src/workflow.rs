pub mod daily;

use crate::{
    config::Config,
    context::EtlContext,
    error::EtlError,
    logging::event,
    metrics::EtlMetricsCollector,
    subprocess::Outcome,
    DATE_FORMAT,
};
use chrono::NaiveDate;
use slog::{error, info, o, Logger};
use std::sync::Arc;
use uuid::Uuid;

pub use daily::{DailyWorkflow, DayResult};

/// The outcome of one run: a result per business day, in chronological
/// order.
#[derive(Debug)]
pub struct WorkflowResult {
    pub days: Vec<DayResult>,
}

impl WorkflowResult {
    /// True iff every day in the range succeeded.
    pub fn succeeded(&self) -> bool {
        self.days.iter().all(DayResult::succeeded)
    }
}

/// Expands an inclusive date range into business days and drives the daily
/// workflow for each. Days run strictly sequentially; a failed day is
/// recorded and the run continues with the next one.
pub struct WorkflowEngine {
    config: Arc<Config>,
    daily: DailyWorkflow,
    run_id: Uuid,
    metrics: Option<EtlMetricsCollector>,
}

impl WorkflowEngine {
    pub fn new(config: Arc<Config>, daily: DailyWorkflow) -> WorkflowEngine {
        WorkflowEngine {
            config,
            daily,
            run_id: Uuid::new_v4(),
            metrics: None,
        }
    }

    pub fn set_metrics_collector(&mut self, metrics: EtlMetricsCollector) {
        self.metrics = Some(metrics);
    }

    pub fn execute(
        &self,
        from_date: NaiveDate,
        to_date: NaiveDate,
        parent_logger: &Logger,
    ) -> Result<WorkflowResult, EtlError> {
        if from_date > to_date {
            return Err(EtlError::config(format!(
                "from date {} is after to date {}",
                from_date.format(DATE_FORMAT),
                to_date.format(DATE_FORMAT)
            )));
        }

        let logger = parent_logger.new(o!(event::RUN_ID => self.run_id.to_string()));
        info!(
            logger, "starting run";
            "from" => from_date.format(DATE_FORMAT).to_string(),
            "to" => to_date.format(DATE_FORMAT).to_string()
        );

        let mut days = Vec::new();
        let mut date = from_date;
        loop {
            if let Some(metrics) = &self.metrics {
                metrics.days_started.inc();
            }

            let mut ctx = EtlContext::new(date, Arc::clone(&self.config), self.run_id);
            let day = self.daily.run(&mut ctx, &logger);

            let status = if day.succeeded() { "success" } else { "failure" };
            if let Some(metrics) = &self.metrics {
                metrics.days_finished.with_label_values(&[status]).inc();
                for result in &day.subprocess_results {
                    let outcome = match result.outcome {
                        Outcome::Succeeded => "success",
                        Outcome::Failed => "failure",
                    };
                    metrics
                        .subprocesses_finished
                        .with_label_values(&[result.subprocess.as_str(), outcome])
                        .inc();
                }
            }
            match &day.error {
                None => info!(
                    logger, "day finished";
                    event::DATE => date.format(DATE_FORMAT).to_string(),
                ),
                Some(e) => error!(
                    logger, "day failed";
                    event::DATE => date.format(DATE_FORMAT).to_string(),
                    "error" => e.to_string(),
                ),
            }
            days.push(day);

            if date >= to_date {
                break;
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        Ok(WorkflowResult { days })
    }
}
