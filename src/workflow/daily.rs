use crate::{
    context::EtlContext,
    error::EtlError,
    subprocess::{
        run_subprocess, CleanSubprocess, ExtractSubprocess, LoadSubprocess, Subprocess,
        SubprocessResult, SubprocessType, TransformSubprocess, ValidateSubprocess,
    },
};
use chrono::NaiveDate;
use slog::{warn, Logger};
use tokio::runtime::Handle;

/// What one business day produced: the per-subprocess results in execution
/// order, and the error that failed the day, if any.
#[derive(Debug)]
pub struct DayResult {
    pub date: NaiveDate,
    pub subprocess_results: Vec<SubprocessResult>,
    pub error: Option<EtlError>,
}

impl DayResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs the five subprocesses for a single day in their fixed order:
/// EXTRACT, TRANSFORM, LOAD, VALIDATE, CLEAN.
///
/// The first failure short-circuits the remaining steps, with one
/// exception: CLEAN always runs, because LOAD's setup script may have
/// created transient tables (and partially filled them) before the day
/// failed. A CLEAN failure is logged but never decides the day's outcome;
/// that was already determined by the data-bearing subprocesses.
pub struct DailyWorkflow {
    subprocesses: Vec<Box<dyn Subprocess>>,
}

impl DailyWorkflow {
    pub fn new(runtime_handle: &Handle) -> DailyWorkflow {
        DailyWorkflow::with_subprocesses(vec![
            Box::new(ExtractSubprocess::new(runtime_handle)),
            Box::new(TransformSubprocess),
            Box::new(LoadSubprocess::new()),
            Box::new(ValidateSubprocess),
            Box::new(CleanSubprocess::new()),
        ])
    }

    /// Runs an arbitrary subprocess list with the same short-circuit and
    /// clean-always semantics. The standard list comes from `new`; callers
    /// embedding the workflow can substitute their own wiring.
    pub fn with_subprocesses(subprocesses: Vec<Box<dyn Subprocess>>) -> DailyWorkflow {
        DailyWorkflow { subprocesses }
    }

    pub fn run(&self, ctx: &mut EtlContext, logger: &Logger) -> DayResult {
        let mut subprocess_results = Vec::with_capacity(self.subprocesses.len());
        let mut day_error: Option<EtlError> = None;

        for subprocess in &self.subprocesses {
            let is_clean = subprocess.subprocess_type() == SubprocessType::Clean;
            if day_error.is_some() && !is_clean {
                continue;
            }

            let (result, error) = run_subprocess(subprocess.as_ref(), ctx, logger);
            subprocess_results.push(result);

            if let Some(error) = error {
                if is_clean {
                    // The day's outcome is already determined; stale
                    // artifacts are preferable to failing the day here.
                    warn!(
                        logger, "clean failed; day outcome unchanged";
                        "error" => error.to_string()
                    );
                } else if day_error.is_none() {
                    day_error = Some(error);
                }
            }
        }

        DayResult {
            date: ctx.current_date(),
            subprocess_results,
            error: day_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        error::ErrorKind,
        logging::setup_test_logging,
        subprocess::Outcome,
    };
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    struct ScriptedSubprocess {
        subprocess_type: SubprocessType,
        fail: bool,
        trace: Arc<Mutex<Vec<SubprocessType>>>,
    }

    impl Subprocess for ScriptedSubprocess {
        fn subprocess_type(&self) -> SubprocessType {
            self.subprocess_type
        }

        fn validate_context(&self, _ctx: &EtlContext) -> Result<(), EtlError> {
            Ok(())
        }

        fn execute(&self, ctx: &mut EtlContext, _logger: &Logger) -> Result<u64, EtlError> {
            // Record through the context as well, so tests can observe the
            // currentSubprocess bookkeeping.
            assert_eq!(ctx.current_subprocess(), Some(self.subprocess_type));
            self.trace.lock().unwrap().push(self.subprocess_type);
            if self.fail {
                Err(EtlError::new(ErrorKind::Extract, "injected"))
            } else {
                Ok(1)
            }
        }
    }

    fn scripted_workflow(
        fail: Option<SubprocessType>,
    ) -> (DailyWorkflow, Arc<Mutex<Vec<SubprocessType>>>) {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let subprocesses: Vec<Box<dyn Subprocess>> = SubprocessType::DAILY_ORDER
            .iter()
            .map(|sp| {
                Box::new(ScriptedSubprocess {
                    subprocess_type: *sp,
                    fail: fail == Some(*sp),
                    trace: trace.clone(),
                }) as Box<dyn Subprocess>
            })
            .collect();
        (DailyWorkflow::with_subprocesses(subprocesses), trace)
    }

    fn context() -> EtlContext {
        EtlContext::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            Arc::new(Config::for_tests()),
            Uuid::new_v4(),
        )
    }

    #[test]
    fn successful_day_runs_all_five_in_order() {
        let logger = setup_test_logging();
        let (workflow, trace) = scripted_workflow(None);
        let mut ctx = context();
        let day = workflow.run(&mut ctx, &logger);

        assert!(day.succeeded());
        assert_eq!(*trace.lock().unwrap(), SubprocessType::DAILY_ORDER.to_vec());
        assert_eq!(day.subprocess_results.len(), 5);
        assert!(day
            .subprocess_results
            .iter()
            .all(|r| r.outcome == Outcome::Succeeded));
    }

    #[test]
    fn clean_still_runs_after_each_possible_failure() {
        for failing in [
            SubprocessType::Extract,
            SubprocessType::Transform,
            SubprocessType::Load,
            SubprocessType::Validate,
        ] {
            let logger = setup_test_logging();
            let (workflow, trace) = scripted_workflow(Some(failing));
            let mut ctx = context();
            let day = workflow.run(&mut ctx, &logger);

            assert!(!day.succeeded(), "day should fail when {} fails", failing);
            let trace = trace.lock().unwrap();
            // Everything after the failure is skipped except Clean.
            let failed_index = SubprocessType::DAILY_ORDER
                .iter()
                .position(|s| *s == failing)
                .unwrap();
            let mut expected: Vec<SubprocessType> =
                SubprocessType::DAILY_ORDER[..=failed_index].to_vec();
            expected.push(SubprocessType::Clean);
            assert_eq!(*trace, expected, "failure in {}", failing);
        }
    }

    #[test]
    fn clean_failure_does_not_fail_the_day() {
        let logger = setup_test_logging();
        let (workflow, trace) = scripted_workflow(Some(SubprocessType::Clean));
        let mut ctx = context();
        let day = workflow.run(&mut ctx, &logger);

        assert!(day.succeeded());
        assert_eq!(trace.lock().unwrap().len(), 5);
        // Clean's own result still records the failure.
        let clean_result = day
            .subprocess_results
            .iter()
            .find(|r| r.subprocess == SubprocessType::Clean)
            .unwrap();
        assert_eq!(clean_result.outcome, Outcome::Failed);
    }

    #[test]
    fn first_error_wins() {
        let logger = setup_test_logging();
        let (workflow, _) = scripted_workflow(Some(SubprocessType::Transform));
        let mut ctx = context();
        let day = workflow.run(&mut ctx, &logger);

        let error = day.error.unwrap();
        assert_eq!(error.subprocess(), Some(SubprocessType::Transform));
        assert_eq!(error.date(), Some(ctx.current_date()));
    }
}
