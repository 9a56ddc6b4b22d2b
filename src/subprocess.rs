pub mod clean;
pub mod extract;
pub mod load;
pub mod transform;
pub mod validate;

use crate::{
    context::EtlContext,
    error::EtlError,
    logging::event,
    DATE_FORMAT,
};
use slog::{error, info, o, Logger};
use std::{
    fmt::{self, Display, Formatter},
    time::{Duration, Instant},
};

pub use clean::CleanSubprocess;
pub use extract::ExtractSubprocess;
pub use load::LoadSubprocess;
pub use transform::TransformSubprocess;
pub use validate::ValidateSubprocess;

/// The five ordered subprocesses a daily workflow runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubprocessType {
    Extract,
    Transform,
    Load,
    Validate,
    Clean,
}

impl SubprocessType {
    /// The fixed execution order within a day. Not configurable.
    pub const DAILY_ORDER: [SubprocessType; 5] = [
        SubprocessType::Extract,
        SubprocessType::Transform,
        SubprocessType::Load,
        SubprocessType::Validate,
        SubprocessType::Clean,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubprocessType::Extract => "EXTRACT",
            SubprocessType::Transform => "TRANSFORM",
            SubprocessType::Load => "LOAD",
            SubprocessType::Validate => "VALIDATE",
            SubprocessType::Clean => "CLEAN",
        }
    }
}

impl Display for SubprocessType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Uniform subprocess contract. A subprocess declares the context keys it
/// requires in `validate_context`, writes exactly its own output keys in
/// `execute`, and returns the number of records it handled.
pub trait Subprocess: Send {
    fn subprocess_type(&self) -> SubprocessType;

    /// Fails with a configuration error when a required context input is
    /// missing. Called by the framework before `execute`.
    fn validate_context(&self, ctx: &EtlContext) -> Result<(), EtlError>;

    fn execute(&self, ctx: &mut EtlContext, logger: &Logger) -> Result<u64, EtlError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// What the framework records about one subprocess invocation.
#[derive(Debug)]
pub struct SubprocessResult {
    pub subprocess: SubprocessType,
    pub count: u64,
    pub duration: Duration,
    pub outcome: Outcome,
}

/// Wraps one subprocess call with context bookkeeping, timing and status
/// logging. Any error is stamped with the subprocess type and business date
/// before it is handed back to the daily workflow.
pub(crate) fn run_subprocess(
    subprocess: &dyn Subprocess,
    ctx: &mut EtlContext,
    parent_logger: &Logger,
) -> (SubprocessResult, Option<EtlError>) {
    let subprocess_type = subprocess.subprocess_type();
    ctx.set_current_subprocess(subprocess_type);

    let logger = parent_logger.new(o!(
        event::SUBPROCESS => subprocess_type.as_str(),
        event::DATE => ctx.current_date().format(DATE_FORMAT).to_string(),
    ));
    info!(logger, "subprocess starting");

    let started = Instant::now();
    let result = subprocess
        .validate_context(ctx)
        .and_then(|()| subprocess.execute(ctx, &logger));
    let duration = started.elapsed();

    match result {
        Ok(count) => {
            info!(
                logger, "subprocess finished";
                event::COUNT => count,
                event::DURATION_MS => duration.as_millis() as u64
            );
            (
                SubprocessResult {
                    subprocess: subprocess_type,
                    count,
                    duration,
                    outcome: Outcome::Succeeded,
                },
                None,
            )
        }
        Err(err) => {
            let err = err.in_context(subprocess_type, ctx.current_date());
            error!(
                logger, "subprocess failed";
                "error" => err.to_string(),
                event::DURATION_MS => duration.as_millis() as u64
            );
            (
                SubprocessResult {
                    subprocess: subprocess_type,
                    count: 0,
                    duration,
                    outcome: Outcome::Failed,
                },
                Some(err),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        error::{ErrorKind, EtlError},
        logging::setup_test_logging,
    };
    use chrono::NaiveDate;
    use std::sync::Arc;
    use uuid::Uuid;

    struct StubSubprocess {
        fail_validation: bool,
    }

    impl Subprocess for StubSubprocess {
        fn subprocess_type(&self) -> SubprocessType {
            SubprocessType::Extract
        }

        fn validate_context(&self, _ctx: &EtlContext) -> Result<(), EtlError> {
            if self.fail_validation {
                Err(EtlError::config("missing context key"))
            } else {
                Ok(())
            }
        }

        fn execute(&self, _ctx: &mut EtlContext, _logger: &Logger) -> Result<u64, EtlError> {
            Ok(3)
        }
    }

    fn test_context() -> EtlContext {
        EtlContext::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            Arc::new(Config::for_tests()),
            Uuid::new_v4(),
        )
    }

    #[test]
    fn successful_run_records_count_and_marks_context() {
        let logger = setup_test_logging();
        let mut ctx = test_context();
        let (result, err) =
            run_subprocess(&StubSubprocess { fail_validation: false }, &mut ctx, &logger);
        assert!(err.is_none());
        assert_eq!(result.outcome, Outcome::Succeeded);
        assert_eq!(result.count, 3);
        assert_eq!(ctx.current_subprocess(), Some(SubprocessType::Extract));
    }

    #[test]
    fn validation_failure_is_stamped_with_context() {
        let logger = setup_test_logging();
        let mut ctx = test_context();
        let (result, err) =
            run_subprocess(&StubSubprocess { fail_validation: true }, &mut ctx, &logger);
        assert_eq!(result.outcome, Outcome::Failed);
        let err = err.unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.subprocess(), Some(SubprocessType::Extract));
        assert_eq!(err.date(), Some(ctx.current_date()));
    }

    #[test]
    fn daily_order_is_fixed() {
        assert_eq!(
            SubprocessType::DAILY_ORDER,
            [
                SubprocessType::Extract,
                SubprocessType::Transform,
                SubprocessType::Load,
                SubprocessType::Validate,
                SubprocessType::Clean,
            ]
        );
    }
}
