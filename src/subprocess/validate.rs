use crate::{
    context::EtlContext,
    error::EtlError,
    subprocess::{Subprocess, SubprocessType},
};
use slog::{info, Logger};

/// Placeholder validation step. No validator is configured in the core, so
/// the day is marked as passing with an empty error list; a real validator
/// would compare loaded counts against the target store here.
pub struct ValidateSubprocess;

impl Subprocess for ValidateSubprocess {
    fn subprocess_type(&self) -> SubprocessType {
        SubprocessType::Validate
    }

    fn validate_context(&self, ctx: &EtlContext) -> Result<(), EtlError> {
        if ctx.loaded_data_count().is_none() {
            return Err(EtlError::config(
                "loaded data count missing from context; load must run first",
            ));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut EtlContext, logger: &Logger) -> Result<u64, EtlError> {
        ctx.set_validation_outcome(true, Vec::new());
        info!(logger, "no validator configured; marking day as valid");
        Ok(0)
    }
}
