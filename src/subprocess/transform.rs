use crate::{
    context::EtlContext,
    error::{ErrorKind, EtlError},
    fanout,
    logging::event,
    record::{DataType, SourceRecord, TargetRecord},
    subprocess::{Subprocess, SubprocessType},
    transform::{map_records, transformer_for},
};
use slog::{info, o, warn, Logger};

/// Groups the extracted records by source type and runs one transformer per
/// non-empty group on a worker pool sized to the group count. Fail-fast:
/// the first transformer error cancels the remaining groups and nothing is
/// published to the context.
pub struct TransformSubprocess;

impl Subprocess for TransformSubprocess {
    fn subprocess_type(&self) -> SubprocessType {
        SubprocessType::Transform
    }

    fn validate_context(&self, ctx: &EtlContext) -> Result<(), EtlError> {
        if ctx.extracted_data().is_none() {
            return Err(EtlError::config(
                "extracted data missing from context; extract must run first",
            ));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut EtlContext, logger: &Logger) -> Result<u64, EtlError> {
        let records = ctx.extracted_data().unwrap_or(&[]);

        // Partition by discriminator. Input order within a group is
        // preserved, and the transformer keeps it one-to-one in its output.
        let mut groups: Vec<(DataType, Vec<&dyn SourceRecord>)> = Vec::new();
        for data_type in DataType::LOAD_ORDER {
            let group: Vec<&dyn SourceRecord> = records
                .iter()
                .filter(|r| r.source_type() == data_type)
                .map(|r| r.as_ref())
                .collect();
            if !group.is_empty() {
                groups.push((data_type, group));
            }
        }

        info!(logger, "transforming groups"; event::COUNT => groups.len() as u64);

        let pool_size = groups.len().max(1);
        let outputs = fanout::run_concurrently(
            logger,
            pool_size,
            groups,
            |(data_type, group), _cancel| {
                let group_logger = logger.new(o!(
                    event::DATA_TYPE => data_type.as_str(),
                ));
                let transformer = transformer_for(data_type);
                map_records(transformer.as_ref(), &group, &group_logger)
            },
        )
        .map_err(|failure| {
            warn!(
                logger, "transform fan-out failed";
                "cancelled_groups" => failure.cancelled_jobs as u64
            );
            EtlError::new(ErrorKind::Transformation, failure.first.to_string())
        })?;

        let mut merged: Vec<Box<dyn TargetRecord>> = Vec::new();
        for group in outputs {
            merged.extend(group);
        }
        let count = merged.len() as u64;
        ctx.set_transformed_data(merged);
        Ok(count)
    }
}
