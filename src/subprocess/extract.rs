use crate::{
    config::{ExtractSettings, SourceConfig},
    context::EtlContext,
    error::EtlError,
    extractor::{build_extractor, run_lifecycle, Extractor},
    fanout,
    logging::event,
    record::SourceRecord,
    subprocess::{Subprocess, SubprocessType},
};
use slog::{info, o, warn, Logger};
use tokio::runtime::Handle;

pub type ExtractorFactory = Box<
    dyn Fn(&SourceConfig, &ExtractSettings, &Logger) -> Result<Box<dyn Extractor>, EtlError>
        + Send
        + Sync,
>;

/// Builds one extractor per configured source, runs them concurrently on a
/// bounded pool, and merges their outputs into the context. The first
/// extractor failure cancels its siblings and fails the subprocess with no
/// partial output published.
pub struct ExtractSubprocess {
    factory: ExtractorFactory,
}

impl ExtractSubprocess {
    pub fn new(runtime_handle: &Handle) -> ExtractSubprocess {
        let handle = runtime_handle.clone();
        ExtractSubprocess {
            factory: Box::new(move |source, settings, logger| {
                build_extractor(source, settings, &handle, logger)
            }),
        }
    }

    /// Substitutes the extractor factory; used to wire in non-S3 stores.
    pub fn with_factory(factory: ExtractorFactory) -> ExtractSubprocess {
        ExtractSubprocess { factory }
    }
}

impl Subprocess for ExtractSubprocess {
    fn subprocess_type(&self) -> SubprocessType {
        SubprocessType::Extract
    }

    fn validate_context(&self, _ctx: &EtlContext) -> Result<(), EtlError> {
        // The date and configuration are intrinsic to every context.
        Ok(())
    }

    fn execute(&self, ctx: &mut EtlContext, logger: &Logger) -> Result<u64, EtlError> {
        let config = ctx.config();
        let mut extractors: Vec<Box<dyn Extractor>> = Vec::with_capacity(config.sources.len());
        for source in &config.sources {
            extractors.push((self.factory)(source, &config.extract, logger)?);
        }

        let pool_size = fanout::default_pool_size(extractors.len());
        info!(
            logger, "running extractors";
            event::COUNT => extractors.len() as u64,
            "pool_size" => pool_size as u64
        );

        let ctx_ref: &EtlContext = ctx;
        let outputs = fanout::run_concurrently(
            logger,
            pool_size,
            extractors,
            |mut extractor, cancel| {
                let extractor_logger = logger.new(o!(
                    event::SOURCE => extractor.name().to_owned(),
                    event::CATEGORY => extractor.category().to_owned(),
                ));
                run_lifecycle(extractor.as_mut(), ctx_ref, cancel, &extractor_logger)
                    .map_err(|e| e.into_etl_error(extractor.name()))
            },
        )
        .map_err(|failure| {
            warn!(
                logger, "extract fan-out failed";
                "cancelled_extractors" => failure.cancelled_jobs as u64
            );
            failure.first
        })?;

        // Merge in completion order; downstream code must not rely on any
        // per-extractor ordering.
        let mut merged: Vec<Box<dyn SourceRecord>> = Vec::new();
        for records in outputs {
            merged.extend(records);
        }
        let count = merged.len() as u64;
        ctx.set_extracted_data(merged);
        Ok(count)
    }
}
