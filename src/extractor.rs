pub mod object_store;
pub mod parsers;
pub mod sql;

use crate::{
    config::{ExtractSettings, SourceConfig, SourceParams},
    context::EtlContext,
    error::{ErrorKind, EtlError},
    fanout::CancelFlag,
    objectstore::{S3ObjectStore, StoreError},
    record::SourceRecord,
};
use slog::Logger;
use std::time::Duration;
use tokio::runtime::Handle;

pub use object_store::ObjectStoreExtractor;
pub use sql::SqlExtractor;

/// Errors that can arise inside one extractor.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("object {key} is {size} bytes, exceeding the {limit} byte limit")]
    ObjectTooLarge { key: String, size: u64, limit: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("downloading {key}: {detail}")]
    DownloadFailed { key: String, detail: String },
    #[error("parsing {path}: {detail}")]
    Parse { path: String, detail: String },
    #[error("creating work directory {1}: {0}")]
    WorkDir(std::io::Error, String),
    #[error("database unavailable: {0}")]
    DbUnavailable(String),
    #[error("executing query: {0}")]
    Query(String),
    #[error("query exceeded the {}s deadline", .0.as_secs())]
    Timeout(Duration),
    #[error("extraction cancelled")]
    Cancelled,
}

impl ExtractError {
    /// The day-level error class this failure surfaces as. Timeouts and
    /// unreachable databases keep their own kinds so the per-day result can
    /// distinguish them from data problems.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Timeout(_) => ErrorKind::Timeout,
            ExtractError::DbUnavailable(_) => ErrorKind::TargetUnavailable,
            _ => ErrorKind::Extract,
        }
    }

    pub(crate) fn into_etl_error(self, source_name: &str) -> EtlError {
        EtlError::new(self.kind(), format!("source {}: {}", source_name, self))
    }
}

/// A named extraction capability. The extract subprocess drives the
/// lifecycle setup → validate → extract → cleanup, with cleanup guaranteed
/// on every exit path.
pub trait Extractor: Send {
    fn name(&self) -> &str;

    fn category(&self) -> &str;

    /// Acquires resources (connection pools, work directories). Called once
    /// before `extract`.
    fn setup(&mut self, _ctx: &EtlContext) -> Result<(), ExtractError> {
        Ok(())
    }

    /// Checks that the context and configuration hold everything this
    /// extractor needs.
    fn validate(&self, _ctx: &EtlContext) -> Result<(), ExtractError> {
        Ok(())
    }

    /// Produces the day's validated source records. Long-running phases
    /// must poll `cancel` so that a failing sibling extractor can stop this
    /// one promptly.
    fn extract(
        &mut self,
        ctx: &EtlContext,
        cancel: &CancelFlag,
        logger: &Logger,
    ) -> Result<Vec<Box<dyn SourceRecord>>, ExtractError>;

    /// Releases everything `setup` or `extract` acquired. Must tolerate
    /// being called after a failure at any phase.
    fn cleanup(&mut self, logger: &Logger);
}

/// Runs one extractor through its full lifecycle.
pub(crate) fn run_lifecycle(
    extractor: &mut dyn Extractor,
    ctx: &EtlContext,
    cancel: &CancelFlag,
    logger: &Logger,
) -> Result<Vec<Box<dyn SourceRecord>>, ExtractError> {
    let result = extractor
        .setup(ctx)
        .and_then(|()| extractor.validate(ctx))
        .and_then(|()| extractor.extract(ctx, cancel, logger));
    extractor.cleanup(logger);
    result
}

/// Builds the concrete extractor for a source configuration, dispatching on
/// its (type, category) pair. Unknown combinations are configuration
/// errors.
pub fn build_extractor(
    source: &SourceConfig,
    settings: &ExtractSettings,
    runtime_handle: &Handle,
    parent_logger: &Logger,
) -> Result<Box<dyn Extractor>, EtlError> {
    match (&source.params, source.category.as_str()) {
        (SourceParams::ObjectStore(params), object_store::CATEGORY_PRICE_DEPTH) => {
            Ok(Box::new(ObjectStoreExtractor::new(
                &source.name,
                &source.category,
                Box::new(S3ObjectStore::new(params, runtime_handle, parent_logger)),
                Box::new(parsers::QuoteShardParser),
                params.date_format.clone(),
                settings,
            )))
        }
        (SourceParams::ObjectStore(params), object_store::CATEGORY_CFETS_DEAL) => {
            Ok(Box::new(ObjectStoreExtractor::new(
                &source.name,
                &source.category,
                Box::new(S3ObjectStore::new(params, runtime_handle, parent_logger)),
                Box::new(parsers::TradeShardParser),
                params.date_format.clone(),
                settings,
            )))
        }
        (SourceParams::Sql(params), sql::CATEGORY_BOND_FUTURE_QUOTE) => {
            Ok(Box::new(SqlExtractor::new(
                &source.name,
                &source.category,
                params.clone(),
                settings.sql_query_timeout,
                Box::new(sql::FutureQuoteRowMapper),
            )))
        }
        (params, category) => Err(EtlError::config(format!(
            "no extractor for source {} with type {} and category {}",
            source.name,
            params.type_name(),
            category
        ))),
    }
}
