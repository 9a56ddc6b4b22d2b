use crate::{
    config::ExtractSettings,
    context::EtlContext,
    extractor::{ExtractError, Extractor},
    fanout::{self, CancelFlag},
    logging::event,
    objectstore::{ObjectEntry, ObjectStore},
    record::SourceRecord,
    DATE_FORMAT,
};
use slog::{info, warn, Logger};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const CATEGORY_PRICE_DEPTH: &str = "AllPriceDepth";
pub const CATEGORY_CFETS_DEAL: &str = "XbondCfetsDeal";

/// Turns one downloaded CSV shard into source records. Each file family
/// plugs in its own parser; rows that fail to parse are skipped with a
/// warning, never failing the shard.
pub trait ShardParser: Send + Sync {
    fn parse_shard(
        &self,
        path: &Path,
        logger: &Logger,
    ) -> Result<Vec<Box<dyn SourceRecord>>, ExtractError>;
}

/// Extractor for CSV shards held in an object store. Five phases: select
/// (list the day's prefix), download (concurrently, into the per-day work
/// directory), parse, convert (inside the parser) and return. Any oversized
/// object or failed download fails the whole extraction; invalid records
/// are skipped with warnings.
pub struct ObjectStoreExtractor {
    name: String,
    category: String,
    store: Box<dyn ObjectStore>,
    parser: Box<dyn ShardParser>,
    /// Object keys are prefixed `{category}/{date}/`; the date format is
    /// family-specific and defaults to `%Y%m%d`.
    date_format: String,
    max_object_size: u64,
    work_dir: PathBuf,
    day_dir: Option<PathBuf>,
}

impl ObjectStoreExtractor {
    pub fn new(
        name: &str,
        category: &str,
        store: Box<dyn ObjectStore>,
        parser: Box<dyn ShardParser>,
        date_format: Option<String>,
        settings: &ExtractSettings,
    ) -> ObjectStoreExtractor {
        ObjectStoreExtractor {
            name: name.to_owned(),
            category: category.to_owned(),
            store,
            parser,
            date_format: date_format.unwrap_or_else(|| DATE_FORMAT.to_owned()),
            max_object_size: settings.max_object_size,
            work_dir: settings.work_dir.clone(),
            day_dir: None,
        }
    }
}

impl Extractor for ObjectStoreExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn extract(
        &mut self,
        ctx: &EtlContext,
        cancel: &CancelFlag,
        logger: &Logger,
    ) -> Result<Vec<Box<dyn SourceRecord>>, ExtractError> {
        let date = ctx.current_date();

        // Select
        let prefix = format!("{}/{}/", self.category, date.format(&self.date_format));
        let entries = self.store.list(&prefix)?;
        for entry in &entries {
            if entry.size > self.max_object_size {
                return Err(ExtractError::ObjectTooLarge {
                    key: entry.key.clone(),
                    size: entry.size,
                    limit: self.max_object_size,
                });
            }
        }
        info!(
            logger, "selected objects";
            event::CATEGORY => self.category.clone(),
            event::STORAGE_PATH => self.store.path(),
            event::COUNT => entries.len() as u64
        );
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        // Download into {work_dir}/{YYYYMMDD}/{category}/
        let day_dir = self
            .work_dir
            .join(date.format(DATE_FORMAT).to_string())
            .join(&self.category);
        fs::create_dir_all(&day_dir)
            .map_err(|e| ExtractError::WorkDir(e, day_dir.display().to_string()))?;
        self.day_dir = Some(day_dir.clone());

        let store = &self.store;
        let pool_size = fanout::default_pool_size(entries.len());
        let mut files = fanout::run_concurrently(
            logger,
            pool_size,
            entries,
            |entry: ObjectEntry, cancel: &CancelFlag| {
                if cancel.is_cancelled() {
                    return Err(ExtractError::Cancelled);
                }
                let file_name = entry.key.rsplit('/').next().unwrap_or(&entry.key);
                let dest = day_dir.join(file_name);
                store
                    .fetch(&entry.key, &dest)
                    .map_err(|e| ExtractError::DownloadFailed {
                        key: entry.key.clone(),
                        detail: e.to_string(),
                    })?;
                Ok(dest)
            },
        )
        .map_err(|failure| failure.first)?;
        // Downloads complete in arbitrary order; parse shards by name so
        // record order is reproducible.
        files.sort();

        // Parse + convert
        let mut records: Vec<Box<dyn SourceRecord>> = Vec::new();
        for file in &files {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            records.append(&mut self.parser.parse_shard(file, logger)?);
        }

        // Return only records passing the validation gate
        let mut valid = Vec::with_capacity(records.len());
        for record in records {
            if record.validate() {
                valid.push(record);
            } else {
                warn!(
                    logger, "skipping invalid record";
                    event::CATEGORY => self.category.clone(),
                    "record" => record.identity()
                );
            }
        }
        Ok(valid)
    }

    fn cleanup(&mut self, logger: &Logger) {
        if let Some(day_dir) = self.day_dir.take() {
            if let Err(e) = fs::remove_dir_all(&day_dir) {
                warn!(
                    logger, "failed to remove work directory";
                    event::STORAGE_PATH => day_dir.display().to_string(),
                    "error" => e.to_string()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        extractor::{parsers::QuoteShardParser, run_lifecycle},
        logging::setup_test_logging,
        objectstore::LocalObjectStore,
    };
    use chrono::NaiveDate;
    use std::sync::Arc;
    use uuid::Uuid;

    const QUOTE_SHARD: &str = "\
2926859,2026.01.05 09:30:00.125,2026.01.05,210210,2,1,1,107.9197,1.8100,MATURITY,1000000,,
2926859,2026.01.05 09:30:00.125,2026.01.05,210210,2,2,1,108.1531,1.7900,MATURITY,1000000,,
2926859,2026.01.05 09:30:00.125,2026.01.05,210210,2,1,2,107.9000,1.8150,MATURITY,10000000,,
2926859,2026.01.05 09:30:00.125,2026.01.05,210210,2,2,2,108.2000,1.7850,MATURITY,10000000,,
";

    fn extractor_over(
        root: &Path,
        settings: &ExtractSettings,
    ) -> ObjectStoreExtractor {
        ObjectStoreExtractor::new(
            "xbond-depth",
            CATEGORY_PRICE_DEPTH,
            Box::new(LocalObjectStore::new(root.to_path_buf())),
            Box::new(QuoteShardParser),
            None,
            settings,
        )
    }

    fn context() -> EtlContext {
        EtlContext::new(
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            Arc::new(Config::for_tests()),
            Uuid::new_v4(),
        )
    }

    #[test]
    fn downloads_parses_and_cleans_up() {
        let logger = setup_test_logging();
        let store_dir = tempfile::TempDir::new().unwrap();
        let work_dir = tempfile::TempDir::new().unwrap();
        let shard_dir = store_dir.path().join("AllPriceDepth/20260105");
        fs::create_dir_all(&shard_dir).unwrap();
        fs::write(shard_dir.join("depth_0001.csv"), QUOTE_SHARD).unwrap();

        let settings = ExtractSettings {
            work_dir: work_dir.path().to_path_buf(),
            ..ExtractSettings::default()
        };
        let mut extractor = extractor_over(store_dir.path(), &settings);
        let ctx = context();
        let cancel = CancelFlag::default();

        let records = run_lifecycle(&mut extractor, &ctx, &cancel, &logger).unwrap();
        // All four rows share one message offset.
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity(), "quote 2026.01.05 210210.IB offset 2926859");
        // The per-day directory was removed by cleanup.
        assert!(!work_dir.path().join("20260105").join("AllPriceDepth").exists());
    }

    #[test]
    fn empty_prefix_is_an_empty_extraction() {
        let logger = setup_test_logging();
        let store_dir = tempfile::TempDir::new().unwrap();
        let work_dir = tempfile::TempDir::new().unwrap();
        let settings = ExtractSettings {
            work_dir: work_dir.path().to_path_buf(),
            ..ExtractSettings::default()
        };
        let mut extractor = extractor_over(store_dir.path(), &settings);
        let ctx = context();
        let records =
            run_lifecycle(&mut extractor, &ctx, &CancelFlag::default(), &logger).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn oversized_object_fails_the_extraction() {
        let logger = setup_test_logging();
        let store_dir = tempfile::TempDir::new().unwrap();
        let work_dir = tempfile::TempDir::new().unwrap();
        let shard_dir = store_dir.path().join("AllPriceDepth/20260105");
        fs::create_dir_all(&shard_dir).unwrap();
        fs::write(shard_dir.join("huge.csv"), QUOTE_SHARD).unwrap();

        let settings = ExtractSettings {
            work_dir: work_dir.path().to_path_buf(),
            max_object_size: 8,
            ..ExtractSettings::default()
        };
        let mut extractor = extractor_over(store_dir.path(), &settings);
        let ctx = context();
        let err = run_lifecycle(&mut extractor, &ctx, &CancelFlag::default(), &logger)
            .unwrap_err();
        assert!(matches!(err, ExtractError::ObjectTooLarge { .. }));
    }
}
