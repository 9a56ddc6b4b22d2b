use crate::{
    config::SqlParams,
    context::EtlContext,
    extractor::{ExtractError, Extractor},
    fanout::CancelFlag,
    record::{FutureQuoteTick, SourceRecord},
    retries::{retry_request_with_params, RetryParameters},
    DATE_FORMAT, SOURCE_DATE_FORMAT, SOURCE_TIME_FORMAT,
};
use chrono::{NaiveDate, NaiveDateTime};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use slog::{warn, Logger};
use std::time::{Duration, Instant};

pub const CATEGORY_BOND_FUTURE_QUOTE: &str = "BondFutureQuote";

/// The placeholder the SQL template must carry; replaced with the business
/// date as an 8-digit integer.
pub const BUSINESS_DATE_PLACEHOLDER: &str = "{BUSINESS_DATE}";

/// Maps one result-set row to a source record. Row errors and records that
/// fail validation are skipped with warnings; they never abort the query.
pub trait RowMapper: Send + Sync {
    fn map_row(
        &self,
        date: NaiveDate,
        row: &rusqlite::Row,
        logger: &Logger,
    ) -> Result<Box<dyn SourceRecord>, rusqlite::Error>;
}

/// Extractor for tick rows held in a relational database. Loads the SQL
/// template from the source configuration, substitutes the business date,
/// streams the result set through the family's row mapper, and bounds the
/// query with a deadline enforced through the connection's progress
/// handler.
pub struct SqlExtractor {
    name: String,
    category: String,
    params: SqlParams,
    query_timeout: Duration,
    mapper: Box<dyn RowMapper>,
    pool: Option<r2d2::Pool<SqliteConnectionManager>>,
    retry_parameters: RetryParameters,
    connection_timeout: Duration,
}

impl SqlExtractor {
    pub fn new(
        name: &str,
        category: &str,
        params: SqlParams,
        query_timeout: Duration,
        mapper: Box<dyn RowMapper>,
    ) -> SqlExtractor {
        SqlExtractor {
            name: name.to_owned(),
            category: category.to_owned(),
            params,
            query_timeout,
            mapper,
            pool: None,
            retry_parameters: RetryParameters::default(),
            connection_timeout: Duration::from_secs(5),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_tuning(
        mut self,
        retry_parameters: RetryParameters,
        connection_timeout: Duration,
    ) -> SqlExtractor {
        self.retry_parameters = retry_parameters;
        self.connection_timeout = connection_timeout;
        self
    }

    fn classify(&self, error: rusqlite::Error) -> ExtractError {
        if is_interrupted(&error) {
            ExtractError::Timeout(self.query_timeout)
        } else {
            ExtractError::Query(error.to_string())
        }
    }

    fn run_query(
        &self,
        conn: &Connection,
        sql: &str,
        date: NaiveDate,
        cancel: &CancelFlag,
        logger: &Logger,
    ) -> Result<Vec<Box<dyn SourceRecord>>, ExtractError> {
        let mut stmt = conn.prepare(sql).map_err(|e| self.classify(e))?;
        let mut rows = stmt.query([]).map_err(|e| self.classify(e))?;

        let mut records: Vec<Box<dyn SourceRecord>> = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(self.classify(e)),
            };
            match self.mapper.map_row(date, row, logger) {
                Ok(record) => {
                    if record.validate() {
                        records.push(record);
                    } else {
                        warn!(
                            logger, "skipping invalid record";
                            "record" => record.identity()
                        );
                    }
                }
                Err(e) => {
                    warn!(logger, "skipping unmappable row"; "error" => e.to_string());
                }
            }
        }
        Ok(records)
    }
}

fn is_interrupted(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::OperationInterrupted
    )
}

impl Extractor for SqlExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn setup(&mut self, _ctx: &EtlContext) -> Result<(), ExtractError> {
        // The pool is built lazily; connection failures surface in extract
        // where they are retried.
        let manager = SqliteConnectionManager::file(&self.params.url);
        let pool = r2d2::Pool::builder()
            .max_size(5)
            .min_idle(Some(1))
            .connection_timeout(self.connection_timeout)
            .build_unchecked(manager);
        self.pool = Some(pool);
        Ok(())
    }

    fn validate(&self, _ctx: &EtlContext) -> Result<(), ExtractError> {
        if !self.params.template.contains(BUSINESS_DATE_PLACEHOLDER) {
            return Err(ExtractError::Query(format!(
                "sql template for {} does not contain {}",
                self.name, BUSINESS_DATE_PLACEHOLDER
            )));
        }
        Ok(())
    }

    fn extract(
        &mut self,
        ctx: &EtlContext,
        cancel: &CancelFlag,
        logger: &Logger,
    ) -> Result<Vec<Box<dyn SourceRecord>>, ExtractError> {
        let date = ctx.current_date();
        let sql = self.params.template.replace(
            BUSINESS_DATE_PLACEHOLDER,
            &date.format(DATE_FORMAT).to_string(),
        );

        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| ExtractError::Query("extractor used before setup".to_owned()))?;
        let conn = retry_request_with_params(
            logger,
            self.retry_parameters,
            "acquire database connection",
            || pool.get(),
            |_| true,
        )
        .map_err(|e| ExtractError::DbUnavailable(e.to_string()))?;

        let deadline = Instant::now() + self.query_timeout;
        conn.progress_handler(4096, Some(move || Instant::now() >= deadline));
        let result = self.run_query(&conn, &sql, date, cancel, logger);
        conn.progress_handler(0, None::<fn() -> bool>);
        result
    }

    fn cleanup(&mut self, _logger: &Logger) {
        self.pool = None;
    }
}

/// Row mapper for the bond-future quote family. Expects the template to
/// project `product_id`, bid/ask prices and volumes, `last_price`,
/// `volume`, `open_interest` and a `receive_time` text column.
pub struct FutureQuoteRowMapper;

impl RowMapper for FutureQuoteRowMapper {
    fn map_row(
        &self,
        date: NaiveDate,
        row: &rusqlite::Row,
        logger: &Logger,
    ) -> Result<Box<dyn SourceRecord>, rusqlite::Error> {
        let receive_time_text: Option<String> = row.get("receive_time")?;
        let receive_time = receive_time_text.as_deref().and_then(|raw| {
            match NaiveDateTime::parse_from_str(raw, SOURCE_TIME_FORMAT) {
                Ok(t) => Some(t),
                Err(_) => {
                    warn!(logger, "unparseable receive_time"; "value" => raw.to_owned());
                    None
                }
            }
        });
        Ok(Box::new(FutureQuoteTick {
            business_date: Some(date.format(SOURCE_DATE_FORMAT).to_string()),
            product_id: row.get("product_id")?,
            exchange: Some("CFFEX".to_owned()),
            source: Some("TICKDB".to_owned()),
            bid_price: row.get("bid_price")?,
            bid_volume: row.get("bid_volume")?,
            ask_price: row.get("ask_price")?,
            ask_volume: row.get("ask_volume")?,
            last_price: row.get("last_price")?,
            volume: row.get("volume")?,
            open_interest: row.get("open_interest")?,
            receive_time,
        }))
    }
}
