use crate::{
    context::EtlContext,
    error::{ErrorKind, EtlError},
    loader::{HttpTargetConnector, TargetClient, TargetConnector, TargetError},
    logging::event,
    record::{DataType, TargetRecord},
    subprocess::{Subprocess, SubprocessType},
};
use slog::{info, warn, Logger};

/// The transient-table setup script, embedded at build time. Idempotent:
/// it drops before creating, so leftovers of a previously failed day do not
/// break it.
pub const SETUP_SCRIPT: &str = include_str!("../scripts/setup_stream_tables.dos");

/// Opens one session per configured target, runs the setup script, then
/// bulk-inserts the transformed records per data type in a fixed order,
/// sorted by receive time. The first insertion error aborts the whole
/// subprocess; rows already inserted stay behind for Clean to erase.
pub struct LoadSubprocess {
    connector: Box<dyn TargetConnector>,
}

impl LoadSubprocess {
    pub fn new() -> LoadSubprocess {
        LoadSubprocess {
            connector: Box::new(HttpTargetConnector::new()),
        }
    }

    pub fn with_connector(connector: Box<dyn TargetConnector>) -> LoadSubprocess {
        LoadSubprocess { connector }
    }
}

impl Default for LoadSubprocess {
    fn default() -> Self {
        LoadSubprocess::new()
    }
}

fn target_error_kind(error: &TargetError) -> ErrorKind {
    match error {
        TargetError::Unavailable { .. } => ErrorKind::TargetUnavailable,
        _ => ErrorKind::Load,
    }
}

fn load_session(
    client: &mut dyn TargetClient,
    records: &[Box<dyn TargetRecord>],
    logger: &Logger,
) -> Result<u64, EtlError> {
    client
        .run_script(SETUP_SCRIPT)
        .map_err(|e| EtlError::new(ErrorKind::Load, e.to_string()))?;

    let mut total = 0u64;
    for data_type in DataType::LOAD_ORDER {
        // Records lacking the sort key cannot take their place in the
        // stream and are dropped, each with its own warning.
        let mut batch: Vec<&Box<dyn TargetRecord>> = Vec::new();
        for record in records.iter().filter(|r| r.data_type() == data_type) {
            if record.receive_time().is_some() {
                batch.push(record);
            } else {
                warn!(
                    logger, "dropping record without receive_time";
                    event::DATA_TYPE => data_type.as_str()
                );
            }
        }
        if batch.is_empty() {
            continue;
        }
        // Stable sort: ties keep their input order.
        batch.sort_by_key(|r| r.receive_time());

        let table = data_type.stream_table();
        let columns = batch[0].columns();
        let rows: Vec<Vec<serde_json::Value>> = batch.iter().map(|r| r.row()).collect();
        let inserted = client
            .insert_rows(table, columns, &rows)
            .map_err(|e| EtlError::new(target_error_kind(&e), e.to_string()))?;
        info!(
            logger, "loaded data type";
            event::DATA_TYPE => data_type.as_str(),
            event::TABLE => table,
            event::COUNT => inserted
        );
        total += inserted;
    }
    Ok(total)
}

impl Subprocess for LoadSubprocess {
    fn subprocess_type(&self) -> SubprocessType {
        SubprocessType::Load
    }

    fn validate_context(&self, ctx: &EtlContext) -> Result<(), EtlError> {
        if ctx.transformed_data().is_none() {
            return Err(EtlError::config(
                "transformed data missing from context; transform must run first",
            ));
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut EtlContext, logger: &Logger) -> Result<u64, EtlError> {
        let records = ctx.transformed_data().unwrap_or(&[]);

        let mut total = 0u64;
        for target in &ctx.config().targets {
            let mut client = self
                .connector
                .connect(target, logger)
                .map_err(|e| EtlError::new(target_error_kind(&e), e.to_string()))?;
            let result = load_session(client.as_mut(), records, logger);
            client.close();
            total += result?;
        }

        ctx.set_loaded_data_count(total);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, TargetConfig},
        logging::setup_test_logging,
        record::{FutureQuoteRow, QuoteRow, TradeRow},
    };
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Script,
        Insert { table: String, rows: usize },
        Close,
    }

    #[derive(Clone, Default)]
    struct Recording {
        calls: Arc<Mutex<Vec<Call>>>,
        rows_seen: Arc<Mutex<Vec<(String, Vec<Vec<serde_json::Value>>)>>>,
        fail_table: Option<&'static str>,
        refuse_connect: bool,
    }

    struct FakeClient {
        recording: Recording,
    }

    impl TargetClient for FakeClient {
        fn run_script(&mut self, _script: &str) -> Result<(), TargetError> {
            self.recording.calls.lock().unwrap().push(Call::Script);
            Ok(())
        }

        fn insert_rows(
            &mut self,
            table: &str,
            _columns: &[&str],
            rows: &[Vec<serde_json::Value>],
        ) -> Result<u64, TargetError> {
            if self.recording.fail_table == Some(table) {
                return Err(TargetError::Insert {
                    table: table.to_owned(),
                    detail: "injected".to_owned(),
                });
            }
            self.recording.calls.lock().unwrap().push(Call::Insert {
                table: table.to_owned(),
                rows: rows.len(),
            });
            self.recording
                .rows_seen
                .lock()
                .unwrap()
                .push((table.to_owned(), rows.to_vec()));
            Ok(rows.len() as u64)
        }

        fn close(&mut self) {
            self.recording.calls.lock().unwrap().push(Call::Close);
        }
    }

    impl TargetConnector for Recording {
        fn connect(
            &self,
            target: &TargetConfig,
            _logger: &Logger,
        ) -> Result<Box<dyn TargetClient>, TargetError> {
            if self.refuse_connect {
                return Err(TargetError::Unavailable {
                    name: target.name.clone(),
                    detail: "injected".to_owned(),
                });
            }
            Ok(Box::new(FakeClient {
                recording: self.clone(),
            }))
        }
    }

    fn context() -> EtlContext {
        EtlContext::new(
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            Arc::new(Config::for_tests()),
            Uuid::new_v4(),
        )
    }

    fn quote_row(second: u32) -> Box<dyn TargetRecord> {
        Box::new(QuoteRow {
            receive_time: Some(Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, second).unwrap()),
            ..QuoteRow::default()
        })
    }

    fn trade_row(second: u32) -> Box<dyn TargetRecord> {
        Box::new(TradeRow {
            receive_time: Some(Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, second).unwrap()),
            ..TradeRow::default()
        })
    }

    #[test]
    fn loads_types_in_fixed_order_sorted_by_receive_time() {
        let logger = setup_test_logging();
        let mut ctx = context();
        // Trades first in the context; quotes out of receive_time order.
        ctx.set_transformed_data(vec![
            trade_row(5),
            quote_row(30),
            quote_row(10),
            quote_row(20),
        ]);

        let recording = Recording::default();
        let subprocess = LoadSubprocess::with_connector(Box::new(recording.clone()));
        let count = subprocess.execute(&mut ctx, &logger).unwrap();
        assert_eq!(count, 4);
        assert_eq!(ctx.loaded_data_count(), Some(4));

        let calls = recording.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                Call::Script,
                Call::Insert {
                    table: "xbond_quote_stream_temp".to_owned(),
                    rows: 3
                },
                Call::Insert {
                    table: "xbond_trade_stream_temp".to_owned(),
                    rows: 1
                },
                Call::Close,
            ]
        );

        // Quote rows were sorted ascending by receive_time.
        let rows_seen = recording.rows_seen.lock().unwrap();
        let (_, quote_rows) = &rows_seen[0];
        let columns = QuoteRow::default().columns();
        let time_idx = columns.iter().position(|c| *c == "receive_time").unwrap();
        let times: Vec<String> = quote_rows
            .iter()
            .map(|r| r[time_idx].as_str().unwrap().to_owned())
            .collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn records_without_receive_time_are_dropped() {
        let logger = setup_test_logging();
        let mut ctx = context();
        ctx.set_transformed_data(vec![
            quote_row(1),
            Box::new(FutureQuoteRow::default()), // no receive_time
        ]);

        let recording = Recording::default();
        let subprocess = LoadSubprocess::with_connector(Box::new(recording.clone()));
        let count = subprocess.execute(&mut ctx, &logger).unwrap();
        assert_eq!(count, 1);
        // No insert was attempted for the future-quote table.
        let calls = recording.calls.lock().unwrap();
        assert!(!calls.iter().any(
            |c| matches!(c, Call::Insert { table, .. } if table == "fut_market_price_stream_temp")
        ));
    }

    #[test]
    fn insert_failure_aborts_remaining_types() {
        let logger = setup_test_logging();
        let mut ctx = context();
        ctx.set_transformed_data(vec![quote_row(1), trade_row(1)]);

        let recording = Recording {
            fail_table: Some("xbond_quote_stream_temp"),
            ..Recording::default()
        };
        let subprocess = LoadSubprocess::with_connector(Box::new(recording.clone()));
        let err = subprocess.execute(&mut ctx, &logger).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert!(ctx.loaded_data_count().is_none());
        // The trade insert never happened, but the session was closed.
        let calls = recording.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![Call::Script, Call::Close]);
    }

    #[test]
    fn unreachable_target_surfaces_unavailable() {
        let logger = setup_test_logging();
        let mut ctx = context();
        ctx.set_transformed_data(Vec::new());

        let recording = Recording {
            refuse_connect: true,
            ..Recording::default()
        };
        let subprocess = LoadSubprocess::with_connector(Box::new(recording));
        let err = subprocess.execute(&mut ctx, &logger).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TargetUnavailable);
    }

    #[test]
    fn empty_transformed_data_still_runs_the_setup_script() {
        let logger = setup_test_logging();
        let mut ctx = context();
        ctx.set_transformed_data(Vec::new());

        let recording = Recording::default();
        let subprocess = LoadSubprocess::with_connector(Box::new(recording.clone()));
        let count = subprocess.execute(&mut ctx, &logger).unwrap();
        assert_eq!(count, 0);
        assert_eq!(ctx.loaded_data_count(), Some(0));
        let calls = recording.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![Call::Script, Call::Close]);
    }
}
