use crate::{
    context::EtlContext,
    error::{ErrorKind, EtlError},
    loader::{HttpTargetConnector, TargetConnector},
    subprocess::{Subprocess, SubprocessType},
};
use slog::{info, warn, Logger};

/// The teardown script dropping the day's transient tables, embedded at
/// build time.
pub const TEARDOWN_SCRIPT: &str = include_str!("../scripts/teardown_stream_tables.dos");

/// Drops the transient target artifacts for the day. The daily workflow
/// runs this unconditionally, even after an earlier subprocess failed, and
/// swallows any error it returns: stale artifacts are preferable to
/// halting the run, and the next day's setup script drops leftovers anyway.
pub struct CleanSubprocess {
    connector: Box<dyn TargetConnector>,
}

impl CleanSubprocess {
    pub fn new() -> CleanSubprocess {
        CleanSubprocess {
            connector: Box::new(HttpTargetConnector::new()),
        }
    }

    pub fn with_connector(connector: Box<dyn TargetConnector>) -> CleanSubprocess {
        CleanSubprocess { connector }
    }
}

impl Default for CleanSubprocess {
    fn default() -> Self {
        CleanSubprocess::new()
    }
}

impl Subprocess for CleanSubprocess {
    fn subprocess_type(&self) -> SubprocessType {
        SubprocessType::Clean
    }

    fn validate_context(&self, _ctx: &EtlContext) -> Result<(), EtlError> {
        // Clean must be runnable no matter which earlier subprocess failed,
        // so it requires nothing from the context.
        Ok(())
    }

    fn execute(&self, ctx: &mut EtlContext, logger: &Logger) -> Result<u64, EtlError> {
        let mut failures: Vec<String> = Vec::new();
        for target in &ctx.config().targets {
            match self.connector.connect(target, logger) {
                Ok(mut client) => {
                    if let Err(e) = client.run_script(TEARDOWN_SCRIPT) {
                        warn!(
                            logger, "failed to drop transient tables";
                            "target" => target.name.clone(),
                            "error" => e.to_string()
                        );
                        failures.push(format!("{}: {}", target.name, e));
                    } else {
                        info!(logger, "transient tables dropped"; "target" => target.name.clone());
                    }
                    client.close();
                }
                Err(e) => {
                    warn!(
                        logger, "could not reach target for cleanup";
                        "target" => target.name.clone(),
                        "error" => e.to_string()
                    );
                    failures.push(format!("{}: {}", target.name, e));
                }
            }
        }

        ctx.set_cleanup_performed(true);
        if failures.is_empty() {
            Ok(0)
        } else {
            Err(EtlError::new(ErrorKind::Clean, failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, TargetConfig},
        loader::{TargetClient, TargetError},
        logging::setup_test_logging,
    };
    use chrono::NaiveDate;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct CountingConnector {
        scripts_run: Arc<AtomicUsize>,
        refuse_connect: bool,
    }

    struct ScriptCounter {
        scripts_run: Arc<AtomicUsize>,
    }

    impl TargetClient for ScriptCounter {
        fn run_script(&mut self, script: &str) -> Result<(), TargetError> {
            assert!(script.contains("drop table if exists"));
            self.scripts_run.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn insert_rows(
            &mut self,
            _table: &str,
            _columns: &[&str],
            _rows: &[Vec<serde_json::Value>],
        ) -> Result<u64, TargetError> {
            panic!("clean must not insert");
        }

        fn close(&mut self) {}
    }

    impl TargetConnector for CountingConnector {
        fn connect(
            &self,
            target: &TargetConfig,
            _logger: &slog::Logger,
        ) -> Result<Box<dyn TargetClient>, TargetError> {
            if self.refuse_connect {
                return Err(TargetError::Unavailable {
                    name: target.name.clone(),
                    detail: "injected".to_owned(),
                });
            }
            Ok(Box::new(ScriptCounter {
                scripts_run: self.scripts_run.clone(),
            }))
        }
    }

    fn context() -> EtlContext {
        EtlContext::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            Arc::new(Config::for_tests()),
            Uuid::new_v4(),
        )
    }

    #[test]
    fn runs_the_teardown_script_per_target() {
        let logger = setup_test_logging();
        let mut ctx = context();
        let connector = CountingConnector::default();
        let subprocess = CleanSubprocess::with_connector(Box::new(connector.clone()));
        subprocess.execute(&mut ctx, &logger).unwrap();
        assert_eq!(connector.scripts_run.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.cleanup_performed(), Some(true));
    }

    #[test]
    fn unreachable_target_is_reported_but_cleanup_is_marked() {
        let logger = setup_test_logging();
        let mut ctx = context();
        let connector = CountingConnector {
            refuse_connect: true,
            ..CountingConnector::default()
        };
        let subprocess = CleanSubprocess::with_connector(Box::new(connector));
        let err = subprocess.execute(&mut ctx, &logger).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Clean);
        assert_eq!(ctx.cleanup_performed(), Some(true));
    }

    #[test]
    fn requires_nothing_from_the_context() {
        let ctx = context();
        assert!(CleanSubprocess::with_connector(Box::new(CountingConnector::default()))
            .validate_context(&ctx)
            .is_ok());
    }
}
