use crate::{
    config::TargetConfig,
    logging::event,
    retries::{retry_request_with_params, RetryParameters},
};
use serde_json::{json, Value};
use slog::{info, o, Logger};
use std::time::Duration;

/// Errors that can arise talking to the columnar target store.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("target {name} unavailable: {detail}")]
    Unavailable { name: String, detail: String },
    #[error("running script: {0}")]
    Script(String),
    #[error("inserting into {table}: {detail}")]
    Insert { table: String, detail: String },
    #[error("unexpected response from target: {0}")]
    Protocol(String),
}

/// An open session with the columnar target store. Load uses one session
/// per day for its setup script and all bulk inserts; Clean opens its own
/// to drop the transient tables.
pub trait TargetClient: Send {
    /// Runs an opaque script (table setup or teardown) in this session.
    fn run_script(&mut self, script: &str) -> Result<(), TargetError>;

    /// Bulk-inserts rows into a table using the typed, column-ordered API.
    /// Returns the number of rows the store accepted.
    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<Value>],
    ) -> Result<u64, TargetError>;

    /// Ends the session. Errors are ignored; the server reaps abandoned
    /// sessions anyway.
    fn close(&mut self);
}

/// Opens sessions against a configured target. The indirection keeps Load
/// and Clean testable against fakes while production wires in the HTTP
/// connector.
pub trait TargetConnector: Send + Sync {
    fn connect(
        &self,
        target: &TargetConfig,
        logger: &Logger,
    ) -> Result<Box<dyn TargetClient>, TargetError>;
}

/// Connects to the target store's HTTP session API. Login is retried with
/// exponential backoff; exhausting the retries surfaces as
/// `TargetError::Unavailable`.
pub struct HttpTargetConnector {
    retry_parameters: RetryParameters,
    request_timeout: Duration,
}

impl HttpTargetConnector {
    pub fn new() -> HttpTargetConnector {
        HttpTargetConnector {
            retry_parameters: RetryParameters::default(),
            request_timeout: Duration::from_secs(30),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_retry_parameters(mut self, parameters: RetryParameters) -> Self {
        self.retry_parameters = parameters;
        self
    }
}

impl Default for HttpTargetConnector {
    fn default() -> Self {
        HttpTargetConnector::new()
    }
}

fn is_retryable(error: &ureq::Error) -> bool {
    match error {
        ureq::Error::Transport(_) => true,
        ureq::Error::Status(code, _) => *code >= 500,
    }
}

impl TargetConnector for HttpTargetConnector {
    fn connect(
        &self,
        target: &TargetConfig,
        parent_logger: &Logger,
    ) -> Result<Box<dyn TargetClient>, TargetError> {
        let logger = parent_logger.new(o!(
            event::STORAGE_PATH => target.endpoint.to_string(),
            "target" => target.name.clone(),
        ));
        let agent = ureq::AgentBuilder::new()
            .timeout(self.request_timeout)
            .build();

        let session_url = target
            .endpoint
            .join("api/v1/session")
            .map_err(|e| TargetError::Protocol(e.to_string()))?;

        let response = retry_request_with_params(
            &logger,
            self.retry_parameters,
            "connect to target",
            || {
                agent.post(session_url.as_str()).send_json(json!({
                    "user": target.user,
                    "password": target.password.expose(),
                }))
            },
            is_retryable,
        )
        .map_err(|e| TargetError::Unavailable {
            name: target.name.clone(),
            detail: e.to_string(),
        })?;

        let body: Value = response
            .into_json()
            .map_err(|e| TargetError::Protocol(e.to_string()))?;
        let session_id = body
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| TargetError::Protocol("login response had no session_id".to_owned()))?
            .to_owned();

        info!(logger, "session opened");
        Ok(Box::new(HttpTargetClient {
            agent,
            endpoint: target.endpoint.clone(),
            session_id,
            logger,
        }))
    }
}

/// A live session against the target's HTTP API.
struct HttpTargetClient {
    agent: ureq::Agent,
    endpoint: url::Url,
    session_id: String,
    logger: Logger,
}

impl HttpTargetClient {
    fn url(&self, path: &str) -> Result<url::Url, TargetError> {
        self.endpoint
            .join(path)
            .map_err(|e| TargetError::Protocol(e.to_string()))
    }
}

impl TargetClient for HttpTargetClient {
    fn run_script(&mut self, script: &str) -> Result<(), TargetError> {
        let url = self.url("api/v1/script")?;
        self.agent
            .post(url.as_str())
            .set("x-session-id", &self.session_id)
            .send_json(json!({ "script": script }))
            .map_err(|e| TargetError::Script(e.to_string()))?;
        Ok(())
    }

    fn insert_rows(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<Value>],
    ) -> Result<u64, TargetError> {
        let url = self.url(&format!("api/v1/tables/{}/rows", table))?;
        let response = self
            .agent
            .post(url.as_str())
            .set("x-session-id", &self.session_id)
            .send_json(json!({ "columns": columns, "rows": rows }))
            .map_err(|e| TargetError::Insert {
                table: table.to_owned(),
                detail: e.to_string(),
            })?;
        let body: Value = response
            .into_json()
            .map_err(|e| TargetError::Protocol(e.to_string()))?;
        let inserted = body
            .get("inserted")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                TargetError::Protocol("insert response had no inserted count".to_owned())
            })?;
        info!(
            self.logger, "rows inserted";
            event::TABLE => table.to_owned(),
            event::COUNT => inserted
        );
        Ok(inserted)
    }

    fn close(&mut self) {
        if let Ok(url) = self.url("api/v1/session") {
            let _ = self
                .agent
                .delete(url.as_str())
                .set("x-session-id", &self.session_id)
                .call();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Secret, logging::setup_test_logging};
    use mockito::mock;
    use std::time::Duration;

    fn fast_retries() -> RetryParameters {
        RetryParameters {
            max_attempts: 3,
            initial_interval: Duration::from_millis(5),
            multiplier: 2,
        }
    }

    /// Each test namespaces its routes under a distinct endpoint path so
    /// that mocks cannot cross-match when tests run in parallel against the
    /// shared mock server.
    fn target(prefix: &str) -> TargetConfig {
        TargetConfig {
            name: "research-store".to_owned(),
            endpoint: url::Url::parse(&format!("{}/{}/", mockito::server_url(), prefix))
                .unwrap(),
            user: "etl".to_owned(),
            password: Secret::new("secret"),
        }
    }

    #[test]
    fn connect_script_insert_close() {
        let logger = setup_test_logging();
        let _login = mock("POST", "/happy/api/v1/session")
            .with_status(200)
            .with_body(r#"{"session_id": "s-1"}"#)
            .create();
        let _script = mock("POST", "/happy/api/v1/script")
            .match_header("x-session-id", "s-1")
            .with_status(200)
            .with_body("{}")
            .create();
        let insert = mock("POST", "/happy/api/v1/tables/xbond_quote_stream_temp/rows")
            .match_header("x-session-id", "s-1")
            .with_status(200)
            .with_body(r#"{"inserted": 2}"#)
            .create();
        let _logout = mock("DELETE", "/happy/api/v1/session")
            .with_status(200)
            .create();

        let connector = HttpTargetConnector::new().with_retry_parameters(fast_retries());
        let mut client = connector.connect(&target("happy"), &logger).unwrap();
        client.run_script("drop table if exists t;").unwrap();
        let inserted = client
            .insert_rows(
                "xbond_quote_stream_temp",
                &["a", "b"],
                &[vec![json!(1), json!("x")], vec![json!(2), json!("y")]],
            )
            .unwrap();
        assert_eq!(inserted, 2);
        client.close();
        insert.assert();
    }

    #[test]
    fn three_failed_logins_surface_unavailable() {
        let logger = setup_test_logging();
        let login = mock("POST", "/down/api/v1/session")
            .with_status(503)
            .expect(3)
            .create();

        let connector = HttpTargetConnector::new().with_retry_parameters(fast_retries());
        let err = match connector.connect(&target("down"), &logger) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, TargetError::Unavailable { .. }));
        login.assert();
    }

    #[test]
    fn client_error_is_not_retried() {
        let logger = setup_test_logging();
        let login = mock("POST", "/denied/api/v1/session")
            .with_status(401)
            .expect(1)
            .create();

        let connector = HttpTargetConnector::new().with_retry_parameters(fast_retries());
        let err = match connector.connect(&target("denied"), &logger) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, TargetError::Unavailable { .. }));
        login.assert();
    }
}
