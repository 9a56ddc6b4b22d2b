use crate::logging::event;
use slog::{debug, info, Logger};
use std::{fmt::Debug, thread::sleep, time::Duration};

/// Attempt-capped exponential backoff. The defaults are three attempts with
/// the sleep doubling from one second, i.e. sleeps of 1s and 2s between the
/// attempts. Connection establishment to the SQL source and the columnar
/// target both use the defaults.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RetryParameters {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub multiplier: u32,
}

impl Default for RetryParameters {
    fn default() -> RetryParameters {
        RetryParameters {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

/// Executes the provided action `f`, retrying with exponential backoff if
/// the error returned by `f` is deemed retryable by `is_retryable`. On
/// success, returns the value returned by `f`. On failure, returns the error
/// returned by the last attempt to call `f`. Retryable failures are logged
/// using the provided logger.
pub(crate) fn retry_request<F, T, E, R>(
    logger: &Logger,
    action: &str,
    f: F,
    is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    R: FnMut(&E) -> bool,
    E: Debug,
{
    retry_request_with_params(logger, RetryParameters::default(), action, f, is_retryable)
}

pub(crate) fn retry_request_with_params<F, T, E, R>(
    logger: &Logger,
    parameters: RetryParameters,
    action: &str,
    mut f: F,
    mut is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    R: FnMut(&E) -> bool,
    E: Debug,
{
    let mut interval = parameters.initial_interval;
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= parameters.max_attempts.max(1) || !is_retryable(&error) {
                    debug!(
                        logger, "giving up";
                        event::ACTION => action.to_owned(),
                        "attempt" => attempt,
                        "error" => format!("{:?}", error)
                    );
                    return Err(error);
                }
                info!(
                    logger, "encountered retryable error";
                    event::ACTION => action.to_owned(),
                    "attempt" => attempt,
                    "backoff_ms" => interval.as_millis() as u64,
                    "error" => format!("{:?}", error)
                );
                sleep(interval);
                interval *= parameters.multiplier;
                attempt += 1;
            }
        }
    }
}
