use crate::{subprocess::SubprocessType, DATE_FORMAT};
use chrono::NaiveDate;
use std::fmt::{self, Display, Formatter};

/// Classification of a day-level failure. Each subprocess surfaces exactly
/// one of these to the daily workflow; the workflow engine records it on the
/// per-day result and moves on to the next day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing configuration. Fatal at run start, day-fatal when
    /// discovered during subprocess validation.
    Config,
    Extract,
    Transformation,
    Load,
    Clean,
    /// The columnar target could not be reached after exhausting retries.
    TargetUnavailable,
    /// A bounded operation (SQL query, download) exceeded its deadline.
    Timeout,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Config => "configuration error",
            ErrorKind::Extract => "extract error",
            ErrorKind::Transformation => "transformation error",
            ErrorKind::Load => "load error",
            ErrorKind::Clean => "clean error",
            ErrorKind::TargetUnavailable => "target unavailable",
            ErrorKind::Timeout => "timeout",
        };
        write!(f, "{}", s)
    }
}

/// The uniform error surfaced by subprocesses to the daily workflow. Carries
/// the subprocess that failed, the business date being processed, a message
/// and an optional cause.
#[derive(Debug)]
pub struct EtlError {
    kind: ErrorKind,
    subprocess: Option<SubprocessType>,
    date: Option<NaiveDate>,
    message: String,
    cause: Option<anyhow::Error>,
}

impl EtlError {
    pub fn new<M: Into<String>>(kind: ErrorKind, message: M) -> EtlError {
        EtlError {
            kind,
            subprocess: None,
            date: None,
            message: message.into(),
            cause: None,
        }
    }

    /// A configuration error discovered before or outside any particular
    /// day's workflow.
    pub fn config<M: Into<String>>(message: M) -> EtlError {
        EtlError::new(ErrorKind::Config, message)
    }

    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> EtlError {
        self.cause = Some(cause.into());
        self
    }

    /// Attaches subprocess and date if they are not already set. The
    /// subprocess framework calls this on every error that crosses a
    /// subprocess boundary, so errors constructed deep inside an extractor
    /// or loader need not thread that context themselves.
    pub(crate) fn in_context(mut self, subprocess: SubprocessType, date: NaiveDate) -> EtlError {
        self.subprocess.get_or_insert(subprocess);
        self.date.get_or_insert(date);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn subprocess(&self) -> Option<SubprocessType> {
        self.subprocess
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for EtlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(subprocess) = self.subprocess {
            write!(f, " in {}", subprocess)?;
        }
        if let Some(date) = self.date {
            write!(f, " for {}", date.format(DATE_FORMAT))?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ", caused by: {:#}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for EtlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|e| e.as_ref() as _)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_attached_once() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let later = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let err = EtlError::new(ErrorKind::Extract, "listing failed")
            .in_context(SubprocessType::Extract, date)
            .in_context(SubprocessType::Load, later);

        // The first context wins; re-wrapping must not overwrite it.
        assert_eq!(err.subprocess(), Some(SubprocessType::Extract));
        assert_eq!(err.date(), Some(date));
    }

    #[test]
    fn display_includes_subprocess_and_date() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let err = EtlError::new(ErrorKind::Load, "insert rejected")
            .in_context(SubprocessType::Load, date);
        let rendered = err.to_string();
        assert!(rendered.contains("LOAD"), "{}", rendered);
        assert!(rendered.contains("20250101"), "{}", rendered);
        assert!(rendered.contains("insert rejected"), "{}", rendered);
    }

    #[test]
    fn config_error_has_no_day_context() {
        let err = EtlError::config("sources.count missing");
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.subprocess().is_none());
        assert!(err.date().is_none());
    }
}
