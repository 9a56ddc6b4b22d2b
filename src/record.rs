pub mod future;
pub mod quote;
pub mod trade;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

pub use future::{FutureQuoteRow, FutureQuoteTick};
pub use quote::{QuoteRow, QuoteTick};
pub use trade::{TradeRow, TradeTick};

/// Discriminator shared by a source record family and the target table it
/// loads into. The mapping between the two is 1:1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    XbondQuote,
    XbondTrade,
    BondFutureQuote,
}

impl DataType {
    /// The order in which Load inserts record types into the target store.
    pub const LOAD_ORDER: [DataType; 3] = [
        DataType::XbondQuote,
        DataType::XbondTrade,
        DataType::BondFutureQuote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::XbondQuote => "xbond-quote",
            DataType::XbondTrade => "xbond-trade",
            DataType::BondFutureQuote => "bond-future-quote",
        }
    }

    /// The transient table this data type is bulk-inserted into. Created by
    /// Load's setup script and dropped by Clean's teardown script.
    pub fn stream_table(&self) -> &'static str {
        match self {
            DataType::XbondQuote => "xbond_quote_stream_temp",
            DataType::XbondTrade => "xbond_trade_stream_temp",
            DataType::BondFutureQuote => "fut_market_price_stream_temp",
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<DataType, String> {
        match s {
            "xbond-quote" => Ok(DataType::XbondQuote),
            "xbond-trade" => Ok(DataType::XbondTrade),
            "bond-future-quote" => Ok(DataType::BondFutureQuote),
            _ => Err(format!("unknown data type {}", s)),
        }
    }
}

/// A single field read out of a source record, or written into a target
/// record. Numeric variants carry `None` where the upstream value was null;
/// the conversion into a target field turns that into the sentinel value so
/// that downstream consumers can tell unset apart from zero.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Str(Option<String>),
    Int(Option<i32>),
    Long(Option<i64>),
    Double(Option<f64>),
    Date(Option<NaiveDate>),
    DateTime(Option<NaiveDateTime>),
    Instant(Option<DateTime<Utc>>),
}

#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("no column named {0}")]
    Unknown(String),
    #[error("cannot assign {value_kind} to {column_kind} column {column}")]
    Incompatible {
        column: String,
        column_kind: &'static str,
        value_kind: &'static str,
    },
    #[error("malformed date {text} in column {column}")]
    MalformedDate { column: String, text: String },
}

impl FieldValue {
    fn kind(&self) -> &'static str {
        match self {
            FieldValue::Str(_) => "string",
            FieldValue::Int(_) => "int",
            FieldValue::Long(_) => "long",
            FieldValue::Double(_) => "double",
            FieldValue::Date(_) => "date",
            FieldValue::DateTime(_) => "datetime",
            FieldValue::Instant(_) => "instant",
        }
    }

    fn incompatible(self, column: &str, column_kind: &'static str) -> FieldError {
        FieldError::Incompatible {
            column: column.to_owned(),
            column_kind,
            value_kind: self.kind(),
        }
    }

    /// Unboxes into an integer column; null becomes the `-1` sentinel.
    pub fn into_i32(self, column: &str) -> Result<i32, FieldError> {
        match self {
            FieldValue::Int(v) => Ok(v.unwrap_or(-1)),
            other => Err(other.incompatible(column, "int")),
        }
    }

    /// Unboxes into a long column; null becomes the `-1` sentinel.
    pub fn into_i64(self, column: &str) -> Result<i64, FieldError> {
        match self {
            FieldValue::Long(v) => Ok(v.unwrap_or(-1)),
            other => Err(other.incompatible(column, "long")),
        }
    }

    /// Unboxes into a floating column; null becomes the `NaN` sentinel.
    pub fn into_f64(self, column: &str) -> Result<f64, FieldError> {
        match self {
            FieldValue::Double(v) => Ok(v.unwrap_or(f64::NAN)),
            other => Err(other.incompatible(column, "double")),
        }
    }

    pub fn into_opt_string(self, column: &str) -> Result<Option<String>, FieldError> {
        match self {
            FieldValue::Str(v) => Ok(v),
            other => Err(other.incompatible(column, "string")),
        }
    }

    /// Accepts a calendar date directly, or a `YYYY.MM.DD` formatted string.
    pub fn into_date(self, column: &str) -> Result<Option<NaiveDate>, FieldError> {
        match self {
            FieldValue::Date(v) => Ok(v),
            FieldValue::Str(None) => Ok(None),
            FieldValue::Str(Some(text)) => {
                match NaiveDate::parse_from_str(&text, crate::SOURCE_DATE_FORMAT) {
                    Ok(d) => Ok(Some(d)),
                    Err(_) => Err(FieldError::MalformedDate {
                        column: column.to_owned(),
                        text,
                    }),
                }
            }
            other => Err(other.incompatible(column, "date")),
        }
    }

    /// Accepts an instant directly, or a local wall-clock datetime which is
    /// resolved against the system time zone.
    pub fn into_instant(self, column: &str) -> Result<Option<DateTime<Utc>>, FieldError> {
        match self {
            FieldValue::Instant(v) => Ok(v),
            FieldValue::DateTime(None) => Ok(None),
            FieldValue::DateTime(Some(naive)) => Ok(Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc))),
            other => Err(other.incompatible(column, "instant")),
        }
    }
}

/// A record produced by an extractor. `validate` must return true before the
/// record enters the transformation pipeline; invalid records are skipped
/// with a warning and never abort the extractor.
pub trait SourceRecord: Debug + Send + Sync {
    fn source_type(&self) -> DataType;

    fn validate(&self) -> bool;

    /// All field names this record exposes to the mapping engine.
    fn field_names(&self) -> &'static [&'static str];

    /// Reads a single field by name. Returns `None` for unknown names.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// A short human-readable identity for per-record warnings.
    fn identity(&self) -> String;
}

/// A record ready to be loaded. Numeric fields are initialized to sentinel
/// values (`-1` for integers and longs, `NaN` for floats) at construction so
/// that a field whose source was null is distinguishable from zero.
pub trait TargetRecord: Debug + Send + Sync {
    fn data_type(&self) -> DataType;

    /// Column names in the exact order of the target table definition.
    fn columns(&self) -> &'static [&'static str];

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError>;

    /// The load-time sort key. Records lacking it are dropped by Load.
    fn receive_time(&self) -> Option<DateTime<Utc>>;

    /// The record's values in `columns()` order, encoded for the target
    /// store's wire format. Float sentinels encode as null.
    fn row(&self) -> Vec<Value>;
}

pub(crate) fn json_f64(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub(crate) fn json_i32(v: i32) -> Value {
    Value::from(v)
}

pub(crate) fn json_i64(v: i64) -> Value {
    Value::from(v)
}

pub(crate) fn json_opt_str(v: &Option<String>) -> Value {
    v.as_deref().map(Value::from).unwrap_or(Value::Null)
}

pub(crate) fn json_date(v: Option<NaiveDate>) -> Value {
    v.map(|d| Value::from(d.format(crate::SOURCE_DATE_FORMAT).to_string()))
        .unwrap_or(Value::Null)
}

pub(crate) fn json_instant(v: Option<DateTime<Utc>>) -> Value {
    v.map(|t| Value::from(t.to_rfc3339()))
        .unwrap_or(Value::Null)
}
