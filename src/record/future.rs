//! The bond-future quote family, extracted from tick rows in a relational
//! database and loaded into `fut_market_price_stream_temp`.

use crate::record::{
    json_date, json_f64, json_i64, json_instant, json_opt_str, DataType, FieldError, FieldValue,
    SourceRecord, TargetRecord,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FutureQuoteTick {
    pub business_date: Option<String>,
    pub product_id: Option<String>,
    pub exchange: Option<String>,
    pub source: Option<String>,
    pub bid_price: Option<f64>,
    pub bid_volume: Option<i64>,
    pub ask_price: Option<f64>,
    pub ask_volume: Option<i64>,
    pub last_price: Option<f64>,
    pub volume: Option<i64>,
    pub open_interest: Option<i64>,
    pub receive_time: Option<NaiveDateTime>,
}

static FUTURE_FIELD_NAMES: &[&str] = &[
    "business_date",
    "product_id",
    "exchange",
    "source",
    "bid_price",
    "bid_volume",
    "ask_price",
    "ask_volume",
    "last_price",
    "volume",
    "open_interest",
    "receive_time",
];

impl SourceRecord for FutureQuoteTick {
    fn source_type(&self) -> DataType {
        DataType::BondFutureQuote
    }

    fn validate(&self) -> bool {
        self.business_date.is_some() && self.product_id.is_some() && self.receive_time.is_some()
    }

    fn field_names(&self) -> &'static [&'static str] {
        FUTURE_FIELD_NAMES
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "business_date" => Some(FieldValue::Str(self.business_date.clone())),
            "product_id" => Some(FieldValue::Str(self.product_id.clone())),
            "exchange" => Some(FieldValue::Str(self.exchange.clone())),
            "source" => Some(FieldValue::Str(self.source.clone())),
            "bid_price" => Some(FieldValue::Double(self.bid_price)),
            "bid_volume" => Some(FieldValue::Long(self.bid_volume)),
            "ask_price" => Some(FieldValue::Double(self.ask_price)),
            "ask_volume" => Some(FieldValue::Long(self.ask_volume)),
            "last_price" => Some(FieldValue::Double(self.last_price)),
            "volume" => Some(FieldValue::Long(self.volume)),
            "open_interest" => Some(FieldValue::Long(self.open_interest)),
            "receive_time" => Some(FieldValue::DateTime(self.receive_time)),
            _ => None,
        }
    }

    fn identity(&self) -> String {
        format!(
            "future quote {} {}",
            self.business_date.as_deref().unwrap_or("?"),
            self.product_id.as_deref().unwrap_or("?"),
        )
    }
}

/// Target record loaded into `fut_market_price_stream_temp`.
#[derive(Clone, Debug, PartialEq)]
pub struct FutureQuoteRow {
    pub business_date: Option<NaiveDate>,
    pub product_id: Option<String>,
    pub exchange: Option<String>,
    pub source: Option<String>,
    pub bid_price: f64,
    pub bid_volume: i64,
    pub ask_price: f64,
    pub ask_volume: i64,
    pub last_price: f64,
    pub volume: i64,
    pub open_interest: i64,
    pub receive_time: Option<DateTime<Utc>>,
}

impl Default for FutureQuoteRow {
    fn default() -> FutureQuoteRow {
        FutureQuoteRow {
            business_date: None,
            product_id: None,
            exchange: None,
            source: None,
            bid_price: f64::NAN,
            bid_volume: -1,
            ask_price: f64::NAN,
            ask_volume: -1,
            last_price: f64::NAN,
            volume: -1,
            open_interest: -1,
            receive_time: None,
        }
    }
}

static FUTURE_COLUMNS: &[&str] = &[
    "business_date",
    "product_id",
    "exchange",
    "source",
    "bid_price",
    "bid_volume",
    "ask_price",
    "ask_volume",
    "last_price",
    "volume",
    "open_interest",
    "receive_time",
];

impl FutureQuoteRow {
    fn value_for(&self, name: &str) -> Value {
        match name {
            "business_date" => json_date(self.business_date),
            "product_id" => json_opt_str(&self.product_id),
            "exchange" => json_opt_str(&self.exchange),
            "source" => json_opt_str(&self.source),
            "bid_price" => json_f64(self.bid_price),
            "bid_volume" => json_i64(self.bid_volume),
            "ask_price" => json_f64(self.ask_price),
            "ask_volume" => json_i64(self.ask_volume),
            "last_price" => json_f64(self.last_price),
            "volume" => json_i64(self.volume),
            "open_interest" => json_i64(self.open_interest),
            "receive_time" => json_instant(self.receive_time),
            _ => Value::Null,
        }
    }
}

impl TargetRecord for FutureQuoteRow {
    fn data_type(&self) -> DataType {
        DataType::BondFutureQuote
    }

    fn columns(&self) -> &'static [&'static str] {
        FUTURE_COLUMNS
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        match name {
            "business_date" => self.business_date = value.into_date(name)?,
            "product_id" => self.product_id = value.into_opt_string(name)?,
            "exchange" => self.exchange = value.into_opt_string(name)?,
            "source" => self.source = value.into_opt_string(name)?,
            "bid_price" => self.bid_price = value.into_f64(name)?,
            "bid_volume" => self.bid_volume = value.into_i64(name)?,
            "ask_price" => self.ask_price = value.into_f64(name)?,
            "ask_volume" => self.ask_volume = value.into_i64(name)?,
            "last_price" => self.last_price = value.into_f64(name)?,
            "volume" => self.volume = value.into_i64(name)?,
            "open_interest" => self.open_interest = value.into_i64(name)?,
            "receive_time" => self.receive_time = value.into_instant(name)?,
            _ => return Err(FieldError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn receive_time(&self) -> Option<DateTime<Utc>> {
        self.receive_time
    }

    fn row(&self) -> Vec<Value> {
        FUTURE_COLUMNS.iter().map(|c| self.value_for(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_at_construction() {
        let row = FutureQuoteRow::default();
        assert!(row.bid_price.is_nan());
        assert!(row.ask_price.is_nan());
        assert!(row.last_price.is_nan());
        assert_eq!(row.bid_volume, -1);
        assert_eq!(row.ask_volume, -1);
        assert_eq!(row.volume, -1);
        assert_eq!(row.open_interest, -1);
    }

    #[test]
    fn source_and_target_share_every_column_name() {
        let probe = FutureQuoteTick::default();
        for column in FUTURE_COLUMNS {
            assert!(
                probe.field(column).is_some(),
                "column {} has no source analog",
                column
            );
        }
    }
}
