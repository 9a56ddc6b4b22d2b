//! The XBond CFETS deal family, loaded into `xbond_trade_stream_temp`. The
//! upstream spells the direction field `trade_side`; the target table calls
//! it `last_trade_side`, so the trade transformer carries an explicit rename
//! for it.

use crate::record::{
    json_date, json_f64, json_i32, json_i64, json_instant, json_opt_str, DataType, FieldError,
    FieldValue, SourceRecord, TargetRecord,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TradeTick {
    pub business_date: Option<String>,
    pub exch_product_id: Option<String>,
    pub product_type: Option<String>,
    pub exchange: Option<String>,
    pub source: Option<String>,
    pub status: Option<String>,
    pub settle_speed: Option<i32>,
    pub deal_id: Option<String>,
    pub price: Option<f64>,
    pub yield_rate: Option<f64>,
    pub volume: Option<i64>,
    pub trade_side: Option<String>,
    pub trade_time: Option<NaiveDateTime>,
    pub receive_time: Option<NaiveDateTime>,
}

static TRADE_FIELD_NAMES: &[&str] = &[
    "business_date",
    "exch_product_id",
    "product_type",
    "exchange",
    "source",
    "status",
    "settle_speed",
    "deal_id",
    "price",
    "yield",
    "volume",
    "trade_side",
    "trade_time",
    "receive_time",
];

impl SourceRecord for TradeTick {
    fn source_type(&self) -> DataType {
        DataType::XbondTrade
    }

    fn validate(&self) -> bool {
        self.business_date.is_some()
            && self.exch_product_id.is_some()
            && self.deal_id.is_some()
            && self.price.is_some()
            && self.volume.is_some()
            && self.receive_time.is_some()
    }

    fn field_names(&self) -> &'static [&'static str] {
        TRADE_FIELD_NAMES
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "business_date" => Some(FieldValue::Str(self.business_date.clone())),
            "exch_product_id" => Some(FieldValue::Str(self.exch_product_id.clone())),
            "product_type" => Some(FieldValue::Str(self.product_type.clone())),
            "exchange" => Some(FieldValue::Str(self.exchange.clone())),
            "source" => Some(FieldValue::Str(self.source.clone())),
            "status" => Some(FieldValue::Str(self.status.clone())),
            "settle_speed" => Some(FieldValue::Int(self.settle_speed)),
            "deal_id" => Some(FieldValue::Str(self.deal_id.clone())),
            "price" => Some(FieldValue::Double(self.price)),
            "yield" => Some(FieldValue::Double(self.yield_rate)),
            "volume" => Some(FieldValue::Long(self.volume)),
            "trade_side" => Some(FieldValue::Str(self.trade_side.clone())),
            "trade_time" => Some(FieldValue::DateTime(self.trade_time)),
            "receive_time" => Some(FieldValue::DateTime(self.receive_time)),
            _ => None,
        }
    }

    fn identity(&self) -> String {
        format!(
            "trade {} {} deal {}",
            self.business_date.as_deref().unwrap_or("?"),
            self.exch_product_id.as_deref().unwrap_or("?"),
            self.deal_id.as_deref().unwrap_or("?"),
        )
    }
}

/// Target record loaded into `xbond_trade_stream_temp`.
#[derive(Clone, Debug, PartialEq)]
pub struct TradeRow {
    pub business_date: Option<NaiveDate>,
    pub exch_product_id: Option<String>,
    pub product_type: Option<String>,
    pub exchange: Option<String>,
    pub source: Option<String>,
    pub status: Option<String>,
    pub settle_speed: i32,
    pub deal_id: Option<String>,
    pub price: f64,
    pub yield_rate: f64,
    pub volume: i64,
    pub last_trade_side: Option<String>,
    pub trade_time: Option<DateTime<Utc>>,
    pub receive_time: Option<DateTime<Utc>>,
}

impl Default for TradeRow {
    fn default() -> TradeRow {
        TradeRow {
            business_date: None,
            exch_product_id: None,
            product_type: None,
            exchange: None,
            source: None,
            status: None,
            settle_speed: -1,
            deal_id: None,
            price: f64::NAN,
            yield_rate: f64::NAN,
            volume: -1,
            last_trade_side: None,
            trade_time: None,
            receive_time: None,
        }
    }
}

static TRADE_COLUMNS: &[&str] = &[
    "business_date",
    "exch_product_id",
    "product_type",
    "exchange",
    "source",
    "status",
    "settle_speed",
    "deal_id",
    "price",
    "yield",
    "volume",
    "last_trade_side",
    "trade_time",
    "receive_time",
];

impl TradeRow {
    fn value_for(&self, name: &str) -> Value {
        match name {
            "business_date" => json_date(self.business_date),
            "exch_product_id" => json_opt_str(&self.exch_product_id),
            "product_type" => json_opt_str(&self.product_type),
            "exchange" => json_opt_str(&self.exchange),
            "source" => json_opt_str(&self.source),
            "status" => json_opt_str(&self.status),
            "settle_speed" => json_i32(self.settle_speed),
            "deal_id" => json_opt_str(&self.deal_id),
            "price" => json_f64(self.price),
            "yield" => json_f64(self.yield_rate),
            "volume" => json_i64(self.volume),
            "last_trade_side" => json_opt_str(&self.last_trade_side),
            "trade_time" => json_instant(self.trade_time),
            "receive_time" => json_instant(self.receive_time),
            _ => Value::Null,
        }
    }
}

impl TargetRecord for TradeRow {
    fn data_type(&self) -> DataType {
        DataType::XbondTrade
    }

    fn columns(&self) -> &'static [&'static str] {
        TRADE_COLUMNS
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        match name {
            "business_date" => self.business_date = value.into_date(name)?,
            "exch_product_id" => self.exch_product_id = value.into_opt_string(name)?,
            "product_type" => self.product_type = value.into_opt_string(name)?,
            "exchange" => self.exchange = value.into_opt_string(name)?,
            "source" => self.source = value.into_opt_string(name)?,
            "status" => self.status = value.into_opt_string(name)?,
            "settle_speed" => self.settle_speed = value.into_i32(name)?,
            "deal_id" => self.deal_id = value.into_opt_string(name)?,
            "price" => self.price = value.into_f64(name)?,
            "yield" => self.yield_rate = value.into_f64(name)?,
            "volume" => self.volume = value.into_i64(name)?,
            "last_trade_side" => self.last_trade_side = value.into_opt_string(name)?,
            "trade_time" => self.trade_time = value.into_instant(name)?,
            "receive_time" => self.receive_time = value.into_instant(name)?,
            _ => return Err(FieldError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn receive_time(&self) -> Option<DateTime<Utc>> {
        self.receive_time
    }

    fn row(&self) -> Vec<Value> {
        TRADE_COLUMNS.iter().map(|c| self.value_for(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_at_construction() {
        let row = TradeRow::default();
        assert_eq!(row.settle_speed, -1);
        assert!(row.price.is_nan());
        assert!(row.yield_rate.is_nan());
        assert_eq!(row.volume, -1);
    }

    #[test]
    fn trade_side_is_not_a_target_column() {
        // The rename to last_trade_side is the transformer's job; a raw
        // name-match must not find a home for trade_side.
        let mut row = TradeRow::default();
        let err = row
            .set_field("trade_side", FieldValue::Str(Some("Taken".into())))
            .unwrap_err();
        assert!(matches!(err, FieldError::Unknown(_)));
        assert!(!TRADE_COLUMNS.contains(&"trade_side"));
    }

    #[test]
    fn validate_requires_deal_identity() {
        let mut tick = TradeTick {
            business_date: Some("2025.01.01".into()),
            exch_product_id: Some("210210.IB".into()),
            deal_id: Some("D1".into()),
            price: Some(100.0),
            volume: Some(1_000_000),
            receive_time: Some(
                NaiveDate::from_ymd_opt(2025, 1, 1)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
            ),
            ..Default::default()
        };
        assert!(tick.validate());
        tick.deal_id = None;
        assert!(!tick.validate());
    }
}
