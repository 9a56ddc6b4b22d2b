//! The XBond cash-bond quote family: per-message L2 depth snapshots built by
//! grouping raw price-depth rows, loaded into `xbond_quote_stream_temp`.

use crate::record::{
    json_date, json_f64, json_i32, json_i64, json_instant, json_opt_str, DataType, FieldError,
    FieldValue, SourceRecord, TargetRecord,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Number of depth slots per side. Slot 0 is the global best (indicative
/// volume); slots 1..5 carry tradable volumes.
pub const DEPTH_LEVELS: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Bid,
    Offer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DepthPart {
    Price,
    Yield,
    YieldType,
    Volume,
}

/// Splits a depth field name like `bid_2_tradable_volume` into its side,
/// slot and part. The volume part is named `volume` in slot 0 and
/// `tradable_volume` in slots 1..5; the other spelling does not resolve.
fn parse_depth_name(name: &str) -> Option<(Side, usize, DepthPart)> {
    let (side_str, rest) = name.split_once('_')?;
    let side = match side_str {
        "bid" => Side::Bid,
        "offer" => Side::Offer,
        _ => return None,
    };
    let (slot_str, part_str) = rest.split_once('_')?;
    let slot: usize = slot_str.parse().ok()?;
    if slot >= DEPTH_LEVELS {
        return None;
    }
    let part = match part_str {
        "price" => DepthPart::Price,
        "yield" => DepthPart::Yield,
        "yield_type" => DepthPart::YieldType,
        "volume" if slot == 0 => DepthPart::Volume,
        "tradable_volume" if slot > 0 => DepthPart::Volume,
        _ => return None,
    };
    Some((side, slot, part))
}

/// One depth slot of a source quote. All fields are nullable; the grouping
/// pass fills them set-if-none, so an earlier row is never overwritten by a
/// later one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuoteDepth {
    pub price: Option<f64>,
    pub yield_rate: Option<f64>,
    pub yield_type: Option<String>,
    pub volume: Option<i64>,
}

/// Source record for one quote message: all rows sharing a message offset
/// collapsed into one tick with up to six bid/offer depth slots.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuoteTick {
    pub business_date: Option<String>,
    pub exch_product_id: Option<String>,
    pub product_type: Option<String>,
    pub exchange: Option<String>,
    pub source: Option<String>,
    pub level: Option<String>,
    pub status: Option<String>,
    pub settle_speed: Option<i32>,
    pub message_offset: Option<i64>,
    pub receive_time: Option<NaiveDateTime>,
    pub bid: [QuoteDepth; DEPTH_LEVELS],
    pub offer: [QuoteDepth; DEPTH_LEVELS],
}

impl QuoteTick {
    pub(crate) fn side_levels(&self, side: Side) -> &[QuoteDepth; DEPTH_LEVELS] {
        match side {
            Side::Bid => &self.bid,
            Side::Offer => &self.offer,
        }
    }

    pub(crate) fn side_levels_mut(&mut self, side: Side) -> &mut [QuoteDepth; DEPTH_LEVELS] {
        match side {
            Side::Bid => &mut self.bid,
            Side::Offer => &mut self.offer,
        }
    }
}

static QUOTE_FIELD_NAMES: &[&str] = &[
    "business_date",
    "exch_product_id",
    "product_type",
    "exchange",
    "source",
    "level",
    "status",
    "settle_speed",
    "message_offset",
    "receive_time",
    "bid_0_price",
    "bid_0_yield",
    "bid_0_yield_type",
    "bid_0_volume",
    "offer_0_price",
    "offer_0_yield",
    "offer_0_yield_type",
    "offer_0_volume",
    "bid_1_price",
    "bid_1_yield",
    "bid_1_yield_type",
    "bid_1_tradable_volume",
    "offer_1_price",
    "offer_1_yield",
    "offer_1_yield_type",
    "offer_1_tradable_volume",
    "bid_2_price",
    "bid_2_yield",
    "bid_2_yield_type",
    "bid_2_tradable_volume",
    "offer_2_price",
    "offer_2_yield",
    "offer_2_yield_type",
    "offer_2_tradable_volume",
    "bid_3_price",
    "bid_3_yield",
    "bid_3_yield_type",
    "bid_3_tradable_volume",
    "offer_3_price",
    "offer_3_yield",
    "offer_3_yield_type",
    "offer_3_tradable_volume",
    "bid_4_price",
    "bid_4_yield",
    "bid_4_yield_type",
    "bid_4_tradable_volume",
    "offer_4_price",
    "offer_4_yield",
    "offer_4_yield_type",
    "offer_4_tradable_volume",
    "bid_5_price",
    "bid_5_yield",
    "bid_5_yield_type",
    "bid_5_tradable_volume",
    "offer_5_price",
    "offer_5_yield",
    "offer_5_yield_type",
    "offer_5_tradable_volume",
];

impl SourceRecord for QuoteTick {
    fn source_type(&self) -> DataType {
        DataType::XbondQuote
    }

    fn validate(&self) -> bool {
        self.business_date.is_some()
            && self.exch_product_id.is_some()
            && self.receive_time.is_some()
    }

    fn field_names(&self) -> &'static [&'static str] {
        QUOTE_FIELD_NAMES
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        if let Some((side, slot, part)) = parse_depth_name(name) {
            let depth = &self.side_levels(side)[slot];
            return Some(match part {
                DepthPart::Price => FieldValue::Double(depth.price),
                DepthPart::Yield => FieldValue::Double(depth.yield_rate),
                DepthPart::YieldType => FieldValue::Str(depth.yield_type.clone()),
                DepthPart::Volume => FieldValue::Long(depth.volume),
            });
        }
        match name {
            "business_date" => Some(FieldValue::Str(self.business_date.clone())),
            "exch_product_id" => Some(FieldValue::Str(self.exch_product_id.clone())),
            "product_type" => Some(FieldValue::Str(self.product_type.clone())),
            "exchange" => Some(FieldValue::Str(self.exchange.clone())),
            "source" => Some(FieldValue::Str(self.source.clone())),
            "level" => Some(FieldValue::Str(self.level.clone())),
            "status" => Some(FieldValue::Str(self.status.clone())),
            "settle_speed" => Some(FieldValue::Int(self.settle_speed)),
            "message_offset" => Some(FieldValue::Long(self.message_offset)),
            "receive_time" => Some(FieldValue::DateTime(self.receive_time)),
            _ => None,
        }
    }

    fn identity(&self) -> String {
        format!(
            "quote {} {} offset {}",
            self.business_date.as_deref().unwrap_or("?"),
            self.exch_product_id.as_deref().unwrap_or("?"),
            self.message_offset.map_or_else(|| "?".into(), |o| o.to_string()),
        )
    }
}

/// One depth slot of the target row. Sentinels at construction: `NaN` for
/// prices and yields, `-1` for volumes.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthColumns {
    pub price: f64,
    pub yield_rate: f64,
    pub yield_type: Option<String>,
    pub volume: i64,
}

impl Default for DepthColumns {
    fn default() -> DepthColumns {
        DepthColumns {
            price: f64::NAN,
            yield_rate: f64::NAN,
            yield_type: None,
            volume: -1,
        }
    }
}

/// Target record loaded into `xbond_quote_stream_temp`.
#[derive(Clone, Debug, PartialEq)]
pub struct QuoteRow {
    pub business_date: Option<NaiveDate>,
    pub exch_product_id: Option<String>,
    pub product_type: Option<String>,
    pub exchange: Option<String>,
    pub source: Option<String>,
    pub level: Option<String>,
    pub status: Option<String>,
    pub settle_speed: i32,
    pub receive_time: Option<DateTime<Utc>>,
    pub bid: [DepthColumns; DEPTH_LEVELS],
    pub offer: [DepthColumns; DEPTH_LEVELS],
}

impl Default for QuoteRow {
    fn default() -> QuoteRow {
        QuoteRow {
            business_date: None,
            exch_product_id: None,
            product_type: None,
            exchange: None,
            source: None,
            level: None,
            status: None,
            settle_speed: -1,
            receive_time: None,
            bid: Default::default(),
            offer: Default::default(),
        }
    }
}

static QUOTE_COLUMNS: &[&str] = &[
    "business_date",
    "exch_product_id",
    "product_type",
    "exchange",
    "source",
    "level",
    "status",
    "settle_speed",
    "receive_time",
    "bid_0_price",
    "bid_0_yield",
    "bid_0_yield_type",
    "bid_0_volume",
    "offer_0_price",
    "offer_0_yield",
    "offer_0_yield_type",
    "offer_0_volume",
    "bid_1_price",
    "bid_1_yield",
    "bid_1_yield_type",
    "bid_1_tradable_volume",
    "offer_1_price",
    "offer_1_yield",
    "offer_1_yield_type",
    "offer_1_tradable_volume",
    "bid_2_price",
    "bid_2_yield",
    "bid_2_yield_type",
    "bid_2_tradable_volume",
    "offer_2_price",
    "offer_2_yield",
    "offer_2_yield_type",
    "offer_2_tradable_volume",
    "bid_3_price",
    "bid_3_yield",
    "bid_3_yield_type",
    "bid_3_tradable_volume",
    "offer_3_price",
    "offer_3_yield",
    "offer_3_yield_type",
    "offer_3_tradable_volume",
    "bid_4_price",
    "bid_4_yield",
    "bid_4_yield_type",
    "bid_4_tradable_volume",
    "offer_4_price",
    "offer_4_yield",
    "offer_4_yield_type",
    "offer_4_tradable_volume",
    "bid_5_price",
    "bid_5_yield",
    "bid_5_yield_type",
    "bid_5_tradable_volume",
    "offer_5_price",
    "offer_5_yield",
    "offer_5_yield_type",
    "offer_5_tradable_volume",
];

impl QuoteRow {
    fn side_columns_mut(&mut self, side: Side) -> &mut [DepthColumns; DEPTH_LEVELS] {
        match side {
            Side::Bid => &mut self.bid,
            Side::Offer => &mut self.offer,
        }
    }

    fn side_columns(&self, side: Side) -> &[DepthColumns; DEPTH_LEVELS] {
        match side {
            Side::Bid => &self.bid,
            Side::Offer => &self.offer,
        }
    }

    fn value_for(&self, name: &str) -> Value {
        if let Some((side, slot, part)) = parse_depth_name(name) {
            let depth = &self.side_columns(side)[slot];
            return match part {
                DepthPart::Price => json_f64(depth.price),
                DepthPart::Yield => json_f64(depth.yield_rate),
                DepthPart::YieldType => json_opt_str(&depth.yield_type),
                DepthPart::Volume => json_i64(depth.volume),
            };
        }
        match name {
            "business_date" => json_date(self.business_date),
            "exch_product_id" => json_opt_str(&self.exch_product_id),
            "product_type" => json_opt_str(&self.product_type),
            "exchange" => json_opt_str(&self.exchange),
            "source" => json_opt_str(&self.source),
            "level" => json_opt_str(&self.level),
            "status" => json_opt_str(&self.status),
            "settle_speed" => json_i32(self.settle_speed),
            "receive_time" => json_instant(self.receive_time),
            _ => Value::Null,
        }
    }
}

impl TargetRecord for QuoteRow {
    fn data_type(&self) -> DataType {
        DataType::XbondQuote
    }

    fn columns(&self) -> &'static [&'static str] {
        QUOTE_COLUMNS
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        if let Some((side, slot, part)) = parse_depth_name(name) {
            let depth = &mut self.side_columns_mut(side)[slot];
            match part {
                DepthPart::Price => depth.price = value.into_f64(name)?,
                DepthPart::Yield => depth.yield_rate = value.into_f64(name)?,
                DepthPart::YieldType => depth.yield_type = value.into_opt_string(name)?,
                DepthPart::Volume => depth.volume = value.into_i64(name)?,
            }
            return Ok(());
        }
        match name {
            "business_date" => self.business_date = value.into_date(name)?,
            "exch_product_id" => self.exch_product_id = value.into_opt_string(name)?,
            "product_type" => self.product_type = value.into_opt_string(name)?,
            "exchange" => self.exchange = value.into_opt_string(name)?,
            "source" => self.source = value.into_opt_string(name)?,
            "level" => self.level = value.into_opt_string(name)?,
            "status" => self.status = value.into_opt_string(name)?,
            "settle_speed" => self.settle_speed = value.into_i32(name)?,
            "receive_time" => self.receive_time = value.into_instant(name)?,
            _ => return Err(FieldError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn receive_time(&self) -> Option<DateTime<Utc>> {
        self.receive_time
    }

    fn row(&self) -> Vec<Value> {
        QUOTE_COLUMNS.iter().map(|c| self.value_for(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_at_construction() {
        let row = QuoteRow::default();
        assert_eq!(row.settle_speed, -1);
        for depth in row.bid.iter().chain(row.offer.iter()) {
            assert!(depth.price.is_nan());
            assert!(depth.yield_rate.is_nan());
            assert_eq!(depth.volume, -1);
            assert_eq!(depth.yield_type, None);
        }
    }

    #[test]
    fn depth_names_resolve_per_slot() {
        assert_eq!(
            parse_depth_name("bid_0_volume"),
            Some((Side::Bid, 0, DepthPart::Volume))
        );
        assert_eq!(
            parse_depth_name("offer_3_tradable_volume"),
            Some((Side::Offer, 3, DepthPart::Volume))
        );
        // The indicative/tradable spellings do not cross over.
        assert_eq!(parse_depth_name("bid_0_tradable_volume"), None);
        assert_eq!(parse_depth_name("bid_1_volume"), None);
        assert_eq!(parse_depth_name("bid_6_price"), None);
        assert_eq!(parse_depth_name("mid_1_price"), None);
    }

    #[test]
    fn every_declared_field_is_readable() {
        let tick = QuoteTick::default();
        for name in QUOTE_FIELD_NAMES {
            assert!(tick.field(name).is_some(), "unreadable field {}", name);
        }
        assert!(tick.field("no_such_field").is_none());
    }

    #[test]
    fn every_declared_column_is_writable() {
        let mut row = QuoteRow::default();
        let probe = QuoteTick::default();
        for name in QUOTE_COLUMNS {
            let value = probe
                .field(name)
                .unwrap_or_else(|| panic!("no source analog for {}", name));
            row.set_field(name, value)
                .unwrap_or_else(|e| panic!("unwritable column {}: {}", name, e));
        }
    }

    #[test]
    fn row_is_column_ordered() {
        let mut row = QuoteRow::default();
        row.set_field("bid_0_price", FieldValue::Double(Some(107.9197)))
            .unwrap();
        let values = row.row();
        assert_eq!(values.len(), QUOTE_COLUMNS.len());
        let idx = QUOTE_COLUMNS
            .iter()
            .position(|c| *c == "bid_0_price")
            .unwrap();
        assert_eq!(values[idx], Value::from(107.9197));
        // Unset floats encode as null on the wire.
        let offer_idx = QUOTE_COLUMNS
            .iter()
            .position(|c| *c == "offer_5_price")
            .unwrap();
        assert_eq!(values[offer_idx], Value::Null);
    }
}
