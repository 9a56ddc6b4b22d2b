//! Per-family CSV shard parsers, including the convert phase that turns raw
//! rows into source records.

use crate::{
    extractor::{object_store::ShardParser, ExtractError},
    record::{
        quote::{Side, DEPTH_LEVELS},
        QuoteTick, SourceRecord, TradeTick,
    },
    SOURCE_TIME_FORMAT,
};
use chrono::NaiveDateTime;
use serde::Deserialize;
use slog::{warn, Logger};
use std::{collections::BTreeMap, path::Path};

fn csv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, ExtractError> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| ExtractError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
}

fn parse_event_time(raw: &str, logger: &Logger, what: &str) -> Option<NaiveDateTime> {
    match NaiveDateTime::parse_from_str(raw, SOURCE_TIME_FORMAT) {
        Ok(t) => Some(t),
        Err(_) => {
            warn!(logger, "unparseable timestamp"; "field" => what.to_owned(), "value" => raw.to_owned());
            None
        }
    }
}

/// Settlement type code table: 1 (T+0) maps to 0, 2 (T+1) maps to 1.
fn map_settle_type(raw: &str, logger: &Logger) -> Option<i32> {
    match raw {
        "1" => Some(0),
        "2" => Some(1),
        other => {
            warn!(logger, "unknown settlement type"; "value" => other.to_owned());
            None
        }
    }
}

/// Interbank products are quoted without their market suffix; add `.IB`
/// unless the id already carries one.
fn qualify_product_id(raw: &str) -> String {
    if raw.contains('.') {
        raw.to_owned()
    } else {
        format!("{}.IB", raw)
    }
}

/// A raw row of an AllPriceDepth shard, keyed by (message offset, side,
/// level). The two reserved columns are always empty upstream and must not
/// be propagated.
#[derive(Debug, Deserialize)]
struct RawQuoteRow {
    mq_offset: i64,
    mq_time: String,
    business_date: String,
    product_id: String,
    settle_type: String,
    side: String,
    price_level: u32,
    price: Option<f64>,
    yield_rate: Option<f64>,
    yield_type: Option<String>,
    volume: Option<i64>,
    _reserved1: Option<String>,
    _reserved2: Option<String>,
}

/// Parser for the AllPriceDepth quote family. All rows sharing a message
/// offset become one record; level 1 fills depth slot 0 (indicative
/// volume), levels 2..6 fill slots 1..5 (tradable volume). Within a group a
/// later row only fills fields the earlier rows left null.
pub struct QuoteShardParser;

impl QuoteShardParser {
    fn apply_row(tick: &mut QuoteTick, row: &RawQuoteRow, logger: &Logger) {
        if tick.business_date.is_none() {
            tick.business_date = Some(row.business_date.clone());
        }
        if tick.exch_product_id.is_none() {
            tick.exch_product_id = Some(qualify_product_id(&row.product_id));
        }
        if tick.settle_speed.is_none() {
            tick.settle_speed = map_settle_type(&row.settle_type, logger);
        }
        if tick.message_offset.is_none() {
            tick.message_offset = Some(row.mq_offset);
        }
        if tick.receive_time.is_none() {
            tick.receive_time = parse_event_time(&row.mq_time, logger, "mq_time");
        }
        tick.product_type.get_or_insert_with(|| "BOND".to_owned());
        tick.exchange.get_or_insert_with(|| "CFETS".to_owned());
        tick.source.get_or_insert_with(|| "XBOND".to_owned());
        tick.level.get_or_insert_with(|| "L2".to_owned());
        tick.status.get_or_insert_with(|| "Normal".to_owned());

        let side = match row.side.as_str() {
            "1" => Side::Bid,
            "2" => Side::Offer,
            other => {
                warn!(logger, "unknown quote side"; "value" => other.to_owned());
                return;
            }
        };
        // Level 1 is the global best and lands in slot 0; levels 2..6 are
        // the tradable ladder in slots 1..5.
        let slot = match row.price_level {
            1 => 0,
            level @ 2..=6 => (level - 1) as usize,
            other => {
                warn!(logger, "price level out of range"; "value" => other);
                return;
            }
        };
        debug_assert!(slot < DEPTH_LEVELS);

        let depth = &mut tick.side_levels_mut(side)[slot];
        if depth.price.is_none() {
            depth.price = row.price;
        }
        if depth.yield_rate.is_none() {
            depth.yield_rate = row.yield_rate;
        }
        if depth.yield_type.is_none() {
            depth.yield_type = row.yield_type.clone();
        }
        if depth.volume.is_none() {
            depth.volume = row.volume;
        }
    }
}

impl ShardParser for QuoteShardParser {
    fn parse_shard(
        &self,
        path: &Path,
        logger: &Logger,
    ) -> Result<Vec<Box<dyn SourceRecord>>, ExtractError> {
        let mut reader = csv_reader(path)?;
        // BTreeMap keeps record order deterministic across shards.
        let mut groups: BTreeMap<i64, QuoteTick> = BTreeMap::new();
        for (row_index, result) in reader.deserialize::<RawQuoteRow>().enumerate() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    warn!(
                        logger, "skipping malformed quote row";
                        "path" => path.display().to_string(),
                        "row" => row_index,
                        "error" => e.to_string()
                    );
                    continue;
                }
            };
            let tick = groups.entry(row.mq_offset).or_default();
            QuoteShardParser::apply_row(tick, &row, logger);
        }
        Ok(groups
            .into_values()
            .map(|tick| Box::new(tick) as Box<dyn SourceRecord>)
            .collect())
    }
}

/// A raw row of an XbondCfetsDeal shard: one executed deal per row.
#[derive(Debug, Deserialize)]
struct RawTradeRow {
    deal_id: String,
    mq_time: String,
    business_date: String,
    product_id: String,
    settle_type: String,
    price: Option<f64>,
    yield_rate: Option<f64>,
    volume: Option<i64>,
    trade_side: String,
    trade_time: String,
}

/// Parser for the XbondCfetsDeal trade family. One output record per row.
pub struct TradeShardParser;

fn map_trade_side(raw: &str, logger: &Logger) -> Option<String> {
    match raw {
        "1" => Some("Taken".to_owned()),
        "2" => Some("Given".to_owned()),
        "3" => Some("Traded".to_owned()),
        other => {
            warn!(logger, "unknown trade side"; "value" => other.to_owned());
            None
        }
    }
}

impl ShardParser for TradeShardParser {
    fn parse_shard(
        &self,
        path: &Path,
        logger: &Logger,
    ) -> Result<Vec<Box<dyn SourceRecord>>, ExtractError> {
        let mut reader = csv_reader(path)?;
        let mut records: Vec<Box<dyn SourceRecord>> = Vec::new();
        for (row_index, result) in reader.deserialize::<RawTradeRow>().enumerate() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    warn!(
                        logger, "skipping malformed trade row";
                        "path" => path.display().to_string(),
                        "row" => row_index,
                        "error" => e.to_string()
                    );
                    continue;
                }
            };
            records.push(Box::new(TradeTick {
                business_date: Some(row.business_date.clone()),
                exch_product_id: Some(qualify_product_id(&row.product_id)),
                product_type: Some("BOND".to_owned()),
                exchange: Some("CFETS".to_owned()),
                source: Some("XBOND".to_owned()),
                status: Some("Normal".to_owned()),
                settle_speed: map_settle_type(&row.settle_type, logger),
                deal_id: Some(row.deal_id.clone()),
                price: row.price,
                yield_rate: row.yield_rate,
                volume: row.volume,
                trade_side: map_trade_side(&row.trade_side, logger),
                trade_time: parse_event_time(&row.trade_time, logger, "trade_time"),
                receive_time: parse_event_time(&row.mq_time, logger, "mq_time"),
            }));
        }
        Ok(records)
    }
}
