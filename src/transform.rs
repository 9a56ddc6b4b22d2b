//! The field-mapping engine and the per-family transformers built on it.
//!
//! Mapping is name-based and one-to-one: every source field whose name
//! matches a target column is converted and written, target columns with no
//! source analog keep their sentinel defaults, and a transformer may declare
//! explicit renames which take precedence over the name-match pass. The
//! (source field, target column) pairs for each family are computed once and
//! cached for the life of the process.

use crate::record::{
    DataType, FieldError, FutureQuoteRow, QuoteRow, SourceRecord, TargetRecord, TradeRow,
};
use lazy_static::lazy_static;
use slog::{warn, Logger};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

/// A record-level transformation failure. Fails the whole Transform
/// subprocess (fail-fast); per-field incompatibilities are only warned about.
#[derive(Debug, thiserror::Error)]
#[error(
    "transforming {source_type} record {record_index} into {target_type}: {message}"
)]
pub struct TransformError {
    pub source_type: DataType,
    pub target_type: DataType,
    pub record_index: usize,
    pub message: String,
}

/// Statically bound to one (source type, target type) pair.
pub trait Transformer: Send + Sync {
    fn source_type(&self) -> DataType;

    fn target_type(&self) -> DataType;

    /// Explicit (source field, target column) remappings. The source side of
    /// a rename is excluded from the name-match pass.
    fn renames(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn new_target(&self) -> Box<dyn TargetRecord>;

    /// Converts source records into target records, preserving input order
    /// one-to-one.
    fn transform(
        &self,
        records: &[&dyn SourceRecord],
        logger: &Logger,
    ) -> Result<Vec<Box<dyn TargetRecord>>, TransformError>
    where
        Self: Sized,
    {
        map_records(self, records, logger)
    }
}

struct MappingPlan {
    copies: Vec<(&'static str, &'static str)>,
}

lazy_static! {
    static ref MAPPING_PLANS: Mutex<HashMap<(DataType, DataType), Arc<MappingPlan>>> =
        Mutex::new(HashMap::new());
}

fn plan_for<T: Transformer + ?Sized>(
    transformer: &T,
    sample: &dyn SourceRecord,
) -> Arc<MappingPlan> {
    let key = (transformer.source_type(), transformer.target_type());
    let mut plans = MAPPING_PLANS.lock().unwrap();
    if let Some(plan) = plans.get(&key) {
        return Arc::clone(plan);
    }

    let prototype = transformer.new_target();
    let columns: HashSet<&'static str> = prototype.columns().iter().copied().collect();
    let renamed_sources: HashSet<&'static str> =
        transformer.renames().iter().map(|(src, _)| *src).collect();

    let mut copies: Vec<(&'static str, &'static str)> = Vec::new();
    for &(src, dst) in transformer.renames() {
        if columns.contains(dst) {
            copies.push((src, dst));
        }
    }
    for &name in sample.field_names() {
        if renamed_sources.contains(name) {
            continue;
        }
        if columns.contains(name) {
            copies.push((name, name));
        }
    }

    let plan = Arc::new(MappingPlan { copies });
    plans.insert(key, Arc::clone(&plan));
    plan
}

/// Applies the cached mapping plan to every record. A malformed value (e.g.
/// an unparseable date string) fails the batch with the record's index; a
/// type-incompatible field is skipped with a warning and the target column
/// keeps its sentinel.
pub fn map_records<T: Transformer + ?Sized>(
    transformer: &T,
    records: &[&dyn SourceRecord],
    logger: &Logger,
) -> Result<Vec<Box<dyn TargetRecord>>, TransformError> {
    let mut out: Vec<Box<dyn TargetRecord>> = Vec::with_capacity(records.len());
    if records.is_empty() {
        return Ok(out);
    }
    let plan = plan_for(transformer, records[0]);

    for (record_index, record) in records.iter().enumerate() {
        let mut target = transformer.new_target();
        for (src, dst) in &plan.copies {
            let value = match record.field(src) {
                Some(v) => v,
                None => continue,
            };
            match target.set_field(dst, value) {
                Ok(()) => {}
                Err(err @ FieldError::MalformedDate { .. }) => {
                    return Err(TransformError {
                        source_type: transformer.source_type(),
                        target_type: transformer.target_type(),
                        record_index,
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    warn!(
                        logger, "skipping unconvertible field";
                        "field" => *src,
                        "column" => *dst,
                        "record" => record.identity(),
                        "error" => err.to_string()
                    );
                }
            }
        }
        out.push(target);
    }
    Ok(out)
}

pub struct QuoteTransformer;

impl Transformer for QuoteTransformer {
    fn source_type(&self) -> DataType {
        DataType::XbondQuote
    }

    fn target_type(&self) -> DataType {
        DataType::XbondQuote
    }

    fn new_target(&self) -> Box<dyn TargetRecord> {
        Box::new(QuoteRow::default())
    }
}

pub struct TradeTransformer;

impl Transformer for TradeTransformer {
    fn source_type(&self) -> DataType {
        DataType::XbondTrade
    }

    fn target_type(&self) -> DataType {
        DataType::XbondTrade
    }

    fn renames(&self) -> &'static [(&'static str, &'static str)] {
        &[("trade_side", "last_trade_side")]
    }

    fn new_target(&self) -> Box<dyn TargetRecord> {
        Box::new(TradeRow::default())
    }
}

pub struct FutureQuoteTransformer;

impl Transformer for FutureQuoteTransformer {
    fn source_type(&self) -> DataType {
        DataType::BondFutureQuote
    }

    fn target_type(&self) -> DataType {
        DataType::BondFutureQuote
    }

    fn new_target(&self) -> Box<dyn TargetRecord> {
        Box::new(FutureQuoteRow::default())
    }
}

/// Registry lookup by source type. The discriminator is a closed enum, so
/// every value has a transformer by construction.
pub fn transformer_for(data_type: DataType) -> Box<dyn Transformer> {
    match data_type {
        DataType::XbondQuote => Box::new(QuoteTransformer),
        DataType::XbondTrade => Box::new(TradeTransformer),
        DataType::BondFutureQuote => Box::new(FutureQuoteTransformer),
    }
}
