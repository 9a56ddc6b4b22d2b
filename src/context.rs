use crate::{
    config::Config,
    record::{SourceRecord, TargetRecord},
    subprocess::SubprocessType,
};
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

/// Per-day shared state. A fresh context is created by the workflow engine
/// for every business date and discarded at day end, so one day's outputs
/// can never leak into another day's run.
///
/// Each slot is written by exactly one subprocess (see the setters) and read
/// by later subprocesses; because subprocesses run strictly sequentially
/// within a day, no synchronization is needed.
pub struct EtlContext {
    current_date: NaiveDate,
    config: Arc<Config>,
    run_id: Uuid,
    current_subprocess: Option<SubprocessType>,
    extracted_data: Option<Vec<Box<dyn SourceRecord>>>,
    extracted_data_count: Option<u64>,
    transformed_data: Option<Vec<Box<dyn TargetRecord>>>,
    transformed_data_count: Option<u64>,
    loaded_data_count: Option<u64>,
    validation_passed: Option<bool>,
    validation_errors: Option<Vec<String>>,
    cleanup_performed: Option<bool>,
}

impl EtlContext {
    pub fn new(current_date: NaiveDate, config: Arc<Config>, run_id: Uuid) -> EtlContext {
        EtlContext {
            current_date,
            config,
            run_id,
            current_subprocess: None,
            extracted_data: None,
            extracted_data_count: None,
            transformed_data: None,
            transformed_data_count: None,
            loaded_data_count: None,
            validation_passed: None,
            validation_errors: None,
            cleanup_performed: None,
        }
    }

    pub fn current_date(&self) -> NaiveDate {
        self.current_date
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn current_subprocess(&self) -> Option<SubprocessType> {
        self.current_subprocess
    }

    pub(crate) fn set_current_subprocess(&mut self, subprocess: SubprocessType) {
        self.current_subprocess = Some(subprocess);
    }

    pub fn extracted_data(&self) -> Option<&[Box<dyn SourceRecord>]> {
        self.extracted_data.as_deref()
    }

    pub fn extracted_data_count(&self) -> Option<u64> {
        self.extracted_data_count
    }

    /// Written by Extract only, once, after all extractors have completed.
    pub fn set_extracted_data(&mut self, records: Vec<Box<dyn SourceRecord>>) {
        self.extracted_data_count = Some(records.len() as u64);
        self.extracted_data = Some(records);
    }

    pub fn transformed_data(&self) -> Option<&[Box<dyn TargetRecord>]> {
        self.transformed_data.as_deref()
    }

    pub fn transformed_data_count(&self) -> Option<u64> {
        self.transformed_data_count
    }

    /// Written by Transform only, once, after all transformers have
    /// completed. Never written when any transformer failed.
    pub fn set_transformed_data(&mut self, records: Vec<Box<dyn TargetRecord>>) {
        self.transformed_data_count = Some(records.len() as u64);
        self.transformed_data = Some(records);
    }

    pub fn loaded_data_count(&self) -> Option<u64> {
        self.loaded_data_count
    }

    pub fn set_loaded_data_count(&mut self, count: u64) {
        self.loaded_data_count = Some(count);
    }

    pub fn validation_passed(&self) -> Option<bool> {
        self.validation_passed
    }

    pub fn validation_errors(&self) -> Option<&[String]> {
        self.validation_errors.as_deref()
    }

    pub fn set_validation_outcome(&mut self, passed: bool, errors: Vec<String>) {
        self.validation_passed = Some(passed);
        self.validation_errors = Some(errors);
    }

    pub fn cleanup_performed(&self) -> Option<bool> {
        self.cleanup_performed
    }

    pub fn set_cleanup_performed(&mut self, performed: bool) {
        self.cleanup_performed = Some(performed);
    }
}
