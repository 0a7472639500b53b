// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the engine.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire process.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, TextEncoder, register_counter, register_counter_vec,
};

lazy_static! {
    // --- Transaction Counters ---
    /// Transactions started on the channel, labeled by opcode.
    pub static ref TRANSACTIONS_STARTED_TOTAL: CounterVec =
        register_counter_vec!("fileseal_transactions_started_total", "Total number of transactions started, labeled by opcode.", &["opcode"]).unwrap();
    /// Transactions that failed as a whole, labeled by reason.
    pub static ref TRANSACTIONS_FAILED_TOTAL: CounterVec =
        register_counter_vec!("fileseal_transactions_failed_total", "Total number of failed transactions, labeled by reason.", &["reason"]).unwrap();


    // --- Record Counters ---
    /// Records sent to the daemon.
    pub static ref RECORDS_SUBMITTED_TOTAL: Counter =
        register_counter!("fileseal_records_submitted_total", "Total number of batch records submitted.").unwrap();
    /// Records carrying an error, labeled by where the error came from (local or remote).
    pub static ref RECORD_ERRORS_TOTAL: CounterVec =
        register_counter_vec!("fileseal_record_errors_total", "Total number of failed batch records, labeled by source.", &["source"]).unwrap();


    // --- Playground Counters ---
    /// Files and directories removed while reclaiming playgrounds.
    pub static ref PLAYGROUND_FILES_RECLAIMED_TOTAL: Counter =
        register_counter!("fileseal_playground_files_reclaimed_total", "Total number of playground files removed.").unwrap();
    /// Completed unlink passes across all reclaim tasks.
    pub static ref PLAYGROUND_UNLINK_PASSES_TOTAL: Counter =
        register_counter!("fileseal_playground_unlink_passes_total", "Total number of playground unlink passes.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
