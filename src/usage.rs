//! Append-only ledger of token usage and cost.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::TokenUsage;

/// One completed request or stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

/// Summed usage over a set of records.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    /// Records whose usage was approximated rather than vendor-reported.
    pub estimated_requests: u64,
}

impl UsageTotals {
    fn add(&mut self, record: &UsageRecord) {
        self.requests += 1;
        self.prompt_tokens += record.usage.prompt_tokens;
        self.completion_tokens += record.usage.completion_tokens;
        self.total_tokens += record.usage.total_tokens;
        self.cost += record.cost;
        if record.usage.is_estimated() {
            self.estimated_requests += 1;
        }
    }
}

/// Process-wide usage ledger shared by every provider.
///
/// Recording is a single push under a short write lock; aggregations take a
/// read lock and never mutate.
#[derive(Debug, Default)]
pub struct UsageTracker {
    records: RwLock<Vec<UsageRecord>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record stamped with the current time.
    pub fn record(&self, provider: &str, model: &str, usage: TokenUsage, cost: f64) {
        self.record_at(provider, model, usage, cost, Utc::now());
    }

    pub(crate) fn record_at(
        &self,
        provider: &str,
        model: &str,
        usage: TokenUsage,
        cost: f64,
        timestamp: DateTime<Utc>,
    ) {
        info!(
            provider,
            model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            estimated = usage.is_estimated(),
            cost,
            "usage recorded"
        );
        let record = UsageRecord {
            provider: provider.to_string(),
            model: model.to_string(),
            usage,
            cost,
            timestamp,
        };
        self.records.write().push(record);
    }

    /// Snapshot of every record in insertion order.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn totals(&self) -> UsageTotals {
        let records = self.records.read();
        let mut totals = UsageTotals::default();
        for record in records.iter() {
            totals.add(record);
        }
        totals
    }

    pub fn totals_by_provider(&self) -> HashMap<String, UsageTotals> {
        self.group_by(|record| record.provider.as_str())
    }

    pub fn totals_by_model(&self) -> HashMap<String, UsageTotals> {
        self.group_by(|record| record.model.as_str())
    }

    /// Totals for records with `start <= timestamp < end`.
    pub fn totals_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> UsageTotals {
        let records = self.records.read();
        let mut totals = UsageTotals::default();
        for record in records
            .iter()
            .filter(|record| record.timestamp >= start && record.timestamp < end)
        {
            totals.add(record);
        }
        totals
    }

    fn group_by<F>(&self, key: F) -> HashMap<String, UsageTotals>
    where
        F: Fn(&UsageRecord) -> &str,
    {
        let records = self.records.read();
        let mut grouped: HashMap<String, UsageTotals> = HashMap::new();
        for record in records.iter() {
            grouped
                .entry(key(record).to_string())
                .or_default()
                .add(record);
        }
        grouped
    }
}
