//! Cost & audit ledger queries (§4.7). The ledger itself is just the
//! `ai_usage` collection in [`crate::storage::Stores`] — append-only,
//! corrections are new compensating records, never updates. This module
//! only adds read-side aggregation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use reactor_types::RunId;

use crate::storage::Stores;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UsageAggregate {
    pub call_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
    pub by_provider: HashMap<String, f64>,
}

impl UsageAggregate {
    fn accumulate(&mut self, record: &reactor_types::AIUsageRecord) {
        self.call_count += 1;
        self.input_tokens += record.input_tokens;
        self.output_tokens += record.output_tokens;
        self.total_cost += record.estimated_cost;
        *self.by_provider.entry(record.provider.clone()).or_insert(0.0) += record.estimated_cost;
    }
}

#[derive(Clone)]
pub struct Ledger {
    stores: Arc<Stores>,
}

impl Ledger {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }

    /// Testable property #6 (§8): sum of `estimated_cost` over a Run equals
    /// the Run's reported cost aggregate.
    pub async fn for_run(&self, run_id: RunId) -> UsageAggregate {
        let records = self.stores.usage_for_run(run_id).await;
        let mut agg = UsageAggregate::default();
        for record in &records {
            agg.accumulate(record);
        }
        agg
    }

    pub async fn for_task(&self, task_id: reactor_types::TaskId) -> UsageAggregate {
        let runs = self.stores.runs_for_task(task_id).await;
        let run_ids: Vec<RunId> = runs.iter().map(|r| r.run_id).collect();
        let records = self.stores.usage_for_task(&run_ids).await;
        let mut agg = UsageAggregate::default();
        for record in &records {
            agg.accumulate(record);
        }
        agg
    }

    pub async fn for_day(&self, day: DateTime<Utc>) -> UsageAggregate {
        self.for_predicate(|r| {
            r.timestamp.date_naive() == day.date_naive()
        })
        .await
    }

    pub async fn for_month(&self, month: DateTime<Utc>) -> UsageAggregate {
        self.for_predicate(|r| r.timestamp.year() == month.year() && r.timestamp.month() == month.month())
            .await
    }

    async fn for_predicate<F>(&self, predicate: F) -> UsageAggregate
    where
        F: Fn(&reactor_types::AIUsageRecord) -> bool,
    {
        let all = self.stores.usage.list().await;
        let mut agg = UsageAggregate::default();
        for record in all.iter().filter(|r| predicate(r)) {
            agg.accumulate(record);
        }
        agg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reactor_types::{AIUsageRecord, StepId};

    #[tokio::test]
    async fn aggregates_sum_matches_individual_records() {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).await.unwrap();
        let run_id = RunId(1);
        for i in 0..3u64 {
            let record = AIUsageRecord {
                run_id,
                step_id: StepId(i),
                provider: "anthropic".into(),
                model: "claude".into(),
                operation: "complete".into(),
                input_tokens: 100,
                output_tokens: 50,
                estimated_cost: 0.01,
                duration_ms: 10,
                success: true,
                error: None,
                timestamp: Utc::now(),
            };
            stores.usage.insert(format!("u{i}"), record).await.unwrap();
        }
        let ledger = Ledger::new(stores);
        let agg = ledger.for_run(run_id).await;
        assert_eq!(agg.call_count, 3);
        assert!((agg.total_cost - 0.03).abs() < 1e-9);
        assert_eq!(agg.by_provider.get("anthropic").copied().unwrap_or(0.0), 0.03);
    }
}
