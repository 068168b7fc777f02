//! In-memory metric source keyed by platform and entity id.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use autopilot_core::error::MetricSourceError;
use autopilot_core::metric_source::{DailyMetrics, DateRange, MetricSource};
use autopilot_core::types::{AdEntity, AdPlatform};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryMetricSource {
    rows: DashMap<(AdPlatform, String), Vec<DailyMetrics>>,
    failing: AtomicBool,
    slow: DashMap<String, StdDuration>,
    fetches: AtomicUsize,
}

impl InMemoryMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the row for `row.date`.
    pub fn record(&self, platform: AdPlatform, entity_id: impl Into<String>, row: DailyMetrics) {
        let mut rows = self.rows.entry((platform, entity_id.into())).or_default();
        rows.retain(|r| r.date != row.date);
        rows.push(row);
        rows.sort_by_key(|r| r.date);
    }

    /// Records `template` for each of the `days` calendar days ending today.
    pub fn record_trailing(
        &self,
        platform: AdPlatform,
        entity_id: &str,
        now: DateTime<Utc>,
        days: u32,
        template: &DailyMetrics,
    ) {
        let today = now.date_naive();
        for offset in 0..days {
            let row = DailyMetrics {
                date: today - Duration::days(i64::from(offset)),
                ..template.clone()
            };
            self.record(platform, entity_id, row);
        }
    }

    /// Makes every fetch fail with `MetricSourceError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every fetch for one entity; `None` clears it.
    pub fn set_entity_latency(&self, entity_id: impl Into<String>, latency: Option<StdDuration>) {
        let entity_id = entity_id.into();
        match latency {
            Some(latency) => {
                self.slow.insert(entity_id, latency);
            }
            None => {
                self.slow.remove(&entity_id);
            }
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricSource for InMemoryMetricSource {
    async fn daily_metrics(
        &self,
        entity: &AdEntity,
        range: DateRange,
    ) -> Result<Vec<DailyMetrics>, MetricSourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let latency = self.slow.get(&entity.id).map(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(MetricSourceError::Unavailable(
                "metrics warehouse unreachable".into(),
            ));
        }
        let rows = self
            .rows
            .get(&(entity.platform, entity.id.clone()))
            .map(|rows| {
                rows.iter()
                    .filter(|r| range.contains(r.date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }
}
