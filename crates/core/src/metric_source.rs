//! Metric collaborator: pre-aggregated daily rows per entity.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MetricSourceError;
use crate::types::AdEntity;

/// One day of delivery for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub spend: f64,
    pub revenue: f64,
    pub conversions: f64,
    pub clicks: f64,
    pub impressions: f64,
    #[serde(default)]
    pub cost_of_goods: Option<f64>,
    #[serde(default)]
    pub reach: Option<f64>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub search_impression_share: Option<f64>,
    #[serde(default)]
    pub video_view_rate: Option<f64>,
}

impl DailyMetrics {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            ..Default::default()
        }
    }
}

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The `days` calendar days ending with (and including) the day of `now`.
    pub fn trailing_days(now: DateTime<Utc>, days: u32) -> Self {
        let end = now.date_naive();
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: end - Duration::days(span),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Source of aggregated metric rows. `Ok(vec![])` means "no data" and is
/// distinct from a fetch failure.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn daily_metrics(
        &self,
        entity: &AdEntity,
        range: DateRange,
    ) -> Result<Vec<DailyMetrics>, MetricSourceError>;
}
