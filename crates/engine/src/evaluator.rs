//! Condition evaluator — decides per entity whether a rule fires.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use autopilot_core::metric_source::{DailyMetrics, DateRange, MetricSource};
use autopilot_core::types::{AdEntity, Combinator, Condition, MetricType, Operator, Rule};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::EngineError;

/// Absolute tolerance used by `=` and `!=`.
pub const EQUALITY_TOLERANCE: f64 = 1e-9;

// ─── Aggregation ────────────────────────────────────────────────────────────

/// Window totals for one entity, from which every metric is derived.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub days: usize,
    pub spend: f64,
    pub revenue: f64,
    pub conversions: f64,
    pub clicks: f64,
    pub impressions: f64,
    pub cost_of_goods: f64,
    pub reach: Option<f64>,
    pub quality_score: Option<f64>,
    pub search_impression_share: Option<f64>,
    pub video_view_rate: Option<f64>,
}

impl MetricSnapshot {
    /// Sums the rows. Returns `None` when there are no rows.
    pub fn aggregate(rows: &[DailyMetrics]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let mut snapshot = MetricSnapshot {
            days: rows.len(),
            ..Default::default()
        };
        for row in rows {
            snapshot.spend += row.spend;
            snapshot.revenue += row.revenue;
            snapshot.conversions += row.conversions;
            snapshot.clicks += row.clicks;
            snapshot.impressions += row.impressions;
            snapshot.cost_of_goods += row.cost_of_goods.unwrap_or(0.0);
            if let Some(reach) = row.reach {
                snapshot.reach = Some(snapshot.reach.unwrap_or(0.0) + reach);
            }
        }
        snapshot.quality_score = average(rows.iter().filter_map(|r| r.quality_score));
        snapshot.search_impression_share =
            average(rows.iter().filter_map(|r| r.search_impression_share));
        snapshot.video_view_rate = average(rows.iter().filter_map(|r| r.video_view_rate));
        Some(snapshot)
    }

    /// Value of `metric`, or `None` when undefined for this window.
    pub fn value(&self, metric: MetricType) -> Option<f64> {
        let profit = self.revenue - self.spend - self.cost_of_goods;
        match metric {
            MetricType::Spend => Some(self.spend),
            MetricType::Revenue => Some(self.revenue),
            MetricType::Conversions => Some(self.conversions),
            MetricType::Clicks => Some(self.clicks),
            MetricType::Impressions => Some(self.impressions),
            MetricType::Profit => Some(profit),
            MetricType::ProfitMargin => ratio(profit, self.revenue).map(|v| v * 100.0),
            MetricType::Roas => ratio(self.revenue, self.spend),
            MetricType::Cpa => ratio(self.spend, self.conversions),
            MetricType::Cpc => ratio(self.spend, self.clicks),
            MetricType::Cpm => ratio(self.spend, self.impressions).map(|v| v * 1000.0),
            MetricType::Ctr => ratio(self.clicks, self.impressions).map(|v| v * 100.0),
            MetricType::ConversionRate => ratio(self.conversions, self.clicks).map(|v| v * 100.0),
            MetricType::Frequency => self.reach.and_then(|reach| ratio(self.impressions, reach)),
            MetricType::QualityScore => self.quality_score,
            MetricType::SearchImpressionShare => self.search_impression_share,
            MetricType::VideoViewRate => self.video_view_rate,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    ratio(sum, count as f64)
}

/// Applies a condition operator. `threshold_max` is only read by `between`.
pub fn compare(operator: Operator, value: f64, threshold: f64, threshold_max: Option<f64>) -> bool {
    match operator {
        Operator::GreaterThan => value > threshold,
        Operator::LessThan => value < threshold,
        Operator::GreaterOrEqual => value >= threshold,
        Operator::LessOrEqual => value <= threshold,
        Operator::Equals => (value - threshold).abs() <= EQUALITY_TOLERANCE,
        Operator::NotEquals => (value - threshold).abs() > EQUALITY_TOLERANCE,
        Operator::Between => match threshold_max {
            Some(max) => value >= threshold && value <= max,
            None => false,
        },
    }
}

// ─── Evaluation ─────────────────────────────────────────────────────────────

/// Result of one condition for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionOutcome {
    pub metric: MetricType,
    pub operator: Operator,
    pub threshold: f64,
    pub threshold_max: Option<f64>,
    pub time_window_days: u32,
    pub value: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub matched: bool,
    /// Conditions actually evaluated, in order. Short-circuited ones are absent.
    pub outcomes: Vec<ConditionOutcome>,
}

impl Evaluation {
    /// Human-readable metric summary used by notification templates.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (i, outcome) in self.outcomes.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let value = match outcome.value {
                Some(v) => format!("{v:.2}"),
                None => "n/a".to_string(),
            };
            let _ = write!(
                out,
                "{} {}d = {} ({} {})",
                outcome.metric, outcome.time_window_days, value, outcome.operator, outcome.threshold
            );
        }
        out
    }
}

pub struct ConditionEvaluator {
    metrics: Arc<dyn MetricSource>,
    io_timeout: Duration,
}

impl ConditionEvaluator {
    pub fn new(metrics: Arc<dyn MetricSource>, io_timeout: Duration) -> Self {
        Self {
            metrics,
            io_timeout,
        }
    }

    /// Evaluates the rule's conditions for one entity.
    ///
    /// Missing data makes a condition false. A metric source failure is
    /// returned as an error.
    pub async fn evaluate(
        &self,
        rule: &Rule,
        entity: &AdEntity,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, EngineError> {
        let conditions = rule.ordered_conditions();
        if conditions.is_empty() {
            return Ok(Evaluation {
                matched: false,
                outcomes: Vec::new(),
            });
        }

        let mut windows: HashMap<u32, Option<MetricSnapshot>> = HashMap::new();
        let mut outcomes = Vec::with_capacity(conditions.len());

        for condition in conditions {
            let days = condition.time_window_days;
            if !windows.contains_key(&days) {
                let snapshot = self.fetch_window(entity, now, days).await?;
                windows.insert(days, snapshot);
            }
            let snapshot = windows.get(&days).and_then(|s| s.as_ref());
            let outcome = evaluate_condition(condition, snapshot);
            let passed = outcome.passed;
            outcomes.push(outcome);

            match (rule.combinator, passed) {
                (Combinator::And, false) | (Combinator::Or, true) => break,
                _ => {}
            }
        }

        let matched = match rule.combinator {
            Combinator::And => outcomes.iter().all(|o| o.passed),
            Combinator::Or => outcomes.iter().any(|o| o.passed),
        };

        debug!(
            rule_id = %rule.id,
            entity_id = %entity.id,
            matched,
            evaluated = outcomes.len(),
            "Conditions evaluated"
        );

        Ok(Evaluation { matched, outcomes })
    }

    async fn fetch_window(
        &self,
        entity: &AdEntity,
        now: DateTime<Utc>,
        days: u32,
    ) -> Result<Option<MetricSnapshot>, EngineError> {
        let range = DateRange::trailing_days(now, days);
        let rows = tokio::time::timeout(self.io_timeout, self.metrics.daily_metrics(entity, range))
            .await
            .map_err(|_| EngineError::Timeout {
                operation: "metric_fetch",
                timeout_ms: self.io_timeout.as_millis() as u64,
            })??;
        Ok(MetricSnapshot::aggregate(&rows))
    }
}

fn evaluate_condition(condition: &Condition, snapshot: Option<&MetricSnapshot>) -> ConditionOutcome {
    let value = snapshot.and_then(|s| s.value(condition.metric));
    let passed = value
        .map(|v| {
            compare(
                condition.operator,
                v,
                condition.threshold,
                condition.threshold_max,
            )
        })
        .unwrap_or(false);
    ConditionOutcome {
        metric: condition.metric,
        operator: condition.operator,
        threshold: condition.threshold,
        threshold_max: condition.threshold_max,
        time_window_days: condition.time_window_days,
        value,
        passed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::types::*;
    use autopilot_store::InMemoryMetricSource;
    use uuid::Uuid;

    fn entity() -> AdEntity {
        AdEntity {
            id: "c-1".into(),
            name: "Prospecting".into(),
            platform: AdPlatform::Meta,
            entity_type: EntityType::Campaign,
            account_id: None,
            status: EntityStatus::Active,
            daily_budget: Some(50.0),
            bid_amount: None,
            bid_cap: None,
        }
    }

    fn day(spend: f64, revenue: f64) -> DailyMetrics {
        DailyMetrics {
            spend,
            revenue,
            conversions: 2.0,
            clicks: 40.0,
            impressions: 4000.0,
            ..DailyMetrics::new(Utc::now().date_naive())
        }
    }

    fn rule(combinator: Combinator, conditions: Vec<Condition>) -> Rule {
        let mut rule = Rule::new(Uuid::new_v4(), "r", AdPlatform::Meta, EntityType::Campaign);
        rule.combinator = combinator;
        rule.conditions = conditions;
        rule
    }

    fn evaluator(source: Arc<InMemoryMetricSource>) -> ConditionEvaluator {
        ConditionEvaluator::new(source, Duration::from_secs(1))
    }

    #[test]
    fn test_between_is_inclusive() {
        for (value, expected) in [(10.0, true), (15.0, true), (20.0, true), (9.999, false), (20.001, false)] {
            assert_eq!(compare(Operator::Between, value, 10.0, Some(20.0)), expected, "value {value}");
        }
        assert!(!compare(Operator::Between, 15.0, 10.0, None));
    }

    #[test]
    fn test_equality_tolerance() {
        assert!(compare(Operator::Equals, 0.1 + 0.2, 0.3, None));
        assert!(!compare(Operator::NotEquals, 0.1 + 0.2, 0.3, None));
        assert!(compare(Operator::NotEquals, 0.31, 0.3, None));
    }

    #[test]
    fn test_derived_metrics() {
        let rows = vec![
            DailyMetrics {
                cost_of_goods: Some(5.0),
                reach: Some(1000.0),
                quality_score: Some(6.0),
                ..day(30.0, 60.0)
            },
            DailyMetrics {
                reach: Some(1000.0),
                ..day(20.0, 40.0)
            },
        ];
        let snapshot = MetricSnapshot::aggregate(&rows).unwrap();
        let expected = [
            (MetricType::Spend, 50.0),
            (MetricType::Profit, 45.0),
            (MetricType::Roas, 2.0),
            (MetricType::Cpa, 12.5),
            (MetricType::Cpc, 0.625),
            (MetricType::Cpm, 6.25),
            (MetricType::Ctr, 1.0),
            (MetricType::ConversionRate, 5.0),
            (MetricType::Frequency, 4.0),
            (MetricType::ProfitMargin, 45.0),
        ];
        for (metric, want) in expected {
            let got = snapshot.value(metric).unwrap();
            assert!((got - want).abs() < 1e-9, "{metric}: {got} != {want}");
        }
        // Averaged over reporting days only.
        assert_eq!(snapshot.value(MetricType::QualityScore), Some(6.0));
        assert_eq!(snapshot.value(MetricType::VideoViewRate), None);
    }

    #[test]
    fn test_zero_denominator_is_undefined() {
        let snapshot = MetricSnapshot::aggregate(&[day(10.0, 0.0)]).unwrap();
        assert_eq!(snapshot.value(MetricType::ProfitMargin), None);
        let no_clicks = MetricSnapshot::aggregate(&[DailyMetrics {
            clicks: 0.0,
            ..day(10.0, 5.0)
        }])
        .unwrap();
        assert_eq!(no_clicks.value(MetricType::Cpc), None);
        assert!(MetricSnapshot::aggregate(&[]).is_none());
    }

    #[tokio::test]
    async fn test_and_requires_every_condition() {
        let source = Arc::new(InMemoryMetricSource::new());
        source.record_trailing(AdPlatform::Meta, "c-1", Utc::now(), 7, &day(30.0, 20.0));
        let evaluator = evaluator(source);

        let both = rule(
            Combinator::And,
            vec![
                Condition::new(0, MetricType::Profit, Operator::LessThan, 0.0, 7),
                Condition::new(1, MetricType::Spend, Operator::GreaterThan, 100.0, 7),
            ],
        );
        assert!(evaluator.evaluate(&both, &entity(), Utc::now()).await.unwrap().matched);

        let one_fails = rule(
            Combinator::And,
            vec![
                Condition::new(0, MetricType::Profit, Operator::LessThan, 0.0, 7),
                Condition::new(1, MetricType::Spend, Operator::GreaterThan, 1000.0, 7),
            ],
        );
        assert!(!evaluator.evaluate(&one_fails, &entity(), Utc::now()).await.unwrap().matched);
    }

    #[tokio::test]
    async fn test_or_short_circuits_and_caches_windows() {
        let source = Arc::new(InMemoryMetricSource::new());
        source.record_trailing(AdPlatform::Meta, "c-1", Utc::now(), 14, &day(30.0, 20.0));
        let evaluator = evaluator(source.clone());

        let or_rule = rule(
            Combinator::Or,
            vec![
                Condition::new(0, MetricType::Roas, Operator::GreaterThan, 5.0, 7),
                Condition::new(1, MetricType::Spend, Operator::GreaterThan, 1.0, 7),
                Condition::new(2, MetricType::Cpa, Operator::GreaterThan, 1.0, 14),
            ],
        );
        let evaluation = evaluator.evaluate(&or_rule, &entity(), Utc::now()).await.unwrap();
        assert!(evaluation.matched);
        assert_eq!(evaluation.outcomes.len(), 2);
        // Both evaluated conditions share the 7-day window.
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_data_is_false_not_error() {
        let source = Arc::new(InMemoryMetricSource::new());
        let evaluator = evaluator(source);
        let r = rule(
            Combinator::Or,
            vec![Condition::new(0, MetricType::Spend, Operator::GreaterOrEqual, 0.0, 7)],
        );
        let evaluation = evaluator.evaluate(&r, &entity(), Utc::now()).await.unwrap();
        assert!(!evaluation.matched);
        assert_eq!(evaluation.outcomes[0].value, None);
    }

    #[tokio::test]
    async fn test_metric_source_failure_propagates() {
        let source = Arc::new(InMemoryMetricSource::new());
        source.set_failing(true);
        let evaluator = evaluator(source);
        let r = rule(
            Combinator::And,
            vec![Condition::new(0, MetricType::Spend, Operator::GreaterThan, 0.0, 7)],
        );
        let err = evaluator.evaluate(&r, &entity(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::MetricSource(_)));
    }
}
