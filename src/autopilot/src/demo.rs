//! Demo workload: simulated entities, two weeks of metrics and three
//! starter rules, so a fresh process has something to automate.

use autopilot_core::metric_source::DailyMetrics;
use autopilot_core::types::*;
use autopilot_engine::lifecycle::{ActionDefinition, ConditionDefinition};
use autopilot_engine::{RuleDefinition, RuleService};
use autopilot_platforms::SimulatedAdsClient;
use autopilot_store::InMemoryMetricSource;
use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

const HISTORY_DAYS: i64 = 14;

/// Daily spend / revenue / conversions profile of one demo entity.
struct Profile {
    id: &'static str,
    name: &'static str,
    platform: AdPlatform,
    entity_type: EntityType,
    budget: f64,
    spend: f64,
    revenue: f64,
    conversions: f64,
}

const PROFILES: &[Profile] = &[
    Profile { id: "meta-as-101", name: "Prospecting - Broad", platform: AdPlatform::Meta, entity_type: EntityType::AdSet, budget: 120.0, spend: 110.0, revenue: 70.0, conversions: 2.0 },
    Profile { id: "meta-as-102", name: "Retargeting - 30d", platform: AdPlatform::Meta, entity_type: EntityType::AdSet, budget: 80.0, spend: 75.0, revenue: 310.0, conversions: 9.0 },
    Profile { id: "meta-as-103", name: "Lookalike 1%", platform: AdPlatform::Meta, entity_type: EntityType::AdSet, budget: 60.0, spend: 58.0, revenue: 95.0, conversions: 3.0 },
    Profile { id: "google-cmp-201", name: "Search - Brand", platform: AdPlatform::Google, entity_type: EntityType::Campaign, budget: 150.0, spend: 140.0, revenue: 720.0, conversions: 24.0 },
    Profile { id: "google-cmp-202", name: "Search - Generic", platform: AdPlatform::Google, entity_type: EntityType::Campaign, budget: 200.0, spend: 190.0, revenue: 230.0, conversions: 5.0 },
    Profile { id: "tiktok-ag-301", name: "Spark Ads - UGC", platform: AdPlatform::Tiktok, entity_type: EntityType::AdSet, budget: 90.0, spend: 85.0, revenue: 60.0, conversions: 1.0 },
    Profile { id: "tiktok-ag-302", name: "In-Feed - Creators", platform: AdPlatform::Tiktok, entity_type: EntityType::AdSet, budget: 70.0, spend: 66.0, revenue: 190.0, conversions: 6.0 },
];

pub struct DemoClients<'a> {
    pub meta: &'a SimulatedAdsClient,
    pub google: &'a SimulatedAdsClient,
    pub tiktok: &'a SimulatedAdsClient,
}

impl DemoClients<'_> {
    fn for_platform(&self, platform: AdPlatform) -> &SimulatedAdsClient {
        match platform {
            AdPlatform::Meta => self.meta,
            AdPlatform::Google => self.google,
            AdPlatform::Tiktok => self.tiktok,
        }
    }
}

/// Adds the demo entities and their trailing metrics.
pub fn seed_entities(clients: &DemoClients<'_>, metrics: &InMemoryMetricSource, now: DateTime<Utc>) {
    let today = now.date_naive();
    for profile in PROFILES {
        clients.for_platform(profile.platform).add_entity(AdEntity {
            id: profile.id.to_string(),
            name: profile.name.to_string(),
            platform: profile.platform,
            entity_type: profile.entity_type,
            account_id: Some(format!("{}-demo", profile.platform.as_str())),
            status: EntityStatus::Active,
            daily_budget: Some(profile.budget),
            bid_amount: Some(1.25),
            bid_cap: None,
        });

        for offset in 0..HISTORY_DAYS {
            // Small deterministic wobble so day-to-day rows differ.
            let wobble = 1.0 + ((offset % 5) as f64 - 2.0) * 0.03;
            let mut row = DailyMetrics::new(today - Duration::days(offset));
            row.spend = round2(profile.spend * wobble);
            row.revenue = round2(profile.revenue * wobble);
            row.conversions = profile.conversions;
            row.clicks = (profile.spend * 0.8).round();
            row.impressions = (profile.spend * 95.0).round();
            row.reach = Some((profile.spend * 60.0).round());
            metrics.record(profile.platform, profile.id, row);
        }
    }
    info!(entities = PROFILES.len(), days = HISTORY_DAYS, "Demo entities seeded");
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn condition(position: u32, metric: MetricType, operator: Operator, threshold: f64, days: u32) -> ConditionDefinition {
    ConditionDefinition {
        position,
        metric,
        operator,
        threshold,
        threshold_max: None,
        time_window_days: days,
    }
}

fn starter_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition {
            name: "Pause unprofitable Meta ad sets".into(),
            description: Some("Stops ad sets losing money over the last week".into()),
            platform: AdPlatform::Meta,
            entity_type: EntityType::AdSet,
            ad_account_id: None,
            combinator: Combinator::And,
            check_frequency_minutes: 60,
            max_daily_actions: Some(10),
            require_approval: false,
            dry_run: false,
            metadata: serde_json::json!({ "source": "demo" }),
            conditions: vec![
                condition(0, MetricType::Profit, Operator::LessThan, 0.0, 7),
                condition(1, MetricType::Spend, Operator::GreaterThan, 100.0, 7),
            ],
            actions: vec![
                ActionDefinition { position: 0, action: ActionSpec::Pause },
                ActionDefinition {
                    position: 1,
                    action: ActionSpec::SendNotification {
                        channels: vec![NotificationChannel::Email, NotificationChannel::InApp],
                        message_template: Some(
                            "Paused {{entity_name}} on {{platform}}: {{metrics}}".into(),
                        ),
                    },
                },
            ],
        },
        RuleDefinition {
            name: "Scale Google winners".into(),
            description: Some("Raises budgets of campaigns returning 3x or better".into()),
            platform: AdPlatform::Google,
            entity_type: EntityType::Campaign,
            ad_account_id: None,
            combinator: Combinator::And,
            check_frequency_minutes: 240,
            max_daily_actions: Some(3),
            require_approval: true,
            dry_run: false,
            metadata: serde_json::json!({ "source": "demo" }),
            conditions: vec![condition(0, MetricType::Roas, Operator::GreaterOrEqual, 3.0, 7)],
            actions: vec![ActionDefinition {
                position: 0,
                action: ActionSpec::AdjustBudget(BudgetChange {
                    change_type: ChangeType::Percent,
                    change_value: 20.0,
                    min_budget: None,
                    max_budget: Some(500.0),
                }),
            }],
        },
        RuleDefinition {
            name: "TikTok CPA guard".into(),
            description: Some("Dry run: would pause ad groups with expensive conversions".into()),
            platform: AdPlatform::Tiktok,
            entity_type: EntityType::AdSet,
            ad_account_id: None,
            combinator: Combinator::Or,
            check_frequency_minutes: 30,
            max_daily_actions: None,
            require_approval: false,
            dry_run: true,
            metadata: serde_json::json!({ "source": "demo" }),
            conditions: vec![
                condition(0, MetricType::Cpa, Operator::GreaterThan, 40.0, 3),
                condition(1, MetricType::Roas, Operator::LessThan, 1.0, 3),
            ],
            actions: vec![ActionDefinition { position: 0, action: ActionSpec::Pause }],
        },
    ]
}

/// Creates and activates the starter rules for `owner`.
pub async fn seed_rules(rules: &RuleService, owner: Uuid, now: DateTime<Utc>) -> anyhow::Result<Vec<Rule>> {
    let mut seeded = Vec::new();
    for definition in starter_rules() {
        let rule = rules.create(owner, &definition, now).await?;
        let rule = rules.activate(owner, rule.id, now).await?;
        seeded.push(rule);
    }
    info!(owner_id = %owner, rules = seeded.len(), "Demo rules seeded");
    Ok(seeded)
}
