//! Ads platform clients. Each client wraps one platform's management API.

use std::time::Duration;

use async_trait::async_trait;
use autopilot_core::types::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("{platform} rejected the request ({code}): {message}")]
    Rejected {
        platform: AdPlatform,
        code: String,
        message: String,
    },

    #[error("entity {0} not found")]
    NotFound(String),

    #[error("{operation} is not supported on {platform}")]
    Unsupported {
        platform: AdPlatform,
        operation: &'static str,
    },

    #[error("{0} rate limit exceeded")]
    RateLimited(AdPlatform),

    #[error("no client configured for {0}")]
    NotConfigured(AdPlatform),

    #[error("platform call timed out after {0} ms")]
    Timeout(u64),
}

impl PlatformError {
    /// Raw error payload stored on the audit row.
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            PlatformError::Rejected { code, message, .. } => json!({
                "error": { "code": code, "message": message }
            }),
            PlatformError::NotFound(id) => json!({
                "error": { "code": "not_found", "message": format!("entity {id} not found") }
            }),
            PlatformError::Unsupported { operation, .. } => json!({
                "error": { "code": "unsupported", "message": operation }
            }),
            PlatformError::RateLimited(_) => json!({
                "error": { "code": "rate_limited", "message": self.to_string() }
            }),
            PlatformError::NotConfigured(_) => json!({
                "error": { "code": "not_configured", "message": self.to_string() }
            }),
            PlatformError::Timeout(ms) => json!({
                "error": { "code": "timeout", "timeout_ms": ms }
            }),
        }
    }
}

/// Whether a mutation changed the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformResponse {
    pub outcome: MutationOutcome,
    pub raw: serde_json::Value,
}

/// Trait for ads platform management clients.
///
/// Platform-specific operations default to [`PlatformError::Unsupported`].
#[async_trait]
pub trait AdsPlatform: Send + Sync {
    fn platform(&self) -> AdPlatform;

    async fn list_entities(
        &self,
        entity_type: EntityType,
        account_id: Option<&str>,
    ) -> Result<Vec<AdEntity>, PlatformError>;

    async fn get_entity(&self, entity_id: &str) -> Result<AdEntity, PlatformError>;

    async fn set_status(
        &self,
        entity_id: &str,
        status: EntityStatus,
    ) -> Result<PlatformResponse, PlatformError>;

    async fn set_daily_budget(
        &self,
        entity_id: &str,
        amount: f64,
    ) -> Result<PlatformResponse, PlatformError>;

    async fn set_bid(&self, entity_id: &str, amount: f64) -> Result<PlatformResponse, PlatformError>;

    async fn set_bid_cap(
        &self,
        _entity_id: &str,
        _amount: f64,
    ) -> Result<PlatformResponse, PlatformError> {
        Err(PlatformError::Unsupported {
            platform: self.platform(),
            operation: "set_bid_cap",
        })
    }

    async fn add_negative_keyword(
        &self,
        _entity_id: &str,
        _keyword: &str,
        _match_type: KeywordMatchType,
    ) -> Result<PlatformResponse, PlatformError> {
        Err(PlatformError::Unsupported {
            platform: self.platform(),
            operation: "add_negative_keyword",
        })
    }

    async fn exclude_placement(
        &self,
        _entity_id: &str,
        _placement: &str,
    ) -> Result<PlatformResponse, PlatformError> {
        Err(PlatformError::Unsupported {
            platform: self.platform(),
            operation: "exclude_placement",
        })
    }

    async fn set_bidding_strategy(
        &self,
        entity_id: &str,
        strategy: BiddingStrategy,
        target: Option<f64>,
    ) -> Result<PlatformResponse, PlatformError>;

    /// Copies the entity and returns the new one.
    async fn duplicate_entity(
        &self,
        entity_id: &str,
        name_suffix: &str,
        budget_multiplier: Option<f64>,
    ) -> Result<AdEntity, PlatformError>;
}

// ─── Simulated client ───────────────────────────────────────────────────────

/// Server-side state of one simulated entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedEntity {
    pub entity: AdEntity,
    pub negative_keywords: Vec<(String, KeywordMatchType)>,
    pub excluded_placements: Vec<String>,
    pub bidding_strategy: Option<(BiddingStrategy, Option<f64>)>,
}

impl SimulatedEntity {
    fn new(entity: AdEntity) -> Self {
        Self {
            entity,
            negative_keywords: Vec::new(),
            excluded_placements: Vec::new(),
            bidding_strategy: None,
        }
    }
}

/// A mutation call received by a simulated client.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformCall {
    pub entity_id: String,
    pub operation: &'static str,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// In-memory stand-in for a platform's management API. Keeps a journal of
/// mutation calls and supports per-entity failure injection and latency.
pub struct SimulatedAdsClient {
    platform: AdPlatform,
    entities: DashMap<String, SimulatedEntity>,
    journal: Mutex<Vec<PlatformCall>>,
    failures: DashMap<String, PlatformError>,
    listing_failure: Mutex<Option<PlatformError>>,
    latency: Mutex<Option<Duration>>,
}

impl SimulatedAdsClient {
    pub fn new(platform: AdPlatform) -> Self {
        Self {
            platform,
            entities: DashMap::new(),
            journal: Mutex::new(Vec::new()),
            failures: DashMap::new(),
            listing_failure: Mutex::new(None),
            latency: Mutex::new(None),
        }
    }

    pub fn meta() -> Self {
        Self::new(AdPlatform::Meta)
    }

    pub fn google() -> Self {
        Self::new(AdPlatform::Google)
    }

    pub fn tiktok() -> Self {
        Self::new(AdPlatform::Tiktok)
    }

    pub fn add_entity(&self, entity: AdEntity) {
        self.entities
            .insert(entity.id.clone(), SimulatedEntity::new(entity));
    }

    pub fn entity(&self, entity_id: &str) -> Option<SimulatedEntity> {
        self.entities.get(entity_id).map(|e| e.clone())
    }

    /// Mutation calls received so far, in arrival order.
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.journal.lock().clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.journal.lock().len()
    }

    /// Every mutation on `entity_id` fails with `error` until cleared.
    pub fn fail_entity(&self, entity_id: impl Into<String>, error: PlatformError) {
        self.failures.insert(entity_id.into(), error);
    }

    pub fn clear_failure(&self, entity_id: &str) {
        self.failures.remove(entity_id);
    }

    pub fn fail_listing(&self, error: Option<PlatformError>) {
        *self.listing_failure.lock() = error;
    }

    /// Delay applied before every mutation.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    fn supports(&self, action: ActionType) -> bool {
        action.supported_on(self.platform)
    }

    async fn before_mutation(
        &self,
        entity_id: &str,
        operation: &'static str,
        payload: serde_json::Value,
    ) -> Result<(), PlatformError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.failures.get(entity_id) {
            return Err(error.clone());
        }
        if !self.entities.contains_key(entity_id) {
            return Err(PlatformError::NotFound(entity_id.to_string()));
        }
        debug!(
            platform = self.platform.as_str(),
            entity_id,
            operation,
            "Simulated platform mutation"
        );
        self.journal.lock().push(PlatformCall {
            entity_id: entity_id.to_string(),
            operation,
            payload,
            at: Utc::now(),
        });
        Ok(())
    }

    fn mutate<F>(&self, entity_id: &str, apply: F) -> Result<PlatformResponse, PlatformError>
    where
        F: FnOnce(&mut SimulatedEntity) -> bool,
    {
        let mut entry = self
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| PlatformError::NotFound(entity_id.to_string()))?;
        let changed = apply(&mut entry);
        Ok(PlatformResponse {
            outcome: if changed {
                MutationOutcome::Changed
            } else {
                MutationOutcome::Unchanged
            },
            raw: json!({ "success": true, "id": entity_id, "changed": changed }),
        })
    }
}

#[async_trait]
impl AdsPlatform for SimulatedAdsClient {
    fn platform(&self) -> AdPlatform {
        self.platform
    }

    async fn list_entities(
        &self,
        entity_type: EntityType,
        account_id: Option<&str>,
    ) -> Result<Vec<AdEntity>, PlatformError> {
        let failure = self.listing_failure.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        let mut entities: Vec<AdEntity> = self
            .entities
            .iter()
            .map(|e| e.entity.clone())
            .filter(|e| e.entity_type == entity_type)
            .filter(|e| e.status != EntityStatus::Archived)
            .filter(|e| match account_id {
                Some(account) => e.account_id.as_deref() == Some(account),
                None => true,
            })
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    async fn get_entity(&self, entity_id: &str) -> Result<AdEntity, PlatformError> {
        self.entities
            .get(entity_id)
            .map(|e| e.entity.clone())
            .ok_or_else(|| PlatformError::NotFound(entity_id.to_string()))
    }

    async fn set_status(
        &self,
        entity_id: &str,
        status: EntityStatus,
    ) -> Result<PlatformResponse, PlatformError> {
        self.before_mutation(entity_id, "set_status", json!({ "status": status }))
            .await?;
        self.mutate(entity_id, |e| {
            let changed = e.entity.status != status;
            e.entity.status = status;
            changed
        })
    }

    async fn set_daily_budget(
        &self,
        entity_id: &str,
        amount: f64,
    ) -> Result<PlatformResponse, PlatformError> {
        self.before_mutation(entity_id, "set_daily_budget", json!({ "daily_budget": amount }))
            .await?;
        self.mutate(entity_id, |e| {
            let changed = e.entity.daily_budget != Some(amount);
            e.entity.daily_budget = Some(amount);
            changed
        })
    }

    async fn set_bid(&self, entity_id: &str, amount: f64) -> Result<PlatformResponse, PlatformError> {
        self.before_mutation(entity_id, "set_bid", json!({ "bid_amount": amount }))
            .await?;
        self.mutate(entity_id, |e| {
            let changed = e.entity.bid_amount != Some(amount);
            e.entity.bid_amount = Some(amount);
            changed
        })
    }

    async fn set_bid_cap(
        &self,
        entity_id: &str,
        amount: f64,
    ) -> Result<PlatformResponse, PlatformError> {
        if !self.supports(ActionType::SetBidCap) {
            return Err(PlatformError::Unsupported {
                platform: self.platform,
                operation: "set_bid_cap",
            });
        }
        self.before_mutation(entity_id, "set_bid_cap", json!({ "bid_cap": amount }))
            .await?;
        self.mutate(entity_id, |e| {
            let changed = e.entity.bid_cap != Some(amount);
            e.entity.bid_cap = Some(amount);
            changed
        })
    }

    async fn add_negative_keyword(
        &self,
        entity_id: &str,
        keyword: &str,
        match_type: KeywordMatchType,
    ) -> Result<PlatformResponse, PlatformError> {
        if !self.supports(ActionType::AddNegativeKeyword) {
            return Err(PlatformError::Unsupported {
                platform: self.platform,
                operation: "add_negative_keyword",
            });
        }
        self.before_mutation(
            entity_id,
            "add_negative_keyword",
            json!({ "keyword": keyword, "match_type": match_type }),
        )
        .await?;
        self.mutate(entity_id, |e| {
            let exists = e
                .negative_keywords
                .iter()
                .any(|(k, m)| k == keyword && *m == match_type);
            if !exists {
                e.negative_keywords.push((keyword.to_string(), match_type));
            }
            !exists
        })
    }

    async fn exclude_placement(
        &self,
        entity_id: &str,
        placement: &str,
    ) -> Result<PlatformResponse, PlatformError> {
        if !self.supports(ActionType::ExcludePlacement) {
            return Err(PlatformError::Unsupported {
                platform: self.platform,
                operation: "exclude_placement",
            });
        }
        self.before_mutation(entity_id, "exclude_placement", json!({ "placement": placement }))
            .await?;
        self.mutate(entity_id, |e| {
            let exists = e.excluded_placements.iter().any(|p| p == placement);
            if !exists {
                e.excluded_placements.push(placement.to_string());
            }
            !exists
        })
    }

    async fn set_bidding_strategy(
        &self,
        entity_id: &str,
        strategy: BiddingStrategy,
        target: Option<f64>,
    ) -> Result<PlatformResponse, PlatformError> {
        self.before_mutation(
            entity_id,
            "set_bidding_strategy",
            json!({ "strategy": strategy, "target": target }),
        )
        .await?;
        self.mutate(entity_id, |e| {
            let next = Some((strategy, target));
            let changed = e.bidding_strategy != next;
            e.bidding_strategy = next;
            changed
        })
    }

    async fn duplicate_entity(
        &self,
        entity_id: &str,
        name_suffix: &str,
        budget_multiplier: Option<f64>,
    ) -> Result<AdEntity, PlatformError> {
        self.before_mutation(
            entity_id,
            "duplicate_entity",
            json!({ "name_suffix": name_suffix, "budget_multiplier": budget_multiplier }),
        )
        .await?;
        let source = self.get_entity(entity_id).await?;
        let copy = AdEntity {
            id: format!("{}-copy-{}", source.id, self.entities.len() + 1),
            name: format!("{}{}", source.name, name_suffix),
            status: EntityStatus::Paused,
            daily_budget: source
                .daily_budget
                .map(|b| b * budget_multiplier.unwrap_or(1.0)),
            ..source
        };
        self.add_entity(copy.clone());
        Ok(copy)
    }
}
