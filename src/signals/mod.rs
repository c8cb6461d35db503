pub mod model;
pub mod rules;
pub mod score;

use chrono::{DateTime, Utc};

use crate::core::{FactorScore, ReputationScore};
use crate::error::PipelineError;
use crate::wallets::WalletFeatures;
use model::{ModelParams, ModelRegistry};
use rules::Rule;

/// The scoring engine applies all rules under a model version and computes a
/// composite score. Holds no mutable state.
pub struct ScoringEngine {
    rules: Vec<Box<dyn Rule + Send + Sync>>,
    models: ModelRegistry,
}

impl ScoringEngine {
    pub fn new(models: ModelRegistry) -> Self {
        Self {
            rules: rules::default_rules(),
            models,
        }
    }

    pub fn has_model(&self, version: &str) -> bool {
        self.models.get(version).is_some()
    }

    pub fn model_versions(&self) -> Vec<String> {
        self.models.versions()
    }

    pub fn score(
        &self,
        wallet: &str,
        features: &WalletFeatures,
        model_version: &str,
        computed_at: DateTime<Utc>,
    ) -> Result<ReputationScore, PipelineError> {
        let params = self
            .models
            .get(model_version)
            .ok_or_else(|| PipelineError::UnknownModelVersion(model_version.to_string()))?;

        let factors: Vec<FactorScore> = self
            .rules
            .iter()
            .map(|rule| {
                let raw_value = rule.evaluate(features, params);
                let weight = params.weight_for(rule.name(), rule.default_weight());
                FactorScore {
                    name: rule.name().to_string(),
                    raw_value,
                    weight,
                    weighted_score: raw_value * weight,
                }
            })
            .collect();

        Ok(ReputationScore {
            wallet_address: wallet.to_string(),
            score: score::compute_composite(&factors),
            factors,
            model_version: params.version.clone(),
            computed_at,
            transaction_count: features.tx_count,
            tags: tags_for(features, params),
        })
    }
}

fn tags_for(f: &WalletFeatures, p: &ModelParams) -> Vec<String> {
    let mut tags = Vec::new();
    if f.type_counts.swap >= p.tags.trader_min_swaps && f.active_days >= p.tags.trader_min_active_days {
        tags.push("consistent_trader".to_string());
    }
    if f.type_counts.lend >= p.tags.lender_min_lends && f.active_days >= p.tags.lender_min_active_days {
        tags.push("active_lender".to_string());
    }
    if f.type_counts.liquidation > 0 {
        tags.push("liquidated".to_string());
    }
    if f.tx_count == 1 {
        tags.push("new_wallet".to_string());
    }
    tags
}
