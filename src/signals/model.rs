use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::config::ModelConfig;

pub const DEFAULT_MODEL_VERSION: &str = "v1";

/// Thresholds for behavioural tags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagThresholds {
    pub trader_min_swaps: u64,
    pub trader_min_active_days: u32,
    pub lender_min_lends: u64,
    pub lender_min_active_days: u32,
}

/// Immutable parameter table for one model version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelParams {
    pub version: String,
    /// Per-rule weight overrides; rules not listed use their default weight.
    pub weights: BTreeMap<String, f64>,
    pub volume_midpoint: f64,
    pub volume_cap: f64,
    pub activity_midpoint: f64,
    pub diversity_midpoint: f64,
    pub longevity_midpoint_days: f64,
    pub recency_midpoint: f64,
    pub liquidation_midpoint: f64,
    pub tags: TagThresholds,
}

impl ModelParams {
    pub fn v1() -> Self {
        Self {
            version: DEFAULT_MODEL_VERSION.into(),
            weights: BTreeMap::new(),
            volume_midpoint: 1_000.0,
            volume_cap: 1e12,
            activity_midpoint: 20.0,
            diversity_midpoint: 3.0,
            longevity_midpoint_days: 90.0,
            recency_midpoint: 5.0,
            liquidation_midpoint: 1.0,
            tags: TagThresholds {
                trader_min_swaps: 5,
                trader_min_active_days: 10,
                lender_min_lends: 5,
                lender_min_active_days: 15,
            },
        }
    }

    /// Build a table from config; unset fields inherit v1.
    pub fn from_config(cfg: &ModelConfig) -> Self {
        let base = Self::v1();
        Self {
            version: cfg.version.clone(),
            weights: cfg.weights.clone(),
            volume_midpoint: positive_or(cfg.volume_midpoint, base.volume_midpoint),
            volume_cap: positive_or(cfg.volume_cap, base.volume_cap),
            activity_midpoint: positive_or(cfg.activity_midpoint, base.activity_midpoint),
            diversity_midpoint: positive_or(cfg.diversity_midpoint, base.diversity_midpoint),
            longevity_midpoint_days: positive_or(cfg.longevity_midpoint_days, base.longevity_midpoint_days),
            recency_midpoint: positive_or(cfg.recency_midpoint, base.recency_midpoint),
            liquidation_midpoint: positive_or(cfg.liquidation_midpoint, base.liquidation_midpoint),
            tags: TagThresholds {
                trader_min_swaps: cfg.trader_min_swaps.unwrap_or(base.tags.trader_min_swaps),
                trader_min_active_days: cfg.trader_min_active_days.unwrap_or(base.tags.trader_min_active_days),
                lender_min_lends: cfg.lender_min_lends.unwrap_or(base.tags.lender_min_lends),
                lender_min_active_days: cfg.lender_min_active_days.unwrap_or(base.tags.lender_min_active_days),
            },
        }
    }

    pub fn weight_for(&self, rule: &str, default: f64) -> f64 {
        self.weights.get(rule).copied().unwrap_or(default)
    }
}

// Midpoints divide, so non-positive values fall back.
fn positive_or(value: Option<f64>, fallback: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => fallback,
    }
}

/// Loaded model versions, read-only after construction.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<ModelParams>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelRegistry {
    pub fn builtin() -> Self {
        let mut models = HashMap::new();
        models.insert(DEFAULT_MODEL_VERSION.to_string(), Arc::new(ModelParams::v1()));
        Self { models }
    }

    /// Built-in tables plus those declared in config. A config table with a
    /// built-in version name replaces the built-in one.
    pub fn from_config(extra: &[ModelConfig]) -> Self {
        let mut registry = Self::builtin();
        for cfg in extra {
            if cfg.version.trim().is_empty() {
                tracing::warn!("Ignoring model table without a version");
                continue;
            }
            if registry.models.contains_key(&cfg.version) {
                tracing::warn!(version = %cfg.version, "Model table from config replaces built-in");
            }
            registry.insert(ModelParams::from_config(cfg));
        }
        registry
    }

    pub fn insert(&mut self, params: ModelParams) {
        self.models.insert(params.version.clone(), Arc::new(params));
    }

    pub fn get(&self, version: &str) -> Option<&ModelParams> {
        self.models.get(version).map(Arc::as_ref)
    }

    pub fn versions(&self) -> Vec<String> {
        let mut v: Vec<String> = self.models.keys().cloned().collect();
        v.sort();
        v
    }
}
