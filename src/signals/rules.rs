use super::model::ModelParams;
use crate::wallets::WalletFeatures;

/// A scoring rule that evaluates a single aspect of a wallet.
/// Returns a normalized value 0.0-1.0; penalty rules carry a negative weight.
pub trait Rule {
    fn name(&self) -> &str;
    fn default_weight(&self) -> f64;
    fn evaluate(&self, features: &WalletFeatures, params: &ModelParams) -> f64;
}

/// Return all rules in breakdown order.
pub fn default_rules() -> Vec<Box<dyn Rule + Send + Sync>> {
    vec![
        Box::new(VolumeRule),
        Box::new(ActivityRule),
        Box::new(DiversityRule),
        Box::new(LongevityRule),
        Box::new(RecencyRule),
        Box::new(RepaymentRule),
        Box::new(LiquidationRule),
    ]
}

/// 0 at x=0, 0.5 at the midpoint, approaching 1.
fn saturate(x: f64, midpoint: f64) -> f64 {
    if x <= 0.0 || midpoint <= 0.0 {
        return 0.0;
    }
    1.0 - 1.0 / (1.0 + x / midpoint)
}

// --- Individual Rules ---

struct VolumeRule;
impl Rule for VolumeRule {
    fn name(&self) -> &str { "volume" }
    fn default_weight(&self) -> f64 { 6.0 }
    fn evaluate(&self, f: &WalletFeatures, p: &ModelParams) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        // Cap before converting so huge volumes stay finite.
        let volume = f.total_volume.to_f64().unwrap_or(p.volume_cap).min(p.volume_cap);
        saturate(volume, p.volume_midpoint)
    }
}

struct ActivityRule;
impl Rule for ActivityRule {
    fn name(&self) -> &str { "activity" }
    fn default_weight(&self) -> f64 { 4.0 }
    fn evaluate(&self, f: &WalletFeatures, p: &ModelParams) -> f64 {
        saturate(f.tx_count as f64, p.activity_midpoint)
    }
}

struct DiversityRule;
impl Rule for DiversityRule {
    fn name(&self) -> &str { "diversity" }
    fn default_weight(&self) -> f64 { 3.0 }
    fn evaluate(&self, f: &WalletFeatures, p: &ModelParams) -> f64 {
        saturate(f.distinct_protocols() as f64, p.diversity_midpoint)
    }
}

struct LongevityRule;
impl Rule for LongevityRule {
    fn name(&self) -> &str { "longevity" }
    fn default_weight(&self) -> f64 { 4.0 }
    fn evaluate(&self, f: &WalletFeatures, p: &ModelParams) -> f64 {
        saturate(f.longevity_days(), p.longevity_midpoint_days)
    }
}

struct RecencyRule;
impl Rule for RecencyRule {
    fn name(&self) -> &str { "recency" }
    fn default_weight(&self) -> f64 { 3.0 }
    fn evaluate(&self, f: &WalletFeatures, p: &ModelParams) -> f64 {
        saturate(f.activity_weight, p.recency_midpoint)
    }
}

/// Share of borrows that were repaid. No borrows, no credit history.
struct RepaymentRule;
impl Rule for RepaymentRule {
    fn name(&self) -> &str { "repayment" }
    fn default_weight(&self) -> f64 { 3.0 }
    fn evaluate(&self, f: &WalletFeatures, _p: &ModelParams) -> f64 {
        let borrows = f.type_counts.borrow;
        if borrows == 0 {
            return 0.0;
        }
        (f.type_counts.repay as f64 / borrows as f64).clamp(0.0, 1.0)
    }
}

struct LiquidationRule;
impl Rule for LiquidationRule {
    fn name(&self) -> &str { "liquidation" }
    fn default_weight(&self) -> f64 { -8.0 }
    fn evaluate(&self, f: &WalletFeatures, p: &ModelParams) -> f64 {
        saturate(f.type_counts.liquidation as f64, p.liquidation_midpoint)
    }
}
