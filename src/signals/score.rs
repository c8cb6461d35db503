use crate::core::FactorScore;

/// Upper bound of the published score.
pub const MAX_SCORE: f64 = 1000.0;

/// Compute composite score (0-1000) from individual factor scores.
pub fn compute_composite(scores: &[FactorScore]) -> f64 {
    let total_weighted: f64 = scores.iter().map(|s| s.weighted_score).sum();
    let max_possible: f64 = scores.iter().map(|s| s.weight.abs()).sum();

    if max_possible == 0.0 || !total_weighted.is_finite() {
        return 0.0;
    }

    let composite = (total_weighted / max_possible * MAX_SCORE).clamp(0.0, MAX_SCORE);
    (composite * 100.0).round() / 100.0
}
