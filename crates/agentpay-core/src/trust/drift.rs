//! Statistical goal-drift detection (spec.md §4.2; SPEC_FULL.md §C.4), grounded on
//! `original_source/sardis_v2_core/goal_drift_detector.py`. Per spec.md §9's Open Question
//! resolution, amount comparison is a parametric mean/std z-test rather than a two-sample
//! K-S test, because only summary statistics are retained, never raw samples.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DriftSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftType {
    MerchantShift,
    AmountAnomaly,
    VelocityChange,
    CategoryDrift,
    TimePatternChange,
}

/// Amount summary statistics only — never raw samples (spec.md §4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct AmountSummary {
    pub mean: f64,
    pub std: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SpendingProfile {
    pub agent_id: String,
    /// Merchant/category/hour-of-day distributions as frequency maps summing to ~1.0.
    pub merchant_distribution: BTreeMap<String, f64>,
    pub category_distribution: BTreeMap<String, f64>,
    pub hourly_distribution: BTreeMap<u8, f64>,
    pub amount_summary: AmountSummary,
    pub velocity_tx_per_day: f64,
    pub total_transactions: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// A stable hash of the rounded distribution vectors, used as a cheap pre-check: if two
/// profiles fingerprint identically, skip the full statistical comparison (SPEC_FULL.md
/// §C.4).
pub fn fingerprint(profile: &SpendingProfile) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for (k, v) in &profile.merchant_distribution {
        k.hash(&mut hasher);
        ((v * 1000.0).round() as i64).hash(&mut hasher);
    }
    for (k, v) in &profile.category_distribution {
        k.hash(&mut hasher);
        ((v * 1000.0).round() as i64).hash(&mut hasher);
    }
    for (k, v) in &profile.hourly_distribution {
        k.hash(&mut hasher);
        ((v * 1000.0).round() as i64).hash(&mut hasher);
    }
    ((profile.amount_summary.mean * 100.0).round() as i64).hash(&mut hasher);
    ((profile.amount_summary.std * 100.0).round() as i64).hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone)]
pub struct DriftAlert {
    pub drift_type: DriftType,
    pub severity: DriftSeverity,
    pub confidence: f64,
    pub detail: String,
}

/// Pearson's chi-squared goodness-of-fit statistic comparing an observed categorical
/// distribution (recent 7-day window, as counts) against an expected one (30-day baseline,
/// as proportions scaled by the observed total).
fn chi_squared_statistic(baseline: &BTreeMap<String, f64>, recent_counts: &BTreeMap<String, u64>) -> (f64, usize) {
    let total: u64 = recent_counts.values().sum();
    if total == 0 {
        return (0.0, 0);
    }
    let mut categories: Vec<&String> = baseline.keys().chain(recent_counts.keys()).collect();
    categories.sort();
    categories.dedup();

    let mut statistic = 0.0;
    for category in &categories {
        let expected_share = baseline.get(*category).copied().unwrap_or(1e-6);
        let expected_count = expected_share * total as f64;
        let observed_count = recent_counts.get(*category).copied().unwrap_or(0) as f64;
        if expected_count > 0.0 {
            statistic += (observed_count - expected_count).powi(2) / expected_count;
        }
    }
    (statistic, categories.len().saturating_sub(1).max(1))
}

/// Critical chi-squared values at p=0.05 for small degrees of freedom, tabulated directly
/// (SPEC_FULL.md §DESIGN rationale: avoids a stats-crate dependency the teacher's stack
/// doesn't carry). Falls back to a normal approximation for larger df.
fn chi_squared_critical_value_p05(df: usize) -> f64 {
    const TABLE: [f64; 10] = [3.841, 5.991, 7.815, 9.488, 11.070, 12.592, 14.067, 15.507, 16.919, 18.307];
    if df == 0 {
        return 0.0;
    }
    if df <= TABLE.len() {
        TABLE[df - 1]
    } else {
        // Wilson-Hilferty normal approximation to the chi-squared 95th percentile.
        let d = df as f64;
        let z = 1.645_f64;
        d * (1.0 - 2.0 / (9.0 * d) + z * (2.0 / (9.0 * d)).sqrt()).powi(3)
    }
}

fn severity_from_chi_squared(statistic: f64, critical: f64) -> Option<DriftSeverity> {
    if statistic <= critical {
        return None;
    }
    let ratio = statistic / critical.max(1e-6);
    Some(if ratio >= 3.0 {
        DriftSeverity::Critical
    } else if ratio >= 2.0 {
        DriftSeverity::High
    } else if ratio >= 1.5 {
        DriftSeverity::Medium
    } else {
        DriftSeverity::Low
    })
}

/// Compares a categorical distribution (merchant/category/hour-of-day) between baseline
/// and the recent window via a chi-squared test, emitting an alert at `p < significance`.
pub fn detect_categorical_drift(
    drift_type: DriftType,
    baseline: &BTreeMap<String, f64>,
    recent_counts: &BTreeMap<String, u64>,
) -> Option<DriftAlert> {
    let (statistic, df) = chi_squared_statistic(baseline, recent_counts);
    let critical = chi_squared_critical_value_p05(df);
    let severity = severity_from_chi_squared(statistic, critical)?;
    Some(DriftAlert {
        drift_type,
        severity,
        confidence: (1.0 - (critical / statistic.max(critical + 1e-6))).clamp(0.0, 0.999),
        detail: format!("chi_squared={:.3} critical_p05={:.3} df={}", statistic, critical, df),
    })
}

/// Parametric amount comparison: a z-test of the recent window's mean against the
/// baseline's mean/std, since raw samples are never retained (spec.md §9).
pub fn detect_amount_drift(baseline: &AmountSummary, recent: &AmountSummary, recent_n: u64) -> Option<DriftAlert> {
    if recent_n == 0 || baseline.std <= 0.0 {
        return None;
    }
    let standard_error = baseline.std / (recent_n as f64).sqrt();
    if standard_error <= 0.0 {
        return None;
    }
    let z = (recent.mean - baseline.mean).abs() / standard_error;
    let severity = if z >= 4.0 {
        DriftSeverity::Critical
    } else if z >= 3.0 {
        DriftSeverity::High
    } else if z >= 2.33 {
        // two-sided p < 0.05 roughly at |z| >= 1.96; widen slightly for medium bucket
        DriftSeverity::Medium
    } else if z >= 1.96 {
        DriftSeverity::Low
    } else {
        return None;
    };
    Some(DriftAlert {
        drift_type: DriftType::AmountAnomaly,
        severity,
        confidence: (1.0 - 2.0 * (1.0 - std_normal_cdf(z))).clamp(0.0, 0.999),
        detail: format!("z={:.3} baseline_mean={:.2} recent_mean={:.2}", z, baseline.mean, recent.mean),
    })
}

/// Abramowitz-Stegun approximation of the standard normal CDF, accurate to ~1e-7.
fn std_normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_across_clones() {
        let mut profile = SpendingProfile::default();
        profile.merchant_distribution.insert("merchant_a".into(), 0.6);
        profile.merchant_distribution.insert("merchant_b".into(), 0.4);
        assert_eq!(fingerprint(&profile), fingerprint(&profile.clone()));
    }

    #[test]
    fn stable_distribution_yields_no_alert() {
        let mut baseline = BTreeMap::new();
        baseline.insert("merchant_a".into(), 0.5);
        baseline.insert("merchant_b".into(), 0.5);
        let mut recent = BTreeMap::new();
        recent.insert("merchant_a".into(), 50);
        recent.insert("merchant_b".into(), 50);
        assert!(detect_categorical_drift(DriftType::MerchantShift, &baseline, &recent).is_none());
    }

    #[test]
    fn shifted_distribution_raises_alert() {
        let mut baseline = BTreeMap::new();
        baseline.insert("merchant_a".into(), 0.9);
        baseline.insert("merchant_b".into(), 0.1);
        let mut recent = BTreeMap::new();
        recent.insert("merchant_a".into(), 10);
        recent.insert("merchant_b".into(), 90);
        let alert = detect_categorical_drift(DriftType::MerchantShift, &baseline, &recent).unwrap();
        assert!(matches!(alert.severity, DriftSeverity::High | DriftSeverity::Critical));
    }

    #[test]
    fn amount_drift_requires_significant_z_score() {
        let baseline = AmountSummary { mean: 100.0, std: 20.0, ..Default::default() };
        let recent_stable = AmountSummary { mean: 105.0, ..baseline };
        assert!(detect_amount_drift(&baseline, &recent_stable, 50).is_none());

        let recent_shifted = AmountSummary { mean: 400.0, ..baseline };
        assert!(detect_amount_drift(&baseline, &recent_shifted, 50).is_some());
    }
}
