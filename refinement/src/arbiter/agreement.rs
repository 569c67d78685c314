//! Inter-rater agreement (Krippendorff's alpha, interval metric).
//!
//! Units are rubric criteria, raters are judges. A judge that did not score
//! a criterion leaves a missing value, which the statistic tolerates.

use std::collections::BTreeMap;

use crate::config::ArbiterConfig;
use crate::state::{AgreementTier, Confidence, Criterion, JudgeVerdict};

/// Krippendorff's alpha for interval data.
///
/// `units` holds the values each unit received. Units with fewer than two
/// values are not pairable and are ignored. Returns `None` when fewer than
/// two pairable values exist. Perfect agreement with no expected
/// disagreement is reported as 1.0.
pub fn krippendorff_alpha_interval(units: &[Vec<f64>]) -> Option<f64> {
    let pairable: Vec<&Vec<f64>> = units.iter().filter(|u| u.len() >= 2).collect();
    let n: usize = pairable.iter().map(|u| u.len()).sum();
    if n < 2 {
        return None;
    }

    let observed: f64 = pairable
        .iter()
        .map(|unit| {
            let m = unit.len() as f64;
            let sum: f64 = unit
                .iter()
                .flat_map(|a| unit.iter().map(move |b| (a - b).powi(2)))
                .sum();
            sum / (m - 1.0)
        })
        .sum::<f64>()
        / n as f64;

    let values: Vec<f64> = pairable.iter().flat_map(|u| u.iter().copied()).collect();
    let expected: f64 = values
        .iter()
        .flat_map(|a| values.iter().map(move |b| (a - b).powi(2)))
        .sum::<f64>()
        / (n as f64 * (n as f64 - 1.0));

    if expected <= f64::EPSILON {
        return Some(1.0);
    }
    Some((1.0 - observed / expected).clamp(-1.0, 1.0))
}

/// Agreement across the verdicts behind a cascade result.
///
/// With fewer than two verdicts there is nothing to compare: a confident
/// result counts as full agreement, a low-confidence (degraded) one as none.
pub fn verdict_agreement(verdicts: &[JudgeVerdict], confidence: Confidence) -> f64 {
    if verdicts.len() < 2 {
        return if confidence == Confidence::Low { 0.0 } else { 1.0 };
    }

    let mut units: BTreeMap<Criterion, Vec<f64>> = BTreeMap::new();
    for verdict in verdicts {
        for (criterion, score) in &verdict.per_criterion_scores {
            units.entry(*criterion).or_default().push(*score);
        }
    }
    let mut matrix: Vec<Vec<f64>> = units.into_values().collect();
    if matrix.iter().all(|u| u.len() < 2) {
        // No criterion was scored twice; compare overall scores instead
        matrix = vec![verdicts.iter().map(|v| v.overall_score).collect()];
    }
    krippendorff_alpha_interval(&matrix).unwrap_or(1.0)
}

/// Map alpha onto the filtering tier
pub fn agreement_tier(alpha: f64, config: &ArbiterConfig) -> AgreementTier {
    if alpha >= config.high_agreement {
        AgreementTier::High
    } else if alpha >= config.moderate_agreement {
        AgreementTier::Moderate
    } else {
        AgreementTier::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CriterionScores, Recommendation, SectionScores};

    fn verdict(scores: &[(Criterion, f64)]) -> JudgeVerdict {
        JudgeVerdict {
            model_id: "j".to_string(),
            overall_score: 0.7,
            per_criterion_scores: scores.iter().copied().collect::<CriterionScores>(),
            section_scores: SectionScores::new(),
            confidence: Confidence::Medium,
            issues: vec![],
            recommendation: Recommendation::Refine,
            tokens_used: 0,
        }
    }

    #[test]
    fn test_perfect_agreement() {
        let units = vec![vec![0.9, 0.9], vec![0.5, 0.5], vec![0.7, 0.7]];
        assert_eq!(krippendorff_alpha_interval(&units), Some(1.0));
    }

    #[test]
    fn test_known_value() {
        // Units 1,2 | 3,3 | 5,5 with n = 6: D_o = 2 / 6
        let units = vec![vec![1.0, 2.0], vec![3.0, 3.0], vec![5.0, 5.0]];
        let values = [1.0, 2.0, 3.0, 3.0, 5.0, 5.0];
        let de: f64 = values
            .iter()
            .flat_map(|a| values.iter().map(move |b| (a - b) * (a - b)))
            .sum::<f64>()
            / 30.0;
        let expected = 1.0 - (1.0 / 3.0) / de;
        let alpha = krippendorff_alpha_interval(&units).unwrap();
        assert!((alpha - expected).abs() < 1e-9);
        assert!(alpha > 0.8);
    }

    #[test]
    fn test_systematic_disagreement_is_negative() {
        let units = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let alpha = krippendorff_alpha_interval(&units).unwrap();
        assert!(alpha < 0.0);
        assert!(alpha >= -1.0);
    }

    #[test]
    fn test_unpairable_units_ignored() {
        assert_eq!(krippendorff_alpha_interval(&[vec![0.5]]), None);
        assert_eq!(krippendorff_alpha_interval(&[]), None);
    }

    #[test]
    fn test_single_verdict_agreement_follows_confidence() {
        let v = vec![verdict(&[(Criterion::FactualAccuracy, 0.8)])];
        assert_eq!(verdict_agreement(&v, Confidence::High), 1.0);
        assert_eq!(verdict_agreement(&v, Confidence::Low), 0.0);
    }

    #[test]
    fn test_tiers() {
        let config = ArbiterConfig::default();
        assert_eq!(agreement_tier(0.85, &config), AgreementTier::High);
        assert_eq!(agreement_tier(0.80, &config), AgreementTier::High);
        assert_eq!(agreement_tier(0.70, &config), AgreementTier::Moderate);
        assert_eq!(agreement_tier(0.2, &config), AgreementTier::Low);
        assert_eq!(agreement_tier(-0.5, &config), AgreementTier::Low);
    }

    #[test]
    fn test_verdict_agreement_over_criteria() {
        let a = verdict(&[
            (Criterion::FactualAccuracy, 0.9),
            (Criterion::ClarityReadability, 0.4),
        ]);
        let b = verdict(&[
            (Criterion::FactualAccuracy, 0.88),
            (Criterion::ClarityReadability, 0.42),
        ]);
        let alpha = verdict_agreement(&[a, b], Confidence::Medium);
        assert!(alpha > 0.9);
    }
}
