//! Conflict-resolution policies for restated observations.
//!
//! When several filed versions survive deduplication for the same logical
//! period, one must be chosen for a given view of the data. The choices are
//! heuristics, not ground truth, so they are modeled as named, swappable
//! policies behind a narrow interface rather than inline conditionals.

use crate::types::DedupedObservation;

/// Chooses one observation among conflicting versions of the same period.
pub trait ConflictPolicy: Send + Sync + std::fmt::Debug {
    /// Unique identifier for this policy.
    fn name(&self) -> &str;

    /// Select the canonical observation from a non-empty candidate set.
    /// Returns `None` only when `candidates` is empty.
    fn resolve<'a>(&self, candidates: &'a [DedupedObservation]) -> Option<&'a DedupedObservation>;
}

/// Prefer the maximum absolute value, latest filed date as tie-break.
///
/// Rationale: restatements of cumulative metrics trend toward more complete
/// (larger) figures, so the largest magnitude is usually the most complete
/// filing. This is a heuristic with no correctness proof: for metrics where
/// a later filing legitimately revises a figure downward it will pick the
/// stale value. Swap in [`LatestFiled`] where that matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxAbsValue;

impl ConflictPolicy for MaxAbsValue {
    fn name(&self) -> &str {
        "max_abs_value"
    }

    fn resolve<'a>(&self, candidates: &'a [DedupedObservation]) -> Option<&'a DedupedObservation> {
        candidates.iter().max_by(|a, b| {
            a.value
                .abs()
                .partial_cmp(&b.value.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.filed_date.cmp(&b.filed_date))
        })
    }
}

/// Prefer the most recently filed version, larger magnitude as tie-break.
///
/// This is the correct policy for point-in-time views: once the candidate
/// set is restricted to `filed_date <= as_of`, the latest filing is by
/// definition the best information available on that date.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatestFiled;

impl ConflictPolicy for LatestFiled {
    fn name(&self) -> &str {
        "latest_filed"
    }

    fn resolve<'a>(&self, candidates: &'a [DedupedObservation]) -> Option<&'a DedupedObservation> {
        candidates.iter().max_by(|a, b| {
            a.filed_date.cmp(&b.filed_date).then(
                a.value
                    .abs()
                    .partial_cmp(&b.value.abs())
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FiscalPeriod;
    use chrono::NaiveDate;

    fn obs(value: f64, filed: (i32, u32, u32)) -> DedupedObservation {
        DedupedObservation {
            entity_id: "E1".to_string(),
            metric: "CFO".to_string(),
            fiscal_year: 2024,
            period: FiscalPeriod::Q1,
            period_end: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            filed_date: NaiveDate::from_ymd_opt(filed.0, filed.1, filed.2).unwrap(),
            value,
            source_tag: "Tag".to_string(),
        }
    }

    #[test]
    fn test_max_abs_value_prefers_magnitude() {
        let candidates = vec![obs(100.0, (2024, 5, 1)), obs(-250.0, (2024, 4, 1))];
        let chosen = MaxAbsValue.resolve(&candidates).unwrap();
        assert_eq!(chosen.value, -250.0);
    }

    #[test]
    fn test_max_abs_value_tie_breaks_by_filed() {
        let candidates = vec![obs(100.0, (2024, 4, 1)), obs(100.0, (2024, 5, 1))];
        let chosen = MaxAbsValue.resolve(&candidates).unwrap();
        assert_eq!(chosen.filed_date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    }

    #[test]
    fn test_latest_filed_ignores_magnitude() {
        let candidates = vec![obs(900.0, (2024, 4, 1)), obs(100.0, (2024, 5, 1))];
        let chosen = LatestFiled.resolve(&candidates).unwrap();
        assert_eq!(chosen.value, 100.0);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(MaxAbsValue.resolve(&[]).is_none());
        assert!(LatestFiled.resolve(&[]).is_none());
    }
}
