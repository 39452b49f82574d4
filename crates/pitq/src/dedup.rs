//! Observation deduplication.
//!
//! Collapses the raw observation set for one (entity, metric) into a
//! canonical set of filed versions, unique per (fiscal_year, period,
//! filed_date). Three sources of duplication are handled, in order:
//!
//! 1. Comparative-period artifacts: a 10-K restates prior-year quarters
//!    under its own fiscal-year label. Within each canonical fiscal year the
//!    most frequent raw label is selected as primary, and rows with other
//!    labels are discarded when the primary rows already cover their period
//!    end. Uncovered period ends are backfilled from the non-primary rows.
//! 2. Annual-label redundancy: when a period end carries both a quarterly
//!    label and `FY`, the annual row is a restatement artifact and is
//!    dropped in favor of the quarterly one.
//! 3. Tag duplication: one filed date can report the same period under
//!    several source tags; the metric spec's tag priority picks one.
//!
//! Selecting a single value per period across filed dates is a separate
//! concern: [`snapshot_latest`] applies a [`ConflictPolicy`] over all
//! versions, while [`snapshot_as_of`] restricts to `filed_date <= as_of`
//! *before* selecting, which is what makes point-in-time views leak-free.

use crate::calendar::FiscalCalendar;
use crate::policy::{ConflictPolicy, LatestFiled};
use crate::specs::MetricSpec;
use crate::types::{DedupedObservation, FiscalPeriod, RawObservation};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};

/// Deduplicate raw observations into the full set of filed versions.
///
/// Input order is irrelevant except for the documented earliest-occurrence
/// tie-break on the primary label. Values are unit-normalized via the spec.
/// Output is unique per (fiscal_year, period, filed_date) and sorted by
/// that key.
#[must_use]
pub fn dedup_versions(
    observations: &[RawObservation],
    calendar: &FiscalCalendar,
    spec: &MetricSpec,
) -> Vec<DedupedObservation> {
    let mut by_fiscal_year: BTreeMap<i32, Vec<&RawObservation>> = BTreeMap::new();
    for obs in observations {
        let fiscal_year = calendar.fiscal_year_of(obs.period_end);
        by_fiscal_year.entry(fiscal_year).or_default().push(obs);
    }

    let mut out = Vec::new();
    for (fiscal_year, group) in by_fiscal_year {
        dedup_fiscal_year_group(fiscal_year, &group, spec, &mut out);
    }

    out.sort_by(|a, b| {
        (a.fiscal_year, a.period, a.filed_date).cmp(&(b.fiscal_year, b.period, b.filed_date))
    });
    out
}

/// Deduplicate one canonical-fiscal-year group into `out`.
fn dedup_fiscal_year_group(
    fiscal_year: i32,
    group: &[&RawObservation],
    spec: &MetricSpec,
    out: &mut Vec<DedupedObservation>,
) {
    let Some(primary_label) = primary_raw_label(group) else {
        return;
    };

    let primary: Vec<&RawObservation> = group
        .iter()
        .copied()
        .filter(|o| o.fiscal_year_raw == primary_label)
        .collect();
    let primary_ends: HashSet<NaiveDate> = primary.iter().map(|o| o.period_end).collect();

    // Backfill: non-primary rows only fill period ends the primary label
    // never covered. Everything else is a comparative-period artifact.
    let mut candidates = primary;
    candidates.extend(
        group
            .iter()
            .copied()
            .filter(|o| o.fiscal_year_raw != primary_label && !primary_ends.contains(&o.period_end)),
    );

    // Period ends that carry a quarterly label anywhere in the candidate
    // set; FY rows at those ends are redundant restatements.
    let quarterly_ends: HashSet<NaiveDate> = candidates
        .iter()
        .filter(|o| o.fiscal_period.is_quarterly())
        .map(|o| o.period_end)
        .collect();

    let mut by_version: BTreeMap<(FiscalPeriod, NaiveDate), Vec<&RawObservation>> = BTreeMap::new();
    for obs in candidates {
        if obs.fiscal_period == FiscalPeriod::FY && quarterly_ends.contains(&obs.period_end) {
            continue;
        }
        by_version
            .entry((obs.fiscal_period, obs.filed_date))
            .or_default()
            .push(obs);
    }

    for ((period, filed_date), versions) in by_version {
        let Some(best) = best_tag(&versions, spec) else {
            continue;
        };
        out.push(DedupedObservation {
            entity_id: best.entity_id.clone(),
            metric: best.metric.clone(),
            fiscal_year,
            period,
            period_end: best.period_end,
            filed_date,
            value: spec.normalize_units(best.value),
            source_tag: best.source_tag.clone(),
        });
    }
}

/// Most frequent raw fiscal-year label, earliest occurrence on ties.
fn primary_raw_label(group: &[&RawObservation]) -> Option<i32> {
    let mut counts: BTreeMap<i32, (usize, usize)> = BTreeMap::new();
    for (idx, obs) in group.iter().enumerate() {
        let entry = counts.entry(obs.fiscal_year_raw).or_insert((0, idx));
        entry.0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(label, _)| label)
}

/// Resolve same-filed-date tag duplication: highest-priority tag wins,
/// latest period end then largest magnitude as tie-breaks.
fn best_tag<'a>(versions: &[&'a RawObservation], spec: &MetricSpec) -> Option<&'a RawObservation> {
    versions.iter().copied().min_by(|a, b| {
        spec.tag_priority(&a.source_tag)
            .cmp(&spec.tag_priority(&b.source_tag))
            .then(b.period_end.cmp(&a.period_end))
            .then(
                b.value
                    .abs()
                    .partial_cmp(&a.value.abs())
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    })
}

/// Collapse the version set to one observation per (fiscal_year, period)
/// using the given conflict policy. This is the "latest" view used by the
/// current-valuation panel.
#[must_use]
pub fn snapshot_latest(
    versions: &[DedupedObservation],
    policy: &dyn ConflictPolicy,
) -> Vec<DedupedObservation> {
    select_per_period(versions, policy)
}

/// Collapse the version set to one observation per (fiscal_year, period) as
/// it was known on `as_of`.
///
/// The `filed_date <= as_of` filter is applied *before* selection. Selecting
/// first and filtering after would leak future information whenever the
/// overall winner was filed later than `as_of`.
#[must_use]
pub fn snapshot_as_of(versions: &[DedupedObservation], as_of: NaiveDate) -> Vec<DedupedObservation> {
    let visible: Vec<DedupedObservation> = versions
        .iter()
        .filter(|v| v.filed_date <= as_of)
        .cloned()
        .collect();
    select_per_period(&visible, &LatestFiled)
}

fn select_per_period(
    versions: &[DedupedObservation],
    policy: &dyn ConflictPolicy,
) -> Vec<DedupedObservation> {
    let mut by_period: BTreeMap<(i32, FiscalPeriod), Vec<DedupedObservation>> = BTreeMap::new();
    for version in versions {
        by_period
            .entry((version.fiscal_year, version.period))
            .or_default()
            .push(version.clone());
    }
    by_period
        .into_values()
        .filter_map(|candidates| policy.resolve(&candidates).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::MaxAbsValue;
    use crate::specs::MetricRegistry;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn raw(
        period_end: NaiveDate,
        filed: NaiveDate,
        fy_raw: i32,
        period: FiscalPeriod,
        value: f64,
        tag: &str,
    ) -> RawObservation {
        RawObservation {
            entity_id: "E1".to_string(),
            metric: "CFO".to_string(),
            period_end,
            filed_date: filed,
            fiscal_year_raw: fy_raw,
            fiscal_period: period,
            value,
            source_tag: tag.to_string(),
            form_type: "10-Q".to_string(),
        }
    }

    fn cfo_spec() -> MetricSpec {
        MetricRegistry::with_defaults().get("CFO").unwrap().clone()
    }

    const TAG: &str = "NetCashProvidedByUsedInOperatingActivities";
    const TAG_ALT: &str = "NetCashProvidedByUsedInOperatingActivitiesContinuingOperations";

    #[test]
    fn test_comparative_artifact_dropped() {
        // Q1 2024 filed twice: once in the 10-Q under its own label, once as
        // a comparative period inside the FY2025 10-K.
        let observations = vec![
            raw(date(2024, 3, 31), date(2024, 5, 1), 2024, FiscalPeriod::Q1, 100.0, TAG),
            raw(date(2024, 6, 30), date(2024, 8, 1), 2024, FiscalPeriod::Q2, 250.0, TAG),
            raw(date(2024, 12, 31), date(2025, 2, 15), 2024, FiscalPeriod::FY, 600.0, TAG),
            raw(date(2024, 3, 31), date(2025, 2, 15), 2025, FiscalPeriod::Q1, 105.0, TAG),
        ];
        let versions = dedup_versions(&observations, &FiscalCalendar::CALENDAR_YEAR, &cfo_spec());

        // The comparative Q1 under label 2025 is gone; the covered period
        // end keeps only its primary-label versions.
        let q1: Vec<_> = versions
            .iter()
            .filter(|v| v.period == FiscalPeriod::Q1)
            .collect();
        assert_eq!(q1.len(), 1);
        assert_eq!(q1[0].value, 100.0);
        assert_eq!(q1[0].fiscal_year, 2024);
    }

    #[test]
    fn test_fy_dropped_at_quarter_boundary() {
        // Same period end carries both Q3 and FY labels. The annual label is
        // a restatement artifact and must lose to the quarterly one.
        let observations = vec![
            raw(date(2024, 9, 30), date(2024, 11, 1), 2024, FiscalPeriod::Q3, 400.0, TAG),
            raw(date(2024, 9, 30), date(2024, 11, 1), 2024, FiscalPeriod::FY, 400.0, TAG),
        ];
        let versions = dedup_versions(&observations, &FiscalCalendar::CALENDAR_YEAR, &cfo_spec());
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].period, FiscalPeriod::Q3);
    }

    #[test]
    fn test_q4_label_is_quarterly_and_beats_fy() {
        // Some filers label the year-end row Q4 alongside (or instead of)
        // FY. It counts as a quarterly label, so the FY row at the same
        // period end is the redundant one.
        let observations = vec![
            raw(date(2024, 12, 31), date(2025, 2, 15), 2024, FiscalPeriod::Q4, 600.0, TAG),
            raw(date(2024, 12, 31), date(2025, 2, 15), 2024, FiscalPeriod::FY, 600.0, TAG),
        ];
        let versions = dedup_versions(&observations, &FiscalCalendar::CALENDAR_YEAR, &cfo_spec());
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].period, FiscalPeriod::Q4);
    }

    #[test]
    fn test_tag_priority_resolution() {
        let observations = vec![
            raw(date(2024, 3, 31), date(2024, 5, 1), 2024, FiscalPeriod::Q1, 90.0, TAG_ALT),
            raw(date(2024, 3, 31), date(2024, 5, 1), 2024, FiscalPeriod::Q1, 100.0, TAG),
        ];
        let versions = dedup_versions(&observations, &FiscalCalendar::CALENDAR_YEAR, &cfo_spec());
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].source_tag, TAG);
        assert_eq!(versions[0].value, 100.0);
    }

    #[test]
    fn test_backfill_from_other_label() {
        // Q2 only exists under a non-primary label; its period end is not
        // covered by primary rows, so it backfills the gap.
        let observations = vec![
            raw(date(2024, 3, 31), date(2024, 5, 1), 2024, FiscalPeriod::Q1, 100.0, TAG),
            raw(date(2024, 9, 30), date(2024, 11, 1), 2024, FiscalPeriod::Q3, 400.0, TAG),
            raw(date(2024, 6, 30), date(2025, 2, 15), 2025, FiscalPeriod::Q2, 250.0, TAG),
        ];
        let versions = dedup_versions(&observations, &FiscalCalendar::CALENDAR_YEAR, &cfo_spec());
        let periods: Vec<FiscalPeriod> = versions.iter().map(|v| v.period).collect();
        assert_eq!(
            periods,
            vec![FiscalPeriod::Q1, FiscalPeriod::Q2, FiscalPeriod::Q3]
        );
    }

    #[test]
    fn test_versions_unique_per_key() {
        let observations = vec![
            raw(date(2024, 3, 31), date(2024, 5, 1), 2024, FiscalPeriod::Q1, 100.0, TAG),
            raw(date(2024, 3, 31), date(2024, 8, 1), 2024, FiscalPeriod::Q1, 110.0, TAG),
            raw(date(2024, 3, 31), date(2024, 8, 1), 2024, FiscalPeriod::Q1, 108.0, TAG_ALT),
        ];
        let versions = dedup_versions(&observations, &FiscalCalendar::CALENDAR_YEAR, &cfo_spec());
        assert_eq!(versions.len(), 2);
        let keys: HashSet<_> = versions
            .iter()
            .map(|v| (v.fiscal_year, v.period, v.filed_date))
            .collect();
        assert_eq!(keys.len(), versions.len());
    }

    #[test]
    fn test_snapshot_latest_max_abs_policy() {
        let observations = vec![
            raw(date(2024, 3, 31), date(2024, 5, 1), 2024, FiscalPeriod::Q1, 120.0, TAG),
            raw(date(2024, 3, 31), date(2024, 8, 1), 2024, FiscalPeriod::Q1, 100.0, TAG),
        ];
        let versions = dedup_versions(&observations, &FiscalCalendar::CALENDAR_YEAR, &cfo_spec());
        let snapshot = snapshot_latest(&versions, &MaxAbsValue);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].value, 120.0);
    }

    #[test]
    fn test_snapshot_as_of_filters_before_selecting() {
        let observations = vec![
            raw(date(2024, 3, 31), date(2024, 5, 1), 2024, FiscalPeriod::Q1, 100.0, TAG),
            raw(date(2024, 3, 31), date(2025, 2, 15), 2024, FiscalPeriod::Q1, 999.0, TAG),
        ];
        let versions = dedup_versions(&observations, &FiscalCalendar::CALENDAR_YEAR, &cfo_spec());

        // Before the restatement was filed, only the original is visible,
        // even though the later version wins every conflict policy.
        let snapshot = snapshot_as_of(&versions, date(2024, 12, 31));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].value, 100.0);

        let snapshot = snapshot_as_of(&versions, date(2025, 2, 15));
        assert_eq!(snapshot[0].value, 999.0);

        // Before anything was filed nothing is known.
        assert!(snapshot_as_of(&versions, date(2024, 4, 1)).is_empty());
    }

    #[test]
    fn test_insertion_order_independence() {
        let mut observations = vec![
            raw(date(2024, 3, 31), date(2024, 5, 1), 2024, FiscalPeriod::Q1, 100.0, TAG),
            raw(date(2024, 6, 30), date(2024, 8, 1), 2024, FiscalPeriod::Q2, 250.0, TAG),
            raw(date(2024, 9, 30), date(2024, 11, 1), 2024, FiscalPeriod::Q3, 400.0, TAG),
        ];
        let forward = dedup_versions(&observations, &FiscalCalendar::CALENDAR_YEAR, &cfo_spec());
        observations.reverse();
        let reversed = dedup_versions(&observations, &FiscalCalendar::CALENDAR_YEAR, &cfo_spec());
        assert_eq!(forward, reversed);
    }
}
