//! YTD-to-quarterly conversion.
//!
//! Cumulative filings are differenced into discrete quarterly values within
//! one canonical fiscal year:
//!
//! ```text
//! Q1 = YTD(Q1)
//! Q2 = YTD(Q2) - YTD(Q1)
//! Q3 = YTD(Q3) - YTD(Q2)
//! Q4 = YTD(FY) - YTD(Q3)
//! ```
//!
//! A quarter whose predecessor cumulative value is missing is undefined
//! (null), never zero and never the raw YTD passed through; the latter
//! would overstate the quarter by the whole preceding year-to-date.
//!
//! Two flavors exist. [`ytd_to_quarterly_snapshot`] consumes a
//! self-consistent snapshot (one value per period) and differences within
//! it. [`ytd_to_quarterly_versions`] consumes the full multi-version set and
//! differences each filed version against the effective snapshot on its own
//! filed date, which is what makes every backtest-panel row reproducible
//! from information available at its filing.

use crate::error::{PitError, Result};
use crate::specs::MetricSpec;
use crate::types::{DedupedObservation, FiscalPeriod, QuarterlyMetric};
use std::collections::BTreeMap;
use tracing::warn;

/// Convert a deduplicated snapshot (one observation per fiscal-year/period)
/// into discrete quarterly values.
///
/// Returns [`PitError::InconsistentSnapshot`] when the input carries more
/// than one observation for the same (fiscal_year, period): differencing
/// such a set would mix filed snapshots, which is precisely the restatement
/// inconsistency deduplication exists to prevent.
pub fn ytd_to_quarterly_snapshot(
    snapshot: &[DedupedObservation],
    spec: &MetricSpec,
) -> Result<Vec<QuarterlyMetric>> {
    if !spec.is_ytd {
        return Ok(snapshot.iter().map(|obs| passthrough(obs, spec)).collect());
    }

    let mut by_year: BTreeMap<i32, BTreeMap<FiscalPeriod, &DedupedObservation>> = BTreeMap::new();
    for obs in snapshot {
        // Raw Q4 labels are ambiguous between discrete and cumulative; the
        // fourth quarter only ever comes from FY minus Q3.
        if obs.period == FiscalPeriod::Q4 {
            continue;
        }
        let periods = by_year.entry(obs.fiscal_year).or_default();
        if periods.insert(obs.period, obs).is_some() {
            return Err(PitError::InconsistentSnapshot {
                entity: obs.entity_id.clone(),
                metric: obs.metric.clone(),
                fiscal_year: obs.fiscal_year,
            });
        }
    }

    let mut out = Vec::new();
    for periods in by_year.values() {
        for (&period, &obs) in periods {
            let ytd = coerce_input(obs.value, spec);
            let discrete = match period.predecessor() {
                None => Some(ytd),
                Some(prev) => periods
                    .get(&prev)
                    .map(|prev_obs| ytd - coerce_input(prev_obs.value, spec)),
            };
            out.push(make_row(obs, coerce_output(discrete, obs, spec)));
        }
    }
    Ok(out)
}

/// Convert every filed version into a discrete quarterly value, differencing
/// each against the latest predecessor version filed on or before its own
/// filed date.
#[must_use]
pub fn ytd_to_quarterly_versions(
    versions: &[DedupedObservation],
    spec: &MetricSpec,
) -> Vec<QuarterlyMetric> {
    if !spec.is_ytd {
        return versions.iter().map(|obs| passthrough(obs, spec)).collect();
    }

    let mut out = Vec::new();
    for obs in versions {
        if obs.period == FiscalPeriod::Q4 {
            continue;
        }
        let ytd = coerce_input(obs.value, spec);
        let discrete = match obs.period.predecessor() {
            None => Some(ytd),
            Some(prev) => versions
                .iter()
                .filter(|v| {
                    v.fiscal_year == obs.fiscal_year
                        && v.period == prev
                        && v.filed_date <= obs.filed_date
                })
                .max_by_key(|v| (v.filed_date, v.period_end))
                .map(|prev_obs| ytd - coerce_input(prev_obs.value, spec)),
        };
        out.push(make_row(obs, coerce_output(discrete, obs, spec)));
    }
    out.sort_by(|a, b| {
        (a.fiscal_year, a.quarter, a.filed_date).cmp(&(b.fiscal_year, b.quarter, b.filed_date))
    });
    out
}

/// Non-YTD metrics are already discrete; the filed value passes through.
fn passthrough(obs: &DedupedObservation, spec: &MetricSpec) -> QuarterlyMetric {
    let discrete = Some(coerce_input(obs.value, spec));
    make_row(obs, coerce_output(discrete, obs, spec))
}

fn coerce_input(value: f64, spec: &MetricSpec) -> f64 {
    if spec.absolute_convention { value.abs() } else { value }
}

/// A negative discrete quarter for an absolute-convention metric means the
/// cumulative series decreased across a restatement; the value is
/// unreliable and becomes null.
fn coerce_output(
    discrete: Option<f64>,
    obs: &DedupedObservation,
    spec: &MetricSpec,
) -> Option<f64> {
    match discrete {
        Some(v) if spec.absolute_convention && v < 0.0 => {
            warn!(
                entity = %obs.entity_id,
                metric = %obs.metric,
                fiscal_year = obs.fiscal_year,
                period = %obs.period,
                filed = %obs.filed_date,
                value = v,
                "YTD decreased within fiscal year; dropping negative quarter"
            );
            None
        }
        other => other,
    }
}

fn make_row(obs: &DedupedObservation, discrete: Option<f64>) -> QuarterlyMetric {
    QuarterlyMetric {
        entity_id: obs.entity_id.clone(),
        metric: obs.metric.clone(),
        fiscal_year: obs.fiscal_year,
        quarter: obs.period.quarter(),
        period_end: obs.period_end,
        filed_date: obs.filed_date,
        discrete_value: discrete,
        ttm_value: None,
    }
}
