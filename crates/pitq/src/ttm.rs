//! Trailing-twelve-month aggregation.
//!
//! TTM is the sum of the trailing four fiscal quarters. It is only ever
//! computed from exactly four consecutive quarters with non-null discrete
//! values; a window with a gap or a null yields a null TTM, never a partial
//! sum.

use crate::types::{FiscalQuarter, QuarterlyMetric};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Fill `ttm_value` on a single-version quarterly series (one row per
/// fiscal quarter, as produced from a latest snapshot).
pub fn add_ttm_rolling(rows: &mut [QuarterlyMetric]) {
    rows.sort_by_key(|r| (r.fiscal_year, r.quarter));
    let values: BTreeMap<(i32, FiscalQuarter), Option<f64>> = rows
        .iter()
        .map(|r| ((r.fiscal_year, r.quarter), r.discrete_value))
        .collect();

    for row in rows.iter_mut() {
        row.ttm_value = window_sum(row.quarter.trailing_window(row.fiscal_year), |key| {
            values.get(&key).copied().flatten()
        });
    }
}

/// Fill `ttm_value` on a multi-version quarterly series.
///
/// For each filed version the trailing window is evaluated point-in-time:
/// each of the four quarters contributes its latest version filed on or
/// before the row's own filed date. A later restatement of an earlier
/// quarter therefore changes the TTM of subsequent filings but never of
/// earlier ones.
pub fn add_ttm_pit(rows: &mut [QuarterlyMetric]) {
    // (fiscal_year, quarter) -> versions ordered by filed date
    let mut history: BTreeMap<(i32, FiscalQuarter), Vec<(NaiveDate, Option<f64>)>> =
        BTreeMap::new();
    for row in rows.iter() {
        history
            .entry((row.fiscal_year, row.quarter))
            .or_default()
            .push((row.filed_date, row.discrete_value));
    }
    for versions in history.values_mut() {
        versions.sort_by_key(|(filed, _)| *filed);
    }

    for row in rows.iter_mut() {
        let filed = row.filed_date;
        row.ttm_value = window_sum(row.quarter.trailing_window(row.fiscal_year), |key| {
            history.get(&key).and_then(|versions| {
                versions
                    .iter()
                    .rev()
                    .find(|(f, _)| *f <= filed)
                    .and_then(|(_, v)| *v)
            })
        });
    }
}

/// Sum of four window entries, null unless all four resolve to a value.
fn window_sum<F>(window: [(i32, FiscalQuarter); 4], lookup: F) -> Option<f64>
where
    F: Fn((i32, FiscalQuarter)) -> Option<f64>,
{
    let mut total = 0.0;
    for key in window {
        total += lookup(key)?;
    }
    Some(total)
}
