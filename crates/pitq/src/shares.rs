//! Share-count normalization.
//!
//! Prices are presented split-adjusted, but a share count filed before a
//! split reflects the pre-split convention. A market cap computed from the
//! two is wrong on one side of every split boundary. The fix is to rewrite
//! every historical version's share count to the value reported in the most
//! recently filed version for that period end, while leaving `filed_date`
//! untouched so PIT price joining is still governed by the original filing
//! timeline.
//!
//! Only the backtest panel needs this; the latest panel already uses only
//! the latest-filed version of everything.

use crate::types::{QuarterlyMetric, SharesRow};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Build the shares series from the share-count metric's quarterly versions.
///
/// One output row per filed version, carrying both the raw count from that
/// version and the normalized count from the latest filed version for the
/// same period end. Versions with a null share count are skipped.
#[must_use]
pub fn build_shares_series(share_versions: &[QuarterlyMetric]) -> Vec<SharesRow> {
    // (entity, period_end) -> latest-filed raw count
    let mut latest: BTreeMap<(&str, NaiveDate), (NaiveDate, f64)> = BTreeMap::new();
    for row in share_versions {
        let Some(raw) = row.discrete_value else {
            continue;
        };
        let key = (row.entity_id.as_str(), row.period_end);
        match latest.get(&key) {
            Some((filed, _)) if *filed >= row.filed_date => {}
            _ => {
                latest.insert(key, (row.filed_date, raw));
            }
        }
    }

    let mut out: Vec<SharesRow> = share_versions
        .iter()
        .filter_map(|row| {
            let raw = row.discrete_value?;
            let (_, normalized) = latest[&(row.entity_id.as_str(), row.period_end)];
            Some(SharesRow {
                entity_id: row.entity_id.clone(),
                period_end: row.period_end,
                filed_date: row.filed_date,
                raw_shares: raw,
                normalized_shares: normalized,
            })
        })
        .collect();
    out.sort_by(|a, b| {
        (&a.entity_id, a.period_end, a.filed_date).cmp(&(&b.entity_id, b.period_end, b.filed_date))
    });
    out.dedup_by(|a, b| {
        a.entity_id == b.entity_id && a.period_end == b.period_end && a.filed_date == b.filed_date
    });
    out
}
