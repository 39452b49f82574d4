//! Panel building and as-of price joining.
//!
//! Pivots the quarterly metrics and the shares series into wide rows keyed
//! by the anchor metric's filing timeline, then joins a price observed on or
//! after each row's filed date. Two variants are produced from the same
//! machinery:
//!
//! - *latest*: one row per (entity, period_end), most recent filed version
//!   only. Raw share counts are fine here since the latest filing already
//!   matches the current split convention.
//! - *backtest*: one row per (entity, period_end, filed_date), every
//!   historically available version preserved, with split-normalized share
//!   counts.
//!
//! The price join is forward-looking nearest: the next available trading
//! price at or after the filing date, never a price before it even when
//! that one is closer in calendar distance. Rows with no eligible price
//! keep null price and market cap rather than being excluded.

use crate::error::{PitError, Result};
use crate::specs::MetricRegistry;
use crate::types::{PriceBar, QuarterlyMetric, SharesRow};
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeMap, HashMap};

/// Which panel variant to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelMode {
    /// One row per (entity, period_end), latest filed version only
    Latest,
    /// One row per (entity, period_end, filed_date)
    Backtest,
}

/// One wide panel row before materialization.
#[derive(Debug, Clone)]
pub struct PanelRow {
    /// Entity identifier
    pub entity_id: String,
    /// Period end date
    pub period_end: NaiveDate,
    /// Filed date of the anchor metric version this row is keyed on
    pub filed_date: NaiveDate,
    /// Metric column values, keyed by output column name
    pub values: BTreeMap<String, Option<f64>>,
    /// Share count (normalized in backtest mode, raw in latest mode)
    pub shares: Option<f64>,
    /// Close price at or after the filed date
    pub price: Option<f64>,
    /// shares * price, null when either is null
    pub market_cap: Option<f64>,
}

/// Build wide panel rows from quarterly metrics, shares and prices.
#[must_use]
pub fn build_panel_rows(
    quarterly: &[QuarterlyMetric],
    shares: &[SharesRow],
    prices: &[PriceBar],
    registry: &MetricRegistry,
    mode: PanelMode,
) -> Vec<PanelRow> {
    let Some(anchor) = registry.anchor() else {
        return Vec::new();
    };

    // (entity, metric) -> rows sorted by filed date
    let mut by_entity_metric: HashMap<(&str, &str), Vec<&QuarterlyMetric>> = HashMap::new();
    for row in quarterly {
        by_entity_metric
            .entry((row.entity_id.as_str(), row.metric.as_str()))
            .or_default()
            .push(row);
    }
    for rows in by_entity_metric.values_mut() {
        rows.sort_by_key(|r| r.filed_date);
    }

    let mut shares_by_entity: HashMap<&str, Vec<&SharesRow>> = HashMap::new();
    for row in shares {
        shares_by_entity
            .entry(row.entity_id.as_str())
            .or_default()
            .push(row);
    }
    for rows in shares_by_entity.values_mut() {
        rows.sort_by_key(|r| r.filed_date);
    }

    let price_index = PriceIndex::new(prices);

    let mut out = Vec::new();
    let mut anchor_groups: Vec<(&(&str, &str), &Vec<&QuarterlyMetric>)> = by_entity_metric
        .iter()
        .filter(|((_, metric), _)| *metric == anchor.name)
        .collect();
    anchor_groups.sort_by_key(|((entity, _), _)| *entity);

    for ((entity, _), anchor_rows) in anchor_groups {
        for anchor_row in anchor_rows {
            let mut values = BTreeMap::new();
            values.insert(column_name(&anchor.name, "q"), anchor_row.discrete_value);
            values.insert(column_name(&anchor.name, "ttm"), anchor_row.ttm_value);

            for spec in registry.iter() {
                if spec.name == anchor.name || spec.is_share_count {
                    continue;
                }
                let joined = by_entity_metric
                    .get(&(*entity, spec.name.as_str()))
                    .and_then(|rows| {
                        backward_asof(rows, anchor_row.period_end, anchor_row.filed_date)
                    });
                values.insert(
                    column_name(&spec.name, "q"),
                    joined.and_then(|r| r.discrete_value),
                );
                if spec.wants_ttm() {
                    values.insert(
                        column_name(&spec.name, "ttm"),
                        joined.and_then(|r| r.ttm_value),
                    );
                }
            }

            let shares = shares_by_entity.get(entity).and_then(|rows| {
                rows.iter()
                    .rev()
                    .find(|r| {
                        r.period_end == anchor_row.period_end
                            && r.filed_date <= anchor_row.filed_date
                    })
                    .map(|r| match mode {
                        PanelMode::Backtest => r.normalized_shares,
                        PanelMode::Latest => r.raw_shares,
                    })
            });

            out.push(PanelRow {
                entity_id: entity.to_string(),
                period_end: anchor_row.period_end,
                filed_date: anchor_row.filed_date,
                values,
                shares,
                price: None,
                market_cap: None,
            });
        }
    }

    // Rows without a complete TTM picture carry no analytical value.
    let required: Vec<String> = registry
        .iter()
        .filter(|s| s.wants_ttm())
        .map(|s| column_name(&s.name, "ttm"))
        .collect();
    out.retain(|row| {
        required
            .iter()
            .all(|col| row.values.get(col).copied().flatten().is_some())
    });

    if mode == PanelMode::Latest {
        let mut latest: BTreeMap<(String, NaiveDate), PanelRow> = BTreeMap::new();
        for row in out {
            let key = (row.entity_id.clone(), row.period_end);
            match latest.get(&key) {
                Some(existing) if existing.filed_date >= row.filed_date => {}
                _ => {
                    latest.insert(key, row);
                }
            }
        }
        out = latest.into_values().collect();
    }

    for row in &mut out {
        row.price = price_index.first_at_or_after(&row.entity_id, row.filed_date);
        row.market_cap = match (row.shares, row.price) {
            (Some(shares), Some(price)) => Some(shares * price),
            _ => None,
        };
    }

    out.sort_by(|a, b| {
        (&a.entity_id, a.period_end, a.filed_date).cmp(&(&b.entity_id, b.period_end, b.filed_date))
    });
    out
}

/// Materialize panel rows into a DataFrame with one column per metric.
pub fn rows_to_frame(rows: &[PanelRow], registry: &MetricRegistry) -> Result<DataFrame> {
    let mut metric_columns: Vec<String> = Vec::new();
    let anchor = registry
        .anchor()
        .ok_or_else(|| PitError::UnknownMetric(registry.anchor_name().to_string()))?;
    metric_columns.push(column_name(&anchor.name, "q"));
    metric_columns.push(column_name(&anchor.name, "ttm"));
    for spec in registry.iter() {
        if spec.name == anchor.name || spec.is_share_count {
            continue;
        }
        metric_columns.push(column_name(&spec.name, "q"));
        if spec.wants_ttm() {
            metric_columns.push(column_name(&spec.name, "ttm"));
        }
    }

    let mut columns: Vec<Column> = vec![
        Column::new(
            "entity_id".into(),
            rows.iter().map(|r| r.entity_id.clone()).collect::<Vec<_>>(),
        ),
        Column::new(
            "end".into(),
            rows.iter()
                .map(|r| r.period_end.to_string())
                .collect::<Vec<_>>(),
        ),
        Column::new(
            "filed".into(),
            rows.iter()
                .map(|r| r.filed_date.to_string())
                .collect::<Vec<_>>(),
        ),
    ];
    for name in &metric_columns {
        let values: Vec<Option<f64>> = rows
            .iter()
            .map(|r| r.values.get(name).copied().flatten())
            .collect();
        columns.push(Column::new(name.as_str().into(), values));
    }
    columns.push(Column::new(
        "shares".into(),
        rows.iter().map(|r| r.shares).collect::<Vec<_>>(),
    ));
    columns.push(Column::new(
        "price".into(),
        rows.iter().map(|r| r.price).collect::<Vec<_>>(),
    ));
    columns.push(Column::new(
        "market_cap".into(),
        rows.iter().map(|r| r.market_cap).collect::<Vec<_>>(),
    ));

    Ok(DataFrame::new(columns)?)
}

/// Build a panel DataFrame in one step.
pub fn build_panel(
    quarterly: &[QuarterlyMetric],
    shares: &[SharesRow],
    prices: &[PriceBar],
    registry: &MetricRegistry,
    mode: PanelMode,
) -> Result<DataFrame> {
    let rows = build_panel_rows(quarterly, shares, prices, registry, mode);
    rows_to_frame(&rows, registry)
}

fn column_name(metric: &str, suffix: &str) -> String {
    format!("{}_{suffix}", metric.to_lowercase())
}

/// Latest version of a metric for the same period end, filed on or before
/// the reference date. `rows` must be sorted by filed date.
fn backward_asof<'a>(
    rows: &[&'a QuarterlyMetric],
    period_end: NaiveDate,
    reference: NaiveDate,
) -> Option<&'a QuarterlyMetric> {
    rows.iter()
        .rev()
        .find(|r| r.period_end == period_end && r.filed_date <= reference)
        .copied()
}

/// Per-entity price series supporting forward as-of lookups.
#[derive(Debug)]
struct PriceIndex {
    by_entity: HashMap<String, Vec<(NaiveDate, f64)>>,
}

impl PriceIndex {
    fn new(prices: &[PriceBar]) -> Self {
        let mut by_entity: HashMap<String, Vec<(NaiveDate, f64)>> = HashMap::new();
        for bar in prices {
            by_entity
                .entry(bar.entity_id.clone())
                .or_default()
                .push((bar.date, bar.close));
        }
        for series in by_entity.values_mut() {
            series.sort_by_key(|(date, _)| *date);
        }
        Self { by_entity }
    }

    /// First close at or after `date`, or `None` when coverage ends first.
    fn first_at_or_after(&self, entity_id: &str, date: NaiveDate) -> Option<f64> {
        let series = self.by_entity.get(entity_id)?;
        let idx = series.partition_point(|(d, _)| *d < date);
        series.get(idx).map(|(_, close)| *close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FiscalQuarter;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn metric_row(
        entity: &str,
        metric: &str,
        quarter: FiscalQuarter,
        end: NaiveDate,
        filed: NaiveDate,
        q: f64,
        ttm: Option<f64>,
    ) -> QuarterlyMetric {
        QuarterlyMetric {
            entity_id: entity.to_string(),
            metric: metric.to_string(),
            fiscal_year: 2024,
            quarter,
            period_end: end,
            filed_date: filed,
            discrete_value: Some(q),
            ttm_value: ttm,
        }
    }

    fn shares_row(entity: &str, end: NaiveDate, filed: NaiveDate, count: f64) -> SharesRow {
        SharesRow {
            entity_id: entity.to_string(),
            period_end: end,
            filed_date: filed,
            raw_shares: count,
            normalized_shares: count * 2.0,
        }
    }

    fn base_inputs() -> (Vec<QuarterlyMetric>, Vec<SharesRow>, Vec<PriceBar>) {
        let end = date(2024, 3, 31);
        let filed = date(2024, 5, 1);
        let quarterly = vec![
            metric_row("E1", "CFO", FiscalQuarter::Q1, end, filed, 100.0, Some(400.0)),
            metric_row("E1", "CAPEX", FiscalQuarter::Q1, end, filed, 30.0, Some(120.0)),
        ];
        let shares = vec![shares_row("E1", end, filed, 1_000_000_000.0)];
        let prices = vec![
            PriceBar {
                entity_id: "E1".to_string(),
                date: date(2024, 4, 30),
                close: 90.0,
            },
            PriceBar {
                entity_id: "E1".to_string(),
                date: date(2024, 5, 4),
                close: 100.0,
            },
        ];
        (quarterly, shares, prices)
    }

    #[test]
    fn test_forward_price_join_skips_earlier_price() {
        // No trading price until 3 days after the filing: the join must pick
        // the later price even though the 4/30 close is nearer in days.
        let (quarterly, shares, prices) = base_inputs();
        let registry = MetricRegistry::with_defaults();
        let rows = build_panel_rows(&quarterly, &shares, &prices, &registry, PanelMode::Latest);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, Some(100.0));
        assert_eq!(rows[0].market_cap, Some(1_000_000_000.0 * 100.0));
    }

    #[test]
    fn test_missing_price_yields_null_not_exclusion() {
        let (quarterly, shares, _) = base_inputs();
        let registry = MetricRegistry::with_defaults();
        let rows = build_panel_rows(&quarterly, &shares, &[], &registry, PanelMode::Latest);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, None);
        assert_eq!(rows[0].market_cap, None);
    }

    #[test]
    fn test_backtest_uses_normalized_shares() {
        let (quarterly, shares, prices) = base_inputs();
        let registry = MetricRegistry::with_defaults();
        let latest = build_panel_rows(&quarterly, &shares, &prices, &registry, PanelMode::Latest);
        let backtest =
            build_panel_rows(&quarterly, &shares, &prices, &registry, PanelMode::Backtest);
        assert_eq!(latest[0].shares, Some(1_000_000_000.0));
        assert_eq!(backtest[0].shares, Some(2_000_000_000.0));
    }

    #[test]
    fn test_incomplete_ttm_rows_dropped() {
        let (mut quarterly, shares, prices) = base_inputs();
        quarterly[1].ttm_value = None; // capex TTM missing
        let registry = MetricRegistry::with_defaults();
        let rows = build_panel_rows(&quarterly, &shares, &prices, &registry, PanelMode::Latest);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_latest_mode_collapses_versions() {
        let end = date(2024, 3, 31);
        let quarterly = vec![
            metric_row("E1", "CFO", FiscalQuarter::Q1, end, date(2024, 5, 1), 100.0, Some(400.0)),
            metric_row("E1", "CFO", FiscalQuarter::Q1, end, date(2024, 8, 1), 110.0, Some(410.0)),
            metric_row("E1", "CAPEX", FiscalQuarter::Q1, end, date(2024, 5, 1), 30.0, Some(120.0)),
        ];
        let registry = MetricRegistry::with_defaults();
        let latest = build_panel_rows(&quarterly, &[], &[], &registry, PanelMode::Latest);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].filed_date, date(2024, 8, 1));
        assert_eq!(latest[0].values["cfo_q"], Some(110.0));

        let backtest = build_panel_rows(&quarterly, &[], &[], &registry, PanelMode::Backtest);
        assert_eq!(backtest.len(), 2);
    }

    #[test]
    fn test_non_anchor_join_is_backward_asof_on_filed() {
        let end = date(2024, 3, 31);
        let quarterly = vec![
            metric_row("E1", "CFO", FiscalQuarter::Q1, end, date(2024, 5, 1), 100.0, Some(400.0)),
            // capex restated after the CFO filing: the anchor row must not
            // see it
            metric_row("E1", "CAPEX", FiscalQuarter::Q1, end, date(2024, 4, 20), 30.0, Some(120.0)),
            metric_row("E1", "CAPEX", FiscalQuarter::Q1, end, date(2024, 6, 1), 35.0, Some(125.0)),
        ];
        let registry = MetricRegistry::with_defaults();
        let rows = build_panel_rows(&quarterly, &[], &[], &registry, PanelMode::Backtest);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values["capex_q"], Some(30.0));
        assert_eq!(rows[0].values["capex_ttm"], Some(120.0));
    }

    #[test]
    fn test_frame_materialization() {
        let (quarterly, shares, prices) = base_inputs();
        let registry = MetricRegistry::with_defaults();
        let frame = build_panel(&quarterly, &shares, &prices, &registry, PanelMode::Latest).unwrap();
        assert_eq!(frame.height(), 1);
        let names: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "entity_id",
                "end",
                "filed",
                "cfo_q",
                "cfo_ttm",
                "capex_q",
                "capex_ttm",
                "shares",
                "price",
                "market_cap"
            ]
        );
    }
}
