//! Pipeline orchestration.
//!
//! A pure batch transformation: raw observations in, five derived datasets
//! out, fully recomputed on every run. Entities share no mutable state, so
//! they are processed in parallel; within one entity the stages run in
//! strict sequence because each consumes the previous stage's output.
//!
//! Failure isolation is at (entity, metric, fiscal_year) granularity: a
//! unit whose snapshot turns out inconsistent is logged and skipped, the
//! rest of the build continues. Validation failures after assembly abort
//! the whole build.

use crate::calendar::CalendarResolver;
use crate::dedup::{dedup_versions, snapshot_latest};
use crate::error::Result;
use crate::panel::{PanelMode, build_panel};
use crate::policy::MaxAbsValue;
use crate::quarterly::{ytd_to_quarterly_snapshot, ytd_to_quarterly_versions};
use crate::shares::build_shares_series;
use crate::specs::MetricRegistry;
use crate::ttm::{add_ttm_pit, add_ttm_rolling};
use crate::types::{DedupedObservation, PriceBar, QuarterlyMetric, RawObservation, SharesRow};
use crate::validate::{ValidationReport, validate_build};
use chrono::NaiveDate;
use polars::prelude::*;
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Build configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Drop panel rows whose period end falls before this date.
    pub min_period_end: Option<NaiveDate>,
}

/// Everything one build produces.
#[derive(Debug)]
pub struct BuildOutput {
    /// Deduplicated facts, every filed version
    pub deduped: Vec<DedupedObservation>,
    /// Quarterly metrics, every filed version, PIT-correct TTM
    pub quarterly: Vec<QuarterlyMetric>,
    /// Shares series with split-normalized counts
    pub shares: Vec<SharesRow>,
    /// Latest panel, keyed by (entity_id, end)
    pub latest_panel: DataFrame,
    /// Backtest panel, keyed by (entity_id, end, filed)
    pub backtest_panel: DataFrame,
    /// Validation report (all checks passed, or the build would have
    /// errored)
    pub report: ValidationReport,
}

/// Run the full pipeline over the given inputs.
pub fn run_pipeline(
    observations: &[RawObservation],
    resolver: &CalendarResolver,
    prices: &[PriceBar],
    registry: &MetricRegistry,
    config: &PipelineConfig,
) -> Result<BuildOutput> {
    let mut by_entity: BTreeMap<&str, Vec<&RawObservation>> = BTreeMap::new();
    for obs in observations {
        by_entity.entry(obs.entity_id.as_str()).or_default().push(obs);
    }
    debug!(
        entities = by_entity.len(),
        observations = observations.len(),
        "starting build"
    );

    let entity_groups: Vec<(&str, Vec<&RawObservation>)> = by_entity.into_iter().collect();
    let entity_outputs: Vec<EntityOutput> = entity_groups
        .par_iter()
        .map(|(entity_id, group)| process_entity(entity_id, group, resolver, registry))
        .collect();

    let mut deduped = Vec::new();
    let mut quarterly_versions = Vec::new();
    let mut quarterly_latest = Vec::new();
    let mut shares = Vec::new();
    for output in entity_outputs {
        deduped.extend(output.deduped);
        quarterly_versions.extend(output.quarterly_versions);
        quarterly_latest.extend(output.quarterly_latest);
        shares.extend(output.shares);
    }

    let mut latest_panel = build_panel(&quarterly_latest, &shares, prices, registry, PanelMode::Latest)?;
    let mut backtest_panel =
        build_panel(&quarterly_versions, &shares, prices, registry, PanelMode::Backtest)?;

    if let Some(min) = config.min_period_end {
        latest_panel = filter_min_end(&latest_panel, min)?;
        backtest_panel = filter_min_end(&backtest_panel, min)?;
    }

    let report = validate_build(
        &deduped,
        &quarterly_versions,
        &shares,
        &latest_panel,
        &backtest_panel,
    )?
    .into_result()?;

    Ok(BuildOutput {
        deduped,
        quarterly: quarterly_versions,
        shares,
        latest_panel,
        backtest_panel,
        report,
    })
}

struct EntityOutput {
    deduped: Vec<DedupedObservation>,
    quarterly_versions: Vec<QuarterlyMetric>,
    quarterly_latest: Vec<QuarterlyMetric>,
    shares: Vec<SharesRow>,
}

/// Stages 2 through 5 for one entity, metrics in strict sequence.
fn process_entity(
    entity_id: &str,
    observations: &[&RawObservation],
    resolver: &CalendarResolver,
    registry: &MetricRegistry,
) -> EntityOutput {
    let calendar = resolver.resolve(entity_id);
    let mut output = EntityOutput {
        deduped: Vec::new(),
        quarterly_versions: Vec::new(),
        quarterly_latest: Vec::new(),
        shares: Vec::new(),
    };

    for spec in registry.iter() {
        let metric_obs: Vec<RawObservation> = observations
            .iter()
            .filter(|o| o.metric == spec.name)
            .map(|o| (*o).clone())
            .collect();
        if metric_obs.is_empty() {
            continue;
        }

        let versions = dedup_versions(&metric_obs, &calendar, spec);

        let mut version_rows = ytd_to_quarterly_versions(&versions, spec);
        if spec.wants_ttm() {
            add_ttm_pit(&mut version_rows);
        }

        let snapshot = snapshot_latest(&versions, &MaxAbsValue);
        match ytd_to_quarterly_snapshot(&snapshot, spec) {
            Ok(mut latest_rows) => {
                if spec.wants_ttm() {
                    add_ttm_rolling(&mut latest_rows);
                }
                output.quarterly_latest.extend(latest_rows);
            }
            Err(err) => {
                // Unit-level failure: skip this metric's latest series,
                // keep processing everything else.
                warn!(entity = entity_id, metric = %spec.name, %err, "skipping unit");
            }
        }

        if spec.is_share_count {
            output.shares.extend(build_shares_series(&version_rows));
        }

        output.deduped.extend(versions);
        output.quarterly_versions.extend(version_rows);
    }

    output
}

fn filter_min_end(panel: &DataFrame, min: NaiveDate) -> Result<DataFrame> {
    let filtered = panel
        .clone()
        .lazy()
        .filter(col("end").gt_eq(lit(min.to_string())))
        .collect()?;
    Ok(filtered)
}

/// Materialize the deduplicated facts as a DataFrame.
pub fn deduped_frame(rows: &[DedupedObservation]) -> Result<DataFrame> {
    Ok(df![
        "entity_id" => rows.iter().map(|r| r.entity_id.clone()).collect::<Vec<_>>(),
        "metric" => rows.iter().map(|r| r.metric.clone()).collect::<Vec<_>>(),
        "fiscal_year" => rows.iter().map(|r| r.fiscal_year).collect::<Vec<_>>(),
        "period" => rows.iter().map(|r| r.period.to_string()).collect::<Vec<_>>(),
        "end" => rows.iter().map(|r| r.period_end.to_string()).collect::<Vec<_>>(),
        "filed" => rows.iter().map(|r| r.filed_date.to_string()).collect::<Vec<_>>(),
        "value" => rows.iter().map(|r| r.value).collect::<Vec<_>>(),
        "tag" => rows.iter().map(|r| r.source_tag.clone()).collect::<Vec<_>>()
    ]?)
}

/// Materialize the quarterly metrics as a DataFrame.
pub fn quarterly_frame(rows: &[QuarterlyMetric]) -> Result<DataFrame> {
    Ok(df![
        "entity_id" => rows.iter().map(|r| r.entity_id.clone()).collect::<Vec<_>>(),
        "metric" => rows.iter().map(|r| r.metric.clone()).collect::<Vec<_>>(),
        "fiscal_year" => rows.iter().map(|r| r.fiscal_year).collect::<Vec<_>>(),
        "quarter" => rows.iter().map(|r| r.quarter.to_string()).collect::<Vec<_>>(),
        "end" => rows.iter().map(|r| r.period_end.to_string()).collect::<Vec<_>>(),
        "filed" => rows.iter().map(|r| r.filed_date.to_string()).collect::<Vec<_>>(),
        "q_val" => rows.iter().map(|r| r.discrete_value).collect::<Vec<_>>(),
        "ttm_val" => rows.iter().map(|r| r.ttm_value).collect::<Vec<_>>()
    ]?)
}

/// Materialize the shares series as a DataFrame.
pub fn shares_frame(rows: &[SharesRow]) -> Result<DataFrame> {
    Ok(df![
        "entity_id" => rows.iter().map(|r| r.entity_id.clone()).collect::<Vec<_>>(),
        "end" => rows.iter().map(|r| r.period_end.to_string()).collect::<Vec<_>>(),
        "filed" => rows.iter().map(|r| r.filed_date.to_string()).collect::<Vec<_>>(),
        "raw_shares" => rows.iter().map(|r| r.raw_shares).collect::<Vec<_>>(),
        "normalized_shares" => rows.iter().map(|r| r.normalized_shares).collect::<Vec<_>>()
    ]?)
}
