//! Post-build validation.
//!
//! Runs every invariant check over the derived datasets and collects the
//! results into a report that enumerates each check with counts and example
//! offending rows. A failed check is fatal for the build: duplicate primary
//! keys or a filing that predates its period indicate a pipeline bug, not a
//! data-coverage gap.

use crate::error::{PitError, Result};
use crate::types::{DedupedObservation, QuarterlyMetric, SharesRow};
use polars::prelude::*;
use std::collections::HashSet;
use std::fmt;

/// Maximum offending rows quoted per failed check.
const SAMPLE_LIMIT: usize = 3;

/// Result of a single validation check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether the check passed
    pub ok: bool,
    /// Counts and example offending rows
    pub details: String,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.ok { "ok" } else { "FAIL" };
        write!(f, "[{status}] {}: {}", self.name, self.details)
    }
}

/// Collected results of a validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    checks: Vec<CheckResult>,
}

impl ValidationReport {
    /// Add a check result.
    pub fn push(&mut self, name: impl Into<String>, ok: bool, details: impl Into<String>) {
        self.checks.push(CheckResult {
            name: name.into(),
            ok,
            details: details.into(),
        });
    }

    /// All check results.
    #[must_use]
    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    /// Whether every check passed.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    /// Convert into a build result: `Ok` when all checks passed, a
    /// [`PitError::Validation`] carrying the full report otherwise.
    pub fn into_result(self) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(PitError::Validation(self.to_string()))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            writeln!(f, "{check}")?;
        }
        let failed = self.checks.iter().filter(|c| !c.ok).count();
        write!(f, "{} checks, {} failed", self.checks.len(), failed)
    }
}

/// Validate every derived dataset of one build.
pub fn validate_build(
    deduped: &[DedupedObservation],
    quarterly: &[QuarterlyMetric],
    shares: &[SharesRow],
    latest_panel: &DataFrame,
    backtest_panel: &DataFrame,
) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    check_unique(
        &mut report,
        "deduped_facts_pk_unique",
        deduped.iter().map(|r| {
            format!(
                "{}|{}|{}|{}|{}",
                r.entity_id, r.metric, r.fiscal_year, r.period, r.filed_date
            )
        }),
    );
    check_unique(
        &mut report,
        "quarterly_metrics_pk_unique",
        quarterly.iter().map(|r| {
            format!(
                "{}|{}|{}|{}|{}",
                r.entity_id, r.metric, r.fiscal_year, r.quarter, r.filed_date
            )
        }),
    );

    check_filed_after_period(
        &mut report,
        "deduped_facts_filed_after_period",
        deduped
            .iter()
            .map(|r| (r.filed_date, r.period_end, format!("{}|{}", r.entity_id, r.metric))),
    );
    check_filed_after_period(
        &mut report,
        "quarterly_metrics_filed_after_period",
        quarterly
            .iter()
            .map(|r| (r.filed_date, r.period_end, format!("{}|{}", r.entity_id, r.metric))),
    );
    check_filed_after_period(
        &mut report,
        "shares_series_filed_after_period",
        shares
            .iter()
            .map(|r| (r.filed_date, r.period_end, r.entity_id.clone())),
    );

    check_frame_key(
        &mut report,
        "latest_panel_pk_unique",
        latest_panel,
        &["entity_id", "end"],
    )?;
    check_frame_key(
        &mut report,
        "backtest_panel_pk_unique",
        backtest_panel,
        &["entity_id", "end", "filed"],
    )?;

    check_frame_filed_after_period(&mut report, "latest_panel_filed_after_period", latest_panel)?;
    check_frame_filed_after_period(
        &mut report,
        "backtest_panel_filed_after_period",
        backtest_panel,
    )?;

    Ok(report)
}

fn check_unique(report: &mut ValidationReport, name: &str, keys: impl Iterator<Item = String>) {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    let mut total = 0usize;
    for key in keys {
        total += 1;
        if !seen.insert(key.clone()) {
            duplicates.push(key);
        }
    }
    if duplicates.is_empty() {
        report.push(name, true, format!("{total} rows, no duplicate keys"));
    } else {
        let sample = duplicates
            .iter()
            .take(SAMPLE_LIMIT)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        report.push(
            name,
            false,
            format!("{} duplicate keys, e.g. {sample}", duplicates.len()),
        );
    }
}

fn check_filed_after_period(
    report: &mut ValidationReport,
    name: &str,
    rows: impl Iterator<Item = (chrono::NaiveDate, chrono::NaiveDate, String)>,
) {
    let mut offenders = Vec::new();
    let mut total = 0usize;
    for (filed, end, key) in rows {
        total += 1;
        if filed < end {
            offenders.push(format!("{key} filed={filed} end={end}"));
        }
    }
    if offenders.is_empty() {
        report.push(name, true, format!("{total} rows, filed >= period_end"));
    } else {
        let sample = offenders
            .iter()
            .take(SAMPLE_LIMIT)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        report.push(
            name,
            false,
            format!("{} rows filed before period_end, e.g. {sample}", offenders.len()),
        );
    }
}

/// Duplicate-key check over a materialized panel frame.
fn check_frame_key(
    report: &mut ValidationReport,
    name: &str,
    frame: &DataFrame,
    keys: &[&str],
) -> Result<()> {
    let exprs: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
    let duplicates = frame
        .clone()
        .lazy()
        .group_by(exprs)
        .agg([len().alias("n")])
        .filter(col("n").gt(lit(1u32)))
        .collect()?;

    if duplicates.height() == 0 {
        report.push(name, true, format!("{} rows, no duplicate keys", frame.height()));
        return Ok(());
    }

    let mut samples = Vec::new();
    for i in 0..duplicates.height().min(SAMPLE_LIMIT) {
        let mut parts = Vec::new();
        for key in keys {
            if let Some(value) = duplicates.column(key)?.str()?.get(i) {
                parts.push(format!("{key}={value}"));
            }
        }
        samples.push(parts.join(" "));
    }
    report.push(
        name,
        false,
        format!("{} duplicate keys, e.g. {}", duplicates.height(), samples.join(", ")),
    );
    Ok(())
}

/// `filed >= end` over a panel frame. Dates are ISO strings, so
/// lexicographic comparison is chronological.
fn check_frame_filed_after_period(
    report: &mut ValidationReport,
    name: &str,
    frame: &DataFrame,
) -> Result<()> {
    let end = frame.column("end")?.str()?;
    let filed = frame.column("filed")?.str()?;
    let entity = frame.column("entity_id")?.str()?;

    let mut offenders = Vec::new();
    for i in 0..frame.height() {
        if let (Some(e), Some(f)) = (end.get(i), filed.get(i)) {
            if f < e {
                let id = entity.get(i).unwrap_or("?");
                offenders.push(format!("{id} filed={f} end={e}"));
            }
        }
    }
    if offenders.is_empty() {
        report.push(name, true, format!("{} rows, filed >= period_end", frame.height()));
    } else {
        let sample = offenders
            .iter()
            .take(SAMPLE_LIMIT)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        report.push(
            name,
            false,
            format!("{} rows filed before period_end, e.g. {sample}", offenders.len()),
        );
    }
    Ok(())
}
