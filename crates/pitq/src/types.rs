//! Core domain types.
//!
//! Every filed version of an observation is modeled as a first-class
//! immutable fact. "Latest" and "as-of" views are queries over that set,
//! never in-place mutations, so a single storage model serves both the
//! current-valuation and the backtest use cases.

use crate::error::PitError;
use chrono::NaiveDate;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Fiscal period label as reported by the filer.
///
/// Quarterly filings carry `Q1`/`Q2`/`Q3`; the annual filing carries `FY`,
/// whose cumulative value covers the full fiscal year. The fourth discrete
/// quarter is derived from `FY` minus `Q3`; a raw `Q4` label is accepted but
/// never used for YTD differencing because filers are inconsistent about
/// whether it means the discrete quarter or the full year.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FiscalPeriod {
    /// First fiscal quarter
    Q1,
    /// Second fiscal quarter
    Q2,
    /// Third fiscal quarter
    Q3,
    /// Fourth fiscal quarter. Rare in raw filings but must be accepted:
    /// some filers label a fourth-quarter row directly instead of (or next
    /// to) the annual `FY` row.
    Q4,
    /// Full fiscal year (annual filing)
    FY,
}

impl FiscalPeriod {
    /// Whether this is a quarterly label (`Q1`/`Q2`/`Q3`/`Q4`).
    #[must_use]
    pub const fn is_quarterly(self) -> bool {
        !matches!(self, Self::FY)
    }

    /// The quarter this period's cumulative value ends on.
    #[must_use]
    pub const fn quarter(self) -> FiscalQuarter {
        match self {
            Self::Q1 => FiscalQuarter::Q1,
            Self::Q2 => FiscalQuarter::Q2,
            Self::Q3 => FiscalQuarter::Q3,
            Self::Q4 | Self::FY => FiscalQuarter::Q4,
        }
    }

    /// The period whose cumulative value must be subtracted to isolate this
    /// period's final quarter, if any.
    #[must_use]
    pub const fn predecessor(self) -> Option<Self> {
        match self {
            Self::Q1 => None,
            Self::Q2 => Some(Self::Q1),
            Self::Q3 => Some(Self::Q2),
            Self::Q4 | Self::FY => Some(Self::Q3),
        }
    }
}

impl FromStr for FiscalPeriod {
    type Err = PitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Q1" => Ok(Self::Q1),
            "Q2" => Ok(Self::Q2),
            "Q3" => Ok(Self::Q3),
            "Q4" => Ok(Self::Q4),
            "FY" => Ok(Self::FY),
            other => Err(PitError::InvalidPeriod(other.to_string())),
        }
    }
}

/// Discrete fiscal quarter.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FiscalQuarter {
    /// First quarter
    Q1,
    /// Second quarter
    Q2,
    /// Third quarter
    Q3,
    /// Fourth quarter
    Q4,
}

impl FiscalQuarter {
    const ALL: [Self; 4] = [Self::Q1, Self::Q2, Self::Q3, Self::Q4];

    /// Zero-based index within the fiscal year.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Q1 => 0,
            Self::Q2 => 1,
            Self::Q3 => 2,
            Self::Q4 => 3,
        }
    }

    /// The previous (fiscal_year, quarter) pair.
    #[must_use]
    pub const fn previous(self, fiscal_year: i32) -> (i32, Self) {
        match self {
            Self::Q1 => (fiscal_year - 1, Self::Q4),
            Self::Q2 => (fiscal_year, Self::Q1),
            Self::Q3 => (fiscal_year, Self::Q2),
            Self::Q4 => (fiscal_year, Self::Q3),
        }
    }

    /// The trailing four (fiscal_year, quarter) pairs ending at
    /// (`fiscal_year`, `self`), most recent first.
    #[must_use]
    pub fn trailing_window(self, fiscal_year: i32) -> [(i32, Self); 4] {
        let mut out = [(fiscal_year, self); 4];
        let start = self.index() as i32;
        for (i, slot) in out.iter_mut().enumerate() {
            let offset = start - i as i32;
            *slot = if offset >= 0 {
                (fiscal_year, Self::ALL[offset as usize])
            } else {
                (fiscal_year - 1, Self::ALL[(4 + offset) as usize])
            };
        }
        out
    }
}

/// A single raw observation as supplied by the ingestion collaborator.
///
/// Immutable and append-only. Multiple raw observations routinely share
/// (entity, metric, period_end) because of restatements, comparative-period
/// duplication, and multiple source tags mapping to one concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    /// Entity identifier (e.g. a zero-padded CIK)
    pub entity_id: String,
    /// Metric name from the registry (e.g. `CFO`)
    pub metric: String,
    /// Last day of the reported period
    pub period_end: NaiveDate,
    /// Date the observation became publicly known
    pub filed_date: NaiveDate,
    /// Filer-reported fiscal year label. Unreliable for grouping: a
    /// comparative-period row carries the label of the filing it appeared
    /// in, not of the period it describes.
    pub fiscal_year_raw: i32,
    /// Filer-reported fiscal period label
    pub fiscal_period: FiscalPeriod,
    /// Reported value
    pub value: f64,
    /// Source concept tag the value was extracted from
    pub source_tag: String,
    /// Form type of the filing (e.g. `10-Q`, `10-K`)
    pub form_type: String,
}

/// One deduplicated observation version.
///
/// Unique per (entity, metric, fiscal_year, period, filed_date). The fiscal
/// year is the canonical one derived from the period end and the entity's
/// fiscal calendar, never the filer-reported label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupedObservation {
    /// Entity identifier
    pub entity_id: String,
    /// Metric name
    pub metric: String,
    /// Canonical fiscal year
    pub fiscal_year: i32,
    /// Fiscal period label
    pub period: FiscalPeriod,
    /// Last day of the reported period
    pub period_end: NaiveDate,
    /// Date this version was filed
    pub filed_date: NaiveDate,
    /// Reported value (cumulative for YTD metrics)
    pub value: f64,
    /// Source concept tag that won tag-priority resolution
    pub source_tag: String,
}

/// A discrete quarterly value for one filed version of a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterlyMetric {
    /// Entity identifier
    pub entity_id: String,
    /// Metric name
    pub metric: String,
    /// Canonical fiscal year
    pub fiscal_year: i32,
    /// Discrete fiscal quarter
    pub quarter: FiscalQuarter,
    /// Last day of the reported period
    pub period_end: NaiveDate,
    /// Date this version was filed
    pub filed_date: NaiveDate,
    /// Non-cumulative value for the quarter. Null when the predecessor
    /// cumulative value needed for differencing was not yet filed, or when
    /// an absolute-convention metric produced a spurious negative quarter.
    pub discrete_value: Option<f64>,
    /// Trailing 4-quarter sum; null until four consecutive non-null
    /// quarters are available as of this version's filed date.
    pub ttm_value: Option<f64>,
}

/// One filed version of an entity's share count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharesRow {
    /// Entity identifier
    pub entity_id: String,
    /// Last day of the reported period
    pub period_end: NaiveDate,
    /// Date this version was filed
    pub filed_date: NaiveDate,
    /// Share count as reported in this version
    pub raw_shares: f64,
    /// Share count from the most recently filed version for this
    /// period_end, so historical rows match the split-adjusted convention
    /// of the price series.
    pub normalized_shares: f64,
}

/// A single daily closing price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Entity identifier or trading symbol
    pub entity_id: String,
    /// Trading date
    pub date: NaiveDate,
    /// Closing price
    pub close: f64,
}
