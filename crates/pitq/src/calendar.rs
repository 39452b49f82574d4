//! Fiscal calendar resolution.
//!
//! Maps an entity to its fiscal-year-end month/day and derives the canonical
//! fiscal year of a period from its end date. The canonical year is the only
//! fiscal-year value used for grouping downstream; the filer-reported label
//! is ignored because comparative-period rows carry the label of the filing
//! they appeared in, not of the period they describe.
//!
//! A single fixed fiscal-year-end is assumed per entity for all history.
//! Entities that changed fiscal year end mid-history will have misclassified
//! years for periods before the change; resolving that needs effective-dated
//! calendars, which this module does not model.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fiscal-year-end as a (month, day) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalCalendar {
    /// Month of the fiscal-year-end (1-12)
    pub month: u32,
    /// Day of the fiscal-year-end (1-31)
    pub day: u32,
}

impl FiscalCalendar {
    /// Calendar year end (December 31).
    pub const CALENDAR_YEAR: Self = Self { month: 12, day: 31 };

    /// Canonical fiscal year of a period ending on `period_end`: the end
    /// date's year when its month-day falls on or before the fiscal-year-end
    /// month-day, otherwise the following year.
    #[must_use]
    pub fn fiscal_year_of(&self, period_end: NaiveDate) -> i32 {
        let end_mmdd = (period_end.month(), period_end.day());
        if end_mmdd <= (self.month, self.day) {
            period_end.year()
        } else {
            period_end.year() + 1
        }
    }
}

impl Default for FiscalCalendar {
    fn default() -> Self {
        Self::CALENDAR_YEAR
    }
}

/// Per-entity fiscal calendar lookup.
///
/// Unknown entities resolve to the calendar year end; that is the only
/// failure mode.
#[derive(Debug, Clone, Default)]
pub struct CalendarResolver {
    calendars: HashMap<String, FiscalCalendar>,
}

impl CalendarResolver {
    /// Empty resolver: every entity resolves to calendar year end.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a resolver from an entity → calendar map.
    #[must_use]
    pub fn from_map(calendars: HashMap<String, FiscalCalendar>) -> Self {
        Self { calendars }
    }

    /// Set the fiscal calendar for one entity.
    pub fn insert(&mut self, entity_id: impl Into<String>, calendar: FiscalCalendar) {
        self.calendars.insert(entity_id.into(), calendar);
    }

    /// Resolve an entity's fiscal calendar, defaulting to calendar year end.
    #[must_use]
    pub fn resolve(&self, entity_id: &str) -> FiscalCalendar {
        self.calendars
            .get(entity_id)
            .copied()
            .unwrap_or(FiscalCalendar::CALENDAR_YEAR)
    }
}
