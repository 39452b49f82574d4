//! Metric taxonomy registry.
//!
//! Every stage of the pipeline is driven off a [`MetricSpec`]: whether the
//! metric is filed cumulatively (YTD), whether it follows the absolute-value
//! convention, whether it is a share count, and which source tags map to the
//! concept in priority order.

use std::collections::BTreeMap;

/// Share counts below this are assumed to be reported in millions.
const SHARES_UNIT_THRESHOLD: f64 = 1_000_000.0;

/// Specification for a single metric in the taxonomy.
#[derive(Debug, Clone)]
pub struct MetricSpec {
    /// Metric name (unique, uppercase by convention)
    pub name: String,
    /// Whether filed values are cumulative from fiscal-year start
    pub is_ytd: bool,
    /// Whether the metric follows the absolute-value convention: filers
    /// report it with inconsistent sign (e.g. capital expenditure), so YTD
    /// inputs are coerced to non-negative before differencing.
    pub absolute_convention: bool,
    /// Whether the metric is a share count (unit-normalized, no TTM,
    /// feeds the share normalizer)
    pub is_share_count: bool,
    /// Source tags mapping to this concept, highest priority first. When
    /// one filed date carries several tags for the same period, the
    /// highest-priority tag wins.
    pub source_tags: Vec<String>,
}

impl MetricSpec {
    /// Priority rank of a source tag; unknown tags sort last.
    #[must_use]
    pub fn tag_priority(&self, tag: &str) -> usize {
        self.source_tags
            .iter()
            .position(|t| t == tag)
            .unwrap_or(usize::MAX)
    }

    /// Whether a trailing 4-quarter sum is meaningful for this metric.
    /// Share counts are stocks, not flows, so summing them is nonsense.
    #[must_use]
    pub const fn wants_ttm(&self) -> bool {
        !self.is_share_count
    }

    /// Unit normalization applied before any other stage. Share counts
    /// below one million are assumed to be reported in millions and scaled
    /// to an actual count; other metrics pass through.
    #[must_use]
    pub fn normalize_units(&self, value: f64) -> f64 {
        if self.is_share_count && value.is_finite() && value.abs() < SHARES_UNIT_THRESHOLD {
            value * SHARES_UNIT_THRESHOLD
        } else {
            value
        }
    }
}

/// Registry of metric specifications.
///
/// The anchor metric's filing timeline is the reference point for the wide
/// panels: every other metric is joined backward as-of against its filed
/// dates.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    specs: BTreeMap<String, MetricSpec>,
    anchor: String,
}

impl MetricRegistry {
    /// Create an empty registry with the given anchor metric name.
    #[must_use]
    pub fn new(anchor: impl Into<String>) -> Self {
        Self {
            specs: BTreeMap::new(),
            anchor: anchor.into(),
        }
    }

    /// Registry with the standard taxonomy: operating cash flow (anchor),
    /// capital expenditure, and diluted share count.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new("CFO");

        registry.register(MetricSpec {
            name: "CFO".to_string(),
            is_ytd: true,
            absolute_convention: false,
            is_share_count: false,
            source_tags: vec![
                "NetCashProvidedByUsedInOperatingActivities".to_string(),
                "NetCashProvidedByUsedInOperatingActivitiesContinuingOperations".to_string(),
            ],
        });

        registry.register(MetricSpec {
            name: "CAPEX".to_string(),
            is_ytd: true,
            absolute_convention: true,
            is_share_count: false,
            source_tags: vec![
                "PaymentsToAcquirePropertyPlantAndEquipment".to_string(),
                "CapitalExpenditures".to_string(),
            ],
        });

        registry.register(MetricSpec {
            name: "SHARES".to_string(),
            is_ytd: false,
            absolute_convention: false,
            is_share_count: true,
            source_tags: vec![
                "WeightedAverageNumberOfDilutedSharesOutstanding".to_string(),
                "WeightedAverageNumberOfSharesOutstandingDiluted".to_string(),
                "CommonStockSharesOutstanding".to_string(),
                "WeightedAverageNumberOfSharesOutstandingBasic".to_string(),
            ],
        });

        registry
    }

    /// Register a metric spec, replacing any existing spec with that name.
    pub fn register(&mut self, spec: MetricSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    /// Get a spec by metric name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MetricSpec> {
        self.specs.get(name)
    }

    /// The anchor metric's spec, if it has been registered.
    #[must_use]
    pub fn anchor(&self) -> Option<&MetricSpec> {
        self.specs.get(&self.anchor)
    }

    /// Name of the configured anchor metric.
    #[must_use]
    pub fn anchor_name(&self) -> &str {
        &self.anchor
    }

    /// Iterate specs in metric-name order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricSpec> {
        self.specs.values()
    }

    /// Number of registered metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = MetricRegistry::with_defaults();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.anchor().unwrap().name, "CFO");
        assert!(registry.get("CAPEX").unwrap().absolute_convention);
        assert!(registry.get("SHARES").unwrap().is_share_count);
        assert!(!registry.get("SHARES").unwrap().wants_ttm());
    }

    #[test]
    fn test_tag_priority_order() {
        let registry = MetricRegistry::with_defaults();
        let capex = registry.get("CAPEX").unwrap();
        assert_eq!(
            capex.tag_priority("PaymentsToAcquirePropertyPlantAndEquipment"),
            0
        );
        assert_eq!(capex.tag_priority("CapitalExpenditures"), 1);
        assert_eq!(capex.tag_priority("SomethingElse"), usize::MAX);
    }

    #[test]
    fn test_shares_unit_heuristic() {
        let registry = MetricRegistry::with_defaults();
        let shares = registry.get("SHARES").unwrap();
        // 2,700 "millions" becomes 2.7B actual shares
        assert_eq!(shares.normalize_units(2_700.0), 2_700_000_000.0);
        assert_eq!(shares.normalize_units(2_700_000_000.0), 2_700_000_000.0);

        let cfo = registry.get("CFO").unwrap();
        assert_eq!(cfo.normalize_units(2_700.0), 2_700.0);
    }
}
