//! Time windows: preset helpers, custom ranges and drill-down reconciliation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// `{start, end}` window. A missing bound is open on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(Some(start), Some(end))
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Whether this window covers all of `other`. Open bounds reach infinitely
    /// far on their side.
    pub fn contains(&self, other: &TimeRange) -> bool {
        let start_ok = match (self.start, other.start) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => mine <= theirs,
        };
        let end_ok = match (self.end, other.end) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => mine >= theirs,
        };
        start_ok && end_ok
    }

    /// Swap the bounds if they are inverted.
    pub fn normalized(self) -> Self {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start > end => Self::between(end, start),
            _ => self,
        }
    }
}

/// Merge a range requested by a chart or drill-down interaction into the
/// active one.
///
/// A request that covers the current window wins unchanged. A one-sided
/// request against a fully bounded window keeps the other bound of the
/// current window, swapping if that would invert the range. Anything else is
/// taken as requested, with open bounds filled from the current window.
pub fn reconcile(current: &TimeRange, requested: &TimeRange) -> TimeRange {
    if requested.contains(current) {
        return *requested;
    }
    match (requested.start, requested.end) {
        (Some(_), Some(_)) => requested.normalized(),
        (start, end) => TimeRange::new(start.or(current.start), end.or(current.end)).normalized(),
    }
}

/// Named preset windows ending at "now".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HelperRange {
    #[default]
    #[serde(rename = "Last hour")]
    LastHour,
    #[serde(rename = "Last 3 hours")]
    Last3Hours,
    #[serde(rename = "Last 24 hours")]
    Last24Hours,
    #[serde(rename = "Last 3 days")]
    Last3Days,
    #[serde(rename = "Last 7 days")]
    Last7Days,
}

impl HelperRange {
    pub const ALL: [HelperRange; 5] = [
        HelperRange::LastHour,
        HelperRange::Last3Hours,
        HelperRange::Last24Hours,
        HelperRange::Last3Days,
        HelperRange::Last7Days,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            HelperRange::LastHour => "Last hour",
            HelperRange::Last3Hours => "Last 3 hours",
            HelperRange::Last24Hours => "Last 24 hours",
            HelperRange::Last3Days => "Last 3 days",
            HelperRange::Last7Days => "Last 7 days",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            HelperRange::LastHour => Duration::hours(1),
            HelperRange::Last3Hours => Duration::hours(3),
            HelperRange::Last24Hours => Duration::hours(24),
            HelperRange::Last3Days => Duration::days(3),
            HelperRange::Last7Days => Duration::days(7),
        }
    }

    /// Window as of `now`. The end stays open so newer rows remain in range.
    pub fn resolve(&self, now: DateTime<Utc>) -> TimeRange {
        TimeRange::new(Some(now - self.duration()), None)
    }
}

impl fmt::Display for HelperRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown time helper '{0}'")]
pub struct UnknownHelper(pub String);

impl FromStr for HelperRange {
    type Err = UnknownHelper;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        HelperRange::ALL
            .into_iter()
            .find(|helper| helper.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownHelper(wanted.to_string()))
    }
}

/// The active time selection: a helper or a custom range, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRangeSelection {
    helper: Option<HelperRange>,
    custom: TimeRange,
}

impl Default for TimeRangeSelection {
    fn default() -> Self {
        Self::helper(HelperRange::default())
    }
}

impl TimeRangeSelection {
    pub fn helper(helper: HelperRange) -> Self {
        Self {
            helper: Some(helper),
            custom: TimeRange::unbounded(),
        }
    }

    pub fn custom(range: TimeRange) -> Self {
        Self {
            helper: None,
            custom: range.normalized(),
        }
    }

    pub fn active_helper(&self) -> Option<HelperRange> {
        self.helper
    }

    pub fn custom_range(&self) -> TimeRange {
        self.custom
    }

    /// Selecting a helper clears the custom bounds.
    pub fn select_helper(&mut self, helper: HelperRange) {
        *self = Self::helper(helper);
    }

    /// Entering a custom range clears the helper.
    pub fn set_custom(&mut self, range: TimeRange) {
        *self = Self::custom(range);
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> TimeRange {
        match self.helper {
            Some(helper) => helper.resolve(now),
            None => self.custom,
        }
    }

    /// Apply a requested range from a drill-down. The result becomes the
    /// custom range.
    pub fn drill_down(&mut self, requested: &TimeRange, now: DateTime<Utc>) -> TimeRange {
        let merged = reconcile(&self.resolve(now), requested);
        tracing::debug!(
            start = ?merged.start,
            end = ?merged.end,
            "Drill-down applied to time range"
        );
        self.set_custom(merged);
        merged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timestamp '{0}' (expected RFC 3339 or YYYY-MM-DD)")]
pub struct InvalidTimestamp(pub String);

/// Parse an RFC 3339 timestamp or a bare date (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, InvalidTimestamp> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| InvalidTimestamp(raw.to_string()))
}
