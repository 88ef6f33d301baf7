//! Rollup hierarchy: time-bucket granularities, source compatibility, and
//! ancestor selection.
//!
//! Time-bucketed rollups over the same base table form a hierarchy ordered
//! by granularity. A coarser rollup can be populated from any finer sibling
//! whose buckets nest into its own and which carries every grouping column
//! and measure it needs. [`RollupSelector`] picks the coarsest such sibling;
//! what "compatible" means is supplied by a [`SourceCompatibility`] predicate.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::AggregateTableDescriptor;
use crate::error::RollupError;

// ── Granularity ────────────────────────────────────────────────────────────

const SECS_PER_DAY: u64 = 86_400;

/// Unit of a time bucket. Month and year are calendar units; their widths
/// are nominal (30 and 365 days) and only used for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Second => "sec",
            TimeUnit::Minute => "min",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
            TimeUnit::Year => "year",
        }
    }

    /// Parse a unit word, accepting short forms and plurals.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        let s = match s.as_str() {
            // "s" alone is seconds, not a plural marker
            "s" => return Some(TimeUnit::Second),
            other => other.strip_suffix('s').unwrap_or(other),
        };
        match s {
            "sec" | "second" => Some(TimeUnit::Second),
            "m" | "min" | "minute" => Some(TimeUnit::Minute),
            "h" | "hr" | "hour" => Some(TimeUnit::Hour),
            "d" | "day" => Some(TimeUnit::Day),
            "w" | "week" => Some(TimeUnit::Week),
            "mon" | "month" => Some(TimeUnit::Month),
            "y" | "year" => Some(TimeUnit::Year),
            _ => None,
        }
    }

    /// Nominal width in seconds.
    pub fn secs(&self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3_600,
            TimeUnit::Day => SECS_PER_DAY,
            TimeUnit::Week => 7 * SECS_PER_DAY,
            TimeUnit::Month => 30 * SECS_PER_DAY,
            TimeUnit::Year => 365 * SECS_PER_DAY,
        }
    }

    pub fn is_calendar(&self) -> bool {
        matches!(self, TimeUnit::Month | TimeUnit::Year)
    }

    fn months(&self) -> Option<u64> {
        match self {
            TimeUnit::Month => Some(1),
            TimeUnit::Year => Some(12),
            _ => None,
        }
    }
}

/// Width of a time bucket, e.g. `5min` or `1hour`.
///
/// Serialized as its canonical label. The amount is always positive; the
/// only constructors are [`Granularity::new`] and [`Granularity::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Granularity {
    amount: u32,
    unit: TimeUnit,
}

impl Granularity {
    pub fn new(amount: u32, unit: TimeUnit) -> Result<Self, RollupError> {
        if amount == 0 {
            return Err(RollupError::InvalidArgument(
                "granularity amount must be positive".into(),
            ));
        }
        Ok(Self { amount, unit })
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Parse `<n><unit>` (`5m`, `15 min`, `1hour`, `2days`). A bare unit
    /// (`hour`) means one of it.
    pub fn parse(s: &str) -> Result<Self, RollupError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RollupError::InvalidArgument(
                "granularity cannot be empty".into(),
            ));
        }

        let mut num_buf = String::new();
        let mut unit_buf = String::new();
        for ch in s.chars() {
            if ch.is_ascii_digit() {
                if !unit_buf.is_empty() {
                    return Err(RollupError::InvalidArgument(format!(
                        "compound granularity '{s}' is not supported. \
                         Use a single unit, e.g. '90min' instead of '1h30m'"
                    )));
                }
                num_buf.push(ch);
            } else if !ch.is_whitespace() {
                unit_buf.push(ch);
            }
        }

        if unit_buf.is_empty() {
            return Err(RollupError::InvalidArgument(format!(
                "granularity '{s}' has no unit. \
                 Use sec, min, hour, day, week, month or year. Example: '5min', '1hour'"
            )));
        }
        let unit = TimeUnit::from_str(&unit_buf).ok_or_else(|| {
            RollupError::InvalidArgument(format!(
                "invalid granularity unit '{unit_buf}' in '{s}'. \
                 Use sec, min, hour, day, week, month or year"
            ))
        })?;

        let amount = if num_buf.is_empty() {
            1
        } else {
            num_buf.parse::<u32>().map_err(|_| {
                RollupError::InvalidArgument(format!(
                    "invalid number '{num_buf}' in granularity '{s}'"
                ))
            })?
        };
        Self::new(amount, unit)
    }

    /// Canonical label: amount followed by the unit name, e.g. `5min`.
    pub fn label(&self) -> String {
        format!("{}{}", self.amount, self.unit.as_str())
    }

    /// Nominal bucket width in seconds.
    pub fn width_secs(&self) -> u64 {
        u64::from(self.amount) * self.unit.secs()
    }

    fn months(&self) -> Option<u64> {
        self.unit.months().map(|m| m * u64::from(self.amount))
    }

    /// Whether every bucket of `coarse` is an exact union of buckets of
    /// `self`.
    ///
    /// Fixed-width buckets nest when the widths divide. A calendar bucket
    /// accepts calendar buckets dividing it in months, or fixed buckets that
    /// divide one day.
    pub fn nests_in(&self, coarse: &Granularity) -> bool {
        match (self.months(), coarse.months()) {
            (Some(fine), Some(coarse)) => coarse % fine == 0,
            (None, Some(_)) => SECS_PER_DAY % self.width_secs() == 0,
            (Some(_), None) => false,
            (None, None) => coarse.width_secs() % self.width_secs() == 0,
        }
    }
}

impl Ord for Granularity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.width_secs()
            .cmp(&other.width_secs())
            .then(self.unit.cmp(&other.unit))
            .then(self.amount.cmp(&other.amount))
    }
}

impl PartialOrd for Granularity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.as_str())
    }
}

impl TryFrom<String> for Granularity {
    type Error = RollupError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Granularity::parse(&value)
    }
}

impl From<Granularity> for String {
    fn from(value: Granularity) -> Self {
        value.label()
    }
}

// ── Source compatibility ───────────────────────────────────────────────────

/// Decides whether `sibling` can serve as the data source for `candidate`.
pub trait SourceCompatibility {
    fn can_source(
        &self,
        sibling: &AggregateTableDescriptor,
        candidate: &AggregateTableDescriptor,
    ) -> bool;
}

impl<F> SourceCompatibility for F
where
    F: Fn(&AggregateTableDescriptor, &AggregateTableDescriptor) -> bool,
{
    fn can_source(
        &self,
        sibling: &AggregateTableDescriptor,
        candidate: &AggregateTableDescriptor,
    ) -> bool {
        self(sibling, candidate)
    }
}

/// Default predicate for time-bucketed hierarchies.
///
/// A sibling qualifies when it is a different table bucketing the same
/// source column at a granularity that nests into the candidate's, groups by
/// exactly the same other columns, and carries every `(column, aggregate)`
/// measure the candidate needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeSeriesCompatibility;

impl SourceCompatibility for TimeSeriesCompatibility {
    fn can_source(
        &self,
        sibling: &AggregateTableDescriptor,
        candidate: &AggregateTableDescriptor,
    ) -> bool {
        if sibling.has_name(&candidate.name) {
            return false;
        }
        let (Some(fine), Some(coarse)) = (sibling.granularity, candidate.granularity) else {
            return false;
        };
        let same_time_source = match (sibling.time_column(), candidate.time_column()) {
            (Some(s), Some(c)) => match (s.source_column(), c.source_column()) {
                (Some(s), Some(c)) => s.eq_ignore_ascii_case(c),
                _ => false,
            },
            _ => false,
        };
        if !same_time_source || fine > coarse || !fine.nests_in(&coarse) {
            return false;
        }
        if sibling.dimension_sources() != candidate.dimension_sources() {
            return false;
        }
        candidate
            .measure_sources()
            .is_subset(&sibling.measure_sources())
    }
}

// ── Selection ──────────────────────────────────────────────────────────────

/// Selects the coarsest sibling rollup usable as a source for a candidate.
#[derive(Debug, Clone, Default)]
pub struct RollupSelector<P = TimeSeriesCompatibility> {
    predicate: P,
}

impl RollupSelector<TimeSeriesCompatibility> {
    /// Selector using [`TimeSeriesCompatibility`].
    pub fn time_series() -> Self {
        Self::new(TimeSeriesCompatibility)
    }
}

impl<P: SourceCompatibility> RollupSelector<P> {
    pub fn new(predicate: P) -> Self {
        Self { predicate }
    }

    /// `siblings` must be ordered finest to coarsest. Returns the last
    /// sibling accepted by the predicate.
    pub fn select<'a>(
        &self,
        siblings: &'a [AggregateTableDescriptor],
        candidate: &AggregateTableDescriptor,
    ) -> Option<&'a AggregateTableDescriptor> {
        siblings
            .iter()
            .filter(|s| self.predicate.can_source(s, candidate))
            .last()
    }
}

/// Shorthand for [`RollupSelector::select`] with an ad-hoc predicate.
pub fn select_ancestor<'a, P: SourceCompatibility>(
    siblings: &'a [AggregateTableDescriptor],
    candidate: &AggregateTableDescriptor,
    predicate: &P,
) -> Option<&'a AggregateTableDescriptor> {
    siblings
        .iter()
        .filter(|s| predicate.can_source(s, candidate))
        .last()
}

/// Time-bucketed descriptors finest first, then the rest in their given
/// order.
pub fn order_by_granularity(children: &[AggregateTableDescriptor]) -> Vec<AggregateTableDescriptor> {
    let mut ordered = children.to_vec();
    ordered.sort_by_key(|d| (d.granularity.is_none(), d.granularity));
    ordered
}
