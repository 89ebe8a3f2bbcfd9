//! Time sharding
//!
//! Rows land in one table per calendar bucket: `orders_2024`, `orders_202403`,
//! `orders_20240315`, `orders_2024031510`, `orders_202403151042`.
//!
//! Shard keys arrive in many encodings (instants, dates, epoch seconds,
//! epoch milliseconds, formatted strings). [`TimeEncoding::Auto`] guesses;
//! the explicit encodings accept only their own form plus real instants.

use std::str::FromStr;

use ahash::AHashSet;
use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, Offset,
    TimeZone, Timelike, Utc,
};
use serde::{Deserialize, Serialize};

use super::strategy::ShardingStrategy;
use crate::data::Value;
use crate::field::FieldSource;
use crate::{Result, ShardError};

/// Integers above this magnitude are read as epoch milliseconds
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// Default lookback for unbounded time scans
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 12;

// ============================================================================
// Granularity
// ============================================================================

/// Width of one time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularity {
    Year,
    Month,
    Day,
    Hour,
    Minute,
}

impl TimeGranularity {
    /// strftime pattern for the table suffix
    pub fn suffix_format(&self) -> &'static str {
        match self {
            TimeGranularity::Year => "%Y",
            TimeGranularity::Month => "%Y%m",
            TimeGranularity::Day => "%Y%m%d",
            TimeGranularity::Hour => "%Y%m%d%H",
            TimeGranularity::Minute => "%Y%m%d%H%M",
        }
    }

    /// Start of the bucket containing `t`
    pub fn truncate(&self, t: NaiveDateTime) -> NaiveDateTime {
        let date = t.date();
        let truncated = match self {
            TimeGranularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            TimeGranularity::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            TimeGranularity::Day => date.and_hms_opt(0, 0, 0),
            TimeGranularity::Hour => date.and_hms_opt(t.hour(), 0, 0),
            TimeGranularity::Minute => date.and_hms_opt(t.hour(), t.minute(), 0),
        };
        truncated.unwrap_or(t)
    }

    /// `t` moved forward by one bucket; `None` on calendar overflow
    pub fn advance(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            TimeGranularity::Year => t.checked_add_months(Months::new(12)),
            TimeGranularity::Month => t.checked_add_months(Months::new(1)),
            TimeGranularity::Day => t.checked_add_days(Days::new(1)),
            TimeGranularity::Hour => t.checked_add_signed(Duration::hours(1)),
            TimeGranularity::Minute => t.checked_add_signed(Duration::minutes(1)),
        }
    }
}

impl FromStr for TimeGranularity {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "year" => Ok(TimeGranularity::Year),
            "month" => Ok(TimeGranularity::Month),
            "day" => Ok(TimeGranularity::Day),
            "hour" => Ok(TimeGranularity::Hour),
            "minute" => Ok(TimeGranularity::Minute),
            other => Err(ShardError::Config(format!("Unknown time granularity: {}", other))),
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// How the shard-key field stores time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeEncoding {
    /// Detect from the value
    #[default]
    Auto,
    /// Native timestamp / date values
    Instant,
    /// Epoch seconds
    Seconds,
    /// Epoch milliseconds
    Millis,
    /// `YYYY-MM-DD`
    Date,
    /// `YYYY-MM-DD HH:MM:SS`
    DateTime,
}

impl FromStr for TimeEncoding {
    type Err = ShardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(TimeEncoding::Auto),
            "instant" | "time" => Ok(TimeEncoding::Instant),
            "seconds" | "timestamp" => Ok(TimeEncoding::Seconds),
            "millis" | "timestamp_ms" => Ok(TimeEncoding::Millis),
            "date" => Ok(TimeEncoding::Date),
            "date_time" | "datetime" => Ok(TimeEncoding::DateTime),
            other => Err(ShardError::Config(format!("Unknown time encoding: {}", other))),
        }
    }
}

// ============================================================================
// Time Range
// ============================================================================

/// Closed time window `[start, end]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a window; bounds are swapped if given in reverse
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start > end {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    /// `[now - months, now]`
    pub fn lookback(months: u32) -> Self {
        let end = Utc::now();
        let start = end.checked_sub_months(Months::new(months)).unwrap_or(end);
        Self { start, end }
    }

    /// The window used when a time-sharded scan names none
    pub fn default_lookback() -> Self {
        Self::lookback(DEFAULT_LOOKBACK_MONTHS)
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        *t >= self.start && *t <= self.end
    }
}

// ============================================================================
// Time Strategy
// ============================================================================

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Time-bucketed sharding
#[derive(Debug, Clone, PartialEq)]
pub struct TimeStrategy {
    base_table: String,
    shard_key: String,
    granularity: TimeGranularity,
    encoding: TimeEncoding,
    offset: FixedOffset,
}

impl TimeStrategy {
    /// Create a time strategy with automatic encoding detection in UTC
    pub fn new(
        base_table: impl Into<String>,
        shard_key: impl Into<String>,
        granularity: TimeGranularity,
    ) -> Self {
        Self {
            base_table: base_table.into(),
            shard_key: shard_key.into(),
            granularity,
            encoding: TimeEncoding::Auto,
            offset: utc_offset(),
        }
    }

    /// Pin the key encoding
    pub fn with_encoding(mut self, encoding: TimeEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Zone used for naive inputs and for bucket boundaries
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn granularity(&self) -> TimeGranularity {
        self.granularity
    }

    pub fn encoding(&self) -> TimeEncoding {
        self.encoding
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Interpret a key value as an instant under this strategy's encoding
    pub fn to_instant(&self, value: &Value) -> Option<DateTime<Utc>> {
        if let Value::Timestamp(t) = value {
            return Some(*t);
        }
        match self.encoding {
            TimeEncoding::Auto => match value {
                Value::Date(d) => self.date_start(*d),
                Value::String(s) => self.parse_str(s),
                other => other.as_integer().and_then(epoch_auto),
            },
            TimeEncoding::Instant => match value {
                Value::Date(d) => self.date_start(*d),
                _ => None,
            },
            TimeEncoding::Seconds => integer_of(value)
                .and_then(|v| i64::try_from(v).ok())
                .and_then(|v| DateTime::<Utc>::from_timestamp(v, 0)),
            TimeEncoding::Millis => integer_of(value)
                .and_then(|v| i64::try_from(v).ok())
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            TimeEncoding::Date => match value {
                Value::Date(d) => self.date_start(*d),
                Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .ok()
                    .and_then(|d| self.date_start(d)),
                _ => None,
            },
            TimeEncoding::DateTime => match value {
                Value::String(s) => NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .and_then(|n| self.localize(n)),
                _ => None,
            },
        }
    }

    /// Strict conversion
    pub fn try_instant(&self, value: &Value) -> Result<DateTime<Utc>> {
        self.to_instant(value).ok_or_else(|| ShardError::TimeConversion {
            value: value.to_string(),
        })
    }

    /// Physical table for an instant
    pub fn table_name_at(&self, base: &str, t: &DateTime<Utc>) -> String {
        let local = t.with_timezone(&self.offset);
        format!("{}_{}", base, local.format(self.granularity.suffix_format()))
    }

    /// Every bucket table overlapping `[start, end]`, oldest first.
    ///
    /// Bounds may be given in either order.
    pub fn table_names_in_range(
        &self,
        base: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Vec<String> {
        let (start, end) = if start > end { (end, start) } else { (start, end) };
        let end_local = end.with_timezone(&self.offset).naive_local();
        let mut cursor = self
            .granularity
            .truncate(start.with_timezone(&self.offset).naive_local());

        let fmt = self.granularity.suffix_format();
        let mut seen = AHashSet::new();
        let mut tables = Vec::new();
        while cursor <= end_local {
            let table = format!("{}_{}", base, cursor.format(fmt));
            if seen.insert(table.clone()) {
                tables.push(table);
            }
            match self.granularity.advance(cursor) {
                Some(next) if next > cursor => cursor = next,
                _ => break,
            }
        }
        tables
    }

    /// Window enumeration from raw key values
    pub fn table_names_in_value_range(
        &self,
        base: &str,
        start: &Value,
        end: &Value,
    ) -> Result<Vec<String>> {
        let range = self.parse_time_range(start, end)?;
        Ok(self.table_names_in_range(base, &range.start, &range.end))
    }

    /// Convert two key values to a window, swapping if reversed
    pub fn parse_time_range(&self, start: &Value, end: &Value) -> Result<TimeRange> {
        Ok(TimeRange::new(self.try_instant(start)?, self.try_instant(end)?))
    }

    fn parse_str(&self, s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if let Ok(n) = NaiveDateTime::parse_from_str(s, NAIVE_FORMATS[0]) {
            return self.localize(n);
        }
        if let Ok(t) = DateTime::parse_from_rfc3339(s) {
            return Some(t.with_timezone(&Utc));
        }
        for fmt in &NAIVE_FORMATS[1..] {
            if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
                return self.localize(n);
            }
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return self.date_start(d);
        }
        s.parse::<i64>().ok().and_then(|v| epoch_auto(v as i128))
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc))
    }

    fn date_start(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        date.and_hms_opt(0, 0, 0).and_then(|n| self.localize(n))
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// Integer value, or a string holding one
fn integer_of(value: &Value) -> Option<i128> {
    match value {
        Value::String(s) => s.trim().parse::<i64>().ok().map(i128::from),
        other => other.as_integer(),
    }
}

/// Seconds up to 1e10 in magnitude, milliseconds beyond
fn epoch_auto(v: i128) -> Option<DateTime<Utc>> {
    let v = i64::try_from(v).ok()?;
    if v.unsigned_abs() > MILLIS_THRESHOLD as u64 {
        DateTime::<Utc>::from_timestamp_millis(v)
    } else {
        DateTime::<Utc>::from_timestamp(v, 0)
    }
}

impl ShardingStrategy for TimeStrategy {
    fn name(&self) -> &str {
        "time"
    }

    fn base_table_name(&self) -> &str {
        &self.base_table
    }

    fn shard_key(&self) -> Option<&str> {
        Some(&self.shard_key)
    }

    fn table_name(&self, base: &str, value: &Value) -> String {
        let instant = self.to_instant(value).unwrap_or_else(|| {
            log::warn!(
                "Cannot read {} as a time for table {}, routing to the current bucket",
                value,
                base
            );
            Utc::now()
        });
        self.table_name_at(base, &instant)
    }

    fn try_table_name(&self, base: &str, value: &Value) -> Result<String> {
        Ok(self.table_name_at(base, &self.try_instant(value)?))
    }

    /// Time tables are unbounded; only the base name is known without a window
    fn all_table_names(&self, base: &str) -> Vec<String> {
        vec![base.to_string()]
    }

    fn sharding_value(&self, record: &dyn FieldSource) -> Result<Value> {
        let raw = record.field_value(&self.shard_key)?;
        self.try_instant(&raw).map(Value::Timestamp)
    }

    fn as_time(&self) -> Option<&TimeStrategy> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use proptest::prelude::*;

    fn ts(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_suffixes_per_granularity() {
        let t = Value::Timestamp(ts(2024, 3, 15, 10, 42, 7));
        let cases = [
            (TimeGranularity::Year, "logs_2024"),
            (TimeGranularity::Month, "logs_202403"),
            (TimeGranularity::Day, "logs_20240315"),
            (TimeGranularity::Hour, "logs_2024031510"),
            (TimeGranularity::Minute, "logs_202403151042"),
        ];
        for (g, expected) in cases {
            let s = TimeStrategy::new("logs", "created_at", g);
            assert_eq!(s.table_name("logs", &t), expected);
        }
    }

    #[test]
    fn test_auto_encodings() {
        let s = TimeStrategy::new("orders", "created_at", TimeGranularity::Month);
        // seconds and milliseconds for 2024-03-15T00:00:00Z
        assert_eq!(s.table_name("orders", &Value::Int64(1_710_460_800)), "orders_202403");
        assert_eq!(s.table_name("orders", &Value::Int64(1_710_460_800_000)), "orders_202403");
        assert_eq!(s.table_name("orders", &Value::UInt64(1_710_460_800_000)), "orders_202403");
        assert_eq!(s.table_name("orders", &Value::from("2024-03-15 10:00:00")), "orders_202403");
        assert_eq!(s.table_name("orders", &Value::from("2024-03-15T10:00:00+08:00")), "orders_202403");
        assert_eq!(s.table_name("orders", &Value::from("2024-03-15T10:00:00")), "orders_202403");
        assert_eq!(s.table_name("orders", &Value::from("2024-03-15 10:00:00.250")), "orders_202403");
        assert_eq!(s.table_name("orders", &Value::from("2024-03-15")), "orders_202403");
        assert_eq!(s.table_name("orders", &Value::from("1710460800")), "orders_202403");
        assert_eq!(
            s.table_name("orders", &Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())),
            "orders_202403"
        );
    }

    #[test]
    fn test_explicit_encodings() {
        let secs = TimeStrategy::new("t", "k", TimeGranularity::Day).with_encoding(TimeEncoding::Seconds);
        // would be milliseconds under auto detection
        assert_eq!(secs.try_table_name("t", &Value::Int64(20_000_000_000)).unwrap(), "t_26031011");
        assert!(secs.try_table_name("t", &Value::from("2024-03-15")).is_err());

        let millis = TimeStrategy::new("t", "k", TimeGranularity::Day).with_encoding(TimeEncoding::Millis);
        assert_eq!(millis.try_table_name("t", &Value::Int64(86_400_000)).unwrap(), "t_19700102");

        let date = TimeStrategy::new("t", "k", TimeGranularity::Day).with_encoding(TimeEncoding::Date);
        assert_eq!(date.try_table_name("t", &Value::from("2024-03-15")).unwrap(), "t_20240315");
        assert!(date.try_table_name("t", &Value::Int64(1)).is_err());

        let dt = TimeStrategy::new("t", "k", TimeGranularity::Hour).with_encoding(TimeEncoding::DateTime);
        assert_eq!(dt.try_table_name("t", &Value::from("2024-03-15 09:30:00")).unwrap(), "t_2024031509");

        // instants are always accepted
        let t = Value::Timestamp(ts(2024, 1, 2, 3, 4, 5));
        assert_eq!(date.try_table_name("t", &t).unwrap(), "t_20240102");
    }

    #[test]
    fn test_offset_applies_to_naive_and_suffix() {
        let east8 = FixedOffset::east_opt(8 * 3600).unwrap();
        let s = TimeStrategy::new("t", "k", TimeGranularity::Day).with_offset(east8);
        // 2024-03-15T20:00Z is already the 16th at +08:00
        assert_eq!(s.table_name("t", &Value::Timestamp(ts(2024, 3, 15, 20, 0, 0))), "t_20240316");
        assert_eq!(s.table_name("t", &Value::from("2024-03-16 01:00:00")), "t_20240316");
    }

    #[test]
    fn test_unparsable_value() {
        let s = TimeStrategy::new("t", "k", TimeGranularity::Year);
        let err = s.try_table_name("t", &Value::from("not a time")).unwrap_err();
        assert!(matches!(err, ShardError::TimeConversion { .. }));
        assert!(s.try_table_name("t", &Value::Null).is_err());

        // lenient path routes to the current bucket
        let now = s.table_name_at("t", &Utc::now());
        assert_eq!(s.table_name("t", &Value::from("not a time")), now);
    }

    #[test]
    fn test_range_enumeration_month() {
        let s = TimeStrategy::new("orders", "created_at", TimeGranularity::Month);
        let tables = s.table_names_in_range("orders", &ts(2024, 1, 31, 0, 0, 0), &ts(2024, 3, 1, 0, 0, 0));
        assert_eq!(tables, vec!["orders_202401", "orders_202402", "orders_202403"]);

        let reversed = s.table_names_in_range("orders", &ts(2024, 3, 1, 0, 0, 0), &ts(2024, 1, 31, 0, 0, 0));
        assert_eq!(reversed, tables);
    }

    #[test]
    fn test_range_enumeration_partial_hour() {
        let s = TimeStrategy::new("logs", "ts", TimeGranularity::Hour);
        let tables = s.table_names_in_range("logs", &ts(2024, 3, 15, 9, 50, 0), &ts(2024, 3, 15, 11, 5, 0));
        assert_eq!(tables, vec!["logs_2024031509", "logs_2024031510", "logs_2024031511"]);
    }

    #[test]
    fn test_all_table_names_is_base_only() {
        let s = TimeStrategy::new("orders", "created_at", TimeGranularity::Day);
        assert_eq!(s.all_table_names("orders"), vec!["orders"]);
    }

    #[test]
    fn test_value_range_and_parse() {
        let s = TimeStrategy::new("orders", "created_at", TimeGranularity::Year);
        let tables = s
            .table_names_in_value_range("orders", &Value::from("2025-06-01"), &Value::Int64(1_700_000_000))
            .unwrap();
        assert_eq!(tables, vec!["orders_2023", "orders_2024", "orders_2025"]);

        let range = s.parse_time_range(&Value::from("2025-01-01"), &Value::from("2024-01-01")).unwrap();
        assert!(range.start < range.end);
        assert!(s.parse_time_range(&Value::from("x"), &Value::from("2024-01-01")).is_err());
    }

    #[test]
    fn test_sharding_value_is_strict() {
        let s = TimeStrategy::new("orders", "created_at", TimeGranularity::Month);
        let ok = Record::new().with("created_at", "2024-03-15 10:00:00");
        assert_eq!(
            s.sharding_value(&ok).unwrap(),
            Value::Timestamp(ts(2024, 3, 15, 10, 0, 0))
        );
        let bad = Record::new().with("created_at", "yesterday");
        assert!(s.sharding_value(&bad).is_err());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Month".parse::<TimeGranularity>().unwrap(), TimeGranularity::Month);
        assert_eq!("timestamp_ms".parse::<TimeEncoding>().unwrap(), TimeEncoding::Millis);
        assert!("fortnight".parse::<TimeGranularity>().is_err());
    }

    fn granularity() -> impl Strategy<Value = TimeGranularity> {
        prop_oneof![
            Just(TimeGranularity::Year),
            Just(TimeGranularity::Month),
            Just(TimeGranularity::Day),
            Just(TimeGranularity::Hour),
            Just(TimeGranularity::Minute),
        ]
    }

    proptest! {
        #[test]
        fn prop_window_covers_every_instant(
            g in granularity(),
            start in 946_684_800i64..1_893_456_000,
            span in 0i64..200_000,
            probes in proptest::collection::vec(0.0f64..=1.0, 1..8),
        ) {
            let s = TimeStrategy::new("t", "k", g);
            let a = DateTime::<Utc>::from_timestamp(start, 0).unwrap();
            let b = DateTime::<Utc>::from_timestamp(start + span, 0).unwrap();
            let tables = s.table_names_in_range("t", &a, &b);

            let unique: AHashSet<_> = tables.iter().collect();
            prop_assert_eq!(unique.len(), tables.len());

            for p in probes {
                let at = start + (span as f64 * p) as i64;
                let t = DateTime::<Utc>::from_timestamp(at, 0).unwrap();
                prop_assert!(tables.contains(&s.table_name_at("t", &t)));
            }
        }
    }
}
