use crate::error::{CopilotError, Result};
use chrono::{Datelike, NaiveDate};
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const BASE_CURRENCY: &str = "USD";
pub const REVENUE_ACCOUNT: &str = "Revenue";
pub const COGS_ACCOUNT: &str = "COGS";
pub const CASH_ACCOUNT: &str = "Cash";
pub const OPEX_PREFIX: &str = "Opex:";

/// A calendar month. Orders chronologically and serializes as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(CopilotError::DateError(format!(
                "Invalid month {} in period {}-{}",
                month, year, month
            )));
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Parses "YYYY-MM" or a full "YYYY-MM-DD" date.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Ok(Self::from_date(date));
        }

        let date = NaiveDate::parse_from_str(&format!("{}-01", text), "%Y-%m-%d").map_err(|_| {
            CopilotError::DateError(format!(
                "Invalid period format: {}. Expected YYYY-MM",
                text
            ))
        })?;
        Ok(Self::from_date(date))
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Moves forward (positive) or backward (negative) by whole months.
    /// Saturates at the first and last representable month.
    pub fn shift(&self, months: i32) -> Self {
        let index = (self.year as i64 * 12 + self.month as i64 - 1)
            .saturating_add(months as i64)
            .clamp(i32::MIN as i64 * 12, i32::MAX as i64 * 12 + 11);
        Self {
            year: index.div_euclid(12) as i32,
            month: index.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn months_until(&self, later: Period) -> i32 {
        (later.year - self.year) * 12 + later.month as i32 - self.month as i32
    }

    /// The `count` consecutive months ending at (and including) `end`, oldest first.
    pub fn window_ending(end: Period, count: usize) -> Vec<Period> {
        (0..count as i32)
            .rev()
            .map(|offset| end.shift(-offset))
            .collect()
    }

    /// "June 2025"
    pub fn long_label(&self) -> String {
        self.format_with("%B %Y")
    }

    /// "Jun 2025"
    pub fn short_label(&self) -> String {
        self.format_with("%b %Y")
    }

    fn format_with(&self, pattern: &str) -> String {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .map(|d| d.format(pattern).to_string())
            .unwrap_or_else(|| self.to_string())
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Period::parse(&text).map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for Period {
    fn schema_name() -> String {
        "Period".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

/// Label for a run of periods: "2025-06", "2025-04:2025-06", or a comma list when not contiguous.
pub fn period_range_label(periods: &[Period]) -> String {
    match periods {
        [] => String::new(),
        [single] => single.to_string(),
        [first, .., last] => {
            let contiguous = periods.windows(2).all(|w| w[0].shift(1) == w[1]);
            if contiguous {
                format!("{}:{}", first, last)
            } else {
                periods
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            }
        }
    }
}

/// One row of monthly data, already canonicalized by the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Record {
    pub period: Period,
    pub entity: String,
    pub account: String,
    pub amount: f64,
    pub currency: String,
}

impl Record {
    pub fn new(
        period: Period,
        entity: impl Into<String>,
        account: impl Into<String>,
        amount: f64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            period,
            entity: entity.into(),
            account: account.into(),
            amount,
            currency: currency.into(),
        }
    }

    pub fn is_revenue(&self) -> bool {
        self.account.eq_ignore_ascii_case(REVENUE_ACCOUNT)
    }

    pub fn is_cogs(&self) -> bool {
        self.account.eq_ignore_ascii_case(COGS_ACCOUNT)
    }

    pub fn is_cash(&self) -> bool {
        self.account.eq_ignore_ascii_case(CASH_ACCOUNT)
    }

    pub fn is_opex(&self) -> bool {
        self.opex_category().is_some()
    }

    /// The category suffix of an `Opex:<category>` account.
    pub fn opex_category(&self) -> Option<&str> {
        let prefix = self.account.get(..OPEX_PREFIX.len())?;
        if prefix.eq_ignore_ascii_case(OPEX_PREFIX) {
            Some(self.account[OPEX_PREFIX.len()..].trim())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FxRate {
    pub period: Period,
    pub currency: String,
    pub rate_to_usd: f64,
}

impl FxRate {
    pub fn new(period: Period, currency: impl Into<String>, rate_to_usd: f64) -> Self {
        Self {
            period,
            currency: currency.into(),
            rate_to_usd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "scope", content = "name", rename_all = "snake_case")]
pub enum EntityFilter {
    All,
    Named(String),
}

impl EntityFilter {
    pub fn matches(&self, entity: &str) -> bool {
        match self {
            EntityFilter::All => true,
            EntityFilter::Named(name) => name.eq_ignore_ascii_case(entity),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            EntityFilter::All => "all entities",
            EntityFilter::Named(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Revenue,
    Cogs,
    Opex,
    GrossMargin,
    Ebitda,
    CashBalance,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Revenue => "Revenue",
            Metric::Cogs => "COGS",
            Metric::Opex => "Opex",
            Metric::GrossMargin => "Gross Margin",
            Metric::Ebitda => "EBITDA",
            Metric::CashBalance => "Cash Balance",
        }
    }

    pub fn unit(&self) -> Unit {
        match self {
            Metric::GrossMargin => Unit::Percent,
            _ => Unit::Usd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Unit {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "percent")]
    Percent,
    #[serde(rename = "months")]
    Months,
}

/// A computed number, or the reason there is none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum MetricValue {
    Value(f64),
    NoData,
    /// A contributing record had no FX rate.
    Incomplete { currency: String },
    /// Division by zero, e.g. margin on zero revenue.
    Undefined,
    Infinite,
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, MetricValue::Value(_))
    }
}

impl From<Result<f64>> for MetricValue {
    fn from(result: Result<f64>) -> Self {
        match result {
            Ok(value) => MetricValue::Value(value),
            Err(CopilotError::MissingFxRate { currency, .. }) => MetricValue::Incomplete { currency },
            Err(CopilotError::DivisionUndefined(_)) => MetricValue::Undefined,
            Err(_) => MetricValue::NoData,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum PointKey {
    Period(Period),
    Category(String),
    Entity(String),
}

impl PointKey {
    pub fn label(&self) -> String {
        match self {
            PointKey::Period(p) => p.short_label(),
            PointKey::Category(name) | PointKey::Entity(name) => name.clone(),
        }
    }

    pub fn period(&self) -> Option<Period> {
        match self {
            PointKey::Period(p) => Some(*p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricPoint {
    pub key: PointKey,
    pub value: MetricValue,
}

impl MetricPoint {
    pub fn new(key: PointKey, value: MetricValue) -> Self {
        Self { key, value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricResult {
    pub metric_name: String,
    /// "2025-06" or "2025-04:2025-06"
    pub scope: String,
    pub entity: EntityFilter,
    pub unit: Unit,
    pub points: Vec<MetricPoint>,
}

impl MetricResult {
    pub fn value_for(&self, period: Period) -> Option<&MetricValue> {
        self.points
            .iter()
            .find(|p| p.key == PointKey::Period(period))
            .map(|p| &p.value)
    }

    pub fn value_for_key(&self, label: &str) -> Option<&MetricValue> {
        self.points
            .iter()
            .find(|p| match &p.key {
                PointKey::Category(name) | PointKey::Entity(name) => name == label,
                PointKey::Period(period) => period.to_string() == label,
            })
            .map(|p| &p.value)
    }

    pub fn numeric_points(&self) -> impl Iterator<Item = (&PointKey, f64)> {
        self.points
            .iter()
            .filter_map(|p| p.value.as_f64().map(|v| (&p.key, v)))
    }

    /// Sum of numeric points; `None` when any point is not a number.
    pub fn complete_total(&self) -> Option<f64> {
        self.points.iter().map(|p| p.value.as_f64()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parse_and_display() {
        let p = Period::parse("2025-06").unwrap();
        assert_eq!(p, Period::new(2025, 6).unwrap());
        assert_eq!(p.to_string(), "2025-06");
        assert_eq!(Period::parse("2025-06-01").unwrap(), p);
        assert_eq!(p.long_label(), "June 2025");
        assert_eq!(p.short_label(), "Jun 2025");
        assert!(Period::parse("June").is_err());
        assert!(Period::new(2025, 13).is_err());
    }

    #[test]
    fn test_period_shift_and_window() {
        let p = Period::new(2025, 2).unwrap();
        assert_eq!(p.shift(-3), Period::new(2024, 11).unwrap());
        assert_eq!(p.shift(11), Period::new(2026, 1).unwrap());
        assert_eq!(p.shift(-3).months_until(p), 3);

        let window = Period::window_ending(p, 3);
        assert_eq!(
            window,
            vec![
                Period::new(2024, 12).unwrap(),
                Period::new(2025, 1).unwrap(),
                Period::new(2025, 2).unwrap(),
            ]
        );
        assert_eq!(period_range_label(&window), "2024-12:2025-02");
    }

    #[test]
    fn test_period_serde_roundtrip_uses_canonical_text() {
        let p = Period::new(2025, 7).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"2025-07\"");
        let back: Period = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_opex_category() {
        let p = Period::new(2025, 6).unwrap();
        let rec = Record::new(p, "ParentCo", "Opex:Marketing", 10.0, "USD");
        assert_eq!(rec.opex_category(), Some("Marketing"));
        let rec = Record::new(p, "ParentCo", "Revenue", 10.0, "USD");
        assert_eq!(rec.opex_category(), None);
        assert!(rec.is_revenue());
    }

    #[test]
    fn test_metric_value_from_result() {
        let p = Period::new(2025, 6).unwrap();
        assert_eq!(MetricValue::from(Ok(3.0)), MetricValue::Value(3.0));
        assert_eq!(
            MetricValue::from(Err(CopilotError::MissingFxRate {
                currency: "EUR".to_string(),
                period: p,
            })),
            MetricValue::Incomplete {
                currency: "EUR".to_string()
            }
        );
        assert_eq!(
            MetricValue::from(Err(CopilotError::NoDataForPeriod(p))),
            MetricValue::NoData
        );
        assert_eq!(
            MetricValue::from(Err(CopilotError::DivisionUndefined("x".to_string()))),
            MetricValue::Undefined
        );
    }

    #[test]
    fn test_shift_saturates_instead_of_overflowing() {
        let p = Period::parse("2025-06").unwrap();
        assert_eq!(p.shift(7), Period::parse("2026-01").unwrap());
        assert_eq!(p.shift(-6), Period::parse("2024-12").unwrap());

        let far = p.shift(i32::MAX);
        assert!(far > p);

        let last = Period::new(i32::MAX, 12).unwrap();
        assert_eq!(last.shift(1), last);
        assert_eq!(last.shift(i32::MAX), last);
        let first = Period::new(i32::MIN, 1).unwrap();
        assert_eq!(first.shift(i32::MIN), first);
    }
}
