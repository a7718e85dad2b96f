//! Rule-based question classifier.
//!
//! A question is first parsed into the facts the rules look at (months named,
//! relative window, ranking words, metrics mentioned, entity), then the rules in
//! [`RULES`] are tried in declaration order and the first match wins.

use crate::config::CopilotConfig;
use crate::error::{CopilotError, Result};
use crate::intent::{Intent, KeyMetric, RankDirection};
use crate::schema::{EntityFilter, Metric, Period};
use crate::utils::month_from_name;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

lazy_static! {
    static ref MONTH_RE: Regex = Regex::new(
        r"\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\b(?:,?\s+(\d{4})\b)?"
    )
    .expect("month pattern");
    static ref ISO_MONTH_RE: Regex =
        Regex::new(r"\b(\d{4})-(\d{2})(?:-\d{2})?\b").expect("iso month pattern");
    static ref WINDOW_RE: Regex =
        Regex::new(r"\b(?:last|past|previous|trailing)\s+(\d+)\s+months?\b").expect("window pattern");
    static ref QUARTER_RE: Regex =
        Regex::new(r"\b(?:last|past|previous|trailing)\s+quarter\b").expect("quarter pattern");
    static ref RANK_RE: Regex =
        Regex::new(r"\b(top|bottom|highest|lowest|best|worst)\b(?:\s+(\d+))?").expect("ranking pattern");
}

const MAX_WINDOW_MONTHS: usize = 120;

const TREND_WORDS: &[&str] = &["trend", "history", "historical", "over time"];
const BREAKDOWN_WORDS: &[&str] = &["breakdown", "break down", "by category", "categories", "split"];
const RUNWAY_WORDS: &[&str] = &["runway", "burn"];
const ENTITY_WORDS: &[&str] = &["entity", "entities", "missed"];

/// Metric keywords, most specific first.
const METRIC_WORDS: &[(Metric, &[&str])] = &[
    (Metric::GrossMargin, &["gross margin", "margin"]),
    (Metric::Ebitda, &["ebitda"]),
    (Metric::Opex, &["opex", "operating expense"]),
    (Metric::Cogs, &["cogs", "cost of goods", "cost of sales"]),
    (Metric::Revenue, &["revenue", "sales"]),
    (Metric::CashBalance, &["cash balance", "cash"]),
];

/// Vocabulary of the loaded data. Built once per session and passed to the
/// planner explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannerContext {
    pub entities: Vec<String>,
    pub periods: BTreeSet<Period>,
    /// Anchor for relative windows such as "last 3 months".
    pub latest_period: Option<Period>,
}

impl PlannerContext {
    pub fn new(entities: Vec<String>, periods: BTreeSet<Period>) -> Self {
        let latest_period = periods.last().copied();
        Self {
            entities,
            periods,
            latest_period,
        }
    }

    pub fn with_latest_period(mut self, period: Period) -> Self {
        self.latest_period = Some(period);
        self
    }

    /// Year for a month named without one: the latest year in the data that
    /// has this month, else the latest data year.
    fn resolve_year(&self, month: u32) -> Option<i32> {
        self.periods
            .iter()
            .rev()
            .find(|p| p.month() == month)
            .map(|p| p.year())
            .or_else(|| self.latest_period.map(|p| p.year()))
    }

    fn history(&self) -> Vec<Period> {
        match self.latest_period {
            Some(latest) => self.periods.iter().filter(|p| **p <= latest).copied().collect(),
            None => Vec::new(),
        }
    }
}

/// Facts extracted from one question.
#[derive(Debug, Clone)]
struct ParsedQuestion {
    text: String,
    months: Vec<Period>,
    window: Option<Vec<Period>>,
    ranking: Option<(RankDirection, usize)>,
    metrics: Vec<Metric>,
    entity: EntityFilter,
    latest: Option<Period>,
    history: Vec<Period>,
    default_window: Vec<Period>,
}

impl ParsedQuestion {
    fn has_any(&self, words: &[&str]) -> bool {
        words.iter().any(|w| self.text.contains(w))
    }

    fn metric(&self) -> Option<Metric> {
        self.metrics.first().copied()
    }

    fn mentions(&self, metric: Metric) -> bool {
        self.metrics.contains(&metric)
    }

    fn single_period(&self) -> Option<Period> {
        self.months.last().copied().or(self.latest)
    }

    /// Named months, else the relative window, else the latest month.
    fn periods_or_latest(&self) -> Option<Vec<Period>> {
        if !self.months.is_empty() {
            return Some(self.months.clone());
        }
        if let Some(window) = &self.window {
            return Some(window.clone());
        }
        self.latest.map(|p| vec![p])
    }

    fn trend_periods(&self) -> Option<Vec<Period>> {
        if let Some(window) = &self.window {
            return Some(window.clone());
        }
        if self.months.len() >= 2 {
            return Some(self.months.clone());
        }
        if self.default_window.is_empty() {
            None
        } else {
            Some(self.default_window.clone())
        }
    }
}

struct Rule {
    name: &'static str,
    matches: fn(&ParsedQuestion) -> Option<Intent>,
}

/// Priority order: more specific rules first.
const RULES: &[Rule] = &[
    Rule {
        name: "ranking",
        matches: ranking_rule,
    },
    Rule {
        name: "cash_runway",
        matches: runway_rule,
    },
    Rule {
        name: "margin_trend",
        matches: margin_trend_rule,
    },
    Rule {
        name: "metric_trend",
        matches: metric_trend_rule,
    },
    Rule {
        name: "entity_performance",
        matches: entity_performance_rule,
    },
    Rule {
        name: "revenue_vs_budget",
        matches: revenue_vs_budget_rule,
    },
    Rule {
        name: "opex_breakdown",
        matches: opex_breakdown_rule,
    },
    Rule {
        name: "multi_month_compare",
        matches: compare_rule,
    },
    Rule {
        name: "ebitda",
        matches: ebitda_rule,
    },
    Rule {
        name: "single_metric",
        matches: single_metric_rule,
    },
];

fn ranking_rule(q: &ParsedQuestion) -> Option<Intent> {
    let (direction, n) = q.ranking?;
    if q.has_any(RUNWAY_WORDS) {
        return None;
    }
    let metric = q.metric()?;
    let periods = match &q.window {
        Some(window) => window.clone(),
        None if q.months.len() >= 2 => q.months.clone(),
        None => q.history.clone(),
    };
    Some(Intent::Ranking {
        metric,
        direction,
        n,
        periods,
        entity: q.entity.clone(),
    })
}

fn runway_rule(q: &ParsedQuestion) -> Option<Intent> {
    q.has_any(RUNWAY_WORDS).then(|| Intent::KeyMetric {
        metric: KeyMetric::CashRunway,
        period: None,
        entity: q.entity.clone(),
    })
}

fn margin_trend_rule(q: &ParsedQuestion) -> Option<Intent> {
    if !q.has_any(TREND_WORDS) || q.metric() != Some(Metric::GrossMargin) {
        return None;
    }
    Some(Intent::MarginTrend {
        periods: q.trend_periods()?,
        entity: q.entity.clone(),
    })
}

fn metric_trend_rule(q: &ParsedQuestion) -> Option<Intent> {
    if !q.has_any(TREND_WORDS) {
        return None;
    }
    Some(Intent::MetricTrend {
        metric: q.metric()?,
        periods: q.trend_periods()?,
        entity: q.entity.clone(),
    })
}

fn entity_performance_rule(q: &ParsedQuestion) -> Option<Intent> {
    if !q.mentions(Metric::Revenue) || !q.has_any(ENTITY_WORDS) {
        return None;
    }
    if q.entity != EntityFilter::All {
        return None;
    }
    Some(Intent::EntityPerformance {
        period: q.single_period()?,
    })
}

fn revenue_vs_budget_rule(q: &ParsedQuestion) -> Option<Intent> {
    if !q.mentions(Metric::Revenue) || !q.text.contains("budget") {
        return None;
    }
    Some(Intent::RevenueVsBudget {
        periods: q.periods_or_latest()?,
        entity: q.entity.clone(),
    })
}

fn opex_breakdown_rule(q: &ParsedQuestion) -> Option<Intent> {
    if !q.mentions(Metric::Opex) || !q.has_any(BREAKDOWN_WORDS) {
        return None;
    }
    Some(Intent::OpexBreakdown {
        periods: q.periods_or_latest()?,
        entity: q.entity.clone(),
    })
}

fn compare_rule(q: &ParsedQuestion) -> Option<Intent> {
    let metric = q.metric()?;
    let periods = if q.months.len() >= 2 {
        q.months.clone()
    } else if let Some(window) = &q.window {
        window.clone()
    } else if q.text.contains("compare") {
        q.trend_periods()?
    } else {
        return None;
    };
    Some(Intent::MultiMonthCompare {
        metric,
        periods,
        entity: q.entity.clone(),
    })
}

fn ebitda_rule(q: &ParsedQuestion) -> Option<Intent> {
    if !q.mentions(Metric::Ebitda) {
        return None;
    }
    Some(Intent::KeyMetric {
        metric: KeyMetric::Ebitda,
        period: Some(q.single_period()?),
        entity: q.entity.clone(),
    })
}

fn single_metric_rule(q: &ParsedQuestion) -> Option<Intent> {
    Some(Intent::SingleMetric {
        metric: q.metric()?,
        period: q.single_period()?,
        entity: q.entity.clone(),
    })
}

pub struct Planner<'a> {
    context: &'a PlannerContext,
    default_trend_months: usize,
}

impl<'a> Planner<'a> {
    pub fn new(context: &'a PlannerContext) -> Self {
        Self::with_config(context, &CopilotConfig::default())
    }

    pub fn with_config(context: &'a PlannerContext, config: &CopilotConfig) -> Self {
        Self {
            context,
            default_trend_months: config.default_trend_months,
        }
    }

    pub fn plan(&self, question: &str) -> Result<Intent> {
        let parsed = self.parse(question);
        debug!(
            "Parsed question: months={:?} window={:?} metrics={:?} entity={:?}",
            parsed.months, parsed.window, parsed.metrics, parsed.entity
        );

        for rule in RULES {
            if let Some(intent) = (rule.matches)(&parsed) {
                debug!("Rule '{}' matched: {:?}", rule.name, intent);
                return Ok(intent);
            }
        }

        if parsed.metric().is_some() && parsed.latest.is_none() && parsed.months.is_empty() {
            return Err(CopilotError::NoPeriodResolved(question.trim().to_string()));
        }
        Err(CopilotError::UnrecognizedIntent(question.trim().to_string()))
    }

    /// Canonical periods a question refers to: the months it names, else its
    /// relative window.
    pub fn extract_periods(&self, question: &str) -> Vec<Period> {
        let text = question.to_lowercase();
        let months = self.named_months(&text);
        if !months.is_empty() {
            return months;
        }
        self.relative_window(&text).unwrap_or_default()
    }

    pub fn extract_entity(&self, question: &str) -> EntityFilter {
        let text = question.to_lowercase();
        self.context
            .entities
            .iter()
            .filter(|name| contains_word(&text, &name.to_lowercase()))
            .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .map(|name| EntityFilter::Named(name.clone()))
            .unwrap_or(EntityFilter::All)
    }

    fn parse(&self, question: &str) -> ParsedQuestion {
        let text = question.to_lowercase();

        let metrics = METRIC_WORDS
            .iter()
            .filter(|(_, words)| words.iter().any(|w| text.contains(w)))
            .map(|(metric, _)| *metric)
            .collect();

        let ranking = RANK_RE.captures(&text).map(|caps| {
            let direction = match &caps[1] {
                "top" | "highest" | "best" => RankDirection::Top,
                _ => RankDirection::Worst,
            };
            let n = caps
                .get(2)
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(1);
            (direction, n)
        });

        let default_window = self
            .context
            .latest_period
            .map(|latest| Period::window_ending(latest, self.default_trend_months))
            .unwrap_or_default();

        ParsedQuestion {
            months: self.named_months(&text),
            window: self.relative_window(&text),
            ranking,
            metrics,
            entity: self.extract_entity(question),
            latest: self.context.latest_period,
            history: self.context.history(),
            default_window,
            text,
        }
    }

    fn named_months(&self, text: &str) -> Vec<Period> {
        let mut found = BTreeSet::new();

        for caps in MONTH_RE.captures_iter(text) {
            let Some(month) = month_from_name(&caps[1]) else {
                continue;
            };
            let year = caps
                .get(2)
                .and_then(|y| y.as_str().parse::<i32>().ok())
                .or_else(|| self.context.resolve_year(month));
            if let Some(period) = year.and_then(|y| Period::new(y, month).ok()) {
                found.insert(period);
            }
        }

        for caps in ISO_MONTH_RE.captures_iter(text) {
            let year = caps[1].parse::<i32>().ok();
            let month = caps[2].parse::<u32>().ok();
            if let Some(period) = year
                .zip(month)
                .and_then(|(y, m)| Period::new(y, m).ok())
            {
                found.insert(period);
            }
        }

        found.into_iter().collect()
    }

    fn relative_window(&self, text: &str) -> Option<Vec<Period>> {
        let count = if let Some(caps) = WINDOW_RE.captures(text) {
            caps[1].parse::<usize>().ok()?
        } else if QUARTER_RE.is_match(text) {
            3
        } else if text.contains("last month") {
            1
        } else {
            return None;
        };

        if count == 0 {
            return None;
        }
        let latest = self.context.latest_period?;
        Some(Period::window_ending(latest, count.min(MAX_WINDOW_MONTHS)))
    }
}

/// Case-sensitive containment of `needle` bounded by non-alphanumeric characters.
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
