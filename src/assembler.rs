use crate::config::CopilotConfig;
use crate::engine::{BudgetComparison, BurnBasis, MetricEngine, RunwayAnalysis};
use crate::error::CopilotError;
use crate::intent::{Intent, KeyMetric, RankDirection};
use crate::schema::*;
use crate::utils::{format_percent, format_signed_percent, format_signed_usd, format_usd};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const SUPPORTED_TOPICS: &[&str] = &[
    "revenue vs budget for a month or range",
    "gross margin % trend",
    "revenue, COGS, opex, EBITDA or cash trends",
    "opex breakdown by category",
    "EBITDA for a month",
    "cash runway",
    "which entities missed their revenue budget",
    "top or worst months for a metric",
    "comparing a metric across months",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Bar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChartPoint {
    pub label: String,
    /// `None` where the underlying point is a marker (no data, N/A, ...).
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChartSeries {
    pub name: String,
    pub points: Vec<ChartPoint>,
}

impl From<&MetricResult> for ChartSeries {
    fn from(result: &MetricResult) -> Self {
        Self {
            name: result.metric_name.clone(),
            points: result
                .points
                .iter()
                .map(|p| ChartPoint {
                    label: p.key.label(),
                    value: p.value.as_f64(),
                })
                .collect(),
        }
    }
}

/// Chart-ready description of a series answer. Rendering is left to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    pub y_label: String,
    pub series: Vec<ChartSeries>,
}

impl ChartSpec {
    fn from_results(kind: ChartKind, title: String, results: &[&MetricResult]) -> Self {
        let unit = results.first().map(|r| r.unit).unwrap_or(Unit::Usd);
        Self {
            kind,
            title,
            y_label: unit_label(unit).to_string(),
            series: results.iter().map(|r| ChartSeries::from(*r)).collect(),
        }
    }

    /// One row per label (in first-seen order), one column per series. Marker
    /// points are left empty.
    pub fn to_csv(&self) -> String {
        let mut labels: Vec<&str> = Vec::new();
        for point in self.series.iter().flat_map(|s| &s.points) {
            if !labels.contains(&point.label.as_str()) {
                labels.push(&point.label);
            }
        }

        let mut out = String::from("label");
        for series in &self.series {
            out.push(',');
            out.push_str(&csv_field(&series.name));
        }
        out.push('\n');

        for label in labels {
            out.push_str(&csv_field(label));
            for series in &self.series {
                out.push(',');
                let value = series
                    .points
                    .iter()
                    .find(|p| p.label == label)
                    .and_then(|p| p.value);
                if let Some(v) = value {
                    out.push_str(&format!("{:.2}", v));
                }
            }
            out.push('\n');
        }
        out
    }
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// Terminal output of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Answer {
    pub summary: String,
    pub metric_results: Vec<MetricResult>,
    pub chart: Option<ChartSpec>,
}

impl Answer {
    fn text(summary: String) -> Self {
        Self {
            summary,
            metric_results: Vec::new(),
            chart: None,
        }
    }

    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(Answer)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::json_schema())
    }

    pub fn to_markdown(&self) -> String {
        self.to_markdown_with(CopilotConfig::default().percent_decimals)
    }

    /// Report section: the summary followed by one table per metric result.
    pub fn to_markdown_with(&self, percent_decimals: usize) -> String {
        let mut out = format!("{}\n", self.summary);
        for result in &self.metric_results {
            out.push_str(&format!(
                "\n### {} ({}, {})\n\n| | {} |\n|---|---:|\n",
                result.metric_name,
                if result.scope.is_empty() { "latest" } else { result.scope.as_str() },
                result.entity.label(),
                unit_label(result.unit),
            ));
            for point in &result.points {
                out.push_str(&format!(
                    "| {} | {} |\n",
                    point.key.label(),
                    describe(&point.value, result.unit, percent_decimals)
                ));
            }
        }
        out
    }
}

fn unit_label(unit: Unit) -> &'static str {
    match unit {
        Unit::Usd => "USD",
        Unit::Percent => "%",
        Unit::Months => "months",
    }
}

/// Display text for a value; markers get explicit wording.
pub fn describe(value: &MetricValue, unit: Unit, percent_decimals: usize) -> String {
    match value {
        MetricValue::Value(v) => match unit {
            Unit::Usd => format_usd(*v),
            Unit::Percent => format_percent(*v, percent_decimals),
            Unit::Months => format!("{:.1} months", v),
        },
        marker => describe_marker(marker),
    }
}

fn describe_signed(value: &MetricValue, unit: Unit, percent_decimals: usize) -> String {
    match (value, unit) {
        (MetricValue::Value(v), Unit::Usd) => format_signed_usd(*v),
        (MetricValue::Value(v), Unit::Percent) => format_signed_percent(*v, percent_decimals),
        _ => describe(value, unit, percent_decimals),
    }
}

fn describe_marker(value: &MetricValue) -> String {
    match value {
        MetricValue::NoData => "no data".to_string(),
        MetricValue::Incomplete { currency } => {
            format!("data incomplete (missing FX rate for {})", currency)
        }
        MetricValue::Undefined => "N/A".to_string(),
        MetricValue::Infinite => "infinite".to_string(),
        MetricValue::Value(v) => v.to_string(),
    }
}

/// "June 2025", "April 2025 to June 2025" or "Jan 2025, Mar 2025".
fn periods_label(periods: &[Period]) -> String {
    match periods {
        [] => "the selected months".to_string(),
        [single] => single.long_label(),
        [first, .., last] if first.months_until(*last) as usize == periods.len() - 1 => {
            format!("{} to {}", first.long_label(), last.long_label())
        }
        _ => periods
            .iter()
            .map(Period::short_label)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Turns an [`Intent`] into an [`Answer`] using the metric engine.
pub struct AnswerAssembler {
    percent_decimals: usize,
}

impl AnswerAssembler {
    pub fn new(config: &CopilotConfig) -> Self {
        Self {
            percent_decimals: config.percent_decimals,
        }
    }

    pub fn assemble(&self, intent: &Intent, engine: &MetricEngine) -> Answer {
        match intent {
            Intent::RevenueVsBudget { periods, entity } => {
                self.revenue_vs_budget(periods, entity, engine.revenue_vs_budget(periods, entity))
            }
            Intent::MarginTrend { periods, entity } => {
                self.trend(periods, engine.gross_margin(periods, entity))
            }
            Intent::MetricTrend {
                metric,
                periods,
                entity,
            } => self.trend(periods, engine.metric_series(*metric, periods, entity)),
            Intent::OpexBreakdown { periods, entity } => {
                self.opex_breakdown(periods, engine.opex_breakdown(periods, entity))
            }
            Intent::KeyMetric {
                metric: KeyMetric::Ebitda,
                period,
                entity,
            } => match period.or_else(|| engine.latest_period()) {
                Some(period) => self.ebitda(period, entity, engine),
                None => Answer::text(format!("EBITDA ({}): no data.", entity.label())),
            },
            Intent::KeyMetric {
                metric: KeyMetric::CashRunway,
                entity,
                ..
            } => self.cash_runway(entity, engine.cash_runway(entity)),
            Intent::EntityPerformance { period } => {
                self.entity_performance(*period, engine.revenue_variance_by_entity(*period))
            }
            Intent::Ranking {
                metric,
                direction,
                n,
                periods,
                entity,
            } => self.ranking(
                *direction,
                *n,
                engine.ranking(*metric, *direction, *n, periods, entity),
            ),
            Intent::MultiMonthCompare {
                metric,
                periods,
                entity,
            } => self.compare(engine.compare_periods(*metric, periods, entity)),
            Intent::SingleMetric {
                metric,
                period,
                entity,
            } => self.single_metric(*period, engine.metric_series(*metric, &[*period], entity)),
        }
    }

    /// Answer for a question the planner could not map to a computation.
    pub fn clarification(&self, error: &CopilotError) -> Answer {
        let lead = match error {
            CopilotError::NoPeriodResolved(_) => {
                "Sorry, I couldn't tell which month you mean and there is no data to default to."
            }
            _ => "Sorry, I didn't understand that question.",
        };
        Answer::text(format!(
            "{} I can answer questions about: {}.",
            lead,
            SUPPORTED_TOPICS.join("; ")
        ))
    }

    fn fmt(&self, value: &MetricValue, unit: Unit) -> String {
        describe(value, unit, self.percent_decimals)
    }

    fn fmt_signed(&self, value: &MetricValue, unit: Unit) -> String {
        describe_signed(value, unit, self.percent_decimals)
    }

    fn budget_line(&self, cmp: &BudgetComparison, index: usize) -> String {
        let value = |result: &MetricResult| {
            result
                .points
                .get(index)
                .map(|p| p.value.clone())
                .unwrap_or(MetricValue::NoData)
        };
        let actual = value(&cmp.actual);
        let budget = value(&cmp.budget);
        if actual == MetricValue::NoData && budget == MetricValue::NoData {
            return "no data".to_string();
        }
        format!(
            "actual {} vs budget {}, variance {} ({})",
            self.fmt(&actual, Unit::Usd),
            self.fmt(&budget, Unit::Usd),
            self.fmt_signed(&value(&cmp.variance), Unit::Usd),
            self.fmt_signed(&value(&cmp.variance_pct), Unit::Percent),
        )
    }

    fn revenue_vs_budget(&self, periods: &[Period], entity: &EntityFilter, cmp: BudgetComparison) -> Answer {
        let summary = match periods {
            [period] => format!(
                "Revenue for {} ({}): {}",
                period.long_label(),
                entity.label(),
                self.budget_line(&cmp, 0)
            ),
            _ => {
                let mut text = format!(
                    "Revenue vs budget for {} ({}):",
                    periods_label(periods),
                    entity.label()
                );
                for (index, point) in cmp.actual.points.iter().enumerate() {
                    text.push_str(&format!("\n- {}: {}", point.key.label(), self.budget_line(&cmp, index)));
                }
                text
            }
        };

        let chart = ChartSpec::from_results(
            ChartKind::Bar,
            format!("Revenue vs Budget ({})", entity.label()),
            &[&cmp.actual, &cmp.budget],
        );

        Answer {
            summary,
            metric_results: cmp.into_results(),
            chart: Some(chart),
        }
    }

    fn series_text(&self, result: &MetricResult) -> String {
        if result.points.is_empty() {
            return "no data".to_string();
        }
        result
            .points
            .iter()
            .map(|p| format!("{} {}", p.key.label(), self.fmt(&p.value, result.unit)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Movement from the first to the last point, when both are numbers.
    fn change_text(&self, result: &MetricResult) -> Option<String> {
        if result.points.len() < 2 {
            return None;
        }
        let first = result.points.first()?.value.as_f64()?;
        let last = result.points.last()?.value.as_f64()?;
        let delta = last - first;

        let text = match result.unit {
            Unit::Percent => format!(
                "{} pts",
                format_signed_percent(delta, self.percent_decimals).trim_end_matches('%')
            ),
            _ if first == 0.0 => format!("{} (N/A)", format_signed_usd(delta)),
            _ => format!(
                "{} ({})",
                format_signed_usd(delta),
                format_signed_percent(delta * 100.0 / first.abs(), self.percent_decimals)
            ),
        };
        Some(text)
    }

    fn trend(&self, periods: &[Period], result: MetricResult) -> Answer {
        let mut summary = format!(
            "{} trend for {} ({}): {}.",
            result.metric_name,
            periods_label(periods),
            result.entity.label(),
            self.series_text(&result)
        );
        if let Some(change) = self.change_text(&result) {
            summary.push_str(&format!(" Change over the period: {}.", change));
        }

        let chart = ChartSpec::from_results(
            ChartKind::Line,
            format!("{} ({})", result.metric_name, result.entity.label()),
            &[&result],
        );

        Answer {
            summary,
            metric_results: vec![result],
            chart: Some(chart),
        }
    }

    fn opex_breakdown(&self, periods: &[Period], result: MetricResult) -> Answer {
        let (categories, missing): (Vec<&MetricPoint>, Vec<&MetricPoint>) = result
            .points
            .iter()
            .partition(|p| matches!(p.key, PointKey::Category(_)));

        let header = format!(
            "Opex breakdown for {} ({})",
            periods_label(periods),
            result.entity.label()
        );

        let mut summary = if categories.is_empty() {
            format!("{}: no data.", header)
        } else {
            let items = categories
                .iter()
                .map(|p| format!("{} {}", p.key.label(), self.fmt(&p.value, Unit::Usd)))
                .collect::<Vec<_>>()
                .join(", ");
            let total = categories
                .iter()
                .find(|p| !p.value.is_value())
                .map(|p| p.value.clone())
                .unwrap_or_else(|| {
                    MetricValue::Value(categories.iter().filter_map(|p| p.value.as_f64()).sum())
                });
            format!("{}: {}. Total {}.", header, items, self.fmt(&total, Unit::Usd))
        };

        if !missing.is_empty() && !categories.is_empty() {
            let months = missing
                .iter()
                .map(|p| p.key.label())
                .collect::<Vec<_>>()
                .join(", ");
            summary.push_str(&format!(" No data for {}.", months));
        }

        let chart = (!categories.is_empty()).then(|| {
            let series = ChartSeries {
                name: result.metric_name.clone(),
                points: categories
                    .iter()
                    .map(|p| ChartPoint {
                        label: p.key.label(),
                        value: p.value.as_f64(),
                    })
                    .collect(),
            };
            ChartSpec {
                kind: ChartKind::Bar,
                title: format!("Opex by Category ({})", result.entity.label()),
                y_label: unit_label(Unit::Usd).to_string(),
                series: vec![series],
            }
        });

        Answer {
            summary,
            metric_results: vec![result],
            chart,
        }
    }

    fn ebitda(&self, period: Period, entity: &EntityFilter, engine: &MetricEngine) -> Answer {
        let ebitda = engine.ebitda(&[period], entity);
        let components = engine.ebitda_components(&[period], entity);

        let value_of = |result: &MetricResult| {
            result
                .value_for(period)
                .cloned()
                .unwrap_or(MetricValue::NoData)
        };

        let mut summary = format!(
            "EBITDA for {} ({}): {}",
            period.long_label(),
            entity.label(),
            self.fmt(&value_of(&ebitda), Unit::Usd)
        );
        if ebitda.value_for(period).is_some_and(MetricValue::is_value) {
            let parts = components
                .iter()
                .map(|c| format!("{} {}", c.metric_name, self.fmt(&value_of(c), Unit::Usd)))
                .collect::<Vec<_>>()
                .join(", ");
            summary.push_str(&format!(" ({})", parts));
        }
        summary.push('.');

        let chart = ChartSpec {
            kind: ChartKind::Bar,
            title: format!("EBITDA Components, {} ({})", period.short_label(), entity.label()),
            y_label: unit_label(Unit::Usd).to_string(),
            series: vec![ChartSeries {
                name: "EBITDA".to_string(),
                points: components
                    .iter()
                    .chain(std::iter::once(&ebitda))
                    .map(|r| ChartPoint {
                        label: r.metric_name.clone(),
                        value: value_of(r).as_f64(),
                    })
                    .collect(),
            }],
        };

        let mut metric_results = vec![ebitda];
        metric_results.extend(components);

        Answer {
            summary,
            metric_results,
            chart: Some(chart),
        }
    }

    fn cash_runway(&self, entity: &EntityFilter, analysis: RunwayAnalysis) -> Answer {
        let point = analysis.runway.points.first();
        let as_of = point.and_then(|p| p.key.period());
        let runway = point.map(|p| p.value.clone()).unwrap_or(MetricValue::NoData);

        let header = match as_of {
            Some(period) => format!("Cash runway ({}) as of {}", entity.label(), period.long_label()),
            None => format!("Cash runway ({})", entity.label()),
        };
        let cash = analysis
            .cash_balance
            .points
            .first()
            .map(|p| self.fmt(&p.value, Unit::Usd))
            .unwrap_or_else(|| "no data".to_string());
        let window = analysis.net_burn.points.len();
        let basis = match analysis.basis {
            Some(BurnBasis::CashDelta) => "from cash balance changes",
            Some(BurnBasis::Ebitda) => "from EBITDA",
            None => "",
        };

        let summary = match (&runway, analysis.average_burn) {
            (MetricValue::Value(months), Some(burn)) => {
                let mut text = format!(
                    "{}: {:.1} months. Cash balance {}, average monthly net burn {} over the last {} months ({}).",
                    header,
                    months,
                    cash,
                    format_usd(burn),
                    window,
                    basis
                );
                if let Some(out) = analysis.cash_out_period {
                    text.push_str(&format!(" Cash is projected to run out around {}.", out.long_label()));
                }
                text
            }
            (MetricValue::Infinite, burn) => format!(
                "{}: infinite. Cash balance {}, average monthly net burn {} over the last {} months ({}), so cash is not being depleted.",
                header,
                cash,
                burn.map(format_usd).unwrap_or_else(|| "no data".to_string()),
                window,
                basis
            ),
            (marker, _) => format!(
                "{}: {}. Runway needs a cash balance and {} months of burn history.",
                header,
                self.fmt(marker, Unit::Months),
                window.max(1)
            ),
        };

        Answer {
            summary,
            metric_results: vec![analysis.runway, analysis.cash_balance, analysis.net_burn],
            chart: None,
        }
    }

    fn entity_performance(&self, period: Period, cmp: BudgetComparison) -> Answer {
        let header = format!("Revenue vs budget by entity for {}", period.long_label());
        let by_entity = cmp
            .actual
            .points
            .iter()
            .all(|p| matches!(p.key, PointKey::Entity(_)));

        let summary = if cmp.actual.points.is_empty() || !by_entity {
            format!("{}: no data.", header)
        } else {
            let mut text = format!("{}:", header);
            for (index, point) in cmp.actual.points.iter().enumerate() {
                text.push_str(&format!("\n- {}: {}", point.key.label(), self.budget_line(&cmp, index)));
            }

            let mut missed: Vec<(&MetricPoint, f64)> = cmp
                .variance
                .points
                .iter()
                .filter_map(|p| p.value.as_f64().map(|v| (p, v)))
                .filter(|(_, v)| *v < 0.0)
                .collect();
            missed.sort_by(|a, b| a.1.total_cmp(&b.1));

            if missed.is_empty() {
                text.push_str("\nNo entity missed its revenue budget.");
            } else {
                let names = missed
                    .iter()
                    .map(|(p, v)| format!("{} ({})", p.key.label(), format_signed_usd(*v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                text.push_str(&format!("\nMissed budget: {}.", names));
            }
            text
        };

        let chart = by_entity.then(|| {
            ChartSpec::from_results(
                ChartKind::Bar,
                format!("Revenue vs Budget by Entity, {}", period.short_label()),
                &[&cmp.actual, &cmp.budget],
            )
        });

        Answer {
            summary,
            metric_results: cmp.into_results(),
            chart,
        }
    }

    fn ranking(&self, direction: RankDirection, n: usize, result: MetricResult) -> Answer {
        let word = match direction {
            RankDirection::Top => "Top",
            RankDirection::Worst => "Worst",
        };
        let ranked = result.points.iter().all(|p| p.value.is_value());
        // Fewer periods than requested may have a value.
        let shown = if ranked && !result.points.is_empty() {
            result.points.len()
        } else {
            n
        };
        let header = format!(
            "{} {} {} by {} ({})",
            word,
            shown,
            if shown == 1 { "month" } else { "months" },
            result.metric_name,
            result.entity.label()
        );

        let summary = if result.points.is_empty() || !ranked {
            format!("{}: no data.", header)
        } else {
            let items = result
                .points
                .iter()
                .enumerate()
                .map(|(i, p)| format!("{}. {} {}", i + 1, p.key.label(), self.fmt(&p.value, result.unit)))
                .collect::<Vec<_>>()
                .join("; ");
            format!("{}: {}.", header, items)
        };

        let chart = ranked.then(|| ChartSpec::from_results(ChartKind::Bar, header.clone(), &[&result]));

        Answer {
            summary,
            metric_results: vec![result],
            chart,
        }
    }

    fn compare(&self, result: MetricResult) -> Answer {
        let mut summary = format!(
            "{} by month ({}): {}.",
            result.metric_name,
            result.entity.label(),
            self.series_text(&result)
        );
        if let Some(change) = self.change_text(&result) {
            summary.push_str(&format!(" Change from first to last: {}.", change));
        }

        let chart = ChartSpec::from_results(
            ChartKind::Bar,
            format!("{} by Month ({})", result.metric_name, result.entity.label()),
            &[&result],
        );

        Answer {
            summary,
            metric_results: vec![result],
            chart: Some(chart),
        }
    }

    fn single_metric(&self, period: Period, result: MetricResult) -> Answer {
        let value = result
            .value_for(period)
            .cloned()
            .unwrap_or(MetricValue::NoData);
        let summary = format!(
            "{} for {} ({}): {}.",
            result.metric_name,
            period.long_label(),
            result.entity.label(),
            self.fmt(&value, result.unit)
        );

        Answer {
            summary,
            metric_results: vec![result],
            chart: None,
        }
    }
}
