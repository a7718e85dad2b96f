use crate::dataset::{Dataset, RecordSet};
use crate::error::{CopilotError, Result};
use crate::intent::RankDirection;
use crate::schema::*;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_RUNWAY_WINDOW: usize = 3;

/// Runways longer than this get no projected cash-out month.
pub const MAX_CASH_OUT_MONTHS: f64 = 12.0 * 1000.0;

/// Actual, budget and variance series aligned on the same keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetComparison {
    pub actual: MetricResult,
    pub budget: MetricResult,
    pub variance: MetricResult,
    pub variance_pct: MetricResult,
}

impl BudgetComparison {
    pub fn into_results(self) -> Vec<MetricResult> {
        vec![self.actual, self.budget, self.variance, self.variance_pct]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnBasis {
    CashDelta,
    Ebitda,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunwayAnalysis {
    pub runway: MetricResult,
    pub cash_balance: MetricResult,
    /// Monthly net burn per trailing month; positive means cash going out.
    pub net_burn: MetricResult,
    pub average_burn: Option<f64>,
    pub basis: Option<BurnBasis>,
    /// Month the cash balance is projected to reach zero.
    pub cash_out_period: Option<Period>,
}

/// Pure metric computations over a read-only [`Dataset`]. All amounts are
/// converted to USD before they are summed.
pub struct MetricEngine<'a> {
    data: &'a Dataset,
    runway_window: usize,
}

impl<'a> MetricEngine<'a> {
    pub fn new(data: &'a Dataset) -> Self {
        Self {
            data,
            runway_window: DEFAULT_RUNWAY_WINDOW,
        }
    }

    pub fn with_runway_window(mut self, months: usize) -> Self {
        self.runway_window = months.max(1);
        self
    }

    pub fn latest_period(&self) -> Option<Period> {
        self.data.latest_period()
    }

    pub fn to_usd(&self, record: &Record) -> Result<f64> {
        if record.currency.eq_ignore_ascii_case(BASE_CURRENCY) {
            return Ok(record.amount);
        }

        self.data
            .fx_rate(record.period, &record.currency)
            .map(|rate| record.amount * rate)
            .ok_or_else(|| CopilotError::MissingFxRate {
                currency: record.currency.clone(),
                period: record.period,
            })
    }

    /// USD sum of the accounts selected by `include` in one period. A period
    /// without any rows for the entity is `NoDataForPeriod`; a period with rows
    /// but no matching accounts sums to zero.
    fn sum_accounts(
        &self,
        set: RecordSet,
        period: Period,
        entity: &EntityFilter,
        include: impl Fn(&Record) -> bool,
    ) -> Result<f64> {
        let mut has_rows = false;
        let mut total = 0.0;

        for record in self
            .data
            .records(set)
            .iter()
            .filter(|r| r.period == period && entity.matches(&r.entity))
        {
            has_rows = true;
            if !include(record) {
                continue;
            }
            match self.to_usd(record) {
                Ok(amount) => total += amount,
                Err(e) => {
                    warn!("{} (entity {}, account {})", e, record.entity, record.account);
                    return Err(e);
                }
            }
        }

        if has_rows {
            Ok(total)
        } else {
            Err(CopilotError::NoDataForPeriod(period))
        }
    }

    fn revenue(&self, set: RecordSet, period: Period, entity: &EntityFilter) -> Result<f64> {
        self.sum_accounts(set, period, entity, Record::is_revenue)
    }

    fn cogs(&self, period: Period, entity: &EntityFilter) -> Result<f64> {
        self.sum_accounts(RecordSet::Actuals, period, entity, Record::is_cogs)
    }

    fn opex(&self, period: Period, entity: &EntityFilter) -> Result<f64> {
        self.sum_accounts(RecordSet::Actuals, period, entity, Record::is_opex)
    }

    fn gross_margin_pct(&self, period: Period, entity: &EntityFilter) -> Result<f64> {
        let revenue = self.revenue(RecordSet::Actuals, period, entity)?;
        let cogs = self.cogs(period, entity)?;
        if revenue == 0.0 {
            return Err(CopilotError::DivisionUndefined(format!(
                "gross margin with zero revenue in {}",
                period
            )));
        }
        Ok((revenue - cogs) * 100.0 / revenue)
    }

    fn ebitda_usd(&self, period: Period, entity: &EntityFilter) -> Result<f64> {
        let revenue = self.revenue(RecordSet::Actuals, period, entity)?;
        let cogs = self.cogs(period, entity)?;
        let opex = self.opex(period, entity)?;
        Ok(revenue - cogs - opex)
    }

    fn cash_balance(&self, period: Period, entity: &EntityFilter) -> Result<f64> {
        self.sum_accounts(RecordSet::Cash, period, entity, Record::is_cash)
    }

    pub fn metric_value(&self, metric: Metric, period: Period, entity: &EntityFilter) -> MetricValue {
        let result = match metric {
            Metric::Revenue => self.revenue(RecordSet::Actuals, period, entity),
            Metric::Cogs => self.cogs(period, entity),
            Metric::Opex => self.opex(period, entity),
            Metric::GrossMargin => self.gross_margin_pct(period, entity),
            Metric::Ebitda => self.ebitda_usd(period, entity),
            Metric::CashBalance => self.cash_balance(period, entity),
        };
        MetricValue::from(result)
    }

    /// One point per requested period, in the order given.
    pub fn metric_series(
        &self,
        metric: Metric,
        periods: &[Period],
        entity: &EntityFilter,
    ) -> MetricResult {
        MetricResult {
            metric_name: metric.name().to_string(),
            scope: period_range_label(periods),
            entity: entity.clone(),
            unit: metric.unit(),
            points: periods
                .iter()
                .map(|p| MetricPoint::new(PointKey::Period(*p), self.metric_value(metric, *p, entity)))
                .collect(),
        }
    }

    pub fn revenue_vs_budget(&self, periods: &[Period], entity: &EntityFilter) -> BudgetComparison {
        let keyed: Vec<(PointKey, Result<f64>, Result<f64>)> = periods
            .iter()
            .map(|p| {
                (
                    PointKey::Period(*p),
                    self.revenue(RecordSet::Actuals, *p, entity),
                    self.revenue(RecordSet::Budget, *p, entity),
                )
            })
            .collect();

        build_budget_comparison(period_range_label(periods), entity, keyed)
    }

    pub fn gross_margin(&self, periods: &[Period], entity: &EntityFilter) -> MetricResult {
        self.metric_series(Metric::GrossMargin, periods, entity)
    }

    pub fn ebitda(&self, periods: &[Period], entity: &EntityFilter) -> MetricResult {
        self.metric_series(Metric::Ebitda, periods, entity)
    }

    /// Revenue, COGS and Opex series feeding the EBITDA figure.
    pub fn ebitda_components(&self, periods: &[Period], entity: &EntityFilter) -> Vec<MetricResult> {
        [Metric::Revenue, Metric::Cogs, Metric::Opex]
            .iter()
            .map(|m| self.metric_series(*m, periods, entity))
            .collect()
    }

    /// Opex grouped by category and summed over `periods`, largest first.
    /// Requested periods without any actuals get a trailing `NoData` point.
    pub fn opex_breakdown(&self, periods: &[Period], entity: &EntityFilter) -> MetricResult {
        let mut categories: BTreeMap<String, MetricValue> = BTreeMap::new();
        let mut missing = Vec::new();

        for period in periods {
            let rows: Vec<&Record> = self
                .data
                .records(RecordSet::Actuals)
                .iter()
                .filter(|r| r.period == *period && entity.matches(&r.entity))
                .collect();

            if rows.is_empty() {
                missing.push(*period);
                continue;
            }

            for record in rows {
                let Some(category) = record.opex_category() else {
                    continue;
                };
                let converted = MetricValue::from(self.to_usd(record));
                let slot = categories
                    .entry(category.to_string())
                    .or_insert(MetricValue::Value(0.0));
                *slot = match (&*slot, converted) {
                    (MetricValue::Value(acc), MetricValue::Value(v)) => MetricValue::Value(acc + v),
                    (MetricValue::Value(_), marker) => marker,
                    (existing, _) => existing.clone(),
                };
            }
        }

        let mut points: Vec<MetricPoint> = categories
            .into_iter()
            .map(|(name, value)| MetricPoint::new(PointKey::Category(name), value))
            .collect();

        // Stable: equal amounts keep category-name order; markers sink to the end.
        points.sort_by(|a, b| match (a.value.as_f64(), b.value.as_f64()) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        points.extend(
            missing
                .into_iter()
                .map(|p| MetricPoint::new(PointKey::Period(p), MetricValue::NoData)),
        );

        MetricResult {
            metric_name: "Opex Breakdown".to_string(),
            scope: period_range_label(periods),
            entity: entity.clone(),
            unit: Unit::Usd,
            points,
        }
    }

    /// Top or worst `n` periods for a metric. Ties keep chronological order;
    /// periods without a numeric value are not ranked.
    pub fn ranking(
        &self,
        metric: Metric,
        direction: RankDirection,
        n: usize,
        periods: &[Period],
        entity: &EntityFilter,
    ) -> MetricResult {
        let mut chronological = periods.to_vec();
        chronological.sort();
        chronological.dedup();

        let series = self.metric_series(metric, &chronological, entity);
        let mut ranked: Vec<MetricPoint> = series
            .points
            .iter()
            .filter(|p| p.value.is_value())
            .cloned()
            .collect();

        ranked.sort_by(|a, b| {
            let x = a.value.as_f64().unwrap_or_default();
            let y = b.value.as_f64().unwrap_or_default();
            match direction {
                RankDirection::Top => y.total_cmp(&x),
                RankDirection::Worst => x.total_cmp(&y),
            }
        });
        ranked.truncate(n);

        let points = if ranked.is_empty() { series.points } else { ranked };

        MetricResult {
            metric_name: metric.name().to_string(),
            scope: series.scope,
            entity: entity.clone(),
            unit: metric.unit(),
            points,
        }
    }

    /// The same metric for each named period, no aggregation.
    pub fn compare_periods(&self, metric: Metric, periods: &[Period], entity: &EntityFilter) -> MetricResult {
        let mut ordered = periods.to_vec();
        ordered.sort();
        ordered.dedup();
        self.metric_series(metric, &ordered, entity)
    }

    /// Actual vs budget revenue per entity for one month.
    pub fn revenue_variance_by_entity(&self, period: Period) -> BudgetComparison {
        let entities: BTreeSet<&str> = self
            .data
            .records(RecordSet::Actuals)
            .iter()
            .chain(self.data.records(RecordSet::Budget))
            .filter(|r| r.period == period && r.is_revenue())
            .map(|r| r.entity.as_str())
            .collect();

        let keyed: Vec<(PointKey, Result<f64>, Result<f64>)> = if entities.is_empty() {
            vec![(
                PointKey::Period(period),
                Err(CopilotError::NoDataForPeriod(period)),
                Err(CopilotError::NoDataForPeriod(period)),
            )]
        } else {
            entities
                .into_iter()
                .map(|name| {
                    let filter = EntityFilter::Named(name.to_string());
                    // An entity with no rows on one side has nothing recorded there.
                    let actual = self
                        .revenue(RecordSet::Actuals, period, &filter)
                        .or_else(zero_if_no_data);
                    let budget = self
                        .revenue(RecordSet::Budget, period, &filter)
                        .or_else(zero_if_no_data);
                    (PointKey::Entity(name.to_string()), actual, budget)
                })
                .collect()
        };

        build_budget_comparison(period.to_string(), &EntityFilter::All, keyed)
    }

    /// Latest cash balance divided by the average monthly net burn over the
    /// trailing window. Burn comes from cash-balance changes when the cash set
    /// covers the window plus the month before it, otherwise from -EBITDA.
    pub fn cash_runway(&self, entity: &EntityFilter) -> RunwayAnalysis {
        let cash_periods: BTreeSet<Period> = self
            .data
            .records(RecordSet::Cash)
            .iter()
            .filter(|r| r.is_cash() && entity.matches(&r.entity))
            .map(|r| r.period)
            .collect();

        let as_of = cash_periods
            .last()
            .copied()
            .or_else(|| self.data.latest_period());

        let Some(as_of) = as_of else {
            return no_data_runway(entity);
        };

        let cash = MetricValue::from(self.cash_balance(as_of, entity));
        let cash_balance = single_point(Metric::CashBalance.name(), as_of, entity, Unit::Usd, cash.clone());

        let (burns, basis) = self.trailing_burn(as_of, entity);
        let net_burn = MetricResult {
            metric_name: "Net Burn".to_string(),
            scope: period_range_label(&burns.iter().map(|(p, _)| *p).collect::<Vec<_>>()),
            entity: entity.clone(),
            unit: Unit::Usd,
            points: burns
                .iter()
                .map(|(p, v)| MetricPoint::new(PointKey::Period(*p), v.clone()))
                .collect(),
        };

        let average_burn = average(&burns);
        let mut cash_out_period = None;

        let runway_value = match (&cash, &average_burn) {
            (MetricValue::Value(balance), Ok(avg)) => {
                if *avg <= 0.0 {
                    MetricValue::Infinite
                } else {
                    let months = (balance / avg).max(0.0);
                    if months.is_finite() && months < MAX_CASH_OUT_MONTHS {
                        cash_out_period = Some(as_of.shift(months.floor() as i32));
                    }
                    MetricValue::Value(months)
                }
            }
            (MetricValue::Value(_), Err(marker)) => marker.clone(),
            (marker, _) => marker.clone(),
        };

        RunwayAnalysis {
            runway: single_point("Cash Runway", as_of, entity, Unit::Months, runway_value),
            cash_balance,
            net_burn,
            average_burn: average_burn.ok(),
            basis: if burns.is_empty() { None } else { Some(basis) },
            cash_out_period,
        }
    }

    fn trailing_burn(&self, as_of: Period, entity: &EntityFilter) -> (Vec<(Period, MetricValue)>, BurnBasis) {
        let window = self.runway_window;

        let balances: Vec<Result<f64>> = Period::window_ending(as_of, window + 1)
            .into_iter()
            .map(|p| self.cash_balance(p, entity))
            .collect();

        let missing_rate = balances.iter().find_map(|b| match b {
            Err(CopilotError::MissingFxRate { currency, .. }) => Some(currency.clone()),
            _ => None,
        });
        if let Some(currency) = missing_rate {
            warn!(
                "Cash runway for {} has no FX rate for {} cash balances",
                entity.label(),
                currency
            );
            let burns = Period::window_ending(as_of, window)
                .into_iter()
                .map(|p| {
                    (
                        p,
                        MetricValue::Incomplete {
                            currency: currency.clone(),
                        },
                    )
                })
                .collect();
            return (burns, BurnBasis::CashDelta);
        }

        if balances.iter().all(|b| b.is_ok()) {
            let values: Vec<f64> = balances.into_iter().filter_map(|b| b.ok()).collect();
            let burns = Period::window_ending(as_of, window)
                .into_iter()
                .zip(values.windows(2))
                .map(|(p, pair)| (p, MetricValue::Value(pair[0] - pair[1])))
                .collect();
            return (burns, BurnBasis::CashDelta);
        }

        let Some(latest_actuals) = self.data.periods(RecordSet::Actuals).last().copied() else {
            return (Vec::new(), BurnBasis::Ebitda);
        };

        let burns = Period::window_ending(latest_actuals, window)
            .into_iter()
            .map(|p| {
                let burn = self.ebitda_usd(p, entity).map(|ebitda| -ebitda);
                (p, MetricValue::from(burn))
            })
            .collect();
        (burns, BurnBasis::Ebitda)
    }
}

fn zero_if_no_data(error: CopilotError) -> Result<f64> {
    match error {
        CopilotError::NoDataForPeriod(_) => Ok(0.0),
        other => Err(other),
    }
}

/// Mean of the burns, or the marker explaining why there is none.
fn average(burns: &[(Period, MetricValue)]) -> std::result::Result<f64, MetricValue> {
    if burns.is_empty() {
        return Err(MetricValue::NoData);
    }
    if let Some((_, marker)) = burns
        .iter()
        .find(|(_, v)| matches!(v, MetricValue::Incomplete { .. }))
    {
        return Err(marker.clone());
    }

    let values: Vec<f64> = burns.iter().filter_map(|(_, v)| v.as_f64()).collect();
    if values.len() < burns.len() {
        return Err(MetricValue::NoData);
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

fn single_point(name: &str, period: Period, entity: &EntityFilter, unit: Unit, value: MetricValue) -> MetricResult {
    MetricResult {
        metric_name: name.to_string(),
        scope: period.to_string(),
        entity: entity.clone(),
        unit,
        points: vec![MetricPoint::new(PointKey::Period(period), value)],
    }
}

fn no_data_runway(entity: &EntityFilter) -> RunwayAnalysis {
    let empty = |name: &str, unit: Unit| MetricResult {
        metric_name: name.to_string(),
        scope: String::new(),
        entity: entity.clone(),
        unit,
        points: vec![MetricPoint::new(
            PointKey::Category("latest".to_string()),
            MetricValue::NoData,
        )],
    };

    RunwayAnalysis {
        runway: empty("Cash Runway", Unit::Months),
        cash_balance: empty(Metric::CashBalance.name(), Unit::Usd),
        net_burn: empty("Net Burn", Unit::Usd),
        average_burn: None,
        basis: None,
        cash_out_period: None,
    }
}

fn build_budget_comparison(
    scope: String,
    entity: &EntityFilter,
    keyed: Vec<(PointKey, Result<f64>, Result<f64>)>,
) -> BudgetComparison {
    let series = |name: &str, unit: Unit, points: Vec<MetricPoint>| MetricResult {
        metric_name: name.to_string(),
        scope: scope.clone(),
        entity: entity.clone(),
        unit,
        points,
    };

    let mut actual = Vec::new();
    let mut budget = Vec::new();
    let mut variance = Vec::new();
    let mut variance_pct = Vec::new();

    for (key, actual_usd, budget_usd) in keyed {
        let (var, pct) = match (&actual_usd, &budget_usd) {
            (Ok(a), Ok(b)) => {
                let pct = if *b == 0.0 {
                    MetricValue::Undefined
                } else {
                    MetricValue::Value((a - b) * 100.0 / b)
                };
                (MetricValue::Value(a - b), pct)
            }
            // A missing FX rate on either side marks the variance incomplete.
            (Err(CopilotError::MissingFxRate { currency, .. }), _)
            | (_, Err(CopilotError::MissingFxRate { currency, .. })) => {
                let marker = MetricValue::Incomplete {
                    currency: currency.clone(),
                };
                (marker.clone(), marker)
            }
            _ => (MetricValue::NoData, MetricValue::NoData),
        };

        actual.push(MetricPoint::new(key.clone(), MetricValue::from(actual_usd)));
        budget.push(MetricPoint::new(key.clone(), MetricValue::from(budget_usd)));
        variance.push(MetricPoint::new(key.clone(), var));
        variance_pct.push(MetricPoint::new(key, pct));
    }

    BudgetComparison {
        actual: series("Revenue (Actual)", Unit::Usd, actual),
        budget: series("Revenue (Budget)", Unit::Usd, budget),
        variance: series("Revenue Variance", Unit::Usd, variance),
        variance_pct: series("Revenue Variance %", Unit::Percent, variance_pct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Period {
        Period::parse(text).unwrap()
    }

    fn usd(period: &str, entity: &str, account: &str, amount: f64) -> Record {
        Record::new(p(period), entity, account, amount, "USD")
    }

    fn dataset(actuals: Vec<Record>, budget: Vec<Record>, cash: Vec<Record>, fx: Vec<FxRate>) -> Dataset {
        Dataset::new(actuals, budget, cash, fx).unwrap()
    }

    #[test]
    fn test_revenue_vs_budget_variance() {
        let data = dataset(
            vec![usd("2025-06", "ParentCo", "Revenue", 120_000.0)],
            vec![usd("2025-06", "ParentCo", "Revenue", 100_000.0)],
            vec![],
            vec![],
        );
        let engine = MetricEngine::new(&data);
        let cmp = engine.revenue_vs_budget(&[p("2025-06")], &EntityFilter::All);

        assert_eq!(cmp.actual.value_for(p("2025-06")), Some(&MetricValue::Value(120_000.0)));
        assert_eq!(cmp.budget.value_for(p("2025-06")), Some(&MetricValue::Value(100_000.0)));
        assert_eq!(cmp.variance.value_for(p("2025-06")), Some(&MetricValue::Value(20_000.0)));
        assert_eq!(cmp.variance_pct.value_for(p("2025-06")), Some(&MetricValue::Value(20.0)));
    }

    #[test]
    fn test_zero_budget_variance_pct_is_undefined() {
        let data = dataset(
            vec![usd("2025-06", "ParentCo", "Revenue", 500.0)],
            vec![usd("2025-06", "ParentCo", "COGS", 10.0)],
            vec![],
            vec![],
        );
        let cmp = MetricEngine::new(&data).revenue_vs_budget(&[p("2025-06")], &EntityFilter::All);

        assert_eq!(cmp.variance.value_for(p("2025-06")), Some(&MetricValue::Value(500.0)));
        assert_eq!(cmp.variance_pct.value_for(p("2025-06")), Some(&MetricValue::Undefined));
    }

    #[test]
    fn test_fx_conversion_and_missing_rate() {
        let data = dataset(
            vec![
                usd("2025-06", "ParentCo", "Revenue", 1_000.0),
                Record::new(p("2025-06"), "EMEA", "Revenue", 1_000.0, "EUR"),
                Record::new(p("2025-07"), "EMEA", "Revenue", 1_000.0, "EUR"),
            ],
            vec![],
            vec![],
            vec![FxRate::new(p("2025-06"), "EUR", 1.1)],
        );
        let engine = MetricEngine::new(&data);
        let series = engine.metric_series(Metric::Revenue, &[p("2025-06"), p("2025-07")], &EntityFilter::All);

        match series.value_for(p("2025-06")) {
            Some(MetricValue::Value(v)) => assert!((v - 2_100.0).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            series.value_for(p("2025-07")),
            Some(&MetricValue::Incomplete {
                currency: "EUR".to_string()
            })
        );
    }

    #[test]
    fn test_revenue_vs_budget_with_missing_budget_rate() {
        let data = dataset(
            vec![usd("2025-06", "ParentCo", "Revenue", 1_000.0)],
            vec![Record::new(p("2025-06"), "EMEA", "Revenue", 900.0, "EUR")],
            vec![],
            vec![],
        );
        let cmp = MetricEngine::new(&data).revenue_vs_budget(&[p("2025-06")], &EntityFilter::All);
        let incomplete = MetricValue::Incomplete {
            currency: "EUR".to_string(),
        };

        assert_eq!(cmp.actual.value_for(p("2025-06")), Some(&MetricValue::Value(1_000.0)));
        assert_eq!(cmp.budget.value_for(p("2025-06")), Some(&incomplete));
        assert_eq!(cmp.variance.value_for(p("2025-06")), Some(&incomplete));
        assert_eq!(cmp.variance_pct.value_for(p("2025-06")), Some(&incomplete));
    }

    #[test]
    fn test_gross_margin_zero_revenue_is_undefined() {
        let data = dataset(
            vec![
                usd("2025-06", "ParentCo", "Revenue", 1_000.0),
                usd("2025-06", "ParentCo", "COGS", 400.0),
                usd("2025-07", "ParentCo", "Revenue", 0.0),
                usd("2025-07", "ParentCo", "COGS", 5_000.0),
            ],
            vec![],
            vec![],
            vec![],
        );
        let margin = MetricEngine::new(&data).gross_margin(&[p("2025-06"), p("2025-07")], &EntityFilter::All);

        assert_eq!(margin.unit, Unit::Percent);
        assert_eq!(margin.value_for(p("2025-06")), Some(&MetricValue::Value(60.0)));
        assert_eq!(margin.value_for(p("2025-07")), Some(&MetricValue::Undefined));
    }

    #[test]
    fn test_missing_period_is_marked_not_zero() {
        let data = dataset(vec![usd("2025-06", "ParentCo", "Revenue", 1.0)], vec![], vec![], vec![]);
        let series = MetricEngine::new(&data).ebitda(&[p("2025-05"), p("2025-06")], &EntityFilter::All);

        assert_eq!(series.points.len(), 2);
        assert_eq!(series.value_for(p("2025-05")), Some(&MetricValue::NoData));
        assert_eq!(series.value_for(p("2025-06")), Some(&MetricValue::Value(1.0)));
    }

    #[test]
    fn test_opex_breakdown_sorted_and_consistent_with_total() {
        let data = dataset(
            vec![
                usd("2025-06", "ParentCo", "Revenue", 10_000.0),
                usd("2025-06", "ParentCo", "Opex:Sales", 2_000.0),
                usd("2025-06", "ParentCo", "Opex:Marketing", 3_000.0),
            ],
            vec![],
            vec![],
            vec![],
        );
        let engine = MetricEngine::new(&data);
        let breakdown = engine.opex_breakdown(&[p("2025-06")], &EntityFilter::All);

        let pairs: Vec<(String, f64)> = breakdown
            .numeric_points()
            .map(|(k, v)| (k.label(), v))
            .collect();
        assert_eq!(
            pairs,
            vec![("Marketing".to_string(), 3_000.0), ("Sales".to_string(), 2_000.0)]
        );

        let total = engine.metric_series(Metric::Opex, &[p("2025-06")], &EntityFilter::All);
        assert_eq!(breakdown.complete_total(), total.complete_total());
        assert_eq!(breakdown.complete_total(), Some(5_000.0));
    }

    #[test]
    fn test_opex_breakdown_marks_missing_period() {
        let data = dataset(vec![usd("2025-06", "ParentCo", "Opex:Admin", 50.0)], vec![], vec![], vec![]);
        let breakdown = MetricEngine::new(&data).opex_breakdown(&[p("2025-05"), p("2025-06")], &EntityFilter::All);

        assert_eq!(breakdown.value_for_key("Admin"), Some(&MetricValue::Value(50.0)));
        assert_eq!(breakdown.value_for(p("2025-05")), Some(&MetricValue::NoData));
    }

    #[test]
    fn test_cash_runway_from_cash_deltas() {
        let data = dataset(
            vec![],
            vec![],
            vec![
                usd("2025-03", "ParentCo", "Cash", 80_000.0),
                usd("2025-04", "ParentCo", "Cash", 70_000.0),
                usd("2025-05", "ParentCo", "Cash", 60_000.0),
                usd("2025-06", "ParentCo", "Cash", 50_000.0),
            ],
            vec![],
        );
        let engine = MetricEngine::new(&data);
        let analysis = engine.cash_runway(&EntityFilter::All);

        assert_eq!(analysis.basis, Some(BurnBasis::CashDelta));
        assert_eq!(analysis.average_burn, Some(10_000.0));
        assert_eq!(analysis.runway.value_for(p("2025-06")), Some(&MetricValue::Value(5.0)));
        assert_eq!(analysis.cash_out_period, Some(p("2025-11")));

        // Repeated evaluation gives the same answer.
        assert_eq!(engine.cash_runway(&EntityFilter::All), analysis);
    }

    #[test]
    fn test_cash_runway_near_zero_ebitda_burn_has_no_cash_out() {
        let mut actuals = Vec::new();
        for month in ["2025-04", "2025-05", "2025-06"] {
            actuals.push(usd(month, "ParentCo", "Revenue", 0.3));
            actuals.push(usd(month, "ParentCo", "COGS", 0.1));
            actuals.push(usd(month, "ParentCo", "Opex:Admin", 0.2));
        }
        let data = dataset(
            actuals,
            vec![],
            vec![usd("2025-06", "ParentCo", "Cash", 40_000.0)],
            vec![],
        );
        let analysis = MetricEngine::new(&data).cash_runway(&EntityFilter::All);

        assert_eq!(analysis.basis, Some(BurnBasis::Ebitda));
        assert_eq!(analysis.cash_out_period, None);
        match analysis.runway.value_for(p("2025-06")) {
            Some(MetricValue::Infinite) => {}
            Some(MetricValue::Value(months)) => assert!(*months >= MAX_CASH_OUT_MONTHS),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cash_runway_large_balance_small_burn_has_no_cash_out() {
        let data = dataset(
            vec![],
            vec![],
            vec![
                usd("2025-03", "ParentCo", "Cash", 5_000_000_003.0),
                usd("2025-04", "ParentCo", "Cash", 5_000_000_002.0),
                usd("2025-05", "ParentCo", "Cash", 5_000_000_001.0),
                usd("2025-06", "ParentCo", "Cash", 5_000_000_000.0),
            ],
            vec![],
        );
        let analysis = MetricEngine::new(&data).cash_runway(&EntityFilter::All);

        assert_eq!(analysis.average_burn, Some(1.0));
        assert_eq!(
            analysis.runway.value_for(p("2025-06")),
            Some(&MetricValue::Value(5_000_000_000.0))
        );
        assert_eq!(analysis.cash_out_period, None);
    }

    #[test]
    fn test_cash_runway_reports_missing_fx_on_cash_balances() {
        let cash = ["2025-03", "2025-04", "2025-05", "2025-06"]
            .iter()
            .map(|m| Record::new(p(m), "EMEA", "Cash", 10_000.0, "EUR"))
            .collect();
        let data = dataset(
            vec![usd("2025-06", "ParentCo", "Revenue", 1_000.0)],
            vec![],
            cash,
            vec![],
        );
        let analysis = MetricEngine::new(&data).cash_runway(&EntityFilter::All);
        let incomplete = MetricValue::Incomplete {
            currency: "EUR".to_string(),
        };

        assert_eq!(analysis.basis, Some(BurnBasis::CashDelta));
        assert!(analysis.net_burn.points.iter().all(|pt| pt.value == incomplete));
        assert_eq!(analysis.runway.value_for(p("2025-06")), Some(&incomplete));
        assert_eq!(analysis.average_burn, None);
    }

    #[test]
    fn test_cash_runway_infinite_without_burn() {
        let data = dataset(
            vec![],
            vec![],
            vec![
                usd("2025-03", "ParentCo", "Cash", 50_000.0),
                usd("2025-04", "ParentCo", "Cash", 50_000.0),
                usd("2025-05", "ParentCo", "Cash", 50_000.0),
                usd("2025-06", "ParentCo", "Cash", 50_000.0),
            ],
            vec![],
        );
        let analysis = MetricEngine::new(&data).cash_runway(&EntityFilter::All);

        assert_eq!(analysis.average_burn, Some(0.0));
        assert_eq!(analysis.runway.value_for(p("2025-06")), Some(&MetricValue::Infinite));
        assert_eq!(analysis.cash_out_period, None);
    }

    #[test]
    fn test_cash_runway_falls_back_to_ebitda() {
        let mut actuals = Vec::new();
        for month in ["2025-04", "2025-05", "2025-06"] {
            actuals.push(usd(month, "ParentCo", "Revenue", 10_000.0));
            actuals.push(usd(month, "ParentCo", "COGS", 4_000.0));
            actuals.push(usd(month, "ParentCo", "Opex:Payroll", 14_000.0));
        }
        let data = dataset(actuals, vec![], vec![usd("2025-06", "ParentCo", "Cash", 40_000.0)], vec![]);
        let analysis = MetricEngine::new(&data).cash_runway(&EntityFilter::All);

        assert_eq!(analysis.basis, Some(BurnBasis::Ebitda));
        assert_eq!(analysis.average_burn, Some(8_000.0));
        assert_eq!(analysis.runway.value_for(p("2025-06")), Some(&MetricValue::Value(5.0)));
    }

    #[test]
    fn test_cash_runway_without_enough_history() {
        let data = dataset(
            vec![usd("2025-06", "ParentCo", "Revenue", 1.0)],
            vec![],
            vec![usd("2025-06", "ParentCo", "Cash", 40_000.0)],
            vec![],
        );
        let analysis = MetricEngine::new(&data).cash_runway(&EntityFilter::All);

        assert_eq!(analysis.runway.value_for(p("2025-06")), Some(&MetricValue::NoData));
        assert_eq!(analysis.average_burn, None);
    }

    #[test]
    fn test_ranking_top_n_and_ties() {
        let revenue = [
            ("2025-01", 100.0),
            ("2025-02", 300.0),
            ("2025-03", 200.0),
            ("2025-04", 300.0),
            ("2025-05", 50.0),
        ];
        let actuals = revenue
            .iter()
            .map(|(m, v)| usd(m, "ParentCo", "Revenue", *v))
            .collect();
        let data = dataset(actuals, vec![], vec![], vec![]);
        let engine = MetricEngine::new(&data);
        let periods: Vec<Period> = revenue.iter().map(|(m, _)| p(m)).collect();

        let top = engine.ranking(Metric::Revenue, RankDirection::Top, 3, &periods, &EntityFilter::All);
        let keys: Vec<Period> = top.points.iter().filter_map(|pt| pt.key.period()).collect();
        assert_eq!(keys, vec![p("2025-02"), p("2025-04"), p("2025-03")]);

        let worst = engine.ranking(Metric::Revenue, RankDirection::Worst, 1, &periods, &EntityFilter::All);
        assert_eq!(worst.points.len(), 1);
        assert_eq!(worst.points[0].key, PointKey::Period(p("2025-05")));

        let again = engine.ranking(Metric::Revenue, RankDirection::Top, 3, &periods, &EntityFilter::All);
        assert_eq!(again, top);
    }

    #[test]
    fn test_revenue_variance_by_entity() {
        let data = dataset(
            vec![
                usd("2025-06", "ParentCo", "Revenue", 900.0),
                usd("2025-06", "EMEA", "Revenue", 1_200.0),
            ],
            vec![
                usd("2025-06", "ParentCo", "Revenue", 1_000.0),
                usd("2025-06", "EMEA", "Revenue", 1_000.0),
            ],
            vec![],
            vec![],
        );
        let cmp = MetricEngine::new(&data).revenue_variance_by_entity(p("2025-06"));

        assert_eq!(cmp.variance.value_for_key("ParentCo"), Some(&MetricValue::Value(-100.0)));
        assert_eq!(cmp.variance.value_for_key("EMEA"), Some(&MetricValue::Value(200.0)));
    }

    #[test]
    fn test_entity_filter_limits_aggregation() {
        let data = dataset(
            vec![
                usd("2025-06", "ParentCo", "Revenue", 900.0),
                usd("2025-06", "EMEA", "Revenue", 1_200.0),
            ],
            vec![],
            vec![],
            vec![],
        );
        let engine = MetricEngine::new(&data);
        let emea = EntityFilter::Named("emea".to_string());

        assert_eq!(
            engine.metric_value(Metric::Revenue, p("2025-06"), &emea),
            MetricValue::Value(1_200.0)
        );
        assert_eq!(
            engine.metric_value(Metric::Revenue, p("2025-06"), &EntityFilter::All),
            MetricValue::Value(2_100.0)
        );
    }
}
