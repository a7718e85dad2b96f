use crate::schema::{EntityFilter, Metric, Period};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KeyMetric {
    Ebitda,
    CashRunway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RankDirection {
    /// Highest values first.
    Top,
    /// Lowest values first.
    Worst,
}

/// What a question asks for, with the parameters extracted from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    RevenueVsBudget {
        periods: Vec<Period>,
        entity: EntityFilter,
    },
    MarginTrend {
        periods: Vec<Period>,
        entity: EntityFilter,
    },
    MetricTrend {
        metric: Metric,
        periods: Vec<Period>,
        entity: EntityFilter,
    },
    OpexBreakdown {
        periods: Vec<Period>,
        entity: EntityFilter,
    },
    /// `period` is `None` for cash runway, which always looks at the latest months.
    KeyMetric {
        metric: KeyMetric,
        period: Option<Period>,
        entity: EntityFilter,
    },
    EntityPerformance {
        period: Period,
    },
    Ranking {
        metric: Metric,
        direction: RankDirection,
        n: usize,
        periods: Vec<Period>,
        entity: EntityFilter,
    },
    MultiMonthCompare {
        metric: Metric,
        periods: Vec<Period>,
        entity: EntityFilter,
    },
    SingleMetric {
        metric: Metric,
        period: Period,
        entity: EntityFilter,
    },
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::RevenueVsBudget { .. } => "revenue_vs_budget",
            Intent::MarginTrend { .. } => "margin_trend",
            Intent::MetricTrend { .. } => "metric_trend",
            Intent::OpexBreakdown { .. } => "opex_breakdown",
            Intent::KeyMetric {
                metric: KeyMetric::Ebitda,
                ..
            } => "ebitda",
            Intent::KeyMetric {
                metric: KeyMetric::CashRunway,
                ..
            } => "cash_runway",
            Intent::EntityPerformance { .. } => "entity_performance",
            Intent::Ranking { .. } => "ranking",
            Intent::MultiMonthCompare { .. } => "multi_month_compare",
            Intent::SingleMetric { .. } => "single_metric",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_serializes_with_tag() {
        let intent = Intent::KeyMetric {
            metric: KeyMetric::CashRunway,
            period: None,
            entity: EntityFilter::All,
        };
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["intent"], "key_metric");
        assert_eq!(json["metric"], "cash_runway");
        assert_eq!(intent.name(), "cash_runway");

        let back: Intent = serde_json::from_value(json).unwrap();
        assert_eq!(back, intent);
    }
}
