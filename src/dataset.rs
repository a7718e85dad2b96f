use crate::error::{CopilotError, Result};
use crate::planner::PlannerContext;
use crate::schema::{FxRate, Period, Record};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSet {
    Actuals,
    Budget,
    Cash,
}

impl fmt::Display for RecordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordSet::Actuals => "actuals",
            RecordSet::Budget => "budget",
            RecordSet::Cash => "cash",
        };
        f.write_str(name)
    }
}

/// The four record sets of a session. Read-only once constructed.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    actuals: Vec<Record>,
    budget: Vec<Record>,
    cash: Vec<Record>,
    fx: BTreeMap<(Period, String), f64>,
}

impl Dataset {
    pub fn new(
        actuals: Vec<Record>,
        budget: Vec<Record>,
        cash: Vec<Record>,
        fx: Vec<FxRate>,
    ) -> Result<Self> {
        validate_records(RecordSet::Actuals, &actuals)?;
        validate_records(RecordSet::Budget, &budget)?;
        validate_records(RecordSet::Cash, &cash)?;
        let fx = index_fx_rates(&fx)?;

        debug!(
            "Loaded dataset: {} actuals, {} budget, {} cash records, {} FX rates",
            actuals.len(),
            budget.len(),
            cash.len(),
            fx.len()
        );

        Ok(Self {
            actuals,
            budget,
            cash,
            fx,
        })
    }

    pub fn records(&self, set: RecordSet) -> &[Record] {
        match set {
            RecordSet::Actuals => &self.actuals,
            RecordSet::Budget => &self.budget,
            RecordSet::Cash => &self.cash,
        }
    }

    pub fn fx_rate(&self, period: Period, currency: &str) -> Option<f64> {
        self.fx
            .get(&(period, currency.to_ascii_uppercase()))
            .copied()
    }

    pub fn periods(&self, set: RecordSet) -> BTreeSet<Period> {
        self.records(set).iter().map(|r| r.period).collect()
    }

    pub fn entities(&self) -> BTreeSet<String> {
        self.actuals
            .iter()
            .chain(self.budget.iter())
            .chain(self.cash.iter())
            .map(|r| r.entity.clone())
            .collect()
    }

    /// Most recent actuals month, falling back to the cash set.
    pub fn latest_period(&self) -> Option<Period> {
        self.periods(RecordSet::Actuals)
            .last()
            .copied()
            .or_else(|| self.periods(RecordSet::Cash).last().copied())
    }

    pub fn planner_context(&self) -> PlannerContext {
        let mut periods = self.periods(RecordSet::Actuals);
        if periods.is_empty() {
            periods = self.periods(RecordSet::Cash);
        }
        PlannerContext::new(self.entities().into_iter().collect(), periods)
    }
}

fn validate_records(set: RecordSet, records: &[Record]) -> Result<()> {
    for (index, record) in records.iter().enumerate() {
        let invalid = |details: String| CopilotError::InvalidRecord {
            set: set.to_string(),
            index,
            details,
        };

        if record.entity.trim().is_empty() {
            return Err(invalid("entity is empty".to_string()));
        }
        if record.account.trim().is_empty() {
            return Err(invalid("account is empty".to_string()));
        }
        if record.currency.trim().is_empty() {
            return Err(invalid("currency is empty".to_string()));
        }
        if !record.amount.is_finite() {
            return Err(invalid(format!("amount {} is not finite", record.amount)));
        }
    }
    Ok(())
}

fn index_fx_rates(rates: &[FxRate]) -> Result<BTreeMap<(Period, String), f64>> {
    let mut index = BTreeMap::new();

    for (i, rate) in rates.iter().enumerate() {
        let invalid = |details: String| CopilotError::InvalidRecord {
            set: "fx".to_string(),
            index: i,
            details,
        };

        if rate.currency.trim().is_empty() {
            return Err(invalid("currency is empty".to_string()));
        }
        if !rate.rate_to_usd.is_finite() || rate.rate_to_usd <= 0.0 {
            return Err(invalid(format!(
                "rate_to_usd {} must be a positive number",
                rate.rate_to_usd
            )));
        }

        let key = (rate.period, rate.currency.trim().to_ascii_uppercase());
        if let Some(existing) = index.insert(key, rate.rate_to_usd) {
            if existing != rate.rate_to_usd {
                return Err(invalid(format!(
                    "conflicting rates {} and {} for {} in {}",
                    existing, rate.rate_to_usd, rate.currency, rate.period
                )));
            }
        }
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Period {
        Period::parse(text).unwrap()
    }

    #[test]
    fn test_rejects_malformed_records() {
        let bad = vec![Record::new(p("2025-06"), "", "Revenue", 1.0, "USD")];
        let err = Dataset::new(bad, vec![], vec![], vec![]).unwrap_err();
        assert!(matches!(err, CopilotError::InvalidRecord { index: 0, .. }));

        let bad = vec![Record::new(p("2025-06"), "ParentCo", "Revenue", f64::NAN, "USD")];
        assert!(Dataset::new(vec![], bad, vec![], vec![]).is_err());
    }

    #[test]
    fn test_rejects_conflicting_fx_rates() {
        let fx = vec![
            FxRate::new(p("2025-06"), "EUR", 1.1),
            FxRate::new(p("2025-06"), "eur", 1.2),
        ];
        assert!(Dataset::new(vec![], vec![], vec![], fx).is_err());

        let fx = vec![FxRate::new(p("2025-06"), "EUR", 0.0)];
        assert!(Dataset::new(vec![], vec![], vec![], fx).is_err());
    }

    #[test]
    fn test_fx_lookup_is_case_insensitive() {
        let fx = vec![FxRate::new(p("2025-06"), "eur", 1.1)];
        let data = Dataset::new(vec![], vec![], vec![], fx).unwrap();
        assert_eq!(data.fx_rate(p("2025-06"), "EUR"), Some(1.1));
        assert_eq!(data.fx_rate(p("2025-07"), "EUR"), None);
    }

    #[test]
    fn test_latest_period_and_entities() {
        let actuals = vec![
            Record::new(p("2025-05"), "ParentCo", "Revenue", 1.0, "USD"),
            Record::new(p("2025-06"), "EMEA", "Revenue", 1.0, "EUR"),
        ];
        let cash = vec![Record::new(p("2025-07"), "ParentCo", "Cash", 1.0, "USD")];
        let data = Dataset::new(actuals, vec![], cash, vec![]).unwrap();

        assert_eq!(data.latest_period(), Some(p("2025-06")));
        assert_eq!(
            data.entities().into_iter().collect::<Vec<_>>(),
            vec!["EMEA".to_string(), "ParentCo".to_string()]
        );
    }
}
