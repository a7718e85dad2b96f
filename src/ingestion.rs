use crate::dataset::Dataset;
use crate::error::Result;
use crate::schema::{
    FxRate, Period, Record, BASE_CURRENCY, CASH_ACCOUNT, COGS_ACCOUNT, OPEX_PREFIX,
    REVENUE_ACCOUNT,
};
use serde::{Deserialize, Serialize};

pub const CONSOLIDATED_ENTITY: &str = "Consolidated";

/// An actuals or budget row as a CSV reader yields it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRow {
    pub month: Period,
    pub entity: String,
    pub account_category: String,
    pub amount: f64,
    pub currency: String,
}

/// A month-end cash balance, already in USD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashRow {
    pub month: Period,
    #[serde(default)]
    pub entity: Option<String>,
    pub cash_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxRow {
    pub month: Period,
    pub currency: String,
    pub rate_to_usd: f64,
}

impl From<LedgerRow> for Record {
    fn from(row: LedgerRow) -> Self {
        Record::new(
            row.month,
            row.entity.trim(),
            normalize_account(&row.account_category),
            row.amount,
            row.currency.trim().to_ascii_uppercase(),
        )
    }
}

impl From<CashRow> for Record {
    fn from(row: CashRow) -> Self {
        let entity = row
            .entity
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| CONSOLIDATED_ENTITY.to_string());
        Record::new(row.month, entity, CASH_ACCOUNT, row.cash_usd, BASE_CURRENCY)
    }
}

impl From<FxRow> for FxRate {
    fn from(row: FxRow) -> Self {
        FxRate::new(row.month, row.currency.trim().to_ascii_uppercase(), row.rate_to_usd)
    }
}

/// Canonical account names: "Revenue", "COGS", "Opex:<Category>".
pub fn normalize_account(raw: &str) -> String {
    let trimmed = raw.trim();

    if trimmed.eq_ignore_ascii_case(REVENUE_ACCOUNT) {
        return REVENUE_ACCOUNT.to_string();
    }
    if trimmed.eq_ignore_ascii_case(COGS_ACCOUNT) {
        return COGS_ACCOUNT.to_string();
    }
    if trimmed.eq_ignore_ascii_case(CASH_ACCOUNT) {
        return CASH_ACCOUNT.to_string();
    }

    if let Some((head, category)) = trimmed.split_once(':') {
        if head.trim().eq_ignore_ascii_case("opex") {
            return format!("{}{}", OPEX_PREFIX, category.trim());
        }
    }

    trimmed.to_string()
}

impl Dataset {
    pub fn from_rows(
        actuals: Vec<LedgerRow>,
        budget: Vec<LedgerRow>,
        cash: Vec<CashRow>,
        fx: Vec<FxRow>,
    ) -> Result<Self> {
        Dataset::new(
            actuals.into_iter().map(Record::from).collect(),
            budget.into_iter().map(Record::from).collect(),
            cash.into_iter().map(Record::from).collect(),
            fx.into_iter().map(FxRate::from).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RecordSet;

    #[test]
    fn test_normalize_account() {
        assert_eq!(normalize_account("Opex: Marketing"), "Opex:Marketing");
        assert_eq!(normalize_account("opex:R&D "), "Opex:R&D");
        assert_eq!(normalize_account(" revenue"), "Revenue");
        assert_eq!(normalize_account("cogs"), "COGS");
        assert_eq!(normalize_account("Other Income"), "Other Income");
    }

    #[test]
    fn test_from_rows_canonicalizes() {
        let june = Period::parse("2025-06-01").unwrap();
        let data = Dataset::from_rows(
            vec![LedgerRow {
                month: june,
                entity: " ParentCo ".to_string(),
                account_category: "Opex: Admin".to_string(),
                amount: 10.0,
                currency: "usd".to_string(),
            }],
            vec![],
            vec![CashRow {
                month: june,
                entity: None,
                cash_usd: 500.0,
            }],
            vec![FxRow {
                month: june,
                currency: "eur".to_string(),
                rate_to_usd: 1.1,
            }],
        )
        .unwrap();

        let actual = &data.records(RecordSet::Actuals)[0];
        assert_eq!(actual.entity, "ParentCo");
        assert_eq!(actual.account, "Opex:Admin");
        assert_eq!(actual.currency, "USD");

        let cash = &data.records(RecordSet::Cash)[0];
        assert_eq!(cash.entity, CONSOLIDATED_ENTITY);
        assert!(cash.is_cash());
        assert_eq!(data.fx_rate(june, "EUR"), Some(1.1));
    }
}
