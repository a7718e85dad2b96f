use crate::error::{CopilotError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CopilotConfig {
    #[schemars(description = "Months covered by a trend question that names no window (e.g. 'revenue trend').")]
    pub default_trend_months: usize,

    #[schemars(description = "Trailing months averaged to estimate monthly net burn for cash runway.")]
    pub runway_window_months: usize,

    #[schemars(description = "Decimal places shown for percentages in answer text.")]
    pub percent_decimals: usize,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            default_trend_months: 6,
            runway_window_months: 3,
            percent_decimals: 1,
        }
    }
}

impl CopilotConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=120).contains(&self.default_trend_months) {
            return Err(CopilotError::InvalidConfig(format!(
                "default_trend_months {} must be between 1 and 120",
                self.default_trend_months
            )));
        }
        if !(1..=24).contains(&self.runway_window_months) {
            return Err(CopilotError::InvalidConfig(format!(
                "runway_window_months {} must be between 1 and 24",
                self.runway_window_months
            )));
        }
        if self.percent_decimals > 4 {
            return Err(CopilotError::InvalidConfig(format!(
                "percent_decimals {} must be at most 4",
                self.percent_decimals
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CopilotConfig::from_json(r#"{ "default_trend_months": 12 }"#).unwrap();
        assert_eq!(config.default_trend_months, 12);
        assert_eq!(config.runway_window_months, 3);
        assert_eq!(config.percent_decimals, 1);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert!(matches!(
            CopilotConfig::from_json(r#"{ "runway_window_months": 0 }"#),
            Err(CopilotError::InvalidConfig(_))
        ));
        assert!(matches!(
            CopilotConfig::from_json("not json"),
            Err(CopilotError::SerializationError(_))
        ));
    }
}
