//! # CFO Copilot
//!
//! Answers natural-language finance questions over monthly actuals, budget, cash
//! and FX records.
//!
//! ## Pipeline
//!
//! - **Planner**: classifies the question into an [`Intent`] with explicit periods,
//!   entity and metric, using ordered keyword rules and the vocabulary of the loaded data
//! - **Metric Engine**: computes revenue vs budget, gross margin, opex breakdown,
//!   EBITDA, cash runway, rankings and comparisons, converting every amount to USD first
//! - **Answer Assembler**: turns the results into a summary, the metric results and an
//!   optional chart description
//!
//! Missing data never fails a question: each point carries a [`MetricValue`] that is
//! either a number or the reason there is none (no data, missing FX rate, undefined,
//! infinite).
//!
//! ## Example
//!
//! ```rust,ignore
//! use cfo_copilot::*;
//!
//! let june = Period::parse("2025-06")?;
//! let dataset = Dataset::new(
//!     vec![Record::new(june, "ParentCo", "Revenue", 120_000.0, "USD")],
//!     vec![Record::new(june, "ParentCo", "Revenue", 100_000.0, "USD")],
//!     vec![],
//!     vec![],
//! )?;
//!
//! let copilot = Copilot::new(dataset);
//! let answer = copilot.ask("What was June 2025 revenue vs budget?");
//! println!("{}", answer.summary);
//! ```

pub mod assembler;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod intent;
pub mod planner;
pub mod schema;
pub mod utils;

pub use assembler::{Answer, AnswerAssembler, ChartKind, ChartPoint, ChartSeries, ChartSpec};
pub use config::CopilotConfig;
pub use dataset::{Dataset, RecordSet};
pub use engine::{BudgetComparison, BurnBasis, MetricEngine, RunwayAnalysis};
pub use error::{CopilotError, Result};
pub use ingestion::*;
pub use intent::{Intent, KeyMetric, RankDirection};
pub use planner::{Planner, PlannerContext};
pub use schema::*;

use log::{info, warn};

/// A question-answering session over one read-only [`Dataset`].
#[derive(Debug, Clone)]
pub struct Copilot {
    dataset: Dataset,
    context: PlannerContext,
    config: CopilotConfig,
}

impl Copilot {
    pub fn new(dataset: Dataset) -> Self {
        let context = dataset.planner_context();
        Self {
            dataset,
            context,
            config: CopilotConfig::default(),
        }
    }

    pub fn with_config(dataset: Dataset, config: CopilotConfig) -> Result<Self> {
        config.validate()?;
        let context = dataset.planner_context();
        Ok(Self {
            dataset,
            context,
            config,
        })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn context(&self) -> &PlannerContext {
        &self.context
    }

    pub fn config(&self) -> &CopilotConfig {
        &self.config
    }

    pub fn plan(&self, question: &str) -> Result<Intent> {
        Planner::with_config(&self.context, &self.config).plan(question)
    }

    /// Plan, compute and assemble. Questions that cannot be planned get a
    /// clarification answer instead of an error.
    pub fn ask(&self, question: &str) -> Answer {
        let assembler = AnswerAssembler::new(&self.config);

        match self.plan(question) {
            Ok(intent) => {
                info!("Answering '{}' as {}", question.trim(), intent.name());
                let engine = MetricEngine::new(&self.dataset)
                    .with_runway_window(self.config.runway_window_months);
                assembler.assemble(&intent, &engine)
            }
            Err(e) => {
                warn!("{}", e);
                assembler.clarification(&e)
            }
        }
    }
}
