use cfo_copilot::*;
use serde::de::DeserializeOwned;
use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::result::Result;

const SAMPLE_QUESTIONS: &[&str] = &[
    "What was June 2025 revenue vs budget in USD?",
    "Show Gross Margin % trend for the last 3 months.",
    "Break down Opex by category for June 2025.",
    "What is our cash runway right now?",
    "What was EBITDA in June 2025?",
    "Which entities missed their revenue budget in June 2025?",
    "What were the top 2 months for revenue?",
    "Show me revenue for June and July 2025",
];

fn read_csv<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Vec<T>, Box<dyn Error>> {
    let mut reader = csv::Reader::from_path(dir.join(name))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn main() -> Result<(), Box<dyn Error>> {
    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures"));

    let dataset = Dataset::from_rows(
        read_csv(&dir, "actuals.csv")?,
        read_csv(&dir, "budget.csv")?,
        read_csv(&dir, "cash.csv")?,
        read_csv(&dir, "fx.csv")?,
    )?;
    let copilot = Copilot::new(dataset);

    println!("📊 Loaded data from {}", dir.display());
    println!(
        "   {} entities, latest month {}\n",
        copilot.context().entities.len(),
        copilot
            .context()
            .latest_period
            .map(|p| p.long_label())
            .unwrap_or_else(|| "n/a".to_string())
    );

    for question in SAMPLE_QUESTIONS {
        println!("> {}", question);
        let answer = copilot.ask(question);
        println!("{}\n", answer.summary);
        if let Some(chart) = &answer.chart {
            println!("[{:?} chart: {}]\n{}", chart.kind, chart.title, chart.to_csv());
        }
        println!("------------------------------------------------------------------");
    }

    println!("🤖 Ask your own questions (type 'quit' to exit).");
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let question = input.trim();

        if question.eq_ignore_ascii_case("quit") || question.eq_ignore_ascii_case("exit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        println!("\n{}\n", copilot.ask(question).to_markdown());
        println!("------------------------------------------------------------------");
    }

    Ok(())
}
