//! CLI command handling
//!
//! Loads scenarios and configuration, runs commands and formats output.

use std::io::Write;
use std::path::Path;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::Result;
use crate::scenario::{Engine, EvaluatorKind, Format, RunOutcome, Scenario};

/// Dispatch a CLI command
///
/// Returns `Ok(false)` when the command ran but the scenario did not pass.
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            path,
            evaluator,
            json,
            config,
        } => run(&path, evaluator, json, config.as_deref()).await,

        Commands::Check { path } => check(&path),

        Commands::Convert { path, to, output } => {
            let scenario = Scenario::load(&path)?;
            let encoded = scenario.encode(to)?;
            match output {
                Some(out) => {
                    std::fs::write(&out, &encoded)?;
                    eprintln!("Wrote {} ({})", out.display(), to);
                }
                None => {
                    print!("{}", encoded);
                    if !encoded.ends_with('\n') {
                        println!();
                    }
                }
            }
            Ok(true)
        }
    }
}

async fn run(
    path: &Path,
    evaluator: Option<EvaluatorKind>,
    json: bool,
    config_path: Option<&Path>,
) -> Result<bool> {
    let mut config = match config_path {
        Some(p) => Config::load_from(p)?,
        None => Config::load()?,
    };
    if let Some(kind) = evaluator {
        config.engine.evaluator = kind;
    }

    let mut scenario = Scenario::load(path)?;
    let engine = Engine::from_config(&config)?;

    let foreign: Vec<_> = scenario
        .expression_kinds()
        .into_iter()
        .filter(|kind| *kind != config.engine.evaluator)
        .collect();
    if !foreign.is_empty() {
        tracing::warn!(
            evaluator = %config.engine.evaluator,
            other = ?foreign,
            "Scenario has expressions the selected evaluator cannot read"
        );
    }

    // Keep stdout clean for the JSON document
    let outcome = if json {
        let mut sink = std::io::stderr();
        scenario.run(&engine, &mut sink).await
    } else {
        let mut sink = std::io::stdout();
        scenario.run(&engine, &mut sink).await
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&scenario, &outcome);
    }
    std::io::stdout().flush()?;

    Ok(outcome.is_success())
}

fn check(path: &Path) -> Result<bool> {
    let scenario = Scenario::load(path)?;

    println!(
        "{} {}",
        "Scenario:".blue().bold(),
        scenario.name().white().bold()
    );
    if !scenario.description().is_empty() {
        println!("  {}", scenario.description().dimmed());
    }
    if !scenario.environment().is_empty() {
        println!("  Environment: {}", scenario.environment());
    }

    println!("\n{}", "Cases:".cyan());
    for (index, case) in scenario.cases().iter().enumerate() {
        let method = case.request.effective_method();
        let extras = [
            Some(format!("expect {}", case.expect.status_code)),
            (!case.expect.evaluate.is_empty())
                .then(|| format!("{} expressions", case.expect.evaluate.len())),
            case.pipeline
                .cache
                .then(|| format!("cache as '{}'", case.pipeline.cache_as)),
            Some(format!("on failure: {}", case.pipeline.on_failure)),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");

        println!(
            "  {}. [order {}] {} {}",
            index + 1,
            case.order,
            case.name,
            format!("{} {}", method, case.request.url).dimmed()
        );
        println!("     {}", extras);
    }

    let kinds = scenario.expression_kinds();
    match kinds.as_slice() {
        [] => println!("\nNo body assertions"),
        [kind] => println!("\nExpressions: {}", kind),
        _ => println!(
            "\n{} cases mix rule and script expressions; no single evaluator can run them all",
            "warning:".yellow().bold()
        ),
    }

    Ok(kinds.len() <= 1)
}

fn print_summary(scenario: &Scenario, outcome: &RunOutcome) {
    println!("\n{}", "Results:".cyan());
    for result in &outcome.results {
        let status = if result.success {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {} {} {} {} {}",
            status,
            result.test_case_name,
            format!("{} {}", result.request_method, result.request_url).dimmed(),
            result.response_code,
            format!("{:.1} ms", result.timing_total).dimmed()
        );
    }

    if let Some(reason) = &outcome.aborted {
        println!("\n  {} {}", "Stopped:".yellow().bold(), reason);
    }

    let not_run = scenario.cases().len() - outcome.results.len();
    println!(
        "\n  {} passed, {} failed, {} not run",
        outcome.passed(),
        outcome.failed(),
        not_run
    );

    if outcome.is_success() {
        println!(
            "\n{} {}\n",
            "✓".green().bold(),
            "Scenario Passed".green().bold()
        );
    } else {
        println!(
            "\n{} {}\n",
            "✗".red().bold(),
            "Scenario Failed".red().bold()
        );
    }
}
