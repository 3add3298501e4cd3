//! Console output.
//!
//! Every record from the engine is echoed as it arrives; a summary of the
//! observed test cases closes the run.

use console::{StyledObject, style};

use crate::results::{LogRecord, Outcome, Results};

/// Formats a record for the terminal.
///
/// Results become `suite/case: outcome`, other records print their message
/// styled by level.
pub fn format_record(record: &LogRecord) -> String {
    if record.is_result() {
        if let Some(msg) = record.msg.as_object() {
            let field = |key: &str| msg.get(key).and_then(|v| v.as_str()).unwrap_or("?");
            let outcome = Outcome::parse(field("result"));
            return format!(
                "{}/{}: {}",
                field("definition"),
                field("case"),
                outcome_style(outcome)
            );
        }
    }

    let text = record.text();
    match record.lvl.as_str() {
        "error" | "exception" => style(text).red().bold().to_string(),
        "warning" => style(text).yellow().to_string(),
        "info" => style(text).cyan().to_string(),
        "debug" => style(text).dim().to_string(),
        "input" => style(text).magenta().to_string(),
        _ => text,
    }
}

fn outcome_style(outcome: Outcome) -> StyledObject<&'static str> {
    let text = outcome.as_str();
    match outcome {
        Outcome::Pass => style(text).green(),
        Outcome::Fail => style(text).red().bold(),
        Outcome::Skip => style(text).yellow(),
        Outcome::Unknown => style(text).dim(),
    }
}

/// Echoes one record to stdout.
pub fn echo(record: &LogRecord) {
    println!("{}", format_record(record));
}

/// Prints a summary of the observed test cases.
pub fn print_summary(results: &Results) {
    let counts = results.counts();

    println!();
    println!("Test Results:");
    println!("  Total:   {}", counts.total());
    println!("  Passed:  {}", style(counts.passed).green());
    println!("  Failed:  {}", style(counts.failed).red());
    println!("  Skipped: {}", style(counts.skipped).yellow());
    if counts.unknown > 0 {
        println!("  Unknown: {}", style(counts.unknown).dim());
    }

    println!();
    if counts.total() == 0 {
        println!("{}", style("No test results were reported.").yellow().bold());
    } else if results.ret() == 0 {
        println!("{}", style("All tests passed!").green().bold());
    } else {
        println!("{}", style("Some tests failed.").red().bold());
    }
}
