//! Console output for finished runs.

use crate::exit_codes::ExitCode;
use crate::fallback::FallbackVerdict;
use crate::run::{OutcomeCounts, ReadStats, RunSummary, Verdict};

fn print_outcomes(outcomes: &OutcomeCounts) {
    println!("  Total:   {}", outcomes.total());
    println!("  Passed:  {}", console::style(outcomes.passed).green());
    println!("  Failed:  {}", console::style(outcomes.failed).red());
    println!("  Skipped: {}", console::style(outcomes.skipped).yellow());
}

/// Prints per-file counts and outcome totals for a dry scan.
pub fn print_scan(stats: &ReadStats) {
    println!();
    if stats.files.is_empty() {
        println!("{}", console::style("No result files found.").yellow().bold());
        return;
    }

    println!("Result Files:");
    for file in &stats.files {
        if file.opened {
            println!(
                "  {:<6} {:>6} results  {}{}",
                file.format,
                file.read,
                file.path.display(),
                if file.dropped > 0 {
                    console::style(format!(" ({} dropped)", file.dropped))
                        .yellow()
                        .to_string()
                } else {
                    String::new()
                }
            );
        } else {
            println!(
                "  {:<6} {}  {}",
                file.format,
                console::style("unreadable").red(),
                file.path.display()
            );
        }
    }

    println!();
    println!("Test Results:");
    print_outcomes(&stats.outcomes);
    if stats.dropped() > 0 {
        println!("  Dropped: {}", console::style(stats.dropped()).yellow());
    }
}

/// Prints a summary of a publish run and its verdict.
pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("Test Results:");
    print_outcomes(&summary.read.outcomes);

    let pool = &summary.pool;
    println!();
    println!("Publishing:");
    println!("  Batches:     {}", pool.batches);
    if pool.failed_batches > 0 {
        println!("  Failed:      {}", console::style(pool.failed_batches).red());
    }
    println!("  Records:     {}", pool.records);
    if pool.rejected > 0 {
        println!("  Rejected:    {}", console::style(pool.rejected).yellow());
    }
    println!("  Attachments: {}", pool.attachments_uploaded);
    if pool.attachments_failed > 0 {
        println!(
            "  Attachment failures: {}",
            console::style(pool.attachments_failed).red()
        );
    }

    println!();
    let message = match summary.verdict {
        Verdict::Published => "All results published.".to_string(),
        Verdict::NoResults {
            upstream_exit_code: 0,
        } => "No result files found; published a passing placeholder.".to_string(),
        Verdict::NoResults { upstream_exit_code } => format!(
            "No result files found; published a failing placeholder (upstream exit code {}).",
            upstream_exit_code
        ),
        Verdict::Fallback(FallbackVerdict::AllPassed { total }) => format!(
            "Publishing failed, but local xUnit totals report {} tests with no failures.",
            total
        ),
        Verdict::Fallback(FallbackVerdict::FailuresFound { failed, total }) => format!(
            "Publishing failed and local xUnit totals report {} of {} tests failed.",
            failed, total
        ),
        Verdict::Fallback(FallbackVerdict::NoResultFiles) => {
            "Publishing failed and no local xUnit totals were found.".to_string()
        }
    };

    if summary.exit_code() == ExitCode::OK {
        println!("{}", console::style(message).green().bold());
    } else {
        println!("{}", console::style(message).red().bold());
    }
}
