//! Console display logic for the cert-check CLI.
//!
//! Live per-domain lines, headers and summaries. Uses only the `console` crate.
//! Everything here writes to stdout; logs go to stderr.

use cert_check_lib::{ProbeOutcome, ProbeStatus, ResultPartition};
use console::{pad_str, style, Alignment};
use std::path::Path;
use std::time::Duration;

use crate::FailureStats;

// ── Header ───────────────────────────────────────────────────────────────────

/// Print a styled header at the start of a pretty run.
pub fn print_header(domain_count: usize, concurrency: usize) {
    println!(
        "{} {} {}",
        style("cert-check").bold(),
        style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim(),
        style(format!(
            "— Probing {} domain{}",
            domain_count,
            if domain_count == 1 { "" } else { "s" }
        ))
        .dim(),
    );
    println!("{}", style(format!("Concurrency: {}", concurrency)).dim());
    println!();
}

// ── Single outcome line ──────────────────────────────────────────────────────

/// Print one outcome as it arrives, prefixed with a `[i/N]` counter.
pub fn print_outcome(outcome: &ProbeOutcome, counter: (usize, usize)) {
    let padded_domain = pad_str(outcome.domain.as_str(), 36, Alignment::Left, Some(".."));
    let prefix = style(format!("[{}/{}]", counter.0, counter.1)).dim();

    match &outcome.status {
        ProbeStatus::Valid => {
            println!(
                "  {} {}  {}",
                prefix,
                style(&padded_domain).white(),
                style("VALID").green().bold(),
            );
        }
        ProbeStatus::CertInvalid { reason } => {
            println!(
                "  {} {}  {}  {}",
                prefix,
                style(&padded_domain).white(),
                style("CERT INVALID").red().bold(),
                style(brief(reason)).dim(),
            );
        }
        ProbeStatus::ProbeError { kind, cause } => {
            println!(
                "  {} {}  {}  {}",
                prefix,
                style(&padded_domain).white(),
                style(format!("ERROR ({})", kind)).yellow(),
                style(brief(cause)).dim(),
            );
        }
    }
}

/// Keep the innermost part of an error chain; that's the one that says what
/// actually went wrong.
fn brief(message: &str) -> String {
    let innermost = message.rsplit(": ").next().unwrap_or(message);
    let chars: Vec<char> = innermost.chars().collect();
    if chars.len() > 60 {
        format!("{}...", chars[..57].iter().collect::<String>())
    } else {
        innermost.to_string()
    }
}

// ── Summaries ────────────────────────────────────────────────────────────────

/// One-line summary for the default output mode.
pub fn print_plain_summary(
    partition: &ResultPartition,
    duration: Duration,
    valid_out: &Path,
    invalid_out: &Path,
) {
    println!(
        "{} valid, {} invalid ({} checked in {:.1}s) -> {}, {}",
        partition.valid().len(),
        partition.invalid().len(),
        partition.len(),
        duration.as_secs_f64(),
        valid_out.display(),
        invalid_out.display(),
    );
}

/// Styled summary for pretty mode.
pub fn print_summary(partition: &ResultPartition, duration: Duration) {
    println!();
    println!(
        "{} {} checked in {:.1}s  {}  {}",
        style("Summary:").bold(),
        partition.len(),
        duration.as_secs_f64(),
        style(format!("{} valid", partition.valid().len())).green(),
        style(format!("{} invalid", partition.invalid().len())).red(),
    );
}

/// Print where the result files went.
pub fn print_output_paths(valid_out: &Path, invalid_out: &Path) {
    println!(
        "{} {}  {} {}",
        style("Valid:").dim(),
        valid_out.display(),
        style("Invalid:").dim(),
        invalid_out.display(),
    );
}

/// Print the failure breakdown, if anything failed.
pub fn print_failure_summary(stats: &FailureStats) {
    if !stats.has_failures() {
        return;
    }
    println!();
    for (i, line) in stats.format_summary().lines().enumerate() {
        if i == 0 {
            println!("{}", style(line).yellow().bold());
        } else {
            println!("  {}", style(line).dim());
        }
    }
}
