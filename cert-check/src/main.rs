//! Cert Check CLI Application
//!
//! Reads candidate domains from a file, probes each one over HTTPS, and writes
//! the domains that presented a valid certificate and the ones that didn't to
//! two separate files.

mod ui;

use cert_check_lib::{
    filter_domains, load_env_config, parse_timeout_string, reconcile, validate_concurrency,
    CertCheckError, CertChecker, CheckConfig, ConfigManager, Domain, EnvConfig, FailureKind,
    FileConfig, ProbeOutcome, ProbeStatus, ResultPartition, RunReport, MAX_CONCURRENCY,
};
use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::Parser;
use futures::StreamExt;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

const DEFAULT_VALID_FILE: &str = "Valid";
const DEFAULT_INVALID_FILE: &str = "Invalid";

/// CLI arguments for cert-check
#[derive(Parser, Debug)]
#[command(name = "cert-check")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sort domains by whether they present a valid TLS certificate")]
#[command(
    long_about = "Probe every domain in FILE over HTTPS and sort them by certificate validity.\n\nDomains whose certificate is accepted go to the valid file; everything else\n(rejected certificates, DNS failures, timeouts, refused connections) goes to\nthe invalid file."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// File with candidate domains, one per line
    #[arg(value_name = "FILE", help_heading = "Input")]
    pub file: PathBuf,

    /// Max probes in flight (default: available parallelism x 2)
    #[arg(short = 'n', long = "limit", value_name = "N", help_heading = "Performance")]
    pub concurrency: Option<usize>,

    /// Per-probe timeout, e.g. "30s" or "2m" (default: 300s)
    #[arg(long = "timeout", value_name = "DURATION", help_heading = "Performance")]
    pub timeout: Option<String>,

    /// Port to probe (default: 443)
    #[arg(long = "port", value_name = "PORT", help_heading = "Performance")]
    pub port: Option<u16>,

    /// Where to write domains with a valid certificate (default: ./Valid)
    #[arg(long = "valid-out", value_name = "PATH", help_heading = "Output")]
    pub valid_out: Option<PathBuf>,

    /// Where to write every other domain (default: ./Invalid)
    #[arg(long = "invalid-out", value_name = "PATH", help_heading = "Output")]
    pub invalid_out: Option<PathBuf>,

    /// Print the full run report as JSON
    #[arg(short = 'j', long = "json", help_heading = "Output")]
    pub json: bool,

    /// Show each result as it arrives, plus a failure breakdown
    #[arg(short = 'p', long = "pretty", help_heading = "Output")]
    pub pretty: bool,

    /// Use specific config file instead of automatic discovery
    #[arg(long = "config", value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<String>,

    /// Debug logging
    #[arg(short = 'd', long = "debug", help_heading = "Configuration")]
    pub debug: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose", help_heading = "Configuration")]
    pub verbose: bool,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
struct RunSettings {
    check: CheckConfig,
    valid_out: PathBuf,
    invalid_out: PathBuf,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            check: CheckConfig::default(),
            valid_out: PathBuf::from(DEFAULT_VALID_FILE),
            invalid_out: PathBuf::from(DEFAULT_INVALID_FILE),
        }
    }
}

/// Failed domains grouped by why they failed
#[derive(Debug, Default)]
pub(crate) struct FailureStats {
    pub(crate) cert_invalid: Vec<String>,
    pub(crate) dns: Vec<String>,
    pub(crate) connect: Vec<String>,
    pub(crate) timeouts: Vec<String>,
    pub(crate) other: Vec<String>,
}

impl FailureStats {
    fn from_report(report: &RunReport) -> Self {
        let mut stats = Self::default();
        for outcome in &report.outcomes {
            stats.add_outcome(outcome);
        }
        stats
    }

    fn add_outcome(&mut self, outcome: &ProbeOutcome) {
        let domain = outcome.domain.to_string();
        match &outcome.status {
            ProbeStatus::Valid => {}
            ProbeStatus::CertInvalid { .. } => self.cert_invalid.push(domain),
            ProbeStatus::ProbeError { kind, .. } => match kind {
                FailureKind::Dns => self.dns.push(domain),
                FailureKind::Connect => self.connect.push(domain),
                FailureKind::Timeout => self.timeouts.push(domain),
                FailureKind::Protocol | FailureKind::Internal => self.other.push(domain),
            },
        }
    }

    pub(crate) fn has_failures(&self) -> bool {
        !self.cert_invalid.is_empty()
            || !self.dns.is_empty()
            || !self.connect.is_empty()
            || !self.timeouts.is_empty()
            || !self.other.is_empty()
    }

    pub(crate) fn format_summary(&self) -> String {
        if !self.has_failures() {
            return String::new();
        }

        let mut summary = vec!["Some domains did not pass:".to_string()];

        let format_domain_list = |domains: &[String], max_show: usize| -> String {
            if domains.len() <= max_show {
                domains.join(", ")
            } else {
                let shown = &domains[..max_show];
                let remaining = domains.len() - max_show;
                format!("{}, ... and {} more", shown.join(", "), remaining)
            }
        };

        for (label, domains) in [
            ("certificate rejections", &self.cert_invalid),
            ("DNS failures", &self.dns),
            ("connection failures", &self.connect),
            ("timeouts", &self.timeouts),
            ("other errors", &self.other),
        ] {
            if !domains.is_empty() {
                summary.push(format!(
                    "• {} {}: {}",
                    domains.len(),
                    label,
                    format_domain_list(domains, 5)
                ));
            }
        }

        summary.join("\n")
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    init_logging(&args);

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over the flags.
fn init_logging(args: &Args) {
    let level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,cert_check={},cert_check_lib={}", level, level))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Reject argument combinations that can't work before anything runs.
fn validate_args(args: &Args) -> Result<(), String> {
    if let Some(concurrency) = args.concurrency {
        validate_concurrency(concurrency).map_err(|e| e.to_string())?;
    }

    if args.json && args.pretty {
        return Err("Cannot use --json and --pretty together".to_string());
    }

    if let Some(timeout) = &args.timeout {
        if !matches!(parse_timeout_string(timeout), Some(secs) if secs > 0) {
            return Err(format!(
                "Invalid timeout '{}'. Use format like '5s', '30s', '2m'",
                timeout
            ));
        }
    }

    if args.port == Some(0) {
        return Err("Port must be between 1 and 65535".to_string());
    }

    if args.valid_out.is_some() && args.valid_out == args.invalid_out {
        return Err("--valid-out and --invalid-out must be different files".to_string());
    }

    Ok(())
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let settings = build_settings(&args)?;
    debug!(?settings, "Resolved settings");

    // Input problems are fatal and must surface before any probe or output
    let lines = read_domain_lines(&args.file)?;
    let domains = filter_domains(&lines);
    info!(
        lines = lines.len(),
        domains = domains.len(),
        "Loaded candidate domains"
    );

    let checker = CertChecker::with_config(settings.check.clone())?;

    let report = if args.pretty {
        ui::print_header(domains.len(), settings.check.concurrency);
        run_with_progress(&checker, &domains).await
    } else {
        checker.check_domains(&domains).await
    };

    write_partition(&settings.valid_out, &settings.invalid_out, &report.partition)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if args.pretty {
        ui::print_summary(&report.partition, report.elapsed);
        ui::print_failure_summary(&FailureStats::from_report(&report));
        ui::print_output_paths(&settings.valid_out, &settings.invalid_out);
    } else {
        ui::print_plain_summary(
            &report.partition,
            report.elapsed,
            &settings.valid_out,
            &settings.invalid_out,
        );
    }

    Ok(())
}

/// Drain the outcome stream, printing each result as it lands.
async fn run_with_progress(checker: &CertChecker, domains: &BTreeSet<Domain>) -> RunReport {
    let start = Instant::now();
    let total = domains.len();
    let mut stream = checker.check_domains_stream(domains);
    let mut outcomes = Vec::with_capacity(total);

    while let Some(outcome) = stream.next().await {
        ui::print_outcome(&outcome, (outcomes.len() + 1, total));
        outcomes.push(outcome);
    }

    reconcile(outcomes, start.elapsed())
}

/// Resolve settings: defaults, then config file, then `CC_*`, then CLI.
fn build_settings(args: &Args) -> Result<RunSettings, Box<dyn std::error::Error>> {
    let config_manager = ConfigManager::new(args.verbose);
    let env_config = load_env_config();

    let file_config = match args.config.as_ref().or(env_config.config.as_ref()) {
        Some(path) => {
            debug!(path = %path, "Using explicit config file");
            config_manager
                .load_file(path)
                .map_err(|e| format!("Failed to load config file '{}': {}", path, e))?
        }
        None => match config_manager.discover_and_load() {
            Ok(file_config) => file_config,
            Err(e) => {
                debug!(error = %e, "Config discovery failed, using defaults");
                FileConfig::default()
            }
        },
    };

    let mut settings = merge_file_config(RunSettings::default(), file_config);
    settings = apply_env_config(settings, &env_config);
    settings = apply_cli_args(settings, args);

    if settings.valid_out == settings.invalid_out {
        return Err(format!(
            "Valid and invalid results would both go to '{}'",
            settings.valid_out.display()
        )
        .into());
    }

    Ok(settings)
}

fn merge_file_config(mut settings: RunSettings, file_config: FileConfig) -> RunSettings {
    if let Some(defaults) = file_config.defaults {
        if let Some(concurrency) = defaults.concurrency {
            settings.check = settings.check.with_concurrency(concurrency);
        }
        if let Some(secs) = defaults.timeout.as_deref().and_then(parse_timeout_string) {
            settings.check = settings.check.with_timeout(Duration::from_secs(secs));
        }
        if let Some(port) = defaults.port {
            settings.check = settings.check.with_port(port);
        }
    }

    if let Some(output) = file_config.output {
        if let Some(valid_file) = output.valid_file {
            settings.valid_out = PathBuf::from(valid_file);
        }
        if let Some(invalid_file) = output.invalid_file {
            settings.invalid_out = PathBuf::from(invalid_file);
        }
    }

    settings
}

/// Values in `EnvConfig` are already validated by the library.
fn apply_env_config(mut settings: RunSettings, env_config: &EnvConfig) -> RunSettings {
    if let Some(concurrency) = env_config.concurrency {
        settings.check = settings.check.with_concurrency(concurrency);
    }
    if let Some(secs) = env_config.timeout.as_deref().and_then(parse_timeout_string) {
        settings.check = settings.check.with_timeout(Duration::from_secs(secs));
    }
    if let Some(port) = env_config.port {
        settings.check = settings.check.with_port(port);
    }
    if let Some(valid_file) = &env_config.valid_file {
        settings.valid_out = PathBuf::from(valid_file);
    }
    if let Some(invalid_file) = &env_config.invalid_file {
        settings.invalid_out = PathBuf::from(invalid_file);
    }
    settings
}

/// CLI arguments override everything, but only the ones actually given.
fn apply_cli_args(mut settings: RunSettings, args: &Args) -> RunSettings {
    if let Some(concurrency) = args.concurrency {
        settings.check = settings.check.with_concurrency(concurrency);
    }
    if let Some(secs) = args.timeout.as_deref().and_then(parse_timeout_string) {
        settings.check = settings.check.with_timeout(Duration::from_secs(secs));
    }
    if let Some(port) = args.port {
        settings.check = settings.check.with_port(port);
    }
    if let Some(valid_out) = &args.valid_out {
        settings.valid_out = valid_out.clone();
    }
    if let Some(invalid_out) = &args.invalid_out {
        settings.invalid_out = invalid_out.clone();
    }
    settings
}

/// Read the input file as raw lines. Filtering happens in the library.
///
/// Bytes that aren't UTF-8 are replaced, so such a line just fails the
/// domain syntax check instead of failing the run.
fn read_domain_lines(path: &Path) -> Result<Vec<String>, CertCheckError> {
    if !path.exists() {
        return Err(CertCheckError::file_error(
            path.display().to_string(),
            "File not found",
        ));
    }

    let bytes = std::fs::read(path)
        .map_err(|e| CertCheckError::file_error(path.display().to_string(), e.to_string()))?;

    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(str::to_string)
        .collect())
}

/// One domain per line, each newline-terminated.
fn render_domain_list(domains: &BTreeSet<Domain>) -> String {
    let mut content = String::new();
    for domain in domains {
        content.push_str(domain.as_str());
        content.push('\n');
    }
    content
}

/// Overwrite both result files, or leave both untouched.
///
/// Each list is staged next to its destination first; only once both are on
/// disk are they renamed into place.
fn write_partition(
    valid_out: &Path,
    invalid_out: &Path,
    partition: &ResultPartition,
) -> Result<(), CertCheckError> {
    let staged_valid = stage_domain_list(valid_out, partition.valid())?;
    let staged_invalid = match stage_domain_list(invalid_out, partition.invalid()) {
        Ok(staged) => staged,
        Err(e) => {
            let _ = std::fs::remove_file(&staged_valid);
            return Err(e);
        }
    };

    if let Err(e) = std::fs::rename(&staged_valid, valid_out) {
        let _ = std::fs::remove_file(&staged_valid);
        let _ = std::fs::remove_file(&staged_invalid);
        return Err(CertCheckError::file_error(
            valid_out.display().to_string(),
            e.to_string(),
        ));
    }

    std::fs::rename(&staged_invalid, invalid_out).map_err(|e| {
        let _ = std::fs::remove_file(&staged_invalid);
        CertCheckError::file_error(invalid_out.display().to_string(), e.to_string())
    })
}

/// Write `domains` to a hidden sibling of `path` and return the sibling.
fn stage_domain_list(path: &Path, domains: &BTreeSet<Domain>) -> Result<PathBuf, CertCheckError> {
    let name = path.file_name().ok_or_else(|| {
        CertCheckError::file_error(path.display().to_string(), "Not a file path")
    })?;

    let mut staged_name = OsString::from(".");
    staged_name.push(name);
    staged_name.push(".partial");
    let staged = path.with_file_name(staged_name);

    std::fs::write(&staged, render_domain_list(domains))
        .map_err(|e| CertCheckError::file_error(path.display().to_string(), e.to_string()))?;
    Ok(staged)
}
