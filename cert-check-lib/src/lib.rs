//! # Cert Check Library
//!
//! Checks, for a set of domains, whether each one presents a valid TLS
//! certificate over HTTPS, and splits them into a valid and an invalid set.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cert_check_lib::{filter_domains, CertChecker};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let checker = CertChecker::new()?;
//!     let domains = filter_domains(["example.com", " example.com ", "not a domain!!"]);
//!     let report = checker.check_domains(&domains).await;
//!
//!     println!("valid: {:?}", report.partition.valid());
//!     println!("invalid: {:?}", report.partition.invalid());
//!     Ok(())
//! }
//! ```
//!
//! ## Pipeline
//!
//! - **Domain filter**: trims, deduplicates and syntax-checks raw lines
//! - **Limiter**: caps how many probes are in flight
//! - **HTTPS probe**: one GET per domain, classified as valid, certificate
//!   rejected, or probe error
//! - **Checker**: one task per domain, fan-in, partition

pub use checker::{reconcile, CertChecker};
pub use concurrent::{Limiter, LimiterPermit};
pub use config::{
    env_config_from, load_env_config, parse_timeout_string, validate_concurrency, ConfigManager,
    DefaultsConfig, EnvConfig, FileConfig, OutputConfig,
};
pub use error::CertCheckError;
pub use protocols::{CertProbe, HttpsProbe};
pub use types::{
    CheckConfig, Domain, FailureKind, ProbeOutcome, ProbeStatus, ResultPartition, RunReport,
    DEFAULT_PORT, DEFAULT_TIMEOUT, MAX_CONCURRENCY,
};
pub use utils::{filter_domains, is_valid_domain};

mod checker;
mod concurrent;
mod config;
mod error;
mod protocols;
mod types;
mod utils;

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
