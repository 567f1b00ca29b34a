//! Core data types for certificate checking.
//!
//! This module defines the domain newtype, the per-domain probe outcome,
//! the valid/invalid partition and the run configuration.

use crate::concurrent::Limiter;
use crate::error::CertCheckError;
use crate::utils::is_valid_domain;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default client timeout for a single probe.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default HTTPS port.
pub const DEFAULT_PORT: u16 = 443;

/// Upper bound accepted for the concurrency limit: the most slots a
/// [`Limiter`] can hand out.
pub const MAX_CONCURRENCY: usize = Semaphore::MAX_PERMITS;

/// A syntactically valid domain name.
///
/// The only way to get one is through [`Domain::parse`], so anything holding a
/// `Domain` can rely on it being a bare host name (no scheme, no path, no
/// surrounding whitespace).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Parse a domain, trimming surrounding whitespace first.
    pub fn parse(input: &str) -> Result<Self, CertCheckError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(CertCheckError::invalid_domain(
                input,
                "Domain name cannot be empty",
            ));
        }
        if !is_valid_domain(trimmed) {
            return Err(CertCheckError::invalid_domain(
                trimmed,
                "Not a valid host name",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The domain as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a domain without the syntax check, for hosts like `localhost`.
    #[cfg(test)]
    pub(crate) fn unchecked(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Why a probe failed without reaching a certificate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Name resolution failed
    Dns,
    /// TCP connect failed or the connection was reset during setup
    Connect,
    /// The HTTP client gave up waiting
    Timeout,
    /// TLS or HTTP protocol failure that is not a certificate rejection
    Protocol,
    /// The probe task itself failed (panic, closed limiter)
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Dns => write!(f, "DNS"),
            FailureKind::Connect => write!(f, "Connect"),
            FailureKind::Timeout => write!(f, "Timeout"),
            FailureKind::Protocol => write!(f, "Protocol"),
            FailureKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Classification of a single HTTPS probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeStatus {
    /// The request completed over a TLS session whose certificate was accepted.
    /// The HTTP status code is irrelevant.
    Valid,

    /// The TLS layer was reached but certificate verification failed
    CertInvalid { reason: String },

    /// Any other failure
    ProbeError { kind: FailureKind, cause: String },
}

impl ProbeStatus {
    /// Shorthand for a [`ProbeStatus::ProbeError`].
    pub fn error<C: Into<String>>(kind: FailureKind, cause: C) -> Self {
        Self::ProbeError {
            kind,
            cause: cause.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// The outcome of probing one domain.
///
/// The domain is the one the probe task was launched for; the orchestrator
/// attaches it, the probe never reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub domain: Domain,
    #[serde(flatten)]
    pub status: ProbeStatus,
}

impl ProbeOutcome {
    pub fn new(domain: Domain, status: ProbeStatus) -> Self {
        Self { domain, status }
    }

    pub fn is_valid(&self) -> bool {
        self.status.is_valid()
    }
}

/// Valid and invalid domain sets produced by a run.
///
/// The two sets are always disjoint. When built by the orchestrator their union
/// is exactly the input set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultPartition {
    valid: BTreeSet<Domain>,
    invalid: BTreeSet<Domain>,
}

impl ResultPartition {
    /// Sort outcomes into the two sets.
    ///
    /// If the same domain is reported more than once, any failing outcome wins
    /// over a valid one, so a domain never ends up in both sets.
    pub fn from_outcomes<'a, I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = &'a ProbeOutcome>,
    {
        let mut partition = Self::default();
        for outcome in outcomes {
            partition.record(outcome);
        }
        partition
    }

    fn record(&mut self, outcome: &ProbeOutcome) {
        if outcome.is_valid() {
            if !self.invalid.contains(&outcome.domain) {
                self.valid.insert(outcome.domain.clone());
            }
        } else {
            self.valid.remove(&outcome.domain);
            self.invalid.insert(outcome.domain.clone());
        }
    }

    /// Domains whose certificate was accepted.
    pub fn valid(&self) -> &BTreeSet<Domain> {
        &self.valid
    }

    /// Domains that failed certificate validation or could not be probed.
    pub fn invalid(&self) -> &BTreeSet<Domain> {
        &self.invalid
    }

    /// Total number of classified domains.
    pub fn len(&self) -> usize {
        self.valid.len() + self.invalid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid.is_empty() && self.invalid.is_empty()
    }

    /// Whether the union of both sets is exactly `domains`.
    pub fn covers(&self, domains: &BTreeSet<Domain>) -> bool {
        self.len() == domains.len()
            && domains
                .iter()
                .all(|d| self.valid.contains(d) || self.invalid.contains(d))
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// One outcome per input domain, in completion order
    pub outcomes: Vec<ProbeOutcome>,

    /// Outcomes reconciled into valid / invalid sets
    pub partition: ResultPartition,

    /// Wall-clock time from launch to the fan-in barrier
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl RunReport {
    /// Outcomes that failed with a probe error rather than a certificate verdict.
    pub fn probe_errors(&self) -> impl Iterator<Item = &ProbeOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ProbeStatus::ProbeError { .. }))
    }

    /// Outcomes whose certificate was rejected.
    pub fn cert_rejections(&self) -> impl Iterator<Item = &ProbeOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ProbeStatus::CertInvalid { .. }))
    }
}

/// Configuration options for a certificate checking run.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckConfig {
    /// Maximum number of probes in flight at once.
    /// Default: available parallelism x 2, any positive value accepted
    pub concurrency: usize,

    /// Total timeout the HTTP client applies to one probe.
    /// Default: 300 seconds
    pub timeout: Duration,

    /// Port to probe. Default: 443
    pub port: u16,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            concurrency: Limiter::default_capacity(),
            timeout: DEFAULT_TIMEOUT,
            port: DEFAULT_PORT,
        }
    }
}

impl CheckConfig {
    /// Set the concurrency limit. Zero becomes 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    /// Set the per-probe client timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe a port other than 443.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}
