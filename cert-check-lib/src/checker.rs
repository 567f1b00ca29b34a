//! Main certificate checker implementation.
//!
//! This module provides the `CertChecker` struct that fans a domain set out to
//! one probe task per domain, waits for every task, and reconciles the outcomes
//! into valid and invalid sets.

use crate::concurrent::Limiter;
use crate::error::CertCheckError;
use crate::protocols::{CertProbe, HttpsProbe};
use crate::types::{
    CheckConfig, Domain, FailureKind, ProbeOutcome, ProbeStatus, ResultPartition, RunReport,
};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Coordinates a certificate checking run.
///
/// Every domain gets its own tokio task. Tasks are launched all at once;
/// the probe's limiter decides how many actually talk to the network.
///
/// # Example
///
/// ```rust,no_run
/// use cert_check_lib::{filter_domains, CertChecker, CheckConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let checker = CertChecker::with_config(CheckConfig::default().with_concurrency(8))?;
///     let domains = filter_domains(["example.com", "expired.badssl.com"]);
///     let report = checker.check_domains(&domains).await;
///
///     for domain in report.partition.valid() {
///         println!("valid: {}", domain);
///     }
///     Ok(())
/// }
/// ```
pub struct CertChecker<P = HttpsProbe> {
    /// Configuration settings for this checker instance
    config: CheckConfig,
    /// Probe shared by every task of a run
    probe: Arc<P>,
}

impl CertChecker<HttpsProbe> {
    /// Create a checker with default configuration.
    ///
    /// Concurrency defaults to available parallelism x 2.
    pub fn new() -> Result<Self, CertCheckError> {
        Self::with_config(CheckConfig::default())
    }

    /// Create a checker backed by an [`HttpsProbe`] and a fresh [`Limiter`]
    /// sized from `config.concurrency`.
    ///
    /// # Errors
    ///
    /// Fails if the concurrency limit is zero or the HTTPS client can't be built.
    pub fn with_config(config: CheckConfig) -> Result<Self, CertCheckError> {
        let limiter = Limiter::new(config.concurrency)?;
        let probe = HttpsProbe::with_config(limiter, &config)?;
        Ok(Self::with_probe(config, probe))
    }

    /// The limiter gating this checker's probes.
    pub fn limiter(&self) -> &Limiter {
        self.probe.limiter()
    }
}

impl<P: CertProbe> CertChecker<P> {
    /// Create a checker around any [`CertProbe`].
    pub fn with_probe(config: CheckConfig, probe: P) -> Self {
        Self {
            config,
            probe: Arc::new(probe),
        }
    }

    /// Get the configuration for this checker.
    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Probe a single domain.
    pub async fn check_domain(&self, domain: &Domain) -> ProbeOutcome {
        ProbeOutcome::new(domain.clone(), self.probe.probe(domain).await)
    }

    /// Probe every domain and yield outcomes as they complete.
    ///
    /// All tasks are spawned before this returns, so the run proceeds even if
    /// the stream is polled slowly. Exactly one outcome is yielded per domain.
    /// A task that panics is reported as an internal probe error for the domain
    /// it was launched for.
    pub fn check_domains_stream(
        &self,
        domains: &BTreeSet<Domain>,
    ) -> impl Stream<Item = ProbeOutcome> + Send + Unpin + 'static {
        debug!(count = domains.len(), "Launching probe tasks");

        domains
            .iter()
            .map(|domain| {
                let probe = Arc::clone(&self.probe);
                let task_domain = domain.clone();
                let handle = tokio::spawn(async move { probe.probe(&task_domain).await });

                // The outcome is keyed by the domain this task was launched for
                let domain = domain.clone();
                async move {
                    let status = match handle.await {
                        Ok(status) => status,
                        Err(e) => ProbeStatus::error(
                            FailureKind::Internal,
                            format!("probe task failed: {}", e),
                        ),
                    };
                    ProbeOutcome::new(domain, status)
                }
            })
            .collect::<FuturesUnordered<_>>()
    }

    /// Probe every domain, wait for all of them, and partition the results.
    ///
    /// Never fails: per-domain problems end up in the invalid set. The returned
    /// partition covers exactly `domains`.
    pub async fn check_domains(&self, domains: &BTreeSet<Domain>) -> RunReport {
        let start = Instant::now();
        let outcomes: Vec<ProbeOutcome> = self.check_domains_stream(domains).collect().await;
        reconcile(outcomes, start.elapsed())
    }
}

/// Build a run report from the outcomes gathered at the fan-in barrier.
///
/// Logs why each failing domain ended up invalid.
pub fn reconcile(outcomes: Vec<ProbeOutcome>, elapsed: std::time::Duration) -> RunReport {
    for outcome in &outcomes {
        match &outcome.status {
            ProbeStatus::Valid => debug!(domain = %outcome.domain, "Valid certificate"),
            ProbeStatus::CertInvalid { reason } => {
                info!(domain = %outcome.domain, %reason, "Certificate rejected")
            }
            ProbeStatus::ProbeError { kind, cause } => {
                warn!(domain = %outcome.domain, %kind, %cause, "Probe failed")
            }
        }
    }

    let partition = ResultPartition::from_outcomes(&outcomes);
    debug_assert_eq!(partition.len(), outcomes.len());

    info!(
        valid = partition.valid().len(),
        invalid = partition.invalid().len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Run complete"
    );

    RunReport {
        outcomes,
        partition,
        elapsed,
    }
}
