//! Probe implementations for certificate checking.
//!
//! The orchestrator talks to probes through [`CertProbe`]; the production
//! implementation is [`HttpsProbe`].

use crate::types::{Domain, ProbeStatus};
use async_trait::async_trait;

/// HTTPS certificate probe
pub mod https;

pub use https::HttpsProbe;

/// Something that can classify one domain's certificate.
///
/// Implementations must never fail past this boundary: every failure is
/// reported as a [`ProbeStatus`]. Concurrency limiting is the implementation's
/// job, so the orchestrator can launch every task at once.
#[async_trait]
pub trait CertProbe: Send + Sync + 'static {
    async fn probe(&self, domain: &Domain) -> ProbeStatus;
}
