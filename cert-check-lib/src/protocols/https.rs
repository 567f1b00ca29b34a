//! HTTPS certificate probe.
//!
//! One probe is one `GET https://<domain>/` with the platform trust store.
//! Any completed request means the certificate was accepted, whatever the
//! HTTP status. Failures are sorted into a certificate rejection or a
//! [`FailureKind`] by walking the error's source chain.

use crate::concurrent::Limiter;
use crate::error::CertCheckError;
use crate::protocols::CertProbe;
use crate::types::{CheckConfig, Domain, FailureKind, ProbeOutcome, ProbeStatus, DEFAULT_PORT};
use async_trait::async_trait;
use std::error::Error;
use std::time::Instant;
use tracing::debug;

/// Fragments that show up in certificate verification failures.
///
/// rustls reports `invalid peer certificate: <reason>`; the others cover the
/// phrasing of OpenSSL-style backends.
const CERT_FAILURE_MARKERS: &[&str] = &[
    "invalid peer certificate",
    "invalidcertificate",
    "certificate verify failed",
    "self signed certificate",
    "self-signed certificate",
    "certificate has expired",
    "unable to get local issuer certificate",
    "unknownissuer",
    "notvalidforname",
];

const DNS_FAILURE_MARKERS: &[&str] = &[
    "dns error",
    "failed to lookup address",
    "name or service not known",
    "no such host",
    "nodename nor servname",
];

/// Probes a domain's certificate with a single HTTPS request.
///
/// Every probe holds one [`Limiter`] slot for its whole duration. The HTTP
/// client keeps no idle connections, so each probe uses its own connection.
#[derive(Clone)]
pub struct HttpsProbe {
    /// HTTP client shared by all probes of a run
    http_client: reqwest::Client,
    /// Gate shared by all probes of a run
    limiter: Limiter,
    /// Port to connect to
    port: u16,
}

impl HttpsProbe {
    /// Create a probe with default client settings.
    pub fn new(limiter: Limiter) -> Result<Self, CertCheckError> {
        Self::with_config(limiter, &CheckConfig::default())
    }

    /// Create a probe using the timeout and port from `config`.
    ///
    /// The limiter is passed separately so one gate can be shared.
    pub fn with_config(limiter: Limiter, config: &CheckConfig) -> Result<Self, CertCheckError> {
        let http_client = client_builder(config).build()?;
        Ok(Self::from_client(http_client, limiter, config.port))
    }

    fn from_client(http_client: reqwest::Client, limiter: Limiter, port: u16) -> Self {
        Self {
            http_client,
            limiter,
            port,
        }
    }

    /// The URL probed for `domain`.
    pub fn target_url(&self, domain: &Domain) -> String {
        if self.port == DEFAULT_PORT {
            format!("https://{}/", domain)
        } else {
            format!("https://{}:{}/", domain, self.port)
        }
    }

    /// The limiter this probe acquires from.
    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// Probe one domain and attach the domain to the result.
    pub async fn validate(&self, domain: &Domain) -> ProbeOutcome {
        ProbeOutcome::new(domain.clone(), self.probe(domain).await)
    }
}

#[async_trait]
impl CertProbe for HttpsProbe {
    async fn probe(&self, domain: &Domain) -> ProbeStatus {
        // Held until this function returns, on every path
        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => return ProbeStatus::error(FailureKind::Internal, e.to_string()),
        };

        let url = self.target_url(domain);
        debug!(%domain, %url, "Probing");
        let start = Instant::now();

        match self.http_client.get(&url).send().await {
            Ok(response) => {
                debug!(
                    %domain,
                    http_status = response.status().as_u16(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Request completed"
                );
                ProbeStatus::Valid
            }
            Err(err) => {
                let status = classify_request_error(&err);
                debug!(
                    %domain,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %error_chain(&err),
                    "Request failed"
                );
                status
            }
        }
    }
}

/// Client settings shared by every probe: platform roots, no redirects, no
/// idle connections.
fn client_builder(config: &CheckConfig) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.timeout)
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .user_agent(concat!("cert-check/", env!("CARGO_PKG_VERSION")))
}

/// Classify a failed request.
fn classify_request_error(err: &reqwest::Error) -> ProbeStatus {
    classify_failure(&error_chain(err), err.is_timeout(), err.is_connect())
}

/// Classify a failure from its flattened message chain and the client's flags.
///
/// Certificate rejections are checked first: rustls fails during connect, so
/// they also carry the connect flag.
pub(crate) fn classify_failure(chain: &str, is_timeout: bool, is_connect: bool) -> ProbeStatus {
    let lower = chain.to_ascii_lowercase();

    if CERT_FAILURE_MARKERS.iter().any(|m| lower.contains(m)) {
        return ProbeStatus::CertInvalid {
            reason: chain.to_string(),
        };
    }

    let kind = if is_timeout || lower.contains("timed out") {
        FailureKind::Timeout
    } else if DNS_FAILURE_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureKind::Dns
    } else if is_connect || lower.contains("connection refused") {
        FailureKind::Connect
    } else {
        FailureKind::Protocol
    };

    ProbeStatus::error(kind, chain)
}

/// Join an error and all its sources into one `a: b: c` line.
///
/// Wrappers often repeat their source's message; repeats are skipped.
pub(crate) fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut parts: Vec<String> = vec![err.to_string()];
    let mut source = err.source();

    while let Some(cause) = source {
        let text = cause.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        source = cause.source();
    }

    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, IsCa, Issuer, KeyPair};
    use std::fmt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio_rustls::rustls::ServerConfig;
    use tokio_rustls::TlsAcceptor;

    #[derive(Debug)]
    struct Wrapped {
        message: &'static str,
        source: Option<Box<dyn Error + 'static>>,
    }

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message)
        }
    }

    impl Error for Wrapped {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            self.source.as_deref()
        }
    }

    fn test_probe(port: u16) -> HttpsProbe {
        let config = CheckConfig::default()
            .with_timeout(Duration::from_secs(10))
            .with_port(port);
        HttpsProbe::with_config(Limiter::new(2).unwrap(), &config).unwrap()
    }

    #[test]
    fn test_target_url() {
        let domain = Domain::parse("example.com").unwrap();
        assert_eq!(test_probe(443).target_url(&domain), "https://example.com/");
        assert_eq!(
            test_probe(8443).target_url(&domain),
            "https://example.com:8443/"
        );
    }

    #[test]
    fn test_error_chain_walks_sources() {
        let err = Wrapped {
            message: "error sending request for url (https://self-signed.badssl.com/)",
            source: Some(Box::new(Wrapped {
                message: "error trying to connect",
                source: Some(Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "invalid peer certificate: UnknownIssuer",
                ))),
            })),
        };

        let chain = error_chain(&err);
        assert_eq!(
            chain,
            "error sending request for url (https://self-signed.badssl.com/): \
             error trying to connect: invalid peer certificate: UnknownIssuer"
        );
        assert!(matches!(
            classify_failure(&chain, false, true),
            ProbeStatus::CertInvalid { .. }
        ));
    }

    #[test]
    fn test_error_chain_skips_repeated_messages() {
        let err = Wrapped {
            message: "connection refused (os error 111)",
            source: Some(Box::new(Wrapped {
                message: "connection refused",
                source: None,
            })),
        };
        assert_eq!(error_chain(&err), "connection refused (os error 111)");
    }

    #[test]
    fn test_classify_certificate_failures() {
        for chain in [
            "error trying to connect: invalid peer certificate: Expired",
            "error trying to connect: invalid peer certificate: NotValidForName",
            "error trying to connect: invalid peer certificate: UnknownIssuer",
            "error:0A000086:SSL routines:tls_post_process_server_certificate:certificate verify failed",
        ] {
            match classify_failure(chain, false, true) {
                ProbeStatus::CertInvalid { reason } => assert_eq!(reason, chain),
                other => panic!("{} classified as {:?}", chain, other),
            }
        }
    }

    #[test]
    fn test_classify_other_failures() {
        let dns = classify_failure(
            "error trying to connect: dns error: failed to lookup address information: Name or service not known",
            false,
            true,
        );
        assert!(matches!(
            dns,
            ProbeStatus::ProbeError {
                kind: FailureKind::Dns,
                ..
            }
        ));

        let refused = classify_failure(
            "error trying to connect: tcp connect error: Connection refused (os error 111)",
            false,
            true,
        );
        assert!(matches!(
            refused,
            ProbeStatus::ProbeError {
                kind: FailureKind::Connect,
                ..
            }
        ));

        let timeout = classify_failure("operation timed out", true, false);
        assert!(matches!(
            timeout,
            ProbeStatus::ProbeError {
                kind: FailureKind::Timeout,
                ..
            }
        ));

        let protocol = classify_failure("error reading a body from connection", false, false);
        assert!(matches!(
            protocol,
            ProbeStatus::ProbeError {
                kind: FailureKind::Protocol,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_domain_is_probe_error() {
        let probe = test_probe(443);
        let domain = Domain::parse("no-such-host.invalid").unwrap();

        let outcome = probe.validate(&domain).await;
        assert_eq!(outcome.domain, domain);
        assert!(
            matches!(outcome.status, ProbeStatus::ProbeError { .. }),
            "got {:?}",
            outcome.status
        );
        assert_eq!(probe.limiter().in_use(), 0);
    }

    #[tokio::test]
    async fn test_non_tls_peer_is_probe_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            // Accept and hang up before any TLS bytes are exchanged
            for _ in 0..4 {
                if let Ok((socket, _)) = listener.accept().await {
                    drop(socket);
                }
            }
        });

        let probe = test_probe(port);
        let status = probe.probe(&Domain::unchecked("localhost")).await;
        assert!(
            matches!(status, ProbeStatus::ProbeError { .. }),
            "got {:?}",
            status
        );
        assert_eq!(probe.limiter().in_use(), 0);
        server.abort();
    }

    // ============================================================
    // Local TLS server
    // ============================================================

    /// A certificate for `localhost` plus its key, as the server presents it.
    struct ServerIdentity {
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    }

    fn self_signed_localhost() -> ServerIdentity {
        let key_pair = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        ServerIdentity {
            chain: vec![cert.der().clone()],
            key: PrivatePkcs8KeyDer::from(key_pair.serialize_der()).into(),
        }
    }

    /// A leaf for `localhost` signed by a fresh CA. Returns the CA in DER too.
    fn ca_signed_localhost() -> (ServerIdentity, Vec<u8>) {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = ca_params.clone().self_signed(&ca_key).unwrap();
        let issuer = Issuer::new(ca_params, ca_key);

        let leaf_key = KeyPair::generate().unwrap();
        let leaf = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .signed_by(&leaf_key, &issuer)
            .unwrap();

        let identity = ServerIdentity {
            chain: vec![leaf.der().clone()],
            key: PrivatePkcs8KeyDer::from(leaf_key.serialize_der()).into(),
        };
        (identity, ca_cert.der().to_vec())
    }

    /// Serve TLS on an ephemeral local port, answering every request with 404.
    async fn serve_tls(identity: ServerIdentity) -> (u16, JoinHandle<()>) {
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(identity.chain, identity.key)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    // The handshake fails whenever the client rejects the certificate
                    if let Ok(mut tls) = acceptor.accept(socket).await {
                        let mut request = [0u8; 4096];
                        let _ = tls.read(&mut request).await;
                        let _ = tls
                            .write_all(
                                b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                            )
                            .await;
                        let _ = tls.shutdown().await;
                    }
                });
            }
        });

        (port, server)
    }

    #[tokio::test]
    async fn test_self_signed_certificate_is_cert_invalid() {
        let (port, server) = serve_tls(self_signed_localhost()).await;

        let probe = test_probe(port);
        let status = probe.probe(&Domain::unchecked("localhost")).await;
        match status {
            ProbeStatus::CertInvalid { reason } => {
                assert!(reason.contains("invalid peer certificate"), "{}", reason)
            }
            other => panic!("expected CertInvalid, got {:?}", other),
        }
        assert_eq!(probe.limiter().in_use(), 0);
        server.abort();
    }

    #[tokio::test]
    async fn test_untrusted_issuer_is_cert_invalid() {
        let (identity, _ca_der) = ca_signed_localhost();
        let (port, server) = serve_tls(identity).await;

        let status = test_probe(port)
            .probe(&Domain::unchecked("localhost"))
            .await;
        assert!(
            matches!(status, ProbeStatus::CertInvalid { .. }),
            "got {:?}",
            status
        );
        server.abort();
    }

    #[tokio::test]
    async fn test_trusted_chain_with_404_is_valid() {
        let (identity, ca_der) = ca_signed_localhost();
        let (port, server) = serve_tls(identity).await;

        let config = CheckConfig::default()
            .with_timeout(Duration::from_secs(10))
            .with_port(port);
        let client = client_builder(&config)
            .add_root_certificate(reqwest::Certificate::from_der(&ca_der).unwrap())
            .build()
            .unwrap();
        let probe = HttpsProbe::from_client(client, Limiter::new(1).unwrap(), port);

        let outcome = probe.validate(&Domain::unchecked("localhost")).await;
        assert_eq!(outcome.status, ProbeStatus::Valid);
        assert_eq!(probe.limiter().in_use(), 0);
        server.abort();
    }
}
