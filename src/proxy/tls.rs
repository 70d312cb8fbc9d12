//! Upstream TLS configuration.
//!
//! Only ECDHE key exchange with AEAD ciphers is offered, on TLS 1.2 and 1.3.
//! Upstream certificates are checked against the Mozilla roots, the platform
//! trust store and an optional operator-supplied PEM bundle.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls::{
    CipherSuite, ClientConfig, RootCertStore, SupportedProtocolVersion,
    crypto::aws_lc_rs, pki_types::CertificateDer,
};
use tracing::{debug, info, warn};

use crate::config::TlsVersion;
use crate::{Error, Result};

/// Cipher suites offered to upstreams
pub const ALLOWED_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
];

fn protocol_versions(min: TlsVersion) -> &'static [&'static SupportedProtocolVersion] {
    static TLS12_AND_UP: &[&SupportedProtocolVersion] =
        &[&rustls::version::TLS13, &rustls::version::TLS12];
    static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
    match min {
        TlsVersion::Tls12 => TLS12_AND_UP,
        TlsVersion::Tls13 => TLS13_ONLY,
    }
}

/// Trust anchors for upstream connections.
///
/// Platform certificates that fail to load or parse are skipped with a
/// warning; a bad `ca_file` is a configuration error.
///
/// # Errors
///
/// Returns [`Error::Config`] if `ca_file` cannot be read or holds no valid
/// certificate.
pub fn root_store(ca_file: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!(error = %e, "Failed to load platform root certificates");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "Loaded platform root certificates");

    if let Some(path) = ca_file {
        add_ca_file(&mut roots, path)?;
    }
    Ok(roots)
}

/// Add every certificate of a PEM bundle to `roots`.
fn add_ca_file(roots: &mut RootCertStore, path: &Path) -> Result<usize> {
    let pem = fs::read(path)
        .map_err(|e| Error::Config(format!("Cannot read '{}': {e}", path.display())))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Config(format!("Failed to parse certs from '{}': {e}", path.display()))
        })?;

    if certs.is_empty() {
        return Err(Error::Config(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }

    let count = certs.len();
    for cert in certs {
        roots.add(cert).map_err(|e| {
            Error::Config(format!("Invalid CA certificate in '{}': {e}", path.display()))
        })?;
    }
    info!(path = %path.display(), count, "Trusting additional upstream CA certificates");
    Ok(count)
}

/// Build the rustls client configuration used for every upstream connection.
///
/// # Errors
///
/// Returns [`Error::Config`] if rustls rejects the version/suite combination
/// or the CA bundle is unusable.
pub fn client_config(min: TlsVersion, ca_file: Option<&Path>) -> Result<ClientConfig> {
    let mut provider = aws_lc_rs::default_provider();
    provider
        .cipher_suites
        .retain(|suite| ALLOWED_CIPHER_SUITES.contains(&suite.suite()));

    let roots = root_store(ca_file)?;

    let mut config = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(protocol_versions(min))
        .map_err(|e| Error::Config(format!("Invalid upstream TLS settings: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    // HTTP/2 first, falling back to HTTP/1.1
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}
