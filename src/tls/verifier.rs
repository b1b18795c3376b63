//! Server certificate verification.
//!
//! [`CatalogServerCertVerifier`] delegates chain and signature checks to the webpki verifier
//! and then applies the configured [`VerifyServer`] mode:
//!
//! - `none`: every problem is logged and the certificate is accepted anyway.
//! - `cert` / `hostname`: chain problems fail the handshake. Name mismatches reported by
//!   webpki are ignored here because hostnames are checked by [`post_connection_check`]
//!   once the handshake completes, and only in `hostname` mode.
//!
//! The hostname rules are deliberately narrower than RFC 6125: a DNS subject-alternative-name
//! or the common name must equal the host (ASCII case-insensitive), or start with `*` followed
//! by exactly the host's suffix from its first `.`.
use std::sync::Arc;

use log::{error, warn};
use rustls::{
    CertificateError, DigitallySignedStruct, Error as RustlsError, RootCertStore, SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    crypto::CryptoProvider,
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use x509_parser::prelude::*;

use super::{TlsError, config::VerifyServer};

#[derive(Debug)]
pub struct CatalogServerCertVerifier {
    inner: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
    mode: VerifyServer,
}

impl CatalogServerCertVerifier {
    /// Fails when verification is required but `roots` cannot back a verifier.
    pub fn new(
        roots: RootCertStore,
        provider: Arc<CryptoProvider>,
        mode: VerifyServer,
    ) -> Result<Self, TlsError> {
        let inner = match WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
        {
            Ok(verifier) => Some(verifier),
            Err(e) if mode == VerifyServer::None => {
                warn!("no usable trust anchors ({e}); server certificates will not be checked");
                None
            }
            Err(e) => return Err(TlsError::Context(format!("certificate verifier: {e}"))),
        };

        Ok(Self {
            inner,
            provider,
            mode,
        })
    }
}

impl ServerCertVerifier for CatalogServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        let Some(inner) = &self.inner else {
            return Ok(ServerCertVerified::assertion());
        };

        match inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now) {
            Ok(verified) => Ok(verified),
            Err(e) if self.mode == VerifyServer::None => {
                log_certificate_problem(end_entity, &e);
                Ok(ServerCertVerified::assertion())
            }
            Err(e) if is_name_mismatch(&e) => Ok(ServerCertVerified::assertion()),
            Err(e) => {
                log_certificate_problem(end_entity, &e);
                Err(e)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn is_name_mismatch(err: &RustlsError) -> bool {
    matches!(
        err,
        RustlsError::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
        )
    )
}

fn log_certificate_problem(der: &CertificateDer<'_>, err: &RustlsError) {
    warn!("problem with server certificate: {err}");
    if let Ok((_, cert)) = X509Certificate::from_der(der) {
        warn!("  issuer = {}", cert.issuer());
        warn!("  subject = {}", cert.subject());
    }
}

/// Names a certificate can be matched on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateNames {
    /// DNS-type subject alternative names.
    pub dns_names: Vec<String>,
    pub common_name: Option<String>,
}

impl CertificateNames {
    pub fn from_der(der: &[u8]) -> Result<Self, TlsError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| TlsError::Certificate(format!("X.509 parse error: {e}")))?;

        let dns_names = match cert.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                return Err(TlsError::Certificate(format!(
                    "malformed subjectAltName: {e}"
                )));
            }
        };

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        Ok(Self {
            dns_names,
            common_name,
        })
    }

    /// SAN entries are tried first, then the common name.
    pub fn matches(&self, host: &str) -> bool {
        self.dns_names.iter().any(|name| name_matches(name, host))
            || self
                .common_name
                .as_deref()
                .is_some_and(|cn| name_matches(cn, host))
    }
}

fn name_matches(pattern: &str, host: &str) -> bool {
    if pattern.eq_ignore_ascii_case(host) {
        return true;
    }
    match (pattern.strip_prefix('*'), host.find('.')) {
        (Some(suffix), Some(dot)) => suffix.eq_ignore_ascii_case(&host[dot..]),
        _ => false,
    }
}

/// Checks the peer certificate against `host` when `mode` asks for hostname verification.
///
/// Always fails closed: a missing certificate or host is a failure, never a downgrade.
pub fn post_connection_check(
    mode: VerifyServer,
    peer_certificates: Option<&[CertificateDer<'_>]>,
    host: &str,
) -> Result<(), TlsError> {
    if mode != VerifyServer::Hostname {
        return Ok(());
    }

    let leaf = peer_certificates
        .and_then(|certs| certs.first())
        .ok_or(TlsError::PeerCertificateMissing)?;
    if host.is_empty() {
        return Err(TlsError::Certificate(
            "no peer hostname to verify against".into(),
        ));
    }

    let names = CertificateNames::from_der(leaf)?;
    if names.matches(host) {
        Ok(())
    } else {
        error!(
            "server certificate names {:?} / CN {:?} do not match '{host}'",
            names.dns_names, names.common_name
        );
        Err(TlsError::HostnameMismatch(host.to_string()))
    }
}
