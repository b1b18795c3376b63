//! Secure channel adapter.
//!
//! Upgrades an already-connected socket to TLS and back again:
//!
//! - [`config`]: client context construction (client identity, trust roots, protocol
//!   versions, cipher policy, verification mode).
//! - [`verifier`]: certificate verification and the post-connection hostname check.
//! - [`channel`]: the handshake, encrypted read/write and the close-notify shutdown exchange.
//!
//! The socket itself is never owned or closed by this module; it is borrowed for every
//! operation so the session can fall back to plaintext after [`SecureChannel::shutdown`].
use thiserror::Error;

use crate::error::status;

pub mod channel;
pub mod config;
pub mod verifier;

pub use channel::{SecureChannel, SecureStream};
pub use config::{TlsSettings, VerifyServer, build_client_tls_config};
pub use verifier::{CatalogServerCertVerifier, CertificateNames, post_connection_check};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("TLS context initialisation failed: {0}")]
    Context(String),

    #[error("cipher policy '{0}' yields no usable cipher suites")]
    NoCiphers(String),

    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("peer presented no certificate")]
    PeerCertificateMissing,

    #[error("peer certificate does not match host '{0}'")]
    HostnameMismatch(String),

    #[error("certificate verification failed: {0}")]
    Certificate(String),

    #[error("error shutting down the TLS connection: {0}")]
    Shutdown(String),

    #[error("unrecognised verify-server mode '{0}'")]
    UnknownVerifyMode(String),
}

impl TlsError {
    pub fn status(&self) -> i32 {
        match self {
            TlsError::Context(_) | TlsError::NoCiphers(_) | TlsError::UnknownVerifyMode(_) => {
                status::tls::SSL_INIT_ERROR
            }
            TlsError::Handshake(_) => status::tls::SSL_HANDSHAKE_ERROR,
            TlsError::PeerCertificateMissing
            | TlsError::HostnameMismatch(_)
            | TlsError::Certificate(_) => status::tls::SSL_CERT_ERROR,
            TlsError::Shutdown(_) => status::tls::SSL_SHUTDOWN_ERROR,
        }
    }
}
