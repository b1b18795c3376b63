//! TLS client context construction.
//!
//! Builds a `rustls::ClientConfig` from [`TlsSettings`]:
//!
//! - TLS 1.2 and 1.3 only, ring crypto provider.
//! - Optional client certificate chain + private key (PEM); anonymous client otherwise.
//! - Trust roots from the configured CA file and/or CA directory, or the bundled web PKI
//!   roots when neither is configured.
//! - Cipher suites filtered through the configured cipher policy; a policy that leaves no
//!   suite fails the build.
//! - The verification mode is fixed into the [`CatalogServerCertVerifier`] at build time.
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use log::{debug, error, warn};
use rustls::{ClientConfig, RootCertStore, SupportedCipherSuite, crypto::CryptoProvider};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};

use super::{TlsError, verifier::CatalogServerCertVerifier};

/// Cipher policy used when none is configured: every suite the provider offers.
pub const DEFAULT_CIPHER_POLICY: &str = "DEFAULT";

/// How much of the server's certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyServer {
    /// Problems are logged, never fatal.
    None,
    /// Chain verification only.
    Cert,
    /// Chain verification plus the post-connection hostname check.
    #[default]
    Hostname,
}

impl VerifyServer {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyServer::None => "none",
            VerifyServer::Cert => "cert",
            VerifyServer::Hostname => "hostname",
        }
    }
}

impl FromStr for VerifyServer {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(VerifyServer::None),
            "cert" => Ok(VerifyServer::Cert),
            "hostname" => Ok(VerifyServer::Hostname),
            other => Err(TlsError::UnknownVerifyMode(other.to_string())),
        }
    }
}

impl fmt::Display for VerifyServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-security inputs, read once when a context is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub certificate_chain_file: Option<PathBuf>,
    pub private_key_file: Option<PathBuf>,
    pub ca_certificate_file: Option<PathBuf>,
    pub ca_certificate_path: Option<PathBuf>,
    pub verify_server: VerifyServer,
    /// Colon-separated suite names (e.g. `TLS13_AES_256_GCM_SHA384`), `DEFAULT` or `ALL`.
    pub cipher_policy: String,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            certificate_chain_file: None,
            private_key_file: None,
            ca_certificate_file: None,
            ca_certificate_path: None,
            verify_server: VerifyServer::default(),
            cipher_policy: DEFAULT_CIPHER_POLICY.to_string(),
        }
    }
}

/// Build the client context for one TLS upgrade.
pub fn build_client_tls_config(settings: &TlsSettings) -> Result<ClientConfig, TlsError> {
    let mut provider = rustls::crypto::ring::default_provider();
    provider.cipher_suites = cipher_suites_for_policy(&settings.cipher_policy, &provider);
    if provider.cipher_suites.is_empty() {
        error!(
            "couldn't set the cipher list: no valid ciphers in '{}'",
            settings.cipher_policy
        );
        return Err(TlsError::NoCiphers(settings.cipher_policy.clone()));
    }
    let provider = Arc::new(provider);

    let roots = load_trust_roots(settings)?;
    let verifier = CatalogServerCertVerifier::new(roots, provider.clone(), settings.verify_server)?;

    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| TlsError::Context(format!("TLS version config: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));

    let config = match &settings.certificate_chain_file {
        Some(chain_file) => {
            let key_file = settings.private_key_file.as_ref().ok_or_else(|| {
                TlsError::Context("certificate chain configured without a private key".into())
            })?;
            let chain = load_certificates(chain_file)?;
            let key = PrivateKeyDer::from_pem_file(key_file).map_err(|e| {
                TlsError::Context(format!("couldn't read key file {}: {e}", key_file.display()))
            })?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| TlsError::Context(format!("client cert config: {e}")))?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(config)
}

/// Suites from `provider` selected by `policy`, in policy order, without duplicates.
pub fn cipher_suites_for_policy(policy: &str, provider: &CryptoProvider) -> Vec<SupportedCipherSuite> {
    let mut selected: Vec<SupportedCipherSuite> = Vec::new();
    let mut select = |suite: &SupportedCipherSuite| {
        if !selected.iter().any(|s| s.suite() == suite.suite()) {
            selected.push(*suite);
        }
    };

    for token in policy
        .split([':', ',', ' '])
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        if token.eq_ignore_ascii_case("DEFAULT") || token.eq_ignore_ascii_case("ALL") {
            provider.cipher_suites.iter().for_each(&mut select);
            continue;
        }
        match provider
            .cipher_suites
            .iter()
            .find(|s| format!("{:?}", s.suite()).eq_ignore_ascii_case(token))
        {
            Some(suite) => select(suite),
            None => debug!("ignoring unsupported cipher suite '{token}'"),
        }
    }

    selected
}

fn load_trust_roots(settings: &TlsSettings) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();

    if settings.ca_certificate_file.is_none() && settings.ca_certificate_path.is_none() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    }

    if let Some(file) = &settings.ca_certificate_file {
        if let Err(e) = add_pem_roots(&mut roots, file) {
            error!("error loading CA certificate file: {e}");
        }
    }

    if let Some(dir) = &settings.ca_certificate_path {
        let entries = fs::read_dir(dir).map_err(|e| {
            TlsError::Context(format!("couldn't read CA directory {}: {e}", dir.display()))
        })?;
        for path in entries.flatten().map(|e| e.path()).filter(|p| p.is_file()) {
            if let Err(e) = add_pem_roots(&mut roots, &path) {
                debug!("skipping {}: {e}", path.display());
            }
        }
    }

    Ok(roots)
}

fn add_pem_roots(roots: &mut RootCertStore, path: &Path) -> Result<usize, TlsError> {
    let certs = load_certificates(path)?;
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if ignored > 0 {
        warn!("ignored {ignored} unparsable certificates in {}", path.display());
    }
    Ok(added)
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let read_err =
        |e: rustls_pki_types::pem::Error| TlsError::Context(format!("{}: {e}", path.display()));

    let certs = CertificateDer::pem_file_iter(path)
        .map_err(read_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    if certs.is_empty() {
        return Err(TlsError::Context(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use tempdir::TempDir;

    use super::*;

    fn self_signed_pem() -> (String, String) {
        let certified = rcgen::generate_simple_self_signed(vec!["catalog.example.org".to_string()])
            .expect("cert gen");
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        File::create(&path)
            .unwrap()
            .write_all(contents.as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn verify_mode_parsing() {
        assert_eq!("none".parse::<VerifyServer>().unwrap(), VerifyServer::None);
        assert_eq!("CERT".parse::<VerifyServer>().unwrap(), VerifyServer::Cert);
        assert_eq!(
            " hostname ".parse::<VerifyServer>().unwrap(),
            VerifyServer::Hostname
        );
        assert!(matches!(
            "strict".parse::<VerifyServer>(),
            Err(TlsError::UnknownVerifyMode(_))
        ));
    }

    #[test]
    fn default_policy_selects_every_suite() {
        let provider = rustls::crypto::ring::default_provider();
        let suites = cipher_suites_for_policy(DEFAULT_CIPHER_POLICY, &provider);
        assert_eq!(suites.len(), provider.cipher_suites.len());
    }

    #[test]
    fn named_policy_selects_in_order_without_duplicates() {
        let provider = rustls::crypto::ring::default_provider();
        let suites = cipher_suites_for_policy(
            "TLS13_CHACHA20_POLY1305_SHA256:tls13_aes_256_gcm_sha384:TLS13_CHACHA20_POLY1305_SHA256",
            &provider,
        );

        let names: Vec<String> = suites.iter().map(|s| format!("{:?}", s.suite())).collect();
        assert_eq!(
            names,
            vec!["TLS13_CHACHA20_POLY1305_SHA256", "TLS13_AES_256_GCM_SHA384"]
        );
    }

    #[test]
    fn policy_without_usable_suites_fails_build() {
        let settings = TlsSettings {
            cipher_policy: "RC4-MD5:DES-CBC3-SHA".to_string(),
            ..TlsSettings::default()
        };
        assert!(matches!(
            build_client_tls_config(&settings),
            Err(TlsError::NoCiphers(_))
        ));
    }

    #[test]
    fn anonymous_client_with_default_roots_builds() {
        assert!(build_client_tls_config(&TlsSettings::default()).is_ok());
    }

    #[test]
    fn client_identity_and_ca_file_build() {
        let dir = TempDir::new("tls-config").unwrap();
        let (cert_pem, key_pem) = self_signed_pem();
        let cert = write_file(&dir, "client.crt", &cert_pem);
        let key = write_file(&dir, "client.key", &key_pem);

        let settings = TlsSettings {
            certificate_chain_file: Some(cert.clone()),
            private_key_file: Some(key),
            ca_certificate_file: Some(cert),
            ..TlsSettings::default()
        };
        assert!(build_client_tls_config(&settings).is_ok());
    }

    #[test]
    fn chain_without_key_is_rejected() {
        let dir = TempDir::new("tls-config").unwrap();
        let (cert_pem, _) = self_signed_pem();
        let cert = write_file(&dir, "client.crt", &cert_pem);

        let settings = TlsSettings {
            certificate_chain_file: Some(cert),
            ..TlsSettings::default()
        };
        assert!(matches!(
            build_client_tls_config(&settings),
            Err(TlsError::Context(_))
        ));
    }

    #[test]
    fn ca_directory_skips_non_certificates() {
        let dir = TempDir::new("tls-ca").unwrap();
        let (cert_pem, _) = self_signed_pem();
        write_file(&dir, "ca.pem", &cert_pem);
        write_file(&dir, "README", "not a certificate");

        let settings = TlsSettings {
            ca_certificate_path: Some(dir.path().to_path_buf()),
            ..TlsSettings::default()
        };
        let roots = load_trust_roots(&settings).unwrap();
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn unreadable_ca_file_fails_closed_when_verifying() {
        let settings = TlsSettings {
            ca_certificate_file: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..TlsSettings::default()
        };
        assert!(matches!(
            build_client_tls_config(&settings),
            Err(TlsError::Context(_))
        ));
    }

    #[test]
    fn unreadable_ca_file_tolerated_without_verification() {
        let settings = TlsSettings {
            ca_certificate_file: Some(PathBuf::from("/nonexistent/ca.pem")),
            verify_server: VerifyServer::None,
            ..TlsSettings::default()
        };
        assert!(build_client_tls_config(&settings).is_ok());
    }
}
