use std::{fmt, path::PathBuf, time::Duration};

use crate::{negotiation::NegotiationPolicy, tls::TlsSettings};

pub const DEFAULT_PORT: u16 = 1247;
pub const DEFAULT_ZONE: &str = "tempZone";

/// Default delegated-identity password lifetime, in hours.
pub const DEFAULT_PAM_TTL: u32 = 0;

/// Client configuration consumed by a session.
///
/// Loading it from files is left to the caller; the session only reads it.
#[derive(Clone)]
pub struct ClientEnv {
    pub user_name: String,
    pub zone_name: String,
    pub host: String,
    pub port: u16,
    /// Persisted scheme choice; consulted after the override and the environment variable.
    pub auth_scheme: Option<String>,
    pub password: Option<String>,
    /// Cached password file, read by the native scheme and written by the delegated one.
    pub auth_file: Option<PathBuf>,
    pub pam_ttl: u32,
    pub negotiation_policy: NegotiationPolicy,
    /// Applied to every response read; `None` blocks indefinitely.
    pub response_timeout: Option<Duration>,
    pub tls: TlsSettings,
}

impl ClientEnv {
    /// `user#zone`, the identity sent in authentication responses.
    pub fn qualified_user(&self) -> String {
        format!("{}#{}", self.user_name, self.zone_name)
    }
}

impl Default for ClientEnv {
    fn default() -> Self {
        Self {
            user_name: String::new(),
            zone_name: DEFAULT_ZONE.to_string(),
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            auth_scheme: None,
            password: None,
            auth_file: None,
            pam_ttl: DEFAULT_PAM_TTL,
            negotiation_policy: NegotiationPolicy::default(),
            response_timeout: None,
            tls: TlsSettings::default(),
        }
    }
}

impl fmt::Debug for ClientEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEnv")
            .field("user_name", &self.user_name)
            .field("zone_name", &self.zone_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth_scheme", &self.auth_scheme)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("auth_file", &self.auth_file)
            .field("pam_ttl", &self.pam_ttl)
            .field("negotiation_policy", &self.negotiation_policy)
            .field("response_timeout", &self.response_timeout)
            .field("tls", &self.tls)
            .finish()
    }
}
