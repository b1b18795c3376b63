//! Authentication protocol engine.
//!
//! A login binds exactly one scheme, resolved by [`scheme::resolve_scheme_name`] and built from the
//! [`AuthRegistry`]. The engine ([`client_login`]) then drives the scheme's [`AuthPlugin`]
//! through four calls in a fixed order:
//!
//! 1. `client_start`: gathers credentials (context string, environment, cached file).
//! 2. `client_auth_request`: asks the server for a challenge.
//! 3. `establish_context`: derives the proof and the session signature.
//! 4. `client_auth_response`: sends the proof.
//!
//! Schemes talk to the server only through the [`AuthSession`] trait, so they can be exercised
//! against an in-memory session.
use std::collections::HashMap;

use thiserror::Error;

use crate::{
    error::{ErrorStack, Result, status},
    protocol::{Request, Response},
    session::ClientEnv,
};

mod engine;
mod native;
mod pam;
mod registry;
pub mod scheme;

pub use engine::client_login;
pub use native::{NativeAuth, challenge_response};
pub use pam::{PamAuth, password_proof};
pub use registry::{AuthObject, AuthRegistry, PluginFactory};
pub use scheme::{AUTH_SCHEME_ENV_VAR, NATIVE_SCHEME, PAM_SCHEME, resolve_scheme_name};

/// The only interface a scheme object can be resolved to.
pub const AUTH_INTERFACE: &str = "authentication";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown authentication scheme '{0}'")]
    UnknownScheme(String),

    #[error("scheme '{scheme}' does not provide the '{interface}' interface")]
    InterfaceUnresolved { scheme: String, interface: String },

    #[error("no credentials available for scheme '{0}'")]
    CredentialsMissing(String),

    #[error("{step} called before {requires}")]
    OutOfOrder {
        step: &'static str,
        requires: &'static str,
    },
}

impl AuthError {
    pub fn status(&self) -> i32 {
        match self {
            AuthError::UnknownScheme(_) => status::auth::AUTH_SCHEME_UNKNOWN,
            AuthError::InterfaceUnresolved { .. } => status::auth::AUTH_INTERFACE_UNRESOLVED,
            AuthError::CredentialsMissing(_) => status::auth::AUTH_CREDENTIALS_MISSING,
            AuthError::OutOfOrder { .. } => status::auth::AUTH_STEP_OUT_OF_ORDER,
        }
    }
}

/// What an authentication scheme may do with the connection it is logging in.
pub trait AuthSession {
    fn env(&self) -> &ClientEnv;

    /// Sends `request` and returns the server's reply; server errors come back as `Err`.
    fn call(&mut self, request: &Request) -> Result<Response>;

    fn is_tls_active(&self) -> bool;

    /// Asks the server to switch to TLS and performs the handshake.
    fn start_tls(&mut self) -> Result<()>;

    /// Asks the server to switch back to plaintext and shuts TLS down.
    fn end_tls(&mut self) -> Result<()>;

    fn set_session_signature(&mut self, signature: String);

    fn errors_mut(&mut self) -> &mut ErrorStack;

    fn is_logged_in(&self) -> bool;

    fn mark_logged_in(&mut self);
}

/// Capability set of one authentication scheme.
pub trait AuthPlugin {
    fn scheme(&self) -> &str;

    fn client_start(&mut self, session: &mut dyn AuthSession, context: Option<&str>)
    -> Result<()>;

    fn client_auth_request(&mut self, session: &mut dyn AuthSession) -> Result<()>;

    /// Returns the session signature derived from the exchange so far.
    fn establish_context(&mut self, session: &mut dyn AuthSession) -> Result<String>;

    fn client_auth_response(&mut self, session: &mut dyn AuthSession) -> Result<()>;
}

pub const PASSWORD_KEY: &str = "a_pw";
pub const USER_KEY: &str = "a_user";
pub const TTL_KEY: &str = "a_ttl";

/// `key=value;key=value` pairs passed to a login.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuthContext {
    values: HashMap<String, String>,
}

impl AuthContext {
    pub fn parse(context: Option<&str>) -> Self {
        let values = context
            .unwrap_or_default()
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.to_string()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        Self { values }
    }

    /// Non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
