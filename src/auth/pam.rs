//! Delegated external-identity scheme.
//!
//! The user's external password is handed to the server once, always over TLS, and the server
//! answers with a generated catalog password. Every later proof is derived from that generated
//! password, which is cached to the client's auth file when one is configured.
use std::{fmt, fs};

use log::{debug, warn};
use md5::{Digest, Md5};

use super::{AuthContext, AuthError, AuthPlugin, AuthSession, PAM_SCHEME, PASSWORD_KEY, TTL_KEY, USER_KEY};
use crate::{
    error::{ClientError, Result},
    protocol::{Request, Response},
    session::signature_from_bytes,
};

#[derive(Default)]
pub struct PamAuth {
    user: String,
    zone: String,
    password: Option<String>,
    ttl: u32,
    generated: Option<String>,
}

impl fmt::Debug for PamAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PamAuth")
            .field("user", &self.user)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// MD5 of the server-generated password.
pub fn password_proof(generated: &str) -> Vec<u8> {
    Md5::digest(generated.as_bytes()).to_vec()
}

impl AuthPlugin for PamAuth {
    fn scheme(&self) -> &str {
        PAM_SCHEME
    }

    fn client_start(&mut self, session: &mut dyn AuthSession, context: Option<&str>) -> Result<()> {
        let ctx = AuthContext::parse(context);
        let env = session.env();

        self.user = ctx.get(USER_KEY).unwrap_or(env.user_name.as_str()).to_string();
        if self.user.is_empty() {
            return Err(ClientError::InvalidInput("no user name configured".into()));
        }
        self.zone = env.zone_name.clone();

        let password = ctx
            .get(PASSWORD_KEY)
            .map(str::to_string)
            .or_else(|| env.password.clone())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AuthError::CredentialsMissing(PAM_SCHEME.into()))?;
        self.password = Some(password);

        self.ttl = match ctx.get(TTL_KEY) {
            Some(ttl) => ttl
                .trim()
                .parse::<u32>()
                .map_err(|_| ClientError::InvalidInput(format!("invalid TTL '{ttl}'")))?,
            None => env.pam_ttl,
        };
        Ok(())
    }

    fn client_auth_request(&mut self, session: &mut dyn AuthSession) -> Result<()> {
        let Some(password) = self.password.clone() else {
            return Err(AuthError::OutOfOrder {
                step: "client_auth_request",
                requires: "client_start",
            }
            .into());
        };

        let started_tls = !session.is_tls_active();
        if started_tls {
            debug!("starting TLS for the delegated-identity request");
            session.start_tls()?;
        }

        let reply = session.call(&Request::PamAuthRequest {
            username: self.user.clone(),
            password,
            ttl: self.ttl,
        });

        if started_tls {
            session.end_tls()?;
        }

        match reply? {
            Response::PamPassword { password } => {
                self.generated = Some(password);
                Ok(())
            }
            other => Err(other.unexpected("PamPassword")),
        }
    }

    fn establish_context(&mut self, session: &mut dyn AuthSession) -> Result<String> {
        let Some(generated) = &self.generated else {
            return Err(AuthError::OutOfOrder {
                step: "establish_context",
                requires: "client_auth_request",
            }
            .into());
        };

        if let Some(path) = &session.env().auth_file {
            if let Err(e) = fs::write(path, generated) {
                warn!("couldn't cache the generated password in {}: {e}", path.display());
            }
        }
        Ok(signature_from_bytes(&password_proof(generated)))
    }

    fn client_auth_response(&mut self, session: &mut dyn AuthSession) -> Result<()> {
        let Some(generated) = &self.generated else {
            return Err(AuthError::OutOfOrder {
                step: "client_auth_response",
                requires: "client_auth_request",
            }
            .into());
        };

        let request = Request::AuthResponse {
            username: format!("{}#{}", self.user, self.zone),
            response: password_proof(generated),
        };
        match session.call(&request)? {
            Response::Ok => Ok(()),
            other => Err(other.unexpected("Ok")),
        }
    }
}
