//! Password challenge/response scheme.
//!
//! The server sends a [`CHALLENGE_LEN`]-byte challenge. The client answers with
//! `MD5(challenge || password padded with NUL to MAX_PASSWORD_LEN)`, with every NUL byte of the
//! digest replaced by `0x01` so the proof survives C-string handling on the server.
use std::{fmt, fs};

use log::debug;
use md5::{Digest, Md5};

use super::{AuthContext, AuthError, AuthPlugin, AuthSession, NATIVE_SCHEME, PASSWORD_KEY, USER_KEY};
use crate::{
    error::{ClientError, Result},
    protocol::{Request, Response},
    session::signature_from_bytes,
};

pub const CHALLENGE_LEN: usize = 64;
pub const MAX_PASSWORD_LEN: usize = 50;

#[derive(Default)]
pub struct NativeAuth {
    user: String,
    password: Option<String>,
    challenge: Option<Vec<u8>>,
    proof: Option<Vec<u8>>,
}

impl fmt::Debug for NativeAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeAuth")
            .field("user", &self.user)
            .field("challenge", &self.challenge.is_some())
            .finish_non_exhaustive()
    }
}

/// Proof for `challenge` under `password`.
pub fn challenge_response(challenge: &[u8], password: &str) -> Result<Vec<u8>> {
    if password.len() > MAX_PASSWORD_LEN {
        return Err(ClientError::InvalidInput(format!(
            "password longer than {MAX_PASSWORD_LEN} bytes"
        )));
    }

    let mut padded = [0u8; MAX_PASSWORD_LEN];
    padded[..password.len()].copy_from_slice(password.as_bytes());

    let mut hasher = Md5::new();
    hasher.update(challenge);
    hasher.update(padded);
    let digest = hasher
        .finalize()
        .iter()
        .map(|&b| if b == 0 { 1 } else { b })
        .collect();
    Ok(digest)
}

fn read_cached_password(session: &dyn AuthSession) -> Option<String> {
    let path = session.env().auth_file.as_ref()?;
    match fs::read_to_string(path) {
        Ok(contents) => Some(contents.trim_end_matches(['\r', '\n']).to_string()),
        Err(e) => {
            debug!("no cached password in {}: {e}", path.display());
            None
        }
    }
}

impl AuthPlugin for NativeAuth {
    fn scheme(&self) -> &str {
        NATIVE_SCHEME
    }

    fn client_start(&mut self, session: &mut dyn AuthSession, context: Option<&str>) -> Result<()> {
        let ctx = AuthContext::parse(context);
        let env = session.env();

        let user = ctx.get(USER_KEY).unwrap_or(env.user_name.as_str());
        if user.is_empty() {
            return Err(ClientError::InvalidInput("no user name configured".into()));
        }
        self.user = format!("{user}#{}", env.zone_name);

        let password = ctx
            .get(PASSWORD_KEY)
            .map(str::to_string)
            .or_else(|| env.password.clone().filter(|p| !p.is_empty()))
            .or_else(|| read_cached_password(&*session))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AuthError::CredentialsMissing(NATIVE_SCHEME.into()))?;
        if password.len() > MAX_PASSWORD_LEN {
            return Err(ClientError::InvalidInput(format!(
                "password longer than {MAX_PASSWORD_LEN} bytes"
            )));
        }
        self.password = Some(password);
        Ok(())
    }

    fn client_auth_request(&mut self, session: &mut dyn AuthSession) -> Result<()> {
        if self.password.is_none() {
            return Err(AuthError::OutOfOrder {
                step: "client_auth_request",
                requires: "client_start",
            }
            .into());
        }

        match session.call(&Request::AuthRequest)? {
            Response::AuthChallenge { challenge } if challenge.len() == CHALLENGE_LEN => {
                self.challenge = Some(challenge);
                Ok(())
            }
            Response::AuthChallenge { challenge } => Err(ClientError::UnexpectedResponse {
                expected: format!("{CHALLENGE_LEN}-byte challenge"),
                got: format!("{}-byte challenge", challenge.len()),
            }),
            other => Err(other.unexpected("AuthChallenge")),
        }
    }

    fn establish_context(&mut self, _session: &mut dyn AuthSession) -> Result<String> {
        let (Some(challenge), Some(password)) = (&self.challenge, &self.password) else {
            return Err(AuthError::OutOfOrder {
                step: "establish_context",
                requires: "client_auth_request",
            }
            .into());
        };

        self.proof = Some(challenge_response(challenge, password)?);
        Ok(signature_from_bytes(challenge))
    }

    fn client_auth_response(&mut self, session: &mut dyn AuthSession) -> Result<()> {
        let proof = self.proof.clone().ok_or(AuthError::OutOfOrder {
            step: "client_auth_response",
            requires: "establish_context",
        })?;

        let request = Request::AuthResponse {
            username: self.user.clone(),
            response: proof,
        };
        match session.call(&request)? {
            Response::Ok => Ok(()),
            other => Err(other.unexpected("Ok")),
        }
    }
}
