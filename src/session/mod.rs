//! Session handle.
//!
//! A [`Session`] owns one connected socket and everything layered on it: the optional TLS
//! channel, the login flag, the session signature, the negotiation result and the error stack.
//! All I/O on the socket goes through the session so that plaintext never mixes with TLS
//! records while a secure channel is active.
//!
//! The socket is closed exactly once, when the session is dropped or [`Session::disconnect`]ed.
use std::{
    net::TcpStream,
    sync::Arc,
    time::Duration,
};

use log::{debug, error, info, warn};

use crate::{
    auth::{AuthRegistry, AuthSession, client_login},
    error::{ClientError, ErrorStack, Result},
    negotiation::{NegotiationPolicy, NegotiationResult, negotiate},
    protocol::{Request, Response, read_message, write_message},
    tls::{SecureChannel, build_client_tls_config},
    transport::{Channel, TransportError, read_all, write_all},
};

mod env;
mod signature;

pub use env::{ClientEnv, DEFAULT_PAM_TTL, DEFAULT_PORT, DEFAULT_ZONE};
pub(crate) use signature::set_last_session_signature;
pub use signature::{SIGNATURE_BYTES, last_session_signature, signature_from_bytes};

/// Algorithm named in TLS start requests.
pub const DEFAULT_ENCRYPTION_ALGORITHM: &str = "AES-256-CBC";

#[derive(Debug)]
pub struct Session<S: Channel = TcpStream> {
    socket: S,
    env: ClientEnv,
    logged_in: bool,
    tls: Option<SecureChannel>,
    signature: String,
    errors: ErrorStack,
    negotiation_result: Option<NegotiationResult>,
}

impl Session<TcpStream> {
    /// Opens a TCP connection to `env.host:env.port`.
    pub fn connect(env: ClientEnv) -> Result<Self> {
        if env.host.is_empty() {
            return Err(ClientError::InvalidInput("no host configured".into()));
        }

        let address = format!("{}:{}", env.host, env.port);
        let socket = TcpStream::connect((env.host.as_str(), env.port))
            .map_err(|source| ClientError::Connect { address, source })?;
        debug!("connected to {}:{}", env.host, env.port);
        Ok(Self::new(socket, env))
    }

    /// Second handle on the socket, e.g. for shutting it down from a signal handler.
    pub fn try_clone_socket(&self) -> std::io::Result<TcpStream> {
        self.socket.try_clone()
    }
}

impl<S: Channel> Session<S> {
    /// Wraps an already-connected socket.
    pub fn new(socket: S, env: ClientEnv) -> Self {
        Self {
            socket,
            env,
            logged_in: false,
            tls: None,
            signature: String::new(),
            errors: ErrorStack::new(),
            negotiation_result: None,
        }
    }

    pub fn env(&self) -> &ClientEnv {
        &self.env
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn is_tls_active(&self) -> bool {
        self.tls.is_some()
    }

    /// Signature set by the last successful login, empty before that.
    pub fn session_signature(&self) -> &str {
        &self.signature
    }

    pub fn negotiation_result(&self) -> Option<NegotiationResult> {
        self.negotiation_result
    }

    pub fn errors(&self) -> &ErrorStack {
        &self.errors
    }

    /// Empties the error stack before an unrelated top-level operation.
    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    fn with_channel<T>(&mut self, f: impl FnOnce(&mut dyn Channel) -> T) -> T {
        match &mut self.tls {
            Some(tls) => f(&mut tls.stream(&mut self.socket)),
            None => f(&mut self.socket),
        }
    }

    /// Writes raw bytes through the active channel; see [`write_all`].
    pub fn write_bytes(&mut self, buf: &[u8]) -> usize {
        self.with_channel(|channel| write_all(channel, buf))
    }

    /// Reads raw bytes through the active channel; see [`read_all`].
    pub fn read_bytes(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> std::result::Result<usize, TransportError> {
        let read = self.with_channel(|channel| read_all(channel, buf, timeout))?;
        if read < buf.len() {
            warn!("read {read} of {} requested bytes", buf.len());
        }
        Ok(read)
    }

    pub fn send_request(&mut self, request: &Request) -> Result<()> {
        debug!("sending {request:?}");
        self.with_channel(|channel| write_message(channel, request))?;
        Ok(())
    }

    pub fn read_response(&mut self, timeout: Option<Duration>) -> Result<Response> {
        let response: Response = self.with_channel(|channel| read_message(channel, timeout))?;
        debug!("received {response:?}");
        Ok(response)
    }

    /// One request/response exchange; server-reported errors come back as [`ClientError::Server`].
    pub fn call(&mut self, request: &Request) -> Result<Response> {
        self.send_request(request)?;
        self.read_response(self.env.response_timeout)?.into_result()
    }

    fn recorded<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.errors.record(err);
        }
        result
    }

    /// Exchanges transport-security policies with the server and records the outcome.
    ///
    /// When both sides settle on TLS the handshake runs immediately.
    pub fn negotiate(&mut self) -> Result<NegotiationResult> {
        self.errors.clear();
        let result = self.negotiate_inner();
        self.recorded(result)
    }

    fn negotiate_inner(&mut self) -> Result<NegotiationResult> {
        let client = self.env.negotiation_policy;
        self.send_request(&Request::Negotiate {
            policy: client.as_str().to_string(),
        })?;

        let server = match self.read_response(self.env.response_timeout)?.into_result()? {
            Response::Negotiation { policy } => policy.parse::<NegotiationPolicy>()?,
            other => return Err(other.unexpected("Negotiation")),
        };

        let result = negotiate(client, server);
        self.send_request(&Request::NegotiationResult {
            result: result.as_str().to_string(),
        })?;
        self.negotiation_result = Some(result);
        info!("negotiated {result} (client {client}, server {server})");

        match result {
            NegotiationResult::Failure => Err(ClientError::Negotiation(format!(
                "client policy {client} is incompatible with server policy {server}"
            ))),
            NegotiationResult::UseTls => {
                self.enable_tls()?;
                Ok(result)
            }
            NegotiationResult::UseTcp => Ok(result),
        }
    }

    fn enable_tls(&mut self) -> Result<()> {
        if self.tls.is_some() {
            return Ok(());
        }

        let config = build_client_tls_config(&self.env.tls).inspect_err(|e| {
            error!("couldn't build the TLS context: {e}");
        })?;
        let channel = SecureChannel::handshake(
            Arc::new(config),
            &mut self.socket,
            &self.env.host,
            self.env.tls.verify_server,
        )?;
        self.tls = Some(channel);
        Ok(())
    }

    /// Asks the server to switch to TLS, then handshakes. No-op when TLS is already active.
    pub fn start_tls(&mut self) -> Result<()> {
        let result = self.start_tls_inner();
        self.recorded(result)
    }

    fn start_tls_inner(&mut self) -> Result<()> {
        if self.tls.is_some() {
            return Ok(());
        }

        let result = self
            .call(&Request::SslStart {
                algorithm: DEFAULT_ENCRYPTION_ALGORITHM.to_string(),
            })
            .and_then(expect_ok)
            .and_then(|()| self.enable_tls());
        if let Err(e) = &result {
            error!("couldn't start TLS: {e}");
        }
        result
    }

    /// Asks the server to switch back to plaintext, then runs the close-notify exchange.
    ///
    /// TLS stays active if either part fails. No-op when TLS is not active.
    pub fn end_tls(&mut self) -> Result<()> {
        let result = self.end_tls_inner();
        self.recorded(result)
    }

    fn end_tls_inner(&mut self) -> Result<()> {
        if self.tls.is_none() {
            return Ok(());
        }

        let result = self
            .call(&Request::SslEnd)
            .and_then(expect_ok)
            .and_then(|()| self.shutdown_tls());
        if let Err(e) = &result {
            error!("couldn't end TLS: {e}");
        }
        result
    }

    fn shutdown_tls(&mut self) -> Result<()> {
        let Some(tls) = self.tls.as_mut() else {
            return Ok(());
        };
        tls.shutdown(&mut self.socket)?;
        self.tls = None;
        self.negotiation_result = Some(NegotiationResult::UseTcp);
        debug!("TLS shut down, back to plaintext");
        Ok(())
    }

    /// Logs in with the built-in schemes.
    pub fn login(&mut self, context: Option<&str>, scheme_override: Option<&str>) -> Result<()> {
        self.login_with(&AuthRegistry::default(), context, scheme_override)
    }

    /// Logs in with the schemes known to `registry`.
    pub fn login_with(
        &mut self,
        registry: &AuthRegistry,
        context: Option<&str>,
        scheme_override: Option<&str>,
    ) -> Result<()> {
        self.errors.clear();
        client_login(self, registry, context, scheme_override)
    }

    /// Ends TLS, says goodbye and closes the socket.
    ///
    /// The socket is closed even when the goodbye fails.
    pub fn disconnect(mut self) -> Result<()> {
        if let Err(e) = self.end_tls() {
            warn!("closing without a clean TLS shutdown: {e}");
        }
        self.send_request(&Request::Disconnect)
    }
}

fn expect_ok(response: Response) -> Result<()> {
    match response {
        Response::Ok => Ok(()),
        other => Err(other.unexpected("Ok")),
    }
}

impl<S: Channel> AuthSession for Session<S> {
    fn env(&self) -> &ClientEnv {
        &self.env
    }

    fn call(&mut self, request: &Request) -> Result<Response> {
        Session::call(self, request)
    }

    fn is_tls_active(&self) -> bool {
        self.tls.is_some()
    }

    // The login engine records failures of its steps itself.
    fn start_tls(&mut self) -> Result<()> {
        self.start_tls_inner()
    }

    fn end_tls(&mut self) -> Result<()> {
        self.end_tls_inner()
    }

    fn set_session_signature(&mut self, signature: String) {
        self.signature = signature;
    }

    fn errors_mut(&mut self) -> &mut ErrorStack {
        &mut self.errors
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    fn mark_logged_in(&mut self) {
        self.logged_in = true;
    }
}
