//! Error types, status codes and the per-session error stack.
//!
//! Every failure inside the crate is a [`ClientError`], which wraps the layer-specific errors
//! ([`TransportError`], [`TlsError`], [`AuthError`]) and can always be lowered to a negative
//! numeric status from [`status`]. Callers that need the historical "status + message" view
//! read it from the session's [`ErrorStack`].
use std::{fmt, io::Write};

use thiserror::Error;

use crate::{auth::AuthError, tls::TlsError, transport::TransportError};

/// Numeric statuses reported alongside error messages.
///
/// All failures are negative; `0` is success.
pub mod status {
    pub const SUCCESS: i32 = 0;

    /// Input errors: rejected before any I/O happens.
    pub mod input {
        pub const SYS_INVALID_INPUT_PARAM: i32 = -130000;
    }

    /// Transport errors (raw or secure socket).
    pub mod transport {
        pub const SYS_HEADER_READ_LEN_ERR: i32 = -4000;
        pub const SYS_HEADER_WRITE_LEN_ERR: i32 = -5000;
        pub const SYS_PACK_INSTRUCT_FORMAT_ERR: i32 = -15000;
        pub const SYS_SOCK_READ_TIMEDOUT: i32 = -115000;
        pub const SYS_SOCK_READ_ERR: i32 = -116000;
        pub const SYS_UNEXPECTED_RESPONSE: i32 = -117000;
        pub const USER_SOCK_CONNECT_ERR: i32 = -305000;
    }

    /// Authentication errors.
    pub mod auth {
        pub const AUTH_SCHEME_UNKNOWN: i32 = -1800000;
        pub const AUTH_INTERFACE_UNRESOLVED: i32 = -1801000;
        pub const AUTH_CREDENTIALS_MISSING: i32 = -1802000;
        pub const AUTH_STEP_OUT_OF_ORDER: i32 = -1803000;
        pub const CAT_INVALID_AUTHENTICATION: i32 = -826000;
    }

    /// Transport-security errors.
    pub mod tls {
        pub const SSL_INIT_ERROR: i32 = -2100000;
        pub const SSL_HANDSHAKE_ERROR: i32 = -2101000;
        pub const SSL_SHUTDOWN_ERROR: i32 = -2102000;
        pub const SSL_CERT_ERROR: i32 = -2103000;
        pub const CLIENT_NEGOTIATION_ERROR: i32 = -2110000;
    }

    /// Symbolic name of a status, used in diagnostics.
    ///
    /// Sub-codes (e.g. an `errno` folded into the last three digits) map to their base status.
    pub fn name(code: i32) -> &'static str {
        if code == SUCCESS {
            return "SUCCESS";
        }
        match code / 1000 * 1000 {
            input::SYS_INVALID_INPUT_PARAM => "SYS_INVALID_INPUT_PARAM",
            transport::SYS_HEADER_READ_LEN_ERR => "SYS_HEADER_READ_LEN_ERR",
            transport::SYS_HEADER_WRITE_LEN_ERR => "SYS_HEADER_WRITE_LEN_ERR",
            transport::SYS_PACK_INSTRUCT_FORMAT_ERR => "SYS_PACK_INSTRUCT_FORMAT_ERR",
            transport::SYS_SOCK_READ_TIMEDOUT => "SYS_SOCK_READ_TIMEDOUT",
            transport::SYS_SOCK_READ_ERR => "SYS_SOCK_READ_ERR",
            transport::SYS_UNEXPECTED_RESPONSE => "SYS_UNEXPECTED_RESPONSE",
            transport::USER_SOCK_CONNECT_ERR => "USER_SOCK_CONNECT_ERR",
            auth::AUTH_SCHEME_UNKNOWN => "AUTH_SCHEME_UNKNOWN",
            auth::AUTH_INTERFACE_UNRESOLVED => "AUTH_INTERFACE_UNRESOLVED",
            auth::AUTH_CREDENTIALS_MISSING => "AUTH_CREDENTIALS_MISSING",
            auth::AUTH_STEP_OUT_OF_ORDER => "AUTH_STEP_OUT_OF_ORDER",
            auth::CAT_INVALID_AUTHENTICATION => "CAT_INVALID_AUTHENTICATION",
            tls::SSL_INIT_ERROR => "SSL_INIT_ERROR",
            tls::SSL_HANDSHAKE_ERROR => "SSL_HANDSHAKE_ERROR",
            tls::SSL_SHUTDOWN_ERROR => "SSL_SHUTDOWN_ERROR",
            tls::SSL_CERT_ERROR => "SSL_CERT_ERROR",
            tls::CLIENT_NEGOTIATION_ERROR => "CLIENT_NEGOTIATION_ERROR",
            _ => "UNKNOWN_STATUS",
        }
    }
}

/// Umbrella error returned by session-level operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("client-server negotiation failed: {0}")]
    Negotiation(String),

    #[error("unexpected response, expected {expected}, got {got}")]
    UnexpectedResponse { expected: String, got: String },

    #[error("server error {code}: {description}")]
    Server { code: i32, description: String },
}

impl ClientError {
    /// Negative status equivalent of this error.
    pub fn status(&self) -> i32 {
        match self {
            ClientError::InvalidInput(_) => status::input::SYS_INVALID_INPUT_PARAM,
            ClientError::Connect { source, .. } => {
                status::transport::USER_SOCK_CONNECT_ERR - source.raw_os_error().unwrap_or(0)
            }
            ClientError::Transport(e) => e.status(),
            ClientError::Tls(e) => e.status(),
            ClientError::Auth(e) => e.status(),
            ClientError::Negotiation(_) => status::tls::CLIENT_NEGOTIATION_ERROR,
            ClientError::UnexpectedResponse { .. } => status::transport::SYS_UNEXPECTED_RESPONSE,
            ClientError::Server { code, .. } => *code,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub status: i32,
    pub message: String,
}

/// Ordered, append-only record of failures for the current operation.
///
/// Index 0 is the earliest entry.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorStack {
    entries: Vec<ErrorMessage>,
}

impl ErrorStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, status: i32, message: impl Into<String>) {
        self.entries.push(ErrorMessage {
            status,
            message: message.into(),
        });
    }

    /// Records `err` with its status and display text.
    pub fn record(&mut self, err: &ClientError) {
        self.push(err.status(), err.to_string());
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorMessage> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry; called between independent top-level operations.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Display for ErrorStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (level, entry) in self.entries.iter().enumerate() {
            writeln!(f, "Level {level}: {}", entry.message)?;
        }
        Ok(())
    }
}

/// Dumps the error stack followed by a summary line for `routine`.
pub fn report_failure<W: Write>(
    mut writer: W,
    stack: &ErrorStack,
    code: i32,
    routine: &str,
) -> std::io::Result<()> {
    write!(writer, "{stack}")?;
    writeln!(
        writer,
        "{routine} failed with error {code} {}",
        status::name(code)
    )?;
    writer.flush()
}
