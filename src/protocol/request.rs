use bincode::{Decode, Encode};

/// Messages sent from the client to the server.
///
/// Payload schemas of the authentication messages belong to the scheme that sends them.
#[derive(Encode, Decode, PartialEq, Eq, Clone)]
pub enum Request {
    /// Client side of the transport-security negotiation.
    Negotiate { policy: String },
    /// Outcome the client computed from both policies.
    NegotiationResult { result: String },
    /// Asks for an authentication challenge.
    AuthRequest,
    /// Credential proof for the current scheme.
    AuthResponse { username: String, response: Vec<u8> },
    /// Delegated-identity login; only ever sent over an encrypted channel.
    PamAuthRequest {
        username: String,
        password: String,
        ttl: u32,
    },
    /// Asks the server to switch the connection to TLS.
    SslStart { algorithm: String },
    /// Asks the server to switch the connection back to plaintext.
    SslEnd,
    Disconnect,
}

impl Request {
    /// Short message name for logs; never includes payload.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Negotiate { .. } => "Negotiate",
            Request::NegotiationResult { .. } => "NegotiationResult",
            Request::AuthRequest => "AuthRequest",
            Request::AuthResponse { .. } => "AuthResponse",
            Request::PamAuthRequest { .. } => "PamAuthRequest",
            Request::SslStart { .. } => "SslStart",
            Request::SslEnd => "SslEnd",
            Request::Disconnect => "Disconnect",
        }
    }
}

// Credentials must not leak into logs through `{:?}`.
impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Negotiate { policy } => {
                f.debug_struct("Negotiate").field("policy", policy).finish()
            }
            Request::NegotiationResult { result } => f
                .debug_struct("NegotiationResult")
                .field("result", result)
                .finish(),
            Request::AuthResponse { username, .. } => f
                .debug_struct("AuthResponse")
                .field("username", username)
                .finish_non_exhaustive(),
            Request::PamAuthRequest { username, ttl, .. } => f
                .debug_struct("PamAuthRequest")
                .field("username", username)
                .field("ttl", ttl)
                .finish_non_exhaustive(),
            Request::SslStart { algorithm } => f
                .debug_struct("SslStart")
                .field("algorithm", algorithm)
                .finish(),
            other => f.write_str(other.name()),
        }
    }
}
