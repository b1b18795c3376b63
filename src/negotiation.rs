//! Client/server transport-security negotiation.
//!
//! Each side advertises a policy; the client combines both with [`negotiate`] and reports the
//! outcome back to the server. The outcome tag is what the session records as its negotiation
//! result.
use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::error::ClientError;

#[derive(Debug, Error)]
#[error("unknown negotiation policy '{0}'")]
pub struct UnknownPolicy(pub String);

impl From<UnknownPolicy> for ClientError {
    fn from(err: UnknownPolicy) -> Self {
        ClientError::Negotiation(err.to_string())
    }
}

/// How strongly one side wants an encrypted transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationPolicy {
    Require,
    DontCare,
    #[default]
    Refuse,
}

impl NegotiationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationPolicy::Require => "CS_NEG_REQUIRE",
            NegotiationPolicy::DontCare => "CS_NEG_DONT_CARE",
            NegotiationPolicy::Refuse => "CS_NEG_REFUSE",
        }
    }
}

impl FromStr for NegotiationPolicy {
    type Err = UnknownPolicy;

    /// Accepts the wire tags and their short lowercase forms (`require`, `dont_care`, `refuse`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let short = s.strip_prefix("CS_NEG_").unwrap_or(s).to_lowercase();
        match short.as_str() {
            "require" => Ok(NegotiationPolicy::Require),
            "dont_care" => Ok(NegotiationPolicy::DontCare),
            "refuse" => Ok(NegotiationPolicy::Refuse),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for NegotiationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of combining both policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationResult {
    UseTls,
    UseTcp,
    Failure,
}

impl NegotiationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationResult::UseTls => "CS_NEG_USE_SSL",
            NegotiationResult::UseTcp => "CS_NEG_USE_TCP",
            NegotiationResult::Failure => "CS_NEG_FAILURE",
        }
    }
}

impl fmt::Display for NegotiationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combines the client and server policies.
pub fn negotiate(client: NegotiationPolicy, server: NegotiationPolicy) -> NegotiationResult {
    use NegotiationPolicy::*;

    match (client, server) {
        (Require, Refuse) | (Refuse, Require) => NegotiationResult::Failure,
        (Refuse, _) | (_, Refuse) => NegotiationResult::UseTcp,
        _ => NegotiationResult::UseTls,
    }
}
