use bincode::{Decode, Encode};

use crate::error::ClientError;

/// Messages sent from the server to the client.
#[derive(Encode, Decode, PartialEq, Eq, Clone)]
pub enum Response {
    Ok,
    /// Server side of the transport-security negotiation.
    Negotiation { policy: String },
    /// Challenge payload answering an [`AuthRequest`](super::Request::AuthRequest).
    AuthChallenge { challenge: Vec<u8> },
    /// Server-issued password answering a delegated-identity login.
    PamPassword { password: String },
    Err { code: i32, description: String },
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Response::Ok => "Ok",
            Response::Negotiation { .. } => "Negotiation",
            Response::AuthChallenge { .. } => "AuthChallenge",
            Response::PamPassword { .. } => "PamPassword",
            Response::Err { .. } => "Err",
        }
    }

    /// Turns a server-reported error into [`ClientError::Server`].
    pub fn into_result(self) -> Result<Response, ClientError> {
        match self {
            Response::Err { code, description } => Err(ClientError::Server { code, description }),
            resp => Ok(resp),
        }
    }

    /// Error for a response that does not fit the exchange in progress.
    pub fn unexpected(&self, expected: &str) -> ClientError {
        ClientError::UnexpectedResponse {
            expected: expected.to_string(),
            got: self.name().to_string(),
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Response::Negotiation { policy } => f
                .debug_struct("Negotiation")
                .field("policy", policy)
                .finish(),
            Response::AuthChallenge { challenge } => f
                .debug_struct("AuthChallenge")
                .field("len", &challenge.len())
                .finish(),
            Response::PamPassword { .. } => f.debug_struct("PamPassword").finish_non_exhaustive(),
            Response::Err { code, description } => f
                .debug_struct("Err")
                .field("code", code)
                .field("description", description)
                .finish(),
            Response::Ok => f.write_str("Ok"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn err_response_becomes_server_error() {
        let resp = Response::Err {
            code: -826000,
            description: "invalid authentication".to_string(),
        };

        let err = resp.into_result().unwrap_err();
        assert_eq!(err.status(), -826000);
    }

    #[test]
    fn ok_response_passes_through() {
        assert_eq!(Response::Ok.into_result().unwrap(), Response::Ok);
    }

    #[test]
    fn unexpected_names_both_sides() {
        let err = Response::Ok.unexpected("AuthChallenge");
        assert_eq!(
            err.to_string(),
            "unexpected response, expected AuthChallenge, got Ok"
        );
    }
}
