pub mod auth;
pub mod error;
pub mod negotiation;
pub mod protocol;
pub mod session;
pub mod tls;
pub mod transport;

pub use auth::{AuthPlugin, AuthRegistry, AuthSession, client_login};
pub use error::{ClientError, ErrorStack, Result};
pub use negotiation::{NegotiationPolicy, NegotiationResult};
pub use session::{ClientEnv, Session, last_session_signature};
pub use tls::{TlsSettings, VerifyServer};
