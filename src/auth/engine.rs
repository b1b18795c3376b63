use std::io;

use log::{debug, error, info};

use super::{
    AUTH_INTERFACE, AuthRegistry, AuthSession,
    scheme::{resolve_scheme_name, scheme_from_environment},
};
use crate::{
    error::{ClientError, Result, report_failure},
    session::set_last_session_signature,
};

/// Authenticates `session` with the scheme picked from `scheme_override`, the environment or
/// the persisted configuration.
///
/// A session that is already logged in returns immediately without touching the network. Any
/// failing step stops the login and is returned as-is; completed steps are not rolled back.
pub fn client_login(
    session: &mut dyn AuthSession,
    registry: &AuthRegistry,
    context: Option<&str>,
    scheme_override: Option<&str>,
) -> Result<()> {
    if session.is_logged_in() {
        return Ok(());
    }

    let scheme = resolve_scheme_name(
        scheme_override,
        scheme_from_environment().as_deref(),
        session.env().auth_scheme.as_deref(),
    );
    debug!("logging in with scheme '{scheme}'");

    let result = registry.auth_object(&scheme).map_err(ClientError::from);
    let object = checked(session, "auth_object", false, result)?;

    let result = object.resolve(AUTH_INTERFACE).map_err(ClientError::from);
    let mut plugin = checked(session, "resolve", false, result)?;

    let result = plugin.client_start(session, context);
    checked(session, "client_start", false, result)?;

    let result = plugin.client_auth_request(session);
    checked(session, "client_auth_request", true, result)?;

    let result = plugin.establish_context(session);
    let signature = checked(session, "establish_context", false, result)?;
    set_last_session_signature(&signature);
    session.set_session_signature(signature);

    let result = plugin.client_auth_response(session);
    checked(session, "client_auth_response", true, result)?;

    session.mark_logged_in();
    info!("logged in as {} with scheme '{scheme}'", session.env().qualified_user());
    Ok(())
}

/// Records a failed step on the session's error stack, dumping the stack when `report` is set.
fn checked<T>(
    session: &mut dyn AuthSession,
    routine: &str,
    report: bool,
    result: Result<T>,
) -> Result<T> {
    if let Err(err) = &result {
        error!("{routine} failed: {err}");
        let errors = session.errors_mut();
        errors.record(err);
        if report {
            let _ = report_failure(io::stderr().lock(), errors, err.status(), routine);
        }
    }
    result
}
