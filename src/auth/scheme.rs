//! Scheme-name resolution.
//!
//! Precedence: explicit override, then [`AUTH_SCHEME_ENV_VAR`], then the persisted client
//! configuration, then [`NATIVE_SCHEME`]. Names are compared lowercase. Schemes listed in
//! [`OVERRIDE_ONLY_SCHEMES`] are honoured only when they come from the override; from any other
//! source they fall back to [`NATIVE_SCHEME`] without complaint.
use std::env;

use log::debug;

pub const NATIVE_SCHEME: &str = "native";
pub const PAM_SCHEME: &str = "pam";

pub const AUTH_SCHEME_ENV_VAR: &str = "IRODS_AUTHENTICATION_SCHEME";

pub const OVERRIDE_ONLY_SCHEMES: &[&str] = &[PAM_SCHEME];

/// Picks the scheme for one login attempt. Empty values count as unset.
pub fn resolve_scheme_name(
    override_scheme: Option<&str>,
    env_scheme: Option<&str>,
    persisted_scheme: Option<&str>,
) -> String {
    fn non_empty(s: Option<&str>) -> Option<&str> {
        s.map(str::trim).filter(|s| !s.is_empty())
    }

    if let Some(name) = non_empty(override_scheme) {
        return name.to_lowercase();
    }

    let name = non_empty(env_scheme)
        .or_else(|| non_empty(persisted_scheme))
        .map(str::to_lowercase)
        .unwrap_or_else(|| NATIVE_SCHEME.to_string());

    if OVERRIDE_ONLY_SCHEMES.contains(&name.as_str()) {
        debug!("scheme '{name}' requires an explicit override; using '{NATIVE_SCHEME}'");
        return NATIVE_SCHEME.to_string();
    }
    name
}

/// Value of [`AUTH_SCHEME_ENV_VAR`] in the current process, if set.
pub fn scheme_from_environment() -> Option<String> {
    env::var(AUTH_SCHEME_ENV_VAR).ok()
}
