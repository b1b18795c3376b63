use std::collections::HashMap;

use log::debug;

use super::{
    AUTH_INTERFACE, AuthError, AuthPlugin, NATIVE_SCHEME, PAM_SCHEME, native::NativeAuth,
    pam::PamAuth,
};

/// Builds a fresh plugin for one login attempt.
pub type PluginFactory = fn() -> Box<dyn AuthPlugin>;

/// Scheme name to plugin constructor.
#[derive(Clone)]
pub struct AuthRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl AuthRegistry {
    /// A registry with no schemes at all.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Adds or replaces `scheme`. Names are stored lowercase.
    pub fn register(&mut self, scheme: &str, factory: PluginFactory) {
        self.factories.insert(scheme.to_lowercase(), factory);
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Constructs the scheme object for `scheme`.
    pub fn auth_object(&self, scheme: &str) -> Result<AuthObject, AuthError> {
        let factory = self
            .factories
            .get(scheme)
            .ok_or_else(|| AuthError::UnknownScheme(scheme.to_string()))?;
        debug!("constructed auth object for scheme '{scheme}'");
        Ok(AuthObject {
            scheme: scheme.to_string(),
            factory: *factory,
        })
    }
}

impl Default for AuthRegistry {
    /// The built-in `native` and `pam` schemes.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(NATIVE_SCHEME, || -> Box<dyn AuthPlugin> {
            Box::new(NativeAuth::default())
        });
        registry.register(PAM_SCHEME, || -> Box<dyn AuthPlugin> {
            Box::new(PamAuth::default())
        });
        registry
    }
}

impl std::fmt::Debug for AuthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<&str> = self.schemes().collect();
        schemes.sort_unstable();
        f.debug_struct("AuthRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

/// A scheme known to the registry, not yet bound to an interface.
#[derive(Debug, Clone)]
pub struct AuthObject {
    scheme: String,
    factory: PluginFactory,
}

impl AuthObject {
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Resolves the object to its implementation of `interface`.
    pub fn resolve(&self, interface: &str) -> Result<Box<dyn AuthPlugin>, AuthError> {
        if interface != AUTH_INTERFACE {
            return Err(AuthError::InterfaceUnresolved {
                scheme: self.scheme.clone(),
                interface: interface.to_string(),
            });
        }
        Ok((self.factory)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_knows_builtin_schemes() {
        let registry = AuthRegistry::default();

        let native = registry.auth_object(NATIVE_SCHEME).unwrap();
        assert_eq!(native.resolve(AUTH_INTERFACE).unwrap().scheme(), NATIVE_SCHEME);

        let pam = registry.auth_object(PAM_SCHEME).unwrap();
        assert_eq!(pam.resolve(AUTH_INTERFACE).unwrap().scheme(), PAM_SCHEME);
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = AuthRegistry::default().auth_object("kerberos").unwrap_err();
        assert!(matches!(err, AuthError::UnknownScheme(ref s) if s == "kerberos"));
    }

    #[test]
    fn unknown_interface_is_rejected() {
        let object = AuthRegistry::default().auth_object(NATIVE_SCHEME).unwrap();
        assert!(matches!(
            object.resolve("api").err(),
            Some(AuthError::InterfaceUnresolved { .. })
        ));
    }

    #[test]
    fn debug_lists_sorted_schemes() {
        assert_eq!(
            format!("{:?}", AuthRegistry::default()),
            "AuthRegistry { schemes: [\"native\", \"pam\"] }"
        );
    }
}
