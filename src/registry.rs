//! The service registry the server codec dispatches into.
//!
//! A service is a named bundle of methods; callers address a handler as
//! `"Service.Method"`. Dispatch failures and handler failures travel back
//! to the caller through the response channel and never touch the
//! session itself.

use crate::codec::CodecError;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Why a registration was rejected.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("service name is empty")]
    EmptyName,

    #[error("service {0:?} exposes no methods")]
    NoMethods(String),

    #[error("service {0:?} is already registered")]
    Duplicate(String),
}

/// Why a dispatched call failed. The display text is what the caller
/// receives as the remote error.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("unknown service {0:?}")]
    NoSuchService(String),

    #[error("service {service:?} has no method {method:?}")]
    NoSuchMethod { service: String, method: String },

    #[error("malformed method name {0:?}, want \"Service.Method\"")]
    BadMethodName(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Application-level failure reported by the handler.
    #[error("{0}")]
    Handler(String),
}

/// A dispatchable bundle of RPC methods.
///
/// `args` is the encoded argument value; the returned bytes are the
/// encoded result value. Handlers run on the server codec task, one
/// request at a time, so implementations should not block for long.
pub trait Service: Send + Sync + 'static {
    /// Name `register` publishes this service under; `register_name`
    /// overrides it.
    fn name(&self) -> &str;

    /// The methods this service answers to. Must be non-empty to
    /// register.
    fn methods(&self) -> &[&str];

    /// Dispatch one call.
    fn call(&self, method: &str, args: &[u8]) -> Result<Bytes, ServiceError>;
}

/// Name-to-service table consulted by the server codec.
#[derive(Default)]
pub struct Registry {
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Publish a service under its own name.
    pub fn register<S: Service>(&self, service: S) -> Result<(), RegistrationError> {
        let name = service.name().to_owned();
        self.insert(name, Arc::new(service))
    }

    /// Publish a service under `name` instead of its own name.
    pub fn register_name<S: Service>(
        &self,
        name: &str,
        service: S,
    ) -> Result<(), RegistrationError> {
        self.insert(name.to_owned(), Arc::new(service))
    }

    fn insert(&self, name: String, service: Arc<dyn Service>) -> Result<(), RegistrationError> {
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if service.methods().is_empty() {
            return Err(RegistrationError::NoMethods(name));
        }
        let mut services = self.services.write().unwrap();
        if services.contains_key(&name) {
            return Err(RegistrationError::Duplicate(name));
        }
        services.insert(name, service);
        Ok(())
    }

    pub(crate) fn dispatch(&self, service_method: &str, args: &[u8]) -> Result<Bytes, ServiceError> {
        let (service, method) = service_method
            .split_once('.')
            .ok_or_else(|| ServiceError::BadMethodName(service_method.to_owned()))?;
        let handler = self
            .services
            .read()
            .unwrap()
            .get(service)
            .cloned()
            .ok_or_else(|| ServiceError::NoSuchService(service.to_owned()))?;
        handler.call(method, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        methods: &'static [&'static str],
    }

    impl Service for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn methods(&self) -> &[&str] {
            self.methods
        }

        fn call(&self, method: &str, _args: &[u8]) -> Result<Bytes, ServiceError> {
            match method {
                "Touch" => Ok(Bytes::new()),
                "Fail" => Err(ServiceError::Handler("deliberate failure".into())),
                other => Err(ServiceError::NoSuchMethod {
                    service: self.name.into(),
                    method: other.into(),
                }),
            }
        }
    }

    fn fixed() -> Fixed {
        Fixed {
            name: "Fixed",
            methods: &["Touch", "Fail"],
        }
    }

    #[test]
    fn register_and_dispatch() {
        let registry = Registry::new();
        registry.register(fixed()).unwrap();
        registry.dispatch("Fixed.Touch", &[]).unwrap();
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = Registry::new();
        registry.register(fixed()).unwrap();
        assert!(matches!(
            registry.register(fixed()),
            Err(RegistrationError::Duplicate(_))
        ));
        // The alias path stays open.
        registry.register_name("Fixed2", fixed()).unwrap();
        registry.dispatch("Fixed2.Touch", &[]).unwrap();
    }

    #[test]
    fn method_less_service_is_rejected() {
        let registry = Registry::new();
        let empty = Fixed {
            name: "Empty",
            methods: &[],
        };
        assert!(matches!(
            registry.register(empty),
            Err(RegistrationError::NoMethods(_))
        ));
    }

    #[test]
    fn dispatch_failures_name_the_culprit() {
        let registry = Registry::new();
        registry.register(fixed()).unwrap();

        let err = registry.dispatch("Nope.Touch", &[]).unwrap_err();
        assert!(err.to_string().contains("Nope"));

        let err = registry.dispatch("Fixed.Nope", &[]).unwrap_err();
        assert!(err.to_string().contains("Nope"));

        let err = registry.dispatch("dotless", &[]).unwrap_err();
        assert!(matches!(err, ServiceError::BadMethodName(_)));

        let err = registry.dispatch("Fixed.Fail", &[]).unwrap_err();
        assert_eq!(err.to_string(), "deliberate failure");
    }
}
