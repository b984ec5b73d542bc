use std::{collections::HashMap, sync::{Arc, Mutex}};

use log::debug;

use crate::{client::InvocationContext, sync::MutexExt};

/// A client method the server can call.
pub type MethodHandler = Arc<dyn Fn(InvocationContext) + Send + Sync>;

/// Client methods by lowercase name, in registration order.
#[derive(Clone, Default)]
pub(crate) struct MethodRegistry {
    methods: Arc<Mutex<HashMap<String, Vec<MethodHandler>>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        MethodRegistry::default()
    }

    /// Adds `handler` unless this exact handler is already registered for `method`.
    pub fn on(&self, method: &str, handler: MethodHandler) {
        let method = method.to_lowercase();
        let mut methods = self.methods.locked();
        let handlers = methods.entry(method.clone()).or_default();

        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return;
        }

        debug!("Adding a callback for method {}", method);
        handlers.push(handler);
    }

    /// Removes `handler`, or every handler of `method` when `handler` is `None`.
    pub fn off(&self, method: &str, handler: Option<&MethodHandler>) {
        let method = method.to_lowercase();
        let mut methods = self.methods.locked();

        match handler {
            None => {
                methods.remove(&method);
            },
            Some(handler) => {
                if let Some(handlers) = methods.get_mut(&method) {
                    handlers.retain(|h| !Arc::ptr_eq(h, handler));
                    if handlers.is_empty() {
                        methods.remove(&method);
                    }
                }
            },
        }
    }

    pub fn handlers(&self, method: &str) -> Vec<MethodHandler> {
        self.methods
            .locked()
            .get(&method.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}

/// Returned by `HubConnection::register`; removes the registered method again.
pub trait CallbackHandler {
    fn unregister(self);
}

pub(crate) struct RegistrationHandle {
    registry: MethodRegistry,
    method: String,
    handler: MethodHandler,
}

impl RegistrationHandle {
    pub(crate) fn new(registry: MethodRegistry, method: String, handler: MethodHandler) -> Self {
        RegistrationHandle { registry, method, handler }
    }
}

impl CallbackHandler for RegistrationHandle {
    fn unregister(self) {
        self.registry.off(&self.method, Some(&self.handler));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(count: &Arc<AtomicUsize>) -> MethodHandler {
        let count = count.clone();
        Arc::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = MethodRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.on("ReceiveMessage", counting(&count));

        assert_eq!(registry.handlers("receivemessage").len(), 1);
        assert_eq!(registry.handlers("RECEIVEMESSAGE").len(), 1);
        assert!(registry.handlers("other").is_empty());
    }

    #[test]
    fn test_same_handler_registered_once() {
        let registry = MethodRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = counting(&count);

        registry.on("a", handler.clone());
        registry.on("A", handler.clone());
        registry.on("a", counting(&count));

        assert_eq!(registry.handlers("a").len(), 2);
    }

    #[test]
    fn test_off_removes_one_or_all() {
        let registry = MethodRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let first = counting(&count);
        let second = counting(&count);

        registry.on("a", first.clone());
        registry.on("a", second.clone());
        registry.off("A", Some(&first));

        let remaining = registry.handlers("a");
        assert_eq!(remaining.len(), 1);
        assert!(Arc::ptr_eq(&remaining[0], &second));

        registry.off("a", None);
        assert!(registry.handlers("a").is_empty());
    }

    #[test]
    fn test_registration_handle_unregisters() {
        let registry = MethodRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = counting(&count);
        registry.on("a", handler.clone());

        RegistrationHandle::new(registry.clone(), "a".to_string(), handler).unregister();

        assert!(registry.handlers("a").is_empty());
    }
}
