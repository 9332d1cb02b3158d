//! Handler resolution port
//!
//! The dispatcher never constructs handlers itself. For every inbound
//! message it opens one [`HandlerScope`] from the configured
//! [`HandlerResolver`], resolves each subscribed handler type through it,
//! and drops the scope when the message is settled, on every exit path.
//!
//! [`HandlerContainer`] is the built-in resolver: handlers are registered
//! either as shared instances or as per-scope factories.

use crate::error::{BusError, Result};
use crate::handler::{HandlerInstance, HandlerKey};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Source of per-message handler scopes
pub trait HandlerResolver: Send + Sync {
    /// Open a resolution scope for one inbound message
    ///
    /// An error here is an infrastructure failure: the message is
    /// abandoned and left to broker redelivery.
    fn begin_scope(&self, scope_name: &str) -> Result<Box<dyn HandlerScope>>;
}

/// A resolution scope, released when dropped
pub trait HandlerScope: Send + Sync {
    /// Resolve a handler instance, `Ok(None)` if the type is not registered
    fn resolve_optional(&self, handler: &HandlerKey) -> Result<Option<HandlerInstance>>;
}

type Factory = Arc<dyn Fn() -> HandlerInstance + Send + Sync>;

#[derive(Clone)]
enum Registration {
    /// One instance shared by every scope
    Shared(HandlerInstance),
    /// New instance per scope
    Scoped(Factory),
}

#[derive(Default)]
struct ContainerInner {
    registrations: RwLock<HashMap<TypeId, Registration>>,
    open_scopes: AtomicUsize,
    closed: AtomicBool,
}

/// In-process handler container
///
/// Cheap to clone; clones share registrations.
#[derive(Clone, Default)]
pub struct HandlerContainer {
    inner: Arc<ContainerInner>,
}

impl HandlerContainer {
    /// Create an empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared handler instance
    pub fn register_instance<H: Send + Sync + 'static>(&self, handler: Arc<H>) -> Result<()> {
        self.insert::<H>(Registration::Shared(handler))
    }

    /// Register a factory invoked at most once per scope
    pub fn register_scoped<H, F>(&self, factory: F) -> Result<()>
    where
        H: Send + Sync + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Arc::new(factory()) as HandlerInstance);
        self.insert::<H>(Registration::Scoped(factory))
    }

    /// Number of scopes currently open
    pub fn open_scopes(&self) -> usize {
        self.inner.open_scopes.load(Ordering::SeqCst)
    }

    /// Refuse new scopes (existing scopes keep working)
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    fn insert<H: 'static>(&self, registration: Registration) -> Result<()> {
        let mut registrations = self.inner.registrations.write().map_err(|e| {
            BusError::Resolution(format!("Handler container lock poisoned: {}", e))
        })?;
        registrations.insert(TypeId::of::<H>(), registration);
        Ok(())
    }
}

impl HandlerResolver for HandlerContainer {
    fn begin_scope(&self, scope_name: &str) -> Result<Box<dyn HandlerScope>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Resolution(format!(
                "Handler container is closed, cannot open scope '{}'",
                scope_name
            )));
        }

        let open = self.inner.open_scopes.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(scope = scope_name, open, "Handler scope opened");

        Ok(Box::new(ContainerScope {
            name: scope_name.to_string(),
            container: self.inner.clone(),
            instances: Mutex::new(HashMap::new()),
        }))
    }
}

struct ContainerScope {
    name: String,
    container: Arc<ContainerInner>,
    instances: Mutex<HashMap<TypeId, HandlerInstance>>,
}

impl HandlerScope for ContainerScope {
    fn resolve_optional(&self, handler: &HandlerKey) -> Result<Option<HandlerInstance>> {
        let registration = {
            let registrations = self.container.registrations.read().map_err(|e| {
                BusError::Resolution(format!("Handler container lock poisoned: {}", e))
            })?;
            match registrations.get(&handler.type_id()) {
                Some(r) => r.clone(),
                None => return Ok(None),
            }
        };

        match registration {
            Registration::Shared(instance) => Ok(Some(instance)),
            Registration::Scoped(factory) => {
                let mut instances = self.instances.lock().map_err(|e| {
                    BusError::Resolution(format!("Scope '{}' lock poisoned: {}", self.name, e))
                })?;
                let instance = instances
                    .entry(handler.type_id())
                    .or_insert_with(|| factory())
                    .clone();
                Ok(Some(instance))
            }
        }
    }
}

impl Drop for ContainerScope {
    fn drop(&mut self) {
        let open = self.container.open_scopes.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::trace!(scope = %self.name, open, "Handler scope released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        id: usize,
    }

    struct Unregistered;

    #[test]
    fn test_shared_instance_resolves_same_arc() {
        let container = HandlerContainer::new();
        let shared = Arc::new(Counter { id: 1 });
        container.register_instance(shared.clone()).unwrap();

        let a = container.begin_scope("a").unwrap();
        let b = container.begin_scope("b").unwrap();
        let key = HandlerKey::of::<Counter>();

        let ia = a.resolve_optional(&key).unwrap().unwrap();
        let ib = b.resolve_optional(&key).unwrap().unwrap();
        assert!(Arc::ptr_eq(&ia, &ib));
        assert_eq!(ia.downcast::<Counter>().unwrap().id, 1);
    }

    #[test]
    fn test_scoped_factory_once_per_scope() {
        let container = HandlerContainer::new();
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        container
            .register_scoped(move || Counter {
                id: counter.fetch_add(1, Ordering::SeqCst),
            })
            .unwrap();

        let key = HandlerKey::of::<Counter>();
        let scope = container.begin_scope("msg-1").unwrap();
        let first = scope.resolve_optional(&key).unwrap().unwrap();
        let second = scope.resolve_optional(&key).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = container.begin_scope("msg-2").unwrap();
        let third = other.resolve_optional(&key).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregistered_resolves_none() {
        let container = HandlerContainer::new();
        let scope = container.begin_scope("s").unwrap();
        assert!(scope
            .resolve_optional(&HandlerKey::of::<Unregistered>())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_scope_release_tracked() {
        let container = HandlerContainer::new();
        assert_eq!(container.open_scopes(), 0);
        {
            let _a = container.begin_scope("a").unwrap();
            let _b = container.begin_scope("b").unwrap();
            assert_eq!(container.open_scopes(), 2);
        }
        assert_eq!(container.open_scopes(), 0);
    }

    #[test]
    fn test_closed_container_refuses_scopes() {
        let container = HandlerContainer::new();
        container.close();
        let err = container.begin_scope("late").err().unwrap();
        assert!(matches!(err, BusError::Resolution(_)));
        assert_eq!(container.open_scopes(), 0);
    }
}
