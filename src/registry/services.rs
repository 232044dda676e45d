//! # Service Resolution
//!
//! Factories keyed by type, resolved per dispatch through a [`ServiceScope`].
//! Handlers and interceptors are registered here by the handler registry;
//! applications add the dependencies those factories pull in.

use crate::messaging::TypeKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// How long a resolved instance is reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// New instance on every resolve
    Transient,
    /// One instance per dispatch scope
    #[default]
    PerDispatch,
    /// One instance per service provider
    Singleton,
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::PerDispatch => write!(f, "per_dispatch"),
            Self::Singleton => write!(f, "singleton"),
        }
    }
}

impl std::str::FromStr for Lifetime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "per_dispatch" => Ok(Self::PerDispatch),
            "singleton" => Ok(Self::Singleton),
            _ => Err(format!("Invalid lifetime: {s}")),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Service {service} is not registered")]
    NotRegistered { service: String },

    #[error("Factory for {service} failed: {source}")]
    FactoryFailed {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Service {service} resolved to an instance of a different type")]
    TypeMismatch { service: String },
}

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceScope) -> anyhow::Result<Instance> + Send + Sync>;

#[derive(Clone)]
struct ServiceDescriptor {
    key: TypeKey,
    lifetime: Lifetime,
    factory: Factory,
}

/// Mutable set of service factories, frozen into a [`ServiceProvider`]
#[derive(Clone, Default)]
pub struct ServiceCollection {
    descriptors: HashMap<TypeId, ServiceDescriptor>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A type that is already registered keeps its first factory.
    pub fn add_factory<T, F>(&mut self, lifetime: Lifetime, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceScope) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let erased: Factory = Arc::new(move |scope: &ServiceScope| {
            factory(scope).map(|instance| Arc::new(instance) as Instance)
        });
        self.insert(TypeKey::of::<T>(), lifetime, erased);
        self
    }

    /// Register a pre-built instance shared by every scope
    pub fn add_singleton<T: Send + Sync + 'static>(&mut self, instance: T) -> &mut Self {
        let shared: Instance = Arc::new(instance);
        let factory: Factory = Arc::new(move |_: &ServiceScope| Ok(Arc::clone(&shared)));
        self.insert(TypeKey::of::<T>(), Lifetime::Singleton, factory);
        self
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.descriptors.contains_key(&TypeId::of::<T>())
    }

    pub fn lifetime_of(&self, key: TypeKey) -> Option<Lifetime> {
        self.descriptors.get(&key.id()).map(|d| d.lifetime)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn build(&self) -> ServiceProvider {
        ServiceProvider {
            singletons: self
                .descriptors
                .keys()
                .map(|id| (*id, Mutex::new(None)))
                .collect(),
            descriptors: self.descriptors.clone(),
        }
    }

    fn insert(&mut self, key: TypeKey, lifetime: Lifetime, factory: Factory) {
        if self.descriptors.contains_key(&key.id()) {
            debug!(service = %key, "Service already registered; keeping the first factory");
            return;
        }
        self.descriptors.insert(
            key.id(),
            ServiceDescriptor {
                key,
                lifetime,
                factory,
            },
        );
    }
}

impl fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.descriptors.values().map(|d| (d.key, d.lifetime)))
            .finish()
    }
}

/// Immutable resolver built from a [`ServiceCollection`]
pub struct ServiceProvider {
    descriptors: HashMap<TypeId, ServiceDescriptor>,
    singletons: HashMap<TypeId, Mutex<Option<Instance>>>,
}

impl ServiceProvider {
    pub fn create_scope(self: &Arc<Self>) -> ServiceScope {
        ServiceScope {
            provider: Arc::clone(self),
            scoped: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("services", &self.descriptors.len())
            .finish()
    }
}

/// Resolution scope of one dispatch
pub struct ServiceScope {
    provider: Arc<ServiceProvider>,
    scoped: Mutex<HashMap<TypeId, Instance>>,
}

impl ServiceScope {
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolveError> {
        let key = TypeKey::of::<T>();
        self.resolve_key(key)?
            .downcast::<T>()
            .map_err(|_| ResolveError::TypeMismatch {
                service: key.name().to_string(),
            })
    }

    fn resolve_key(&self, key: TypeKey) -> Result<Instance, ResolveError> {
        let descriptor = self
            .provider
            .descriptors
            .get(&key.id())
            .ok_or_else(|| ResolveError::NotRegistered {
                service: key.name().to_string(),
            })?;

        match descriptor.lifetime {
            Lifetime::Transient => self.construct(descriptor),
            Lifetime::PerDispatch => {
                if let Some(instance) = self.scoped.lock().get(&key.id()) {
                    return Ok(Arc::clone(instance));
                }
                let instance = self.construct(descriptor)?;
                Ok(Arc::clone(
                    self.scoped.lock().entry(key.id()).or_insert(instance),
                ))
            }
            Lifetime::Singleton => {
                let Some(slot) = self.provider.singletons.get(&key.id()) else {
                    return self.construct(descriptor);
                };
                let mut slot = slot.lock();
                if let Some(instance) = slot.as_ref() {
                    return Ok(Arc::clone(instance));
                }
                let instance = self.construct(descriptor)?;
                *slot = Some(Arc::clone(&instance));
                Ok(instance)
            }
        }
    }

    fn construct(&self, descriptor: &ServiceDescriptor) -> Result<Instance, ResolveError> {
        (descriptor.factory)(self).map_err(|source| ResolveError::FactoryFailed {
            service: descriptor.key.name().to_string(),
            source,
        })
    }
}

impl fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceScope")
            .field("scoped", &self.scoped.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(usize);

    struct Repository {
        counter: Arc<Counter>,
    }

    fn provider_with(lifetime: Lifetime) -> (Arc<ServiceProvider>, Arc<AtomicUsize>) {
        let built = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&built);
        let mut services = ServiceCollection::new();
        services.add_factory(lifetime, move |_| {
            Ok(Counter(seen.fetch_add(1, Ordering::SeqCst)))
        });
        (Arc::new(services.build()), built)
    }

    #[test]
    fn test_transient_builds_every_time() {
        let (provider, built) = provider_with(Lifetime::Transient);
        let scope = provider.create_scope();
        let first = scope.resolve::<Counter>().unwrap();
        let second = scope.resolve::<Counter>().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_per_dispatch_is_shared_within_a_scope() {
        let (provider, built) = provider_with(Lifetime::PerDispatch);
        let scope = provider.create_scope();
        let first = scope.resolve::<Counter>().unwrap();
        let second = scope.resolve::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = provider.create_scope().resolve::<Counter>().unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_singleton_is_shared_across_scopes() {
        let (provider, built) = provider_with(Lifetime::Singleton);
        let first = provider.create_scope().resolve::<Counter>().unwrap();
        let second = provider.create_scope().resolve::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factories_resolve_dependencies() {
        let mut services = ServiceCollection::new();
        services.add_singleton(Counter(7));
        services.add_factory(Lifetime::PerDispatch, |scope| {
            Ok(Repository {
                counter: scope.resolve::<Counter>()?,
            })
        });
        let provider = Arc::new(services.build());

        let repository = provider.create_scope().resolve::<Repository>().unwrap();
        assert_eq!(repository.counter.0, 7);
    }

    #[test]
    fn test_resolution_errors() {
        let mut services = ServiceCollection::new();
        services.add_factory::<Repository, _>(Lifetime::Transient, |_| {
            Err(anyhow::anyhow!("database unavailable"))
        });
        let provider = Arc::new(services.build());
        let scope = provider.create_scope();

        assert!(matches!(
            scope.resolve::<Counter>(),
            Err(ResolveError::NotRegistered { .. })
        ));
        let Err(error) = scope.resolve::<Repository>() else {
            panic!("expected factory failure");
        };
        assert!(error.to_string().contains("database unavailable"));
    }

    #[test]
    fn test_lifetime_parse() {
        assert_eq!("per_dispatch".parse::<Lifetime>(), Ok(Lifetime::PerDispatch));
        assert!("forever".parse::<Lifetime>().is_err());
        assert_eq!(Lifetime::default(), Lifetime::PerDispatch);
    }
}
