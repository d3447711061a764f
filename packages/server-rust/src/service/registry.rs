use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{try_join_all, BoxFuture, FutureExt, Shared};
use tracing::{debug, info_span, warn, Instrument};

use super::environment::Environment;
use crate::pipeline::events::panic_message;
use crate::traits::ConfigSource;

/// A resolved service instance, type-erased for storage in the registry.
pub type Instance = Arc<dyn Any + Send + Sync>;

type RegisterFn =
    dyn Fn(ServiceContext) -> BoxFuture<'static, anyhow::Result<Instance>> + Send + Sync;

type Resolution = Shared<BoxFuture<'static, Result<Instance, SharedError>>>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Cloneable wrapper so one registration failure can be delivered to every
/// caller waiting on the same in-flight resolution.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0:#}")]
pub struct SharedError(Arc<anyhow::Error>);

impl SharedError {
    fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }

    /// The underlying error.
    #[must_use]
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

/// Errors surfaced by [`ServiceRegistry`] and [`Services`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("service `{name}` failed to register: {source}")]
    Registration {
        name: &'static str,
        #[source]
        source: SharedError,
    },
    #[error("service `{name}` was not declared as a dependency")]
    Missing { name: String },
    #[error("service `{name}` is not a `{expected}`")]
    TypeMismatch { name: String, expected: &'static str },
}

// ---------------------------------------------------------------------------
// ServiceDescriptor
// ---------------------------------------------------------------------------

/// Named, lazily-instantiated dependency with an async registration function.
///
/// Descriptors are defined once (typically in a `static`-like constructor
/// function) and are cheap to clone. The registry caches instances by
/// `name`, so two descriptors sharing a name resolve to the first one
/// registered.
#[derive(Clone)]
pub struct ServiceDescriptor {
    name: &'static str,
    dependencies: Arc<[ServiceDescriptor]>,
    register: Arc<RegisterFn>,
}

impl ServiceDescriptor {
    /// Create a descriptor from a registration function producing `T`.
    pub fn new<T, F, Fut>(name: &'static str, register: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let register = move |ctx: ServiceContext| {
            let fut = register(ctx);
            async move { fut.await.map(|value| Arc::new(value) as Instance) }.boxed()
        };
        Self {
            name,
            dependencies: Arc::from(Vec::new()),
            register: Arc::new(register),
        }
    }

    /// Declare services that must be resolved before this one registers.
    /// They are available through [`ServiceContext::service`].
    #[must_use]
    pub fn depends_on<I>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = ServiceDescriptor>,
    {
        self.dependencies = dependencies.into_iter().collect::<Vec<_>>().into();
        self
    }

    /// Cache key and log name of the service.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Direct dependencies, in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[ServiceDescriptor] {
        &self.dependencies
    }

    /// Run the registration function. A panic, whether raised while building
    /// the future or while polling it, comes back as an error.
    pub(crate) fn run(&self, ctx: ServiceContext) -> BoxFuture<'static, anyhow::Result<Instance>> {
        let register = Arc::clone(&self.register);
        AssertUnwindSafe(async move { register(ctx).await })
            .catch_unwind()
            .map(|outcome| {
                outcome.unwrap_or_else(|panic| {
                    Err(anyhow::anyhow!("registration panicked: {}", panic_message(&*panic)))
                })
            })
            .boxed()
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field(
                "dependencies",
                &self.dependencies.iter().map(|d| d.name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Resolved service instances keyed by name. Cheap to clone.
#[derive(Clone, Default)]
pub struct Services {
    instances: Arc<BTreeMap<&'static str, Instance>>,
}

impl Services {
    pub(crate) fn from_map(instances: BTreeMap<&'static str, Instance>) -> Self {
        Self {
            instances: Arc::new(instances),
        }
    }

    /// Typed lookup of a resolved service.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Missing` if `name` was not resolved into this
    /// set, or `RegistryError::TypeMismatch` if it holds a different type.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, RegistryError> {
        let instance = self
            .instances
            .get(name)
            .ok_or_else(|| RegistryError::Missing {
                name: name.to_string(),
            })?;
        Arc::clone(instance)
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Raw instance lookup, mainly for identity checks.
    #[must_use]
    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    /// Whether `name` was resolved into this set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Number of resolved services in this set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the set holds no services.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Names of the resolved services, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.instances.keys().copied()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.instances.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// ServiceContext
// ---------------------------------------------------------------------------

/// Context handed to a registration function: configuration access plus the
/// already-resolved dependencies of the service being registered.
#[derive(Clone)]
pub struct ServiceContext {
    name: &'static str,
    config: Arc<dyn ConfigSource>,
    services: Services,
}

impl ServiceContext {
    pub(crate) fn new(name: &'static str, config: Arc<dyn ConfigSource>, services: Services) -> Self {
        Self {
            name,
            config,
            services,
        }
    }

    /// Name of the service being registered.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Optional configuration value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key)
    }

    /// Required configuration value.
    ///
    /// # Errors
    ///
    /// Returns an error naming the key when it is not set.
    pub fn require(&self, key: &str) -> anyhow::Result<String> {
        self.config.require(key)
    }

    /// Typed access to a declared dependency.
    ///
    /// # Errors
    ///
    /// See [`Services::get`].
    pub fn service<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, RegistryError> {
        self.services.get(name)
    }

    /// Every resolved dependency of the service being registered.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Whether this registration is running under the configuration sniffer.
    /// Registration functions may skip side effects (opening pools, network
    /// calls) when this is set.
    #[must_use]
    pub fn is_sniffing(&self) -> bool {
        self.config.is_recording()
    }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("name", &self.name)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

struct Slot {
    generation: u64,
    resolution: Resolution,
}

struct RegistryInner {
    config: Arc<dyn ConfigSource>,
    slots: DashMap<&'static str, Slot>,
    generation: AtomicU64,
}

/// Lazily-populated, single-flight cache of service instances.
///
/// Every service is instantiated at most once per registry lifetime.
/// Concurrent callers asking for a service whose resolution is still in
/// flight share the same pending future. A failed resolution is purged so
/// the next caller retries it.
///
/// A registry is an explicit object: adaptors receive it at construction and
/// tests build a fresh one each. [`RegistryPool`] hands out one registry per
/// (logger, environment) pair for callers that want that behaviour.
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl ServiceRegistry {
    /// Creates an empty registry reading configuration from `config`.
    #[must_use]
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                slots: DashMap::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a registry over a snapshot of the process environment.
    #[must_use]
    pub fn from_process_env() -> Self {
        Self::new(Arc::new(Environment::from_process()))
    }

    /// Resolve `descriptors` (and, first, their dependencies), returning the
    /// instances keyed by name.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Registration` for the first descriptor whose
    /// registration function, or one of whose dependencies, failed.
    pub async fn register(&self, descriptors: &[ServiceDescriptor]) -> Result<Services, RegistryError> {
        if descriptors.is_empty() {
            return Ok(Services::default());
        }
        let pending = descriptors.iter().map(|descriptor| {
            let name = descriptor.name;
            let resolution = self.inner.resolve(descriptor);
            async move {
                resolution
                    .await
                    .map(|instance| (name, instance))
                    .map_err(|source| RegistryError::Registration { name, source })
            }
        });
        let resolved = try_join_all(pending).await?;
        Ok(Services::from_map(resolved.into_iter().collect()))
    }

    /// Whether `name` has a successfully resolved instance.
    #[must_use]
    pub fn is_resolved(&self, name: &str) -> bool {
        self.inner
            .slots
            .get(name)
            .is_some_and(|slot| matches!(slot.resolution.peek(), Some(Ok(_))))
    }

    /// Number of cached entries (resolved or in flight).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    /// Whether nothing is cached or in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Drops every cached instance. Instances still referenced elsewhere
    /// (e.g. by an in-flight request) live until those references go away.
    pub fn shutdown(&self) {
        let count = self.inner.slots.len();
        self.inner.slots.clear();
        debug!(count, "service registry cleared");
    }

    /// Whether two handles point at the same underlying registry.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("entries", &self.inner.slots.len())
            .finish_non_exhaustive()
    }
}

impl RegistryInner {
    /// Return the in-flight or completed resolution for `descriptor`,
    /// inserting a new one atomically if none exists. The shard lock is
    /// released before anything is awaited.
    fn resolve(self: &Arc<Self>, descriptor: &ServiceDescriptor) -> Resolution {
        match self.slots.entry(descriptor.name) {
            Entry::Occupied(slot) => slot.get().resolution.clone(),
            Entry::Vacant(vacant) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let resolution = Self::resolution(Arc::clone(self), descriptor.clone(), generation)
                    .boxed()
                    .shared();
                vacant.insert(Slot {
                    generation,
                    resolution: resolution.clone(),
                });
                resolution
            }
        }
    }

    async fn resolution(
        self: Arc<Self>,
        descriptor: ServiceDescriptor,
        generation: u64,
    ) -> Result<Instance, SharedError> {
        let result = self.instantiate(&descriptor).await;
        if let Err(err) = &result {
            warn!(service = descriptor.name, error = %err, "service registration failed");
            // Only purge our own slot; a retry may already have replaced it.
            self.slots
                .remove_if(descriptor.name, |_, slot| slot.generation == generation);
        }
        result
    }

    async fn instantiate(self: &Arc<Self>, descriptor: &ServiceDescriptor) -> Result<Instance, SharedError> {
        let dependencies = descriptor.dependencies.iter().map(|dep| {
            let name = dep.name;
            let resolution = self.resolve(dep);
            async move {
                resolution.await.map(|instance| (name, instance)).map_err(|err| {
                    SharedError::new(anyhow::anyhow!("dependency `{name}` failed: {err}"))
                })
            }
        });
        let resolved = try_join_all(dependencies).await?;

        let ctx = ServiceContext::new(
            descriptor.name,
            Arc::clone(&self.config),
            Services::from_map(resolved.into_iter().collect()),
        );
        let started = Instant::now();
        let instance = descriptor
            .run(ctx)
            .instrument(info_span!("service", name = descriptor.name))
            .await
            .map_err(SharedError::new)?;
        debug!(
            service = descriptor.name,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "service registered"
        );
        Ok(instance)
    }
}

// ---------------------------------------------------------------------------
// RegistryPool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistryKey {
    logger: String,
    environment: Environment,
}

/// Hands out one [`ServiceRegistry`] per (logger, environment) pair.
///
/// This is an ordinary value, not process-global state: a warm runtime keeps
/// one pool alive to share registries across invocations, and tests create
/// their own.
#[derive(Debug, Default)]
pub struct RegistryPool {
    registries: DashMap<RegistryKey, ServiceRegistry>,
}

impl RegistryPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registry for this pair, creating it on first use.
    #[must_use]
    pub fn acquire(&self, logger: &str, environment: &Environment) -> ServiceRegistry {
        let key = RegistryKey {
            logger: logger.to_string(),
            environment: environment.clone(),
        };
        self.registries
            .entry(key)
            .or_insert_with(|| ServiceRegistry::new(Arc::new(environment.clone())))
            .value()
            .clone()
    }

    /// Number of distinct (logger, environment) pairs seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registries.len()
    }

    /// Whether no registry has been acquired yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
