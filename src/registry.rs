//! Scheme-to-backend dispatch.
//!
//! A [`Registry`] maps scheme names to [`BackendDescriptor`]s and opens
//! connectors from URIs or explicit parameters. The bundled backends are
//! registered from a fixed list; further backends arrive through
//! [`Registry::register`] or [`Plugin`]s passed to the builder.
//!
//! ```
//! use preserve::{Mapping, Registry, Value};
//!
//! let registry = Registry::new();
//! let mut store = registry.from_uri("memory:").unwrap();
//! store.set("k", Value::from(1)).unwrap();
//! assert_eq!(store.at("k").unwrap(), Value::Int(1));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::connector::{Backend, BackendConfig, Connector, Lifecycle, Parameter};
use crate::error::{PreserveError, Result};
use crate::uri::{scheme_of, Params};

type OpenFn = fn(Params) -> Result<Box<dyn Connector>>;
type FromUriFn = fn(&str) -> Result<Box<dyn Connector>>;

fn open_boxed<B: Backend>(params: Params) -> Result<Box<dyn Connector>> {
    let config = B::Config::from_params(params)?;
    Ok(Box::new(B::open(config)?))
}

fn from_uri_boxed<B: Backend>(uri: &str) -> Result<Box<dyn Connector>> {
    Ok(Box::new(B::from_uri(uri)?))
}

/// Registry record of one backend type.
#[derive(Clone, Copy)]
pub struct BackendDescriptor {
    /// Primary scheme.
    pub scheme: &'static str,
    /// Extra schemes routed to the same backend.
    pub aliases: &'static [&'static str],
    /// One-line description.
    pub description: &'static str,
    /// Parameter schema.
    pub parameters: &'static [Parameter],
    open: OpenFn,
    from_uri: FromUriFn,
}

impl BackendDescriptor {
    /// Describes a statically known backend.
    #[must_use]
    pub fn of<B: Backend>() -> Self {
        Self {
            scheme: B::SCHEME,
            aliases: B::ALIASES,
            description: B::DESCRIPTION,
            parameters: B::Config::parameters(),
            open: open_boxed::<B>,
            from_uri: from_uri_boxed::<B>,
        }
    }

    /// Describes a backend from raw constructor functions.
    #[must_use]
    pub const fn new(
        scheme: &'static str,
        description: &'static str,
        parameters: &'static [Parameter],
        open: OpenFn,
        from_uri: FromUriFn,
    ) -> Self {
        Self {
            scheme,
            aliases: &[],
            description,
            parameters,
            open,
            from_uri,
        }
    }

    /// Opens a connector from explicit parameters.
    ///
    /// # Errors
    /// Whatever the backend's config parsing or open reports.
    pub fn open(&self, params: Params) -> Result<Box<dyn Connector>> {
        (self.open)(params)
    }

    /// Opens a connector from a URI.
    ///
    /// # Errors
    /// Whatever the backend's URI parsing or open reports.
    #[allow(clippy::wrong_self_convention)]
    pub fn from_uri(&self, uri: &str) -> Result<Box<dyn Connector>> {
        (self.from_uri)(uri)
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("scheme", &self.scheme)
            .field("aliases", &self.aliases)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Bundled backends, in registration order.
fn bundled() -> Vec<BackendDescriptor> {
    vec![
        BackendDescriptor::of::<crate::backends::MemoryConnector>(),
        #[cfg(feature = "shelf")]
        BackendDescriptor::of::<crate::backends::ShelfConnector>(),
        #[cfg(feature = "sqlite")]
        BackendDescriptor::of::<crate::backends::SqliteConnector>(),
        #[cfg(feature = "mongodb")]
        BackendDescriptor::of::<crate::backends::MongoConnector>(),
    ]
}

/// Source of additional backends.
pub trait Plugin {
    /// Name used in log messages.
    fn name(&self) -> &str;

    /// Registers this plugin's backends.
    ///
    /// # Errors
    /// Any error aborts this plugin only; the registry stays usable.
    fn register(&self, registry: &Registry) -> Result<()>;
}

/// Builder for a [`Registry`] with plugins.
pub struct RegistryBuilder {
    plugins: Vec<Box<dyn Plugin>>,
    bundled: bool,
}

impl RegistryBuilder {
    /// Adds a plugin, run after the bundled backends are registered.
    #[must_use]
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Leaves out the bundled backends.
    #[must_use]
    pub const fn without_bundled(mut self) -> Self {
        self.bundled = false;
        self
    }

    /// Builds the registry. Failing plugins are logged and skipped.
    #[must_use]
    pub fn build(self) -> Registry {
        let registry = if self.bundled {
            Registry::new()
        } else {
            Registry::empty()
        };
        for plugin in &self.plugins {
            if let Err(e) = plugin.register(&registry) {
                warn!(plugin = plugin.name(), error = %e, "plugin failed to register");
            }
        }
        registry
    }
}

/// Scheme-to-backend map.
pub struct Registry {
    backends: RwLock<HashMap<String, BackendDescriptor>>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// Registry holding the bundled backends.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::empty();
        for descriptor in bundled() {
            registry.register(descriptor);
        }
        registry
    }

    /// Registry with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a builder that includes the bundled backends.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            plugins: Vec::new(),
            bundled: true,
        }
    }

    /// The process-wide registry, created with the bundled backends on
    /// first use unless [`Registry::install_global`] ran first.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    /// Installs `registry` as the process-wide instance.
    ///
    /// # Errors
    /// - `InvalidArguments` if the global registry was already initialised
    pub fn install_global(registry: Self) -> Result<()> {
        GLOBAL.set(registry).map_err(|_| {
            PreserveError::invalid_arguments("the global registry is already initialised")
        })
    }

    /// Registers a backend under its scheme and aliases, replacing any
    /// existing entry.
    pub fn register(&self, descriptor: BackendDescriptor) {
        let mut backends = self
            .backends
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for alias in descriptor.aliases {
            backends.insert((*alias).to_string(), descriptor);
        }
        if backends.insert(descriptor.scheme.to_string(), descriptor).is_some() {
            debug!(scheme = descriptor.scheme, "replaced registered backend");
        }
    }

    /// Registers a statically known backend.
    pub fn register_backend<B: Backend>(&self) {
        self.register(BackendDescriptor::of::<B>());
    }

    /// Registers `descriptor` under an additional scheme.
    ///
    /// URIs using `scheme` are handed to the backend with their scheme
    /// rewritten to the descriptor's own.
    pub fn register_as(&self, scheme: impl Into<String>, descriptor: BackendDescriptor) {
        self.backends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scheme.into(), descriptor);
    }

    /// Returns true if `scheme` resolves to a backend.
    #[must_use]
    pub fn is_registered(&self, scheme: &str) -> bool {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(scheme)
    }

    /// Looks up the descriptor for `scheme`.
    ///
    /// # Errors
    /// - `UnknownBackend` if nothing is registered under `scheme`
    pub fn descriptor(&self, scheme: &str) -> Result<BackendDescriptor> {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scheme)
            .copied()
            .ok_or_else(|| PreserveError::unknown_backend(scheme))
    }

    /// Opens the backend registered as `name` with explicit parameters.
    ///
    /// # Errors
    /// - `UnknownBackend` if `name` is not registered
    /// - any config or open error from the backend
    pub fn open(&self, name: &str, params: Params) -> Result<Box<dyn Connector>> {
        self.descriptor(name)?.open(params)
    }

    /// Opens a connector from a URI, dispatching on its scheme.
    ///
    /// # Errors
    /// - `InvalidUri` if `uri` has no scheme
    /// - `UnknownBackend` if the scheme is not registered
    /// - any config or open error from the backend
    #[allow(clippy::wrong_self_convention)]
    pub fn from_uri(&self, uri: &str) -> Result<Box<dyn Connector>> {
        let scheme = scheme_of(uri)?;
        let descriptor = self.descriptor(scheme)?;
        if scheme == descriptor.scheme || descriptor.aliases.contains(&scheme) {
            return descriptor.from_uri(uri);
        }
        let native = format!("{}{}", descriptor.scheme, &uri[scheme.len()..]);
        descriptor.from_uri(&native)
    }

    /// Opens `uri`, runs `body`, and closes the connector on every path.
    ///
    /// # Errors
    /// The open error, the body's error, or else the close error.
    pub fn with_uri<T>(
        &self,
        uri: &str,
        body: impl FnOnce(&mut dyn Connector) -> Result<T>,
    ) -> Result<T> {
        let mut connector = self.from_uri(uri)?;
        let outcome = body(connector.as_mut());
        let closed = connector.close();
        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(uri, error = %close_err, "close failed after error");
                Err(e)
            }
        }
    }

    /// Registered backends sorted by scheme, without alias entries.
    #[must_use]
    pub fn connectors(&self) -> Vec<BackendDescriptor> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        let mut listed: Vec<BackendDescriptor> = backends
            .iter()
            .filter(|(name, d)| d.scheme == name.as_str())
            .map(|(_, d)| *d)
            .collect();
        listed.sort_by_key(|d| d.scheme);
        listed
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        let mut schemes: Vec<&str> = backends.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        f.debug_struct("Registry").field("schemes", &schemes).finish()
    }
}
