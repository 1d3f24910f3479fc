//! Adapter construction.
//!
//! # Responsibilities
//! - Map engine ids to constructors
//! - Validate configuration before any adapter is built
//! - Install the middleware the configuration asks for (gzip, body limit)
//!
//! # Design Decisions
//! - The registry is an explicit value; a process-wide instance with the
//!   built-in engines is frozen on first use
//! - Registration after `freeze` is an error, so the engine set cannot
//!   change once serving starts

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::adapters::{
    AxumAdapter, AxumServerAdapter, HyperAdapter, RouterAdapter, TinyHttpAdapter, ENGINE_AXUM,
    ENGINE_AXUM_SERVER, ENGINE_HYPER, ENGINE_TINY_HTTP,
};
use crate::config::{validate_router_config, RouterConfig};
use crate::error::{Result, RouterError};
use crate::http::middleware::{BodyLimit, Gzip};

/// Builds an adapter from validated configuration.
pub type AdapterConstructor = fn(&RouterConfig) -> Result<Arc<dyn RouterAdapter>>;

/// Engine id to constructor map.
#[derive(Default)]
pub struct AdapterRegistry {
    constructors: HashMap<String, AdapterConstructor>,
    frozen: bool,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("engines", &self.engines())
            .field("frozen", &self.frozen)
            .finish()
    }
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the four built-in engines.
    pub fn with_builtin_engines() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, AdapterConstructor); 4] = [
            (ENGINE_AXUM, |cfg| Ok(Arc::new(AxumAdapter::new(cfg)))),
            (ENGINE_AXUM_SERVER, |cfg| Ok(Arc::new(AxumServerAdapter::new(cfg)))),
            (ENGINE_HYPER, |cfg| Ok(Arc::new(HyperAdapter::new(cfg)))),
            (ENGINE_TINY_HTTP, |cfg| Ok(Arc::new(TinyHttpAdapter::new(cfg)))),
        ];
        for (engine, constructor) in builtins {
            registry.constructors.insert(engine.to_string(), constructor);
        }
        registry
    }

    /// Add an engine. Fails on duplicates and after [`freeze`](Self::freeze).
    pub fn register(&mut self, engine: &str, constructor: AdapterConstructor) -> Result<()> {
        if self.frozen {
            return Err(RouterError::Registry(format!(
                "cannot register engine '{}': registry is frozen",
                engine
            )));
        }
        if engine.is_empty() {
            return Err(RouterError::Registry("engine id must not be empty".to_string()));
        }
        if self.constructors.contains_key(engine) {
            return Err(RouterError::Registry(format!("engine '{}' is already registered", engine)));
        }
        self.constructors.insert(engine.to_string(), constructor);
        Ok(())
    }

    /// Reject further registrations.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Registered engine ids, sorted.
    pub fn engines(&self) -> Vec<String> {
        let mut engines: Vec<String> = self.constructors.keys().cloned().collect();
        engines.sort();
        engines
    }

    /// Validate `config` and build the adapter for its engine.
    pub fn create(&self, config: &RouterConfig) -> Result<Arc<dyn RouterAdapter>> {
        validate_router_config(config).map_err(|errors| {
            RouterError::InvalidConfig(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })?;

        let engine = if config.engine_type.is_empty() {
            ENGINE_AXUM
        } else {
            config.engine_type.as_str()
        };
        let constructor = self
            .constructors
            .get(engine)
            .ok_or_else(|| RouterError::UnknownEngine(engine.to_string()))?;

        let adapter = constructor(config)?;

        if config.body_limit_bytes > 0 {
            adapter.register_middleware(Arc::new(BodyLimit::new(config.body_limit_bytes)))?;
        }
        if config.enable_compression {
            let gzip = Gzip::new(config.compression_level)?
                .with_min_size(config.gzip.min_size)
                .with_excluded_paths(config.gzip.excluded_paths.iter().cloned())
                .with_excluded_extensions(config.gzip.excluded_extensions.iter().cloned());
            adapter.register_middleware(Arc::new(gzip))?;
        }

        tracing::info!(
            engine = adapter.engine_type(),
            compression = config.enable_compression,
            body_limit = config.body_limit_bytes,
            "router adapter created"
        );
        Ok(adapter)
    }

    /// Like [`create`](Self::create), but panics on failure.
    pub fn must_create(&self, config: &RouterConfig) -> Arc<dyn RouterAdapter> {
        match self.create(config) {
            Ok(adapter) => adapter,
            Err(err) => panic!(
                "failed to create router adapter for engine '{}': {}",
                config.engine_type, err
            ),
        }
    }
}

/// The process-wide registry with the built-in engines, frozen.
pub fn default_registry() -> &'static AdapterRegistry {
    static REGISTRY: OnceLock<AdapterRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = AdapterRegistry::with_builtin_engines();
        registry.freeze();
        registry
    })
}

/// Build an adapter through the default registry.
pub fn new_router_adapter(config: &RouterConfig) -> Result<Arc<dyn RouterAdapter>> {
    default_registry().create(config)
}

/// Build an adapter through the default registry, panicking on failure.
pub fn must_new_router_adapter(config: &RouterConfig) -> Arc<dyn RouterAdapter> {
    default_registry().must_create(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(engine: &str) -> RouterConfig {
        RouterConfig {
            engine_type: engine.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn builtin_engines() {
        let registry = AdapterRegistry::with_builtin_engines();
        assert_eq!(registry.engines(), vec!["axum", "axum-server", "hyper", "tiny-http"]);
        for engine in registry.engines() {
            let adapter = registry.create(&config(&engine)).unwrap();
            assert_eq!(adapter.engine_type(), engine);
            assert!(!adapter.is_running());
        }
    }

    #[test]
    fn empty_engine_defaults_to_axum() {
        let adapter = new_router_adapter(&config("")).unwrap();
        assert_eq!(adapter.engine_type(), ENGINE_AXUM);
    }

    #[test]
    fn unknown_engine() {
        let err = new_router_adapter(&config("nginx")).err().unwrap();
        assert!(matches!(err, RouterError::UnknownEngine(ref e) if e == "nginx"));
    }

    #[test]
    fn invalid_config() {
        let mut cfg = config("hyper");
        cfg.port = 0;
        assert!(matches!(new_router_adapter(&cfg), Err(RouterError::InvalidConfig(_))));

        let mut cfg = config("hyper");
        cfg.compression_level = 12;
        assert!(matches!(new_router_adapter(&cfg), Err(RouterError::InvalidConfig(_))));
    }

    #[test]
    #[should_panic(expected = "failed to create router adapter for engine 'nginx'")]
    fn must_new_panics() {
        must_new_router_adapter(&config("nginx"));
    }

    #[test]
    fn register_rules() {
        let mut registry = AdapterRegistry::with_builtin_engines();
        let custom: AdapterConstructor = |cfg| Ok(Arc::new(HyperAdapter::new(cfg)));

        assert!(matches!(registry.register(ENGINE_HYPER, custom), Err(RouterError::Registry(_))));
        registry.register("hyper-alt", custom).unwrap();
        assert_eq!(registry.create(&config("hyper-alt")).unwrap().engine_type(), ENGINE_HYPER);

        registry.freeze();
        assert!(matches!(registry.register("late", custom), Err(RouterError::Registry(_))));
        assert!(default_registry().is_frozen());
    }
}
