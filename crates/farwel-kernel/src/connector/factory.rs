//! Connector factories keyed by type name.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::{Backend, DummyBackend, MemoryBackend, PassthroughBackend, SqlBackend, SqlConfig};
use crate::error::{FarwelError, FarwelResult};
use crate::real::RealOs;

/// What a factory may need besides its configuration fragment.
#[derive(Clone)]
pub struct FactoryContext {
    pub real: Arc<dyn RealOs>,
}

impl std::fmt::Debug for FactoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryContext").finish_non_exhaustive()
    }
}

/// Builds a backend from the fields of a `connectors` entry (everything
/// except `type`).
pub trait ConnectorFactory: Send + Sync {
    fn build(
        &self,
        ctx: &FactoryContext,
        fields: &Map<String, Value>,
    ) -> FarwelResult<Box<dyn Backend>>;
}

impl<F> ConnectorFactory for F
where
    F: Fn(&FactoryContext, &Map<String, Value>) -> FarwelResult<Box<dyn Backend>> + Send + Sync,
{
    fn build(
        &self,
        ctx: &FactoryContext,
        fields: &Map<String, Value>,
    ) -> FarwelResult<Box<dyn Backend>> {
        self(ctx, fields)
    }
}

/// Deserialize a configuration fragment into a backend's settings.
pub fn settings<T: DeserializeOwned>(fields: &Map<String, Value>) -> FarwelResult<T> {
    serde_json::from_value(Value::Object(fields.clone()))
        .map_err(|e| FarwelError::backend(format!("bad connector settings: {e}")))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MemorySettings {
    block_size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PassthroughSettings {
    root: Option<String>,
}

fn memory(_: &FactoryContext, fields: &Map<String, Value>) -> FarwelResult<Box<dyn Backend>> {
    let s: MemorySettings = settings(fields)?;
    Ok(Box::new(match s.block_size {
        Some(bs) => MemoryBackend::with_block_size(bs),
        None => MemoryBackend::new(),
    }))
}

fn passthrough(
    ctx: &FactoryContext,
    fields: &Map<String, Value>,
) -> FarwelResult<Box<dyn Backend>> {
    let s: PassthroughSettings = settings(fields)?;
    Ok(Box::new(PassthroughBackend::new(Arc::clone(&ctx.real), s.root)))
}

fn dummy(_: &FactoryContext, _: &Map<String, Value>) -> FarwelResult<Box<dyn Backend>> {
    Ok(Box::new(DummyBackend))
}

fn sqldb(_: &FactoryContext, fields: &Map<String, Value>) -> FarwelResult<Box<dyn Backend>> {
    let config: SqlConfig = settings(fields)?;
    Ok(Box::new(SqlBackend::open(&config)?))
}

/// Connector factories keyed by the `type` field of a connector entry.
pub struct ConnectorRegistry {
    factories: HashMap<String, Arc<dyn ConnectorFactory>>,
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ConnectorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with `memory`, `passthrough`, `dummy` and `sqldb`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("memory", memory);
        registry.register("passthrough", passthrough);
        registry.register("dummy", dummy);
        registry.register("sqldb", sqldb);
        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, factory: impl ConnectorFactory + 'static) {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ConnectorFactory>> {
        self.factories.get(kind)
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
