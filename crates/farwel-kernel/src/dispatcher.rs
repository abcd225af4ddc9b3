//! Routing of paths and descriptors to connectors.
//!
//! The dispatcher owns every connector by value. Routes refer to them by
//! [`ConnectorId`], which is also what the descriptor allocator records as
//! a descriptor's owner, so both lookups end in the same registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::comparer::{self, Comparer, ComparerRegistry};
use crate::config::{ConnectorLogConfig, FarwelConfig, LogConfig};
use crate::connector::{Backend, Connector, ConnectorRegistry, FactoryContext};
use crate::descriptor::{ConnectorId, DescriptorAllocator, Fd};
use crate::error::{ConfigResult, FarwelError, FarwelResult};
use crate::logging;
use crate::path;
use crate::real::RealOs;

/// A routing entry: the first location whose comparer matches a path
/// decides the connector.
pub struct Location {
    pub rule: String,
    pub priority: i64,
    comparer: Box<dyn Comparer>,
    connector: ConnectorId,
}

impl std::fmt::Debug for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Location")
            .field("rule", &self.rule)
            .field("priority", &self.priority)
            .field("connector", &self.connector)
            .finish()
    }
}

impl Location {
    pub fn matches(&self, path: &str) -> bool {
        self.comparer.matches(path)
    }

    pub fn connector(&self) -> ConnectorId {
        self.connector
    }
}

/// Outcome of loading a configuration document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub connectors: usize,
    pub locations: usize,
    /// One line per skipped entry.
    pub skipped: Vec<String>,
}

/// Owns the allocator, the connector set and the route list.
pub struct Dispatcher {
    allocator: Arc<DescriptorAllocator>,
    context: FactoryContext,
    connector_factories: ConnectorRegistry,
    comparer_factories: ComparerRegistry,
    connectors: Vec<Connector>,
    names: HashMap<String, ConnectorId>,
    routes: Vec<Location>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("watermark", &self.allocator.watermark())
            .field("connectors", &self.connectors)
            .field("routes", &self.routes)
            .finish()
    }
}

impl Dispatcher {
    /// Empty dispatcher with built-in factories and a host-derived watermark.
    pub fn new(real: Arc<dyn RealOs>) -> Self {
        Self::with_allocator(real, DescriptorAllocator::new())
    }

    pub fn with_allocator(real: Arc<dyn RealOs>, allocator: DescriptorAllocator) -> Self {
        Self {
            allocator: Arc::new(allocator),
            context: FactoryContext { real },
            connector_factories: ConnectorRegistry::with_builtins(),
            comparer_factories: ComparerRegistry::with_builtins(),
            connectors: Vec::new(),
            names: HashMap::new(),
            routes: Vec::new(),
        }
    }

    /// Build from a parsed configuration.
    pub fn from_config(real: Arc<dyn RealOs>, config: &FarwelConfig) -> Self {
        let mut dispatcher = Self::new(real);
        dispatcher.load_configuration(config);
        dispatcher
    }

    /// Read, parse and load a configuration file.
    pub fn from_path(real: Arc<dyn RealOs>, path: impl AsRef<Path>) -> ConfigResult<Self> {
        let config = FarwelConfig::from_path(path)?;
        Ok(Self::from_config(real, &config))
    }

    pub fn connector_factories_mut(&mut self) -> &mut ConnectorRegistry {
        &mut self.connector_factories
    }

    pub fn comparer_factories_mut(&mut self) -> &mut ComparerRegistry {
        &mut self.comparer_factories
    }

    pub fn allocator(&self) -> &DescriptorAllocator {
        &self.allocator
    }

    // ========================================================================
    // Population
    // ========================================================================

    /// Register a connector under a unique name.
    pub fn add_connector(
        &mut self,
        name: impl Into<String>,
        backend: Box<dyn Backend>,
    ) -> FarwelResult<ConnectorId> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(FarwelError::already_exists(name));
        }
        let id = ConnectorId(self.connectors.len());
        self.connectors
            .push(Connector::new(name.clone(), id, Arc::clone(&self.allocator), backend));
        self.names.insert(name, id);
        Ok(id)
    }

    /// Append a route. Among equal priorities, earlier routes win.
    pub fn add_location(&mut self, rule: &str, connector: &str, priority: i64) -> FarwelResult<()> {
        let id = *self
            .names
            .get(connector)
            .ok_or_else(|| FarwelError::not_found(format!("connector {connector:?}")))?;
        let comparer = self.comparer_factories.build(rule)?;
        let at = self
            .routes
            .iter()
            .position(|l| l.priority > priority)
            .unwrap_or(self.routes.len());
        self.routes.insert(
            at,
            Location {
                rule: rule.to_string(),
                priority,
                comparer,
                connector: id,
            },
        );
        Ok(())
    }

    /// Instantiate connectors and routes from `config`.
    ///
    /// Entries that cannot be used (unknown connector type, failed factory,
    /// unknown connector in a location, unparseable rule, unknown scheme,
    /// bad pattern) are skipped with a warning.
    pub fn load_configuration(&mut self, config: &FarwelConfig) -> LoadReport {
        let mut report = LoadReport::default();

        for (name, entry) in &config.connectors {
            let Some(factory) = self.connector_factories.get(&entry.kind).cloned() else {
                tracing::warn!(
                    connector = %name,
                    kind = %entry.kind,
                    "unknown connector type, skipped"
                );
                report.skipped.push(format!("connector {name}: unknown type {:?}", entry.kind));
                continue;
            };
            let added = factory
                .build(&self.context, &entry.fields)
                .and_then(|backend| self.add_connector(name.clone(), backend));
            match added {
                Ok(id) => {
                    report.connectors += 1;
                    if let Some(over) = &entry.log {
                        self.attach_logger(id, &config.log, over);
                    }
                }
                Err(e) => {
                    tracing::warn!(connector = %name, error = %e, "connector not created, skipped");
                    report.skipped.push(format!("connector {name}: {e}"));
                }
            }
        }

        for (rule, entry) in &config.locations {
            if let Err(e) = comparer::parse(rule) {
                tracing::warn!(rule = %rule, error = %e, "location skipped");
                report.skipped.push(format!("location {rule}: {e}"));
                continue;
            }
            match self.add_location(rule, &entry.connector, entry.priority.unwrap_or(0)) {
                Ok(()) => report.locations += 1,
                Err(e) => {
                    tracing::warn!(
                        rule = %rule,
                        connector = %entry.connector,
                        error = %e,
                        "location skipped"
                    );
                    report.skipped.push(format!("location {rule}: {e}"));
                }
            }
        }

        tracing::info!(
            connectors = report.connectors,
            locations = report.locations,
            skipped = report.skipped.len(),
            "configuration loaded"
        );
        report
    }

    /// Give a connector its own subscriber. A log node that cannot be set
    /// up leaves the connector on the global one.
    fn attach_logger(&mut self, id: ConnectorId, global: &LogConfig, over: &ConnectorLogConfig) {
        match logging::connector_dispatch(global, over) {
            Ok(Some(logger)) => self.connectors[id.0].set_logger(logger),
            Ok(None) => {}
            Err(e) => {
                let name = self.connectors[id.0].name();
                tracing::warn!(connector = %name, error = %e, "connector log node ignored");
            }
        }
    }

    /// Parse `text` and load it.
    pub fn load_str(&mut self, text: &str) -> ConfigResult<LoadReport> {
        let config = FarwelConfig::from_json(text)?;
        Ok(self.load_configuration(&config))
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Canonicalize `path` and return the first matching connector with
    /// the canonical form.
    pub fn route(&self, path: &str) -> Option<(&Connector, String)> {
        let canonical = path::absolute(path);
        let location = self.routes.iter().find(|l| l.matches(&canonical))?;
        tracing::debug!(path = %canonical, rule = %location.rule, "routed");
        Some((&self.connectors[location.connector.0], canonical))
    }

    pub fn resolve_by_path(&self, path: &str) -> Option<&Connector> {
        self.route(path).map(|(connector, _)| connector)
    }

    pub fn resolve_by_descriptor(&self, fd: Fd) -> Option<&Connector> {
        self.allocator
            .resolve(fd)
            .and_then(|id| self.connectors.get(id.0))
    }

    pub fn connector(&self, name: &str) -> Option<&Connector> {
        self.names.get(name).map(|id| &self.connectors[id.0])
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn routes(&self) -> &[Location] {
        &self.routes
    }

    /// Rename across the routing table.
    ///
    /// `None` when neither path is routed. Paths owned by two different
    /// connectors (or one routed and one not) are rejected with
    /// `CrossConnector`.
    pub fn rename(&self, from: &str, to: &str) -> Option<FarwelResult<()>> {
        let source = self.route(from);
        let target = self.route(to);
        match (source, target) {
            (None, None) => None,
            (Some((a, from)), Some((b, to))) if a.id() == b.id() => Some(a.rename(&from, &to)),
            _ => Some(Err(FarwelError::CrossConnector {
                from: path::absolute(from),
                to: path::absolute(to),
            })),
        }
    }
}
