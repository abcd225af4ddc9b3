//! Path predicates used by the routing table.
//!
//! A location rule is written `scheme://pattern`. The scheme picks a
//! comparer factory, which compiles the pattern once into a [`Comparer`].

mod always;
mod regexp;

pub use always::Always;
pub use regexp::Regexp;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FarwelError, FarwelResult};

/// A pure predicate over canonical paths.
///
/// Implementations hold no mutable state and may be evaluated from any
/// number of threads at once.
pub trait Comparer: Send + Sync + std::fmt::Debug {
    fn matches(&self, path: &str) -> bool;
}

/// Builds a [`Comparer`] from the pattern half of a rule.
pub trait ComparerFactory: Send + Sync {
    fn build(&self, pattern: &str) -> FarwelResult<Box<dyn Comparer>>;
}

impl<F> ComparerFactory for F
where
    F: Fn(&str) -> FarwelResult<Box<dyn Comparer>> + Send + Sync,
{
    fn build(&self, pattern: &str) -> FarwelResult<Box<dyn Comparer>> {
        self(pattern)
    }
}

/// Split a rule into `(scheme, pattern)` at the first `://`.
///
/// Fails when the separator is missing or either side is empty.
pub fn parse(rule: &str) -> FarwelResult<(&str, &str)> {
    match rule.split_once("://") {
        Some((scheme, pattern)) if !scheme.is_empty() && !pattern.is_empty() => {
            Ok((scheme, pattern))
        }
        _ => Err(FarwelError::invalid_path(format!(
            "location rule {rule:?} is not of the form scheme://pattern"
        ))),
    }
}

/// Comparer factories keyed by scheme.
pub struct ComparerRegistry {
    factories: HashMap<String, Arc<dyn ComparerFactory>>,
}

impl std::fmt::Debug for ComparerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<_> = self.factories.keys().collect();
        schemes.sort();
        f.debug_struct("ComparerRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

impl Default for ComparerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ComparerRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with `always` and `regexp`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("always", |_: &str| -> FarwelResult<Box<dyn Comparer>> {
            Ok(Box::new(Always))
        });
        registry.register("regexp", |pattern: &str| -> FarwelResult<Box<dyn Comparer>> {
            Ok(Box::new(Regexp::new(pattern)?))
        });
        registry
    }

    /// Register (or replace) the factory for `scheme`.
    pub fn register(&mut self, scheme: impl Into<String>, factory: impl ComparerFactory + 'static) {
        self.factories.insert(scheme.into(), Arc::new(factory));
    }

    pub fn get(&self, scheme: &str) -> Option<&Arc<dyn ComparerFactory>> {
        self.factories.get(scheme)
    }

    /// Parse a full rule and build its comparer.
    pub fn build(&self, rule: &str) -> FarwelResult<Box<dyn Comparer>> {
        let (scheme, pattern) = parse(rule)?;
        let factory = self.get(scheme).ok_or_else(|| {
            FarwelError::invalid_path(format!("unknown comparer scheme {scheme:?}"))
        })?;
        factory.build(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(parse("regexp://^/tmp/").unwrap(), ("regexp", "^/tmp/"));
        assert_eq!(parse("always://*").unwrap(), ("always", "*"));
        // First separator wins; patterns may contain "://".
        assert_eq!(parse("regexp://a://b").unwrap(), ("regexp", "a://b"));
    }

    #[test]
    fn test_parse_failures() {
        assert!(parse("/tmp/foo").is_err());
        assert!(parse("://x").is_err());
        assert!(parse("regexp://").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_registry_builds_builtins() {
        let registry = ComparerRegistry::with_builtins();
        assert!(registry.build("always://x").unwrap().matches("/anything"));
        let re = registry.build("regexp://^/data/").unwrap();
        assert!(re.matches("/data/a"));
        assert!(!re.matches("/etc/a"));
    }

    #[test]
    fn test_registry_rejects_unknown_scheme_and_bad_regex() {
        let registry = ComparerRegistry::with_builtins();
        assert!(registry.build("glob://*.txt").is_err());
        assert!(registry.build("regexp://(").is_err());
    }

    #[test]
    fn test_custom_scheme() {
        #[derive(Debug)]
        struct Prefix(String);
        impl Comparer for Prefix {
            fn matches(&self, path: &str) -> bool {
                path.starts_with(&self.0)
            }
        }

        let mut registry = ComparerRegistry::empty();
        registry.register("prefix", |p: &str| -> FarwelResult<Box<dyn Comparer>> {
            Ok(Box::new(Prefix(p.to_string())))
        });
        assert!(registry.build("prefix:///srv").unwrap().matches("/srv/x"));
        assert!(registry.build("always://x").is_err());
    }
}
