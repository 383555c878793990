//! Factory registry for module and endpoint types.
//!
//! Registration is explicit: the embedding process lists every available type
//! at startup, rather than relying on import side effects. The registry is
//! populated once, handed to [`crate::compose::compose`] by reference, and
//! never mutated afterwards.

use std::{collections::HashMap, sync::Arc};

use crate::module::{Module, ModuleError, ModuleSpec};

/// Constructs an ordinary module instance from its declaration.
pub type ModuleFactory =
    Box<dyn Fn(&ModuleSpec) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync>;

/// Constructs an endpoint instance from its type name and positional
/// arguments (typically listen addresses).
pub type EndpointFactory =
    Box<dyn Fn(&str, &[String]) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    modules: HashMap<String, ModuleFactory>,
    endpoints: HashMap<String, EndpointFactory>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module type under its configuration directive name.
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register_module(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&ModuleSpec) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync + 'static,
    ) {
        self.modules.insert(name.into(), Box::new(factory));
    }

    /// Register an endpoint type under its configuration directive name.
    pub fn register_endpoint(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&str, &[String]) -> Result<Arc<dyn Module>, ModuleError>
        + Send
        + Sync
        + 'static,
    ) {
        self.endpoints.insert(name.into(), Box::new(factory));
    }

    #[must_use]
    pub fn module_factory(&self, name: &str) -> Option<&ModuleFactory> {
        self.modules.get(name)
    }

    #[must_use]
    pub fn endpoint_factory(&self, name: &str) -> Option<&EndpointFactory> {
        self.endpoints.get(name)
    }
}
