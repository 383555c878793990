//! Module and endpoint instance interfaces.
//!
//! A module is any component instantiated from a configuration block: storage
//! backends, authentication providers, delivery targets, queues, and the
//! protocol endpoints themselves. Endpoints differ only in how they are
//! constructed and in always being initialized; both sides implement
//! [`Module`].

use std::{fmt, io};

use thiserror::Error;

use crate::{
    compose::ComposeError,
    config::{ConfigError, Map},
};

/// Everything a module factory is told about the block it is constructed from.
#[derive(Clone, Debug)]
pub struct ModuleSpec {
    /// The directive name the block was declared as.
    pub type_name: String,
    /// The unique name the instance is registered under.
    pub instance_name: String,
    /// Additional names resolving to this instance.
    pub aliases: Vec<String>,
    /// Raw positional arguments of the block.
    pub args: Vec<String>,
}

/// A live module or endpoint instance.
///
/// Construction (via the factory) must not touch the configuration tree;
/// [`Module::init`] is called exactly once afterwards with the block's typed
/// binder, merged with the global options. For ordinary modules that call is
/// made lazily, on the first reference from another block's initialization.
pub trait Module: Send + Sync {
    /// The module's type name (its configuration directive).
    fn name(&self) -> &str;

    /// The unique instance name this module is registered under.
    fn instance_name(&self) -> &str;

    /// Process the module's configuration block. Called exactly once.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal to startup, wrapped with the module's type
    /// and instance name.
    fn init(&self, cfg: &Map<'_>) -> Result<(), ModuleError>;

    /// The shutdown capability, for module types that hold resources worth
    /// releasing. Types that declare `None` are skipped during shutdown.
    fn closer(&self) -> Option<&dyn Closeable> {
        None
    }
}

impl fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name())
            .field("instance_name", &self.instance_name())
            .finish()
    }
}

/// Optional capability invoked during best-effort shutdown.
pub trait Closeable: Send + Sync {
    /// Release the module's resources.
    ///
    /// # Errors
    ///
    /// Failures are logged by the shutdown path and never abort it.
    fn close(&self) -> Result<(), ModuleError>;
}

/// Errors surfaced by module factories and [`Module::init`].
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The module could not bind its configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A module dependency could not be resolved or initialized.
    #[error(transparent)]
    Compose(Box<ComposeError>),

    /// An I/O failure while opening the module's backing resources.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A module-specific failure.
    #[error("{0}")]
    Failure(String),
}

impl From<ComposeError> for ModuleError {
    fn from(err: ComposeError) -> Self {
        Self::Compose(Box::new(err))
    }
}

impl ModuleError {
    /// Convenience constructor for module-specific failures.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }
}
