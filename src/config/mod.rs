//! Parsed configuration tree.
//!
//! The configuration file syntax is handled by an external parser; this module
//! defines the tree it produces and the typed binder ([`Map`]) that modules and
//! endpoints use to consume their block of it. Nodes are immutable once parsed.

pub mod map;

use std::fmt::{self, Display};

use thiserror::Error;

pub use map::Map;

/// Source position of a directive, carried into every configuration error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl Location {
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One named block or directive in the configuration tree.
///
/// The first argument, when present, is the instance name of the block; any
/// further arguments are aliases. A node without arguments is registered under
/// its own directive name.
#[derive(Clone, Debug, Default)]
pub struct Node {
    pub name: String,
    pub args: Vec<String>,
    pub children: Vec<Node>,
    pub location: Location,
}

impl Node {
    #[must_use]
    pub fn new(name: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            children: Vec::new(),
            location,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    /// The name this block's instance is registered under.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        self.args.first().map_or(self.name.as_str(), String::as_str)
    }

    /// Additional names the instance is reachable through.
    #[must_use]
    pub fn aliases(&self) -> &[String] {
        self.args.get(1..).unwrap_or_default()
    }
}

/// Errors produced while binding typed options out of a [`Node`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A directive was present that no consumer asked for.
    #[error("{location}: unknown directive: {directive}")]
    UnknownDirective {
        directive: String,
        location: Location,
    },

    /// The same directive appeared more than once in one block.
    #[error("{location}: directive {directive} specified more than once")]
    DuplicateDirective {
        directive: String,
        location: Location,
    },

    /// A directive carried the wrong number of arguments.
    #[error("{location}: directive {directive} requires {expected}, got {actual}")]
    ArgumentCount {
        directive: String,
        expected: &'static str,
        actual: usize,
        location: Location,
    },

    /// A directive argument could not be interpreted.
    #[error("{location}: invalid value for {directive}: {reason}")]
    InvalidValue {
        directive: String,
        reason: String,
        location: Location,
    },

    /// A module reference was used outside of composition.
    #[error("{location}: module references cannot be resolved in this context")]
    ModuleRefUnavailable { location: Location },
}

impl ConfigError {
    /// Source position the error points at.
    #[must_use]
    pub const fn location(&self) -> &Location {
        match self {
            Self::UnknownDirective { location, .. }
            | Self::DuplicateDirective { location, .. }
            | Self::ArgumentCount { location, .. }
            | Self::InvalidValue { location, .. }
            | Self::ModuleRefUnavailable { location } => location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_name_defaults_to_directive_name() {
        let node = Node::new("sql", Location::new("maddy.conf", 4));
        assert_eq!(node.instance_name(), "sql");
        assert!(node.aliases().is_empty());
    }

    #[test]
    fn first_argument_names_the_instance() {
        let node = Node::new("sql", Location::new("maddy.conf", 4))
            .with_args(["local_mailboxes", "local", "default"]);
        assert_eq!(node.instance_name(), "local_mailboxes");
        assert_eq!(node.aliases(), ["local", "default"]);
    }

    #[test]
    fn error_display_includes_location() {
        let err = ConfigError::UnknownDirective {
            directive: "no_such_thing".into(),
            location: Location::new("maddy.conf", 17),
        };
        assert_eq!(
            err.to_string(),
            "maddy.conf:17: unknown directive: no_such_thing"
        );
    }
}
