//! Typed binder over one configuration block.
//!
//! A [`Map`] wraps a [`Node`] together with the inherited global directives and
//! hands out typed option values. Every local directive a consumer reads is
//! marked consumed; [`Map::finish`] reports the first directive nobody asked
//! for, unless [`Map::allow_unknown`] was requested. During composition the
//! map additionally resolves named module dependencies through the
//! orchestrator, which is what marks the referenced blocks as used.

use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    sync::Arc,
};

use super::{ConfigError, Node};
use crate::{
    compose::{ComposeError, ModuleResolver},
    module::Module,
};

pub struct Map<'a> {
    node: &'a Node,
    globals: &'a [Node],
    resolver: Option<&'a dyn ModuleResolver>,
    consumed: RefCell<HashSet<String>>,
    allow_unknown: Cell<bool>,
}

impl<'a> Map<'a> {
    #[must_use]
    pub fn new(node: &'a Node) -> Self {
        Self {
            node,
            globals: &[],
            resolver: None,
            consumed: RefCell::new(HashSet::new()),
            allow_unknown: Cell::new(false),
        }
    }

    #[must_use]
    pub fn with_globals(mut self, globals: &'a [Node]) -> Self {
        self.globals = globals;
        self
    }

    #[must_use]
    pub(crate) fn with_resolver(mut self, resolver: &'a dyn ModuleResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The block this map binds.
    #[must_use]
    pub const fn node(&self) -> &Node {
        self.node
    }

    /// Permit directives that no consumer reads.
    pub fn allow_unknown(&self) {
        self.allow_unknown.set(true);
    }

    /// A single-argument string directive.
    ///
    /// # Errors
    ///
    /// Fails if the directive is repeated or does not carry exactly one
    /// argument.
    pub fn string(&self, name: &str) -> Result<Option<String>, ConfigError> {
        let Some(node) = self.find(name)? else {
            return Ok(None);
        };

        match node.args.as_slice() {
            [arg] => Ok(Some(arg.clone())),
            args => Err(ConfigError::ArgumentCount {
                directive: name.into(),
                expected: "exactly one argument",
                actual: args.len(),
                location: node.location.clone(),
            }),
        }
    }

    /// Like [`Map::string`], falling back to `default` when absent.
    ///
    /// # Errors
    ///
    /// See [`Map::string`].
    pub fn string_or(&self, name: &str, default: &str) -> Result<String, ConfigError> {
        Ok(self.string(name)?.unwrap_or_else(|| default.into()))
    }

    /// A boolean directive: bare presence means `true`, otherwise a single
    /// `yes`/`no` (or `true`/`false`) argument.
    ///
    /// # Errors
    ///
    /// Fails if the directive is repeated or its argument is not a recognised
    /// boolean.
    pub fn bool(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        let Some(node) = self.find(name)? else {
            return Ok(None);
        };

        match node.args.as_slice() {
            [] => Ok(Some(true)),
            [arg] => match arg.as_str() {
                "yes" | "true" | "on" => Ok(Some(true)),
                "no" | "false" | "off" => Ok(Some(false)),
                other => Err(ConfigError::InvalidValue {
                    directive: name.into(),
                    reason: format!("expected yes/no, got {other}"),
                    location: node.location.clone(),
                }),
            },
            args => Err(ConfigError::ArgumentCount {
                directive: name.into(),
                expected: "at most one argument",
                actual: args.len(),
                location: node.location.clone(),
            }),
        }
    }

    /// A directive carrying one or more string arguments.
    ///
    /// # Errors
    ///
    /// Fails if the directive is repeated or carries no arguments.
    pub fn string_list(&self, name: &str) -> Result<Option<Vec<String>>, ConfigError> {
        let Some(node) = self.find(name)? else {
            return Ok(None);
        };

        if node.args.is_empty() {
            return Err(ConfigError::ArgumentCount {
                directive: name.into(),
                expected: "at least one argument",
                actual: 0,
                location: node.location.clone(),
            });
        }

        Ok(Some(node.args.clone()))
    }

    /// A directive interpreted by a caller-supplied parser, for option shapes
    /// the stock getters do not cover.
    ///
    /// # Errors
    ///
    /// Fails if the directive is repeated, or with whatever error the parser
    /// reports.
    pub fn custom<T>(
        &self,
        name: &str,
        parse: impl FnOnce(&Node) -> Result<T, ConfigError>,
    ) -> Result<Option<T>, ConfigError> {
        self.find(name)?.map(parse).transpose()
    }

    /// Resolve the module instance named by the directive's single argument.
    ///
    /// Resolution initializes the referenced module (once) and marks it used.
    ///
    /// # Errors
    ///
    /// Fails on a malformed directive, an unknown instance name, a circular
    /// reference, or a failure inside the referenced module's own
    /// initialization.
    pub fn module_ref(&self, name: &str) -> Result<Option<Arc<dyn Module>>, ComposeError> {
        let Some(node) = self.find(name)? else {
            return Ok(None);
        };

        match node.args.as_slice() {
            [instance] => Ok(Some(self.resolve(instance, node)?)),
            args => Err(ConfigError::ArgumentCount {
                directive: name.into(),
                expected: "exactly one argument",
                actual: args.len(),
                location: node.location.clone(),
            }
            .into()),
        }
    }

    /// Resolve every argument of the directive as a module instance name.
    ///
    /// # Errors
    ///
    /// As for [`Map::module_ref`].
    pub fn module_refs(&self, name: &str) -> Result<Vec<Arc<dyn Module>>, ComposeError> {
        let Some(node) = self.find(name)? else {
            return Ok(Vec::new());
        };

        if node.args.is_empty() {
            return Err(ConfigError::ArgumentCount {
                directive: name.into(),
                expected: "at least one argument",
                actual: 0,
                location: node.location.clone(),
            }
            .into());
        }

        node.args
            .iter()
            .map(|instance| self.resolve(instance, node))
            .collect()
    }

    /// Report the first local directive nobody consumed.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownDirective`] naming the directive and its source
    /// location, unless [`Map::allow_unknown`] was requested.
    pub fn finish(&self) -> Result<(), ConfigError> {
        if self.allow_unknown.get() {
            return Ok(());
        }

        let consumed = self.consumed.borrow();
        for child in &self.node.children {
            if !consumed.contains(&child.name) {
                return Err(ConfigError::UnknownDirective {
                    directive: child.name.clone(),
                    location: child.location.clone(),
                });
            }
        }

        Ok(())
    }

    fn resolve(&self, instance: &str, node: &Node) -> Result<Arc<dyn Module>, ComposeError> {
        let resolver = self
            .resolver
            .ok_or_else(|| ConfigError::ModuleRefUnavailable {
                location: node.location.clone(),
            })?;

        resolver.resolve(instance, &node.location)
    }

    /// Look the directive up locally first, then in the inherited globals.
    fn find(&self, name: &str) -> Result<Option<&'a Node>, ConfigError> {
        self.consumed.borrow_mut().insert(name.into());

        let mut matches = self.node.children.iter().filter(|child| child.name == name);
        if let Some(node) = matches.next() {
            if let Some(duplicate) = matches.next() {
                return Err(ConfigError::DuplicateDirective {
                    directive: name.into(),
                    location: duplicate.location.clone(),
                });
            }
            return Ok(Some(node));
        }

        Ok(self.globals.iter().find(|global| global.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Location;

    fn loc(line: u32) -> Location {
        Location::new("test.conf", line)
    }

    fn block() -> Node {
        Node::new("smtp", loc(1)).with_children(vec![
            Node::new("hostname", loc(2)).with_args(["mx.example.org"]),
            Node::new("debug", loc(3)),
            Node::new("auth_domains", loc(4)).with_args(["example.org", "example.com"]),
        ])
    }

    #[test]
    fn typed_getters() {
        let node = block();
        let map = Map::new(&node);

        assert_eq!(
            map.string("hostname").unwrap().as_deref(),
            Some("mx.example.org")
        );
        assert_eq!(map.bool("debug").unwrap(), Some(true));
        assert_eq!(
            map.string_list("auth_domains").unwrap().unwrap(),
            ["example.org", "example.com"]
        );
        assert!(map.string("missing").unwrap().is_none());
        map.finish().unwrap();
    }

    #[test]
    fn unconsumed_directive_is_an_error() {
        let node = block();
        let map = Map::new(&node);
        map.string("hostname").unwrap();

        let err = map.finish().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownDirective { ref directive, .. } if directive == "debug"
        ));
    }

    #[test]
    fn allow_unknown_suppresses_the_check() {
        let node = block();
        let map = Map::new(&node);
        map.allow_unknown();
        map.finish().unwrap();
    }

    #[test]
    fn globals_fill_in_for_missing_locals() {
        let globals = vec![
            Node::new("hostname", loc(1)).with_args(["global.example.org"]),
            Node::new("debug", loc(2)).with_args(["no"]),
        ];
        let node = Node::new("smtp", loc(10))
            .with_children(vec![Node::new("hostname", loc(11)).with_args(["local.example.org"])]);

        let map = Map::new(&node).with_globals(&globals);
        assert_eq!(
            map.string("hostname").unwrap().as_deref(),
            Some("local.example.org")
        );
        assert_eq!(map.bool("debug").unwrap(), Some(false));
        map.finish().unwrap();
    }

    #[test]
    fn repeated_directive_is_an_error() {
        let node = Node::new("smtp", loc(1)).with_children(vec![
            Node::new("hostname", loc(2)).with_args(["a.example.org"]),
            Node::new("hostname", loc(3)).with_args(["b.example.org"]),
        ]);

        let map = Map::new(&node);
        let err = map.string("hostname").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDirective { .. }));
        assert_eq!(err.location().line, 3);
    }

    #[test]
    fn bool_rejects_garbage() {
        let node = Node::new("smtp", loc(1))
            .with_children(vec![Node::new("debug", loc(2)).with_args(["maybe"])]);

        let map = Map::new(&node);
        assert!(matches!(
            map.bool("debug").unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn module_ref_outside_composition_fails() {
        let node = Node::new("smtp", loc(1))
            .with_children(vec![Node::new("storage", loc(2)).with_args(["local"])]);

        let map = Map::new(&node);
        let err = map.module_ref("storage").unwrap_err();
        assert!(matches!(
            err,
            ComposeError::Config(ConfigError::ModuleRefUnavailable { .. })
        ));
    }
}
