//! Instantiation orchestrator.
//!
//! [`compose`] turns the parsed configuration tree into the live set of
//! module and endpoint instances. It runs exactly once, single-threaded,
//! before any connection is accepted; the returned [`Instances`] set is
//! frozen for the remainder of the process lifetime.
//!
//! Endpoints are initialized strictly after every module block has been
//! constructed, so endpoint configuration may reference any module by
//! instance name or alias. Ordinary modules are initialized lazily, on the
//! first reference from another block; a module block nothing ever
//! references is a configuration error, not a warning.

use std::{
    cell::Cell,
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use thiserror::Error;

use crate::{
    config::{ConfigError, Location, Map, Node},
    internal,
    module::{Module, ModuleError},
    registry::Registry,
};

/// Errors terminal to startup. There is no partial-success mode: any of
/// these aborts composition before traffic is accepted.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// A top-level block matches neither a module nor an endpoint type.
    #[error("{location}: unknown module or endpoint directive: {directive}")]
    UnknownDirective {
        directive: String,
        location: Location,
    },

    /// An instance or alias name is already taken.
    #[error("{location}: config block named {name} already exists")]
    DuplicateName { name: String, location: Location },

    /// A block references an instance name nothing declares.
    #[error("{location}: unknown config block referenced: {name}")]
    UnknownInstance { name: String, location: Location },

    /// Two or more module initializations depend on each other.
    #[error("{location}: circular reference involving config block {name}")]
    CircularReference { name: String, location: Location },

    /// The configuration declares no endpoint at all.
    #[error("at least one endpoint should be configured")]
    NoEndpoints,

    /// A module block was never pulled in by any endpoint's dependency chain.
    #[error("{location}: unused configuration block: {instance} ({ty})")]
    UnusedBlock {
        ty: String,
        instance: String,
        location: Location,
    },

    /// A factory or `init` failed, wrapped with the offending block identity.
    #[error("module {ty} ({instance}): {source}")]
    Module {
        ty: String,
        instance: String,
        #[source]
        source: ModuleError,
    },

    /// A configuration binding error outside any single module's `init`.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Resolves instance names to live modules during composition, initializing
/// them on first use. Implemented by the orchestrator and consumed through
/// [`Map::module_ref`].
pub(crate) trait ModuleResolver {
    fn resolve(&self, name: &str, location: &Location) -> Result<Arc<dyn Module>, ComposeError>;
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Status {
    Constructed,
    Initializing,
    Initialized,
}

struct Slot<'a> {
    module: Arc<dyn Module>,
    node: &'a Node,
    status: Cell<Status>,
}

struct State<'a> {
    globals: &'a [Node],
    slots: HashMap<String, Slot<'a>>,
    aliases: HashMap<String, String>,
}

impl ModuleResolver for State<'_> {
    fn resolve(&self, name: &str, location: &Location) -> Result<Arc<dyn Module>, ComposeError> {
        let canonical = self.aliases.get(name).map_or(name, String::as_str);
        let slot = self
            .slots
            .get(canonical)
            .ok_or_else(|| ComposeError::UnknownInstance {
                name: name.into(),
                location: location.clone(),
            })?;

        match slot.status.get() {
            Status::Initialized => Ok(Arc::clone(&slot.module)),
            Status::Initializing => Err(ComposeError::CircularReference {
                name: canonical.into(),
                location: slot.node.location.clone(),
            }),
            Status::Constructed => {
                slot.status.set(Status::Initializing);

                let cfg = Map::new(slot.node)
                    .with_globals(self.globals)
                    .with_resolver(self);
                slot.module
                    .init(&cfg)
                    .map_err(|source| ComposeError::Module {
                        ty: slot.node.name.clone(),
                        instance: canonical.into(),
                        source,
                    })?;

                slot.status.set(Status::Initialized);
                internal!(
                    level = DEBUG,
                    "initialized module {} ({canonical})",
                    slot.node.name
                );
                Ok(Arc::clone(&slot.module))
            }
        }
    }
}

/// The frozen result of a successful composition: endpoints first, then
/// modules, both in declaration order.
pub struct Instances {
    instances: Vec<Arc<dyn Module>>,
}

impl fmt::Debug for Instances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instances")
            .field("len", &self.instances.len())
            .finish()
    }
}

impl Instances {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Module>> {
        self.instances.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Best-effort shutdown: every instance declaring the close capability is
    /// closed in order; failures are logged and never stop the walk.
    pub fn shutdown(&self) {
        for instance in &self.instances {
            let Some(closer) = instance.closer() else {
                continue;
            };

            if let Err(err) = closer.close() {
                internal!(
                    level = ERROR,
                    "module {} ({}) close failed: {err}",
                    instance.name(),
                    instance.instance_name()
                );
            }
        }
    }
}

/// Build the live instance set out of the configuration tree.
///
/// `globals` are the top-level option directives inherited by every block;
/// `tree` is the ordered sequence of module and endpoint blocks.
///
/// # Errors
///
/// See [`ComposeError`]; every failure aborts startup entirely.
pub fn compose(
    registry: &Registry,
    globals: &[Node],
    tree: &[Node],
) -> Result<Instances, ComposeError> {
    let mut state = State {
        globals,
        slots: HashMap::new(),
        aliases: HashMap::new(),
    };

    // Instance names and aliases share one flat namespace, endpoints included.
    let mut reserved: HashSet<String> = HashSet::new();
    let mut endpoints: Vec<(Arc<dyn Module>, &Node)> = Vec::new();
    let mut module_order: Vec<String> = Vec::new();

    for block in tree {
        let instance = block.instance_name();

        if let Some(factory) = registry.endpoint_factory(&block.name) {
            if !reserved.insert(instance.into()) {
                return Err(ComposeError::DuplicateName {
                    name: instance.into(),
                    location: block.location.clone(),
                });
            }

            let module = factory(&block.name, &block.args).map_err(|source| {
                ComposeError::Module {
                    ty: block.name.clone(),
                    instance: instance.into(),
                    source,
                }
            })?;

            endpoints.push((module, block));
            continue;
        }

        let Some(factory) = registry.module_factory(&block.name) else {
            return Err(ComposeError::UnknownDirective {
                directive: block.name.clone(),
                location: block.location.clone(),
            });
        };

        if !reserved.insert(instance.into()) {
            return Err(ComposeError::DuplicateName {
                name: instance.into(),
                location: block.location.clone(),
            });
        }

        let spec = crate::module::ModuleSpec {
            type_name: block.name.clone(),
            instance_name: instance.into(),
            aliases: block.aliases().to_vec(),
            args: block.args.clone(),
        };
        let module = factory(&spec).map_err(|source| ComposeError::Module {
            ty: block.name.clone(),
            instance: instance.into(),
            source,
        })?;

        for alias in block.aliases() {
            if !reserved.insert(alias.clone()) {
                return Err(ComposeError::DuplicateName {
                    name: alias.clone(),
                    location: block.location.clone(),
                });
            }
            state.aliases.insert(alias.clone(), instance.into());
        }

        state.slots.insert(
            instance.into(),
            Slot {
                module,
                node: block,
                status: Cell::new(Status::Constructed),
            },
        );
        module_order.push(instance.into());
    }

    if endpoints.is_empty() {
        return Err(ComposeError::NoEndpoints);
    }

    // Endpoints are always initialized; their configuration is what pulls the
    // module dependency chains in.
    for (module, block) in &endpoints {
        let cfg = Map::new(block)
            .with_globals(state.globals)
            .with_resolver(&state);
        module.init(&cfg).map_err(|source| ComposeError::Module {
            ty: block.name.clone(),
            instance: block.instance_name().into(),
            source,
        })?;

        internal!(
            level = DEBUG,
            "initialized endpoint {} ({})",
            block.name,
            block.instance_name()
        );
    }

    for instance in &module_order {
        let slot = &state.slots[instance];
        if slot.status.get() != Status::Initialized {
            return Err(ComposeError::UnusedBlock {
                ty: slot.node.name.clone(),
                instance: instance.clone(),
                location: slot.node.location.clone(),
            });
        }
    }

    let mut instances: Vec<Arc<dyn Module>> =
        Vec::with_capacity(endpoints.len() + module_order.len());
    instances.extend(endpoints.into_iter().map(|(module, _)| module));
    instances.extend(
        module_order
            .iter()
            .map(|instance| Arc::clone(&state.slots[instance].module)),
    );

    Ok(Instances { instances })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::module::{Closeable, ModuleSpec};

    #[derive(Default)]
    struct Shared {
        init_counts: Mutex<HashMap<String, usize>>,
        closed: Mutex<Vec<String>>,
    }

    struct Stub {
        ty: String,
        instance: String,
        closeable: bool,
        shared: Arc<Shared>,
    }

    impl Module for Stub {
        fn name(&self) -> &str {
            &self.ty
        }

        fn instance_name(&self) -> &str {
            &self.instance
        }

        fn init(&self, cfg: &Map<'_>) -> Result<(), ModuleError> {
            *self
                .shared
                .init_counts
                .lock()
                .unwrap()
                .entry(self.instance.clone())
                .or_insert(0) += 1;

            let _ = cfg.module_refs("use")?;
            cfg.finish()?;
            Ok(())
        }

        fn closer(&self) -> Option<&dyn Closeable> {
            self.closeable.then_some(self as &dyn Closeable)
        }
    }

    impl Closeable for Stub {
        fn close(&self) -> Result<(), ModuleError> {
            self.shared.closed.lock().unwrap().push(self.instance.clone());
            if self.instance.contains("badclose") {
                Err(ModuleError::failure("backend refused to close"))
            } else {
                Ok(())
            }
        }
    }

    fn registry(shared: &Arc<Shared>) -> Registry {
        let mut registry = Registry::new();

        for ty in ["dummy", "spool"] {
            let shared = Arc::clone(shared);
            let closeable = ty == "spool";
            registry.register_module(ty, move |spec: &ModuleSpec| {
                if spec.instance_name == "brokenfactory" {
                    return Err(ModuleError::failure("factory exploded"));
                }
                Ok(Arc::new(Stub {
                    ty: spec.type_name.clone(),
                    instance: spec.instance_name.clone(),
                    closeable,
                    shared: Arc::clone(&shared),
                }))
            });
        }

        let endpoint_shared = Arc::clone(shared);
        registry.register_endpoint("smtp", move |ty: &str, args: &[String]| {
            Ok(Arc::new(Stub {
                ty: ty.into(),
                instance: args.first().cloned().unwrap_or_else(|| ty.into()),
                closeable: false,
                shared: Arc::clone(&endpoint_shared),
            }))
        });

        registry
    }

    fn node(line: u32, name: &str, args: &[&str]) -> Node {
        Node::new(name, Location::new("test.conf", line)).with_args(args.iter().copied())
    }

    fn using(mut block: Node, deps: &[&str]) -> Node {
        let line = block.location.line;
        block
            .children
            .push(node(line, "use", deps));
        block
    }

    #[test]
    fn single_endpoint_no_modules() {
        let shared = Arc::default();
        let tree = vec![node(1, "smtp", &["smtp://0.0.0.0:25"])];

        let instances = compose(&registry(&shared), &[], &tree).unwrap();
        assert_eq!(instances.len(), 1);
    }

    #[test]
    fn zero_endpoints_fails() {
        let shared = Arc::default();
        let tree = vec![node(1, "dummy", &["a"])];

        let err = compose(&registry(&shared), &[], &tree).unwrap_err();
        assert!(matches!(err, ComposeError::NoEndpoints));
    }

    #[test]
    fn unknown_directive_names_location() {
        let shared = Arc::default();
        let tree = vec![node(3, "no_such_module", &[])];

        let err = compose(&registry(&shared), &[], &tree).unwrap_err();
        match err {
            ComposeError::UnknownDirective {
                directive,
                location,
            } => {
                assert_eq!(directive, "no_such_module");
                assert_eq!(location.line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_instance_name_fails() {
        let shared = Arc::default();
        let tree = vec![
            node(1, "smtp", &["main"]),
            node(2, "dummy", &["a"]),
            node(3, "dummy", &["a"]),
        ];

        let err = compose(&registry(&shared), &[], &tree).unwrap_err();
        assert!(matches!(
            err,
            ComposeError::DuplicateName { ref name, ref location } if name == "a" && location.line == 3
        ));
    }

    #[test]
    fn alias_colliding_with_instance_fails() {
        let shared = Arc::default();
        let tree = vec![
            node(1, "smtp", &["main"]),
            node(2, "dummy", &["a"]),
            node(3, "dummy", &["b", "a"]),
        ];

        let err = compose(&registry(&shared), &[], &tree).unwrap_err();
        assert!(matches!(
            err,
            ComposeError::DuplicateName { ref name, .. } if name == "a"
        ));
    }

    #[test]
    fn endpoint_and_module_share_one_namespace() {
        let shared = Arc::default();
        let tree = vec![node(1, "dummy", &["main"]), node(2, "smtp", &["main"])];

        let err = compose(&registry(&shared), &[], &tree).unwrap_err();
        assert!(matches!(
            err,
            ComposeError::DuplicateName { ref name, .. } if name == "main"
        ));
    }

    #[test]
    fn unused_module_block_fails() {
        let shared = Arc::default();
        let tree = vec![node(1, "smtp", &["main"]), node(4, "dummy", &["orphan"])];

        let err = compose(&registry(&shared), &[], &tree).unwrap_err();
        match err {
            ComposeError::UnusedBlock {
                ty,
                instance,
                location,
            } => {
                assert_eq!(ty, "dummy");
                assert_eq!(instance, "orphan");
                assert_eq!(location.line, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn endpoint_reference_marks_module_used() {
        let shared: Arc<Shared> = Arc::default();
        let tree = vec![
            using(node(1, "smtp", &["main"]), &["store"]),
            node(2, "dummy", &["store"]),
        ];

        let instances = compose(&registry(&shared), &[], &tree).unwrap();
        assert_eq!(instances.len(), 2);

        // Endpoints first, then modules, in declaration order.
        let order: Vec<_> = instances.iter().map(|m| m.instance_name()).collect();
        assert_eq!(order, ["main", "store"]);
    }

    #[test]
    fn alias_reference_marks_module_used() {
        let shared: Arc<Shared> = Arc::default();
        let tree = vec![
            using(node(1, "smtp", &["main"]), &["local"]),
            node(2, "dummy", &["store", "local"]),
        ];

        compose(&registry(&shared), &[], &tree).unwrap();
        assert_eq!(shared.init_counts.lock().unwrap()["store"], 1);
    }

    #[test]
    fn transitive_dependencies_initialize_once() {
        let shared: Arc<Shared> = Arc::default();
        let tree = vec![
            using(node(1, "smtp", &["main"]), &["a"]),
            using(node(2, "smtp", &["submission"]), &["a"]),
            using(node(3, "dummy", &["a"]), &["b"]),
            node(4, "dummy", &["b"]),
        ];

        compose(&registry(&shared), &[], &tree).unwrap();
        let counts = shared.init_counts.lock().unwrap();
        assert_eq!(counts["a"], 1);
        assert_eq!(counts["b"], 1);
    }

    #[test]
    fn circular_reference_fails() {
        let shared = Arc::default();
        let tree = vec![
            using(node(1, "smtp", &["main"]), &["a"]),
            using(node(2, "dummy", &["a"]), &["b"]),
            using(node(3, "dummy", &["b"]), &["a"]),
        ];

        let err = compose(&registry(&shared), &[], &tree).unwrap_err();
        let mut source: &dyn std::error::Error = &err;
        let mut found = false;
        loop {
            if source.to_string().contains("circular reference") {
                found = true;
                break;
            }
            match source.source() {
                Some(next) => source = next,
                None => break,
            }
        }
        assert!(found, "expected a circular reference in the chain: {err}");
    }

    #[test]
    fn unknown_reference_fails() {
        let shared = Arc::default();
        let tree = vec![using(node(1, "smtp", &["main"]), &["ghost"])];

        let err = compose(&registry(&shared), &[], &tree).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn factory_error_is_wrapped_with_identity() {
        let shared = Arc::default();
        let tree = vec![
            node(1, "smtp", &["main"]),
            node(2, "dummy", &["brokenfactory"]),
        ];

        let err = compose(&registry(&shared), &[], &tree).unwrap_err();
        match err {
            ComposeError::Module { ty, instance, .. } => {
                assert_eq!(ty, "dummy");
                assert_eq!(instance, "brokenfactory");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn shutdown_walks_every_closer() {
        let shared: Arc<Shared> = Arc::default();
        let tree = vec![
            using(node(1, "smtp", &["main"]), &["badclose_spool", "ok_spool"]),
            node(2, "spool", &["badclose_spool"]),
            node(3, "spool", &["ok_spool"]),
        ];

        let instances = compose(&registry(&shared), &[], &tree).unwrap();
        instances.shutdown();

        // The failing closer does not stop the later one.
        let closed = shared.closed.lock().unwrap();
        assert_eq!(*closed, ["badclose_spool", "ok_spool"]);
    }

    #[test]
    fn globals_are_visible_to_blocks() {
        let shared: Arc<Shared> = Arc::default();
        let globals = vec![node(1, "hostname", &["mx.example.org"])];
        let tree = vec![node(2, "smtp", &["main"])];

        compose(&registry(&shared), &globals, &tree).unwrap();
    }
}
