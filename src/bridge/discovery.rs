//! Locating the avatar runtime inside its foreign execution context
//!
//! The runtime publishes itself under one of several names depending on how
//! its loader was configured. Each [`DiscoveryStrategy`] knows one of those
//! conventions; [`locate`] applies them in order and stops at the first hit.

use crate::error::BridgeError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// The runtime's `SendMessage(object, method, payload)` capability
pub trait AvatarRuntime: Send + Sync {
    fn send_message(&self, object: &str, method: &str, payload: &str) -> Result<(), BridgeError>;
}

/// A value bound in the foreign context
#[derive(Clone)]
pub enum ForeignValue {
    /// Object exposing a call-shaped `SendMessage`
    Runtime(Arc<dyn AvatarRuntime>),
    /// Plain namespace object
    Object(BTreeMap<String, ForeignValue>),
    /// Anything else
    Opaque,
}

impl fmt::Debug for ForeignValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runtime(_) => f.write_str("Runtime(..)"),
            Self::Object(fields) => f.debug_map().entries(fields.iter()).finish(),
            Self::Opaque => f.write_str("Opaque"),
        }
    }
}

impl ForeignValue {
    fn get(&self, key: &str) -> Option<&ForeignValue> {
        match self {
            Self::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    fn as_runtime(&self) -> Option<Arc<dyn AvatarRuntime>> {
        match self {
            Self::Runtime(runtime) => Some(Arc::clone(runtime)),
            _ => None,
        }
    }
}

/// Read access to the foreign context's top-level bindings
pub trait ForeignContext: Send + Sync {
    fn lookup(&self, name: &str) -> Option<ForeignValue>;

    /// Enumerable top-level bindings, in a stable order
    fn bindings(&self) -> Vec<(String, ForeignValue)>;
}

/// One named way of finding the runtime
pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn locate(&self, context: &dyn ForeignContext) -> Option<Arc<dyn AvatarRuntime>>;
}

/// A directly bound global, e.g. `unityInstance`
pub struct GlobalBinding {
    binding: &'static str,
}

impl GlobalBinding {
    pub const fn new(binding: &'static str) -> Self {
        Self { binding }
    }
}

impl DiscoveryStrategy for GlobalBinding {
    fn name(&self) -> &'static str {
        self.binding
    }

    fn locate(&self, context: &dyn ForeignContext) -> Option<Arc<dyn AvatarRuntime>> {
        context.lookup(self.binding)?.as_runtime()
    }
}

/// A dotted path below a global namespace, e.g. `Module.unityInstance`
pub struct ModulePath {
    path: &'static str,
}

impl ModulePath {
    pub const fn new(path: &'static str) -> Self {
        Self { path }
    }
}

impl DiscoveryStrategy for ModulePath {
    fn name(&self) -> &'static str {
        self.path
    }

    fn locate(&self, context: &dyn ForeignContext) -> Option<Arc<dyn AvatarRuntime>> {
        let mut segments = self.path.split('.');
        let root = context.lookup(segments.next()?)?;
        let mut current = &root;
        for segment in segments {
            current = current.get(segment)?;
        }
        current.as_runtime()
    }
}

/// Scan every binding for a `SendMessage` capability, either on the binding
/// itself or on its `Module` member
pub struct BindingScan;

impl DiscoveryStrategy for BindingScan {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn locate(&self, context: &dyn ForeignContext) -> Option<Arc<dyn AvatarRuntime>> {
        context.bindings().into_iter().find_map(|(name, value)| {
            let found = value
                .as_runtime()
                .or_else(|| value.get("Module").and_then(ForeignValue::as_runtime));
            if found.is_some() {
                tracing::debug!(binding = %name, "Runtime found by binding scan");
            }
            found
        })
    }
}

/// Strategies in the order the runtime's loaders are known to publish it
pub fn default_strategies() -> Vec<Box<dyn DiscoveryStrategy>> {
    vec![
        Box::new(GlobalBinding::new("unityInstance")),
        Box::new(ModulePath::new("Module.unityInstance")),
        Box::new(GlobalBinding::new("gameInstance")),
        Box::new(BindingScan),
    ]
}

/// Apply `strategies` in order, returning the first hit and its strategy name
pub fn locate(
    strategies: &[Box<dyn DiscoveryStrategy>],
    context: &dyn ForeignContext,
) -> Option<(&'static str, Arc<dyn AvatarRuntime>)> {
    strategies
        .iter()
        .find_map(|s| s.locate(context).map(|runtime| (s.name(), runtime)))
}

/// Foreign context backed by a shared binding table.
///
/// The host registers the runtime here once its loader finishes; clones share
/// the same table.
#[derive(Clone, Default)]
pub struct SharedContext {
    bindings: Arc<RwLock<BTreeMap<String, ForeignValue>>>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, value: ForeignValue) {
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<ForeignValue> {
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }
}

impl ForeignContext for SharedContext {
    fn lookup(&self, name: &str) -> Option<ForeignValue> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn bindings(&self) -> Vec<(String, ForeignValue)> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
