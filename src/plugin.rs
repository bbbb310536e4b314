use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::QueryContext;
use crate::error::{BifrostError, Result};
use crate::sequence::ChainWalker;

/// A decision stage. Matchers may annotate the context (marks, KV) but
/// must not install or change the response.
#[async_trait]
pub trait Matcher: Send + Sync {
    async fn matches(&self, qctx: &mut QueryContext) -> Result<bool>;
}

/// A mutation stage.
#[async_trait]
pub trait Executable: Send + Sync {
    async fn execute(&self, qctx: &mut QueryContext) -> Result<()>;
}

/// A mutation stage that owns the rest of the chain: it decides
/// whether, when and how many times to resume `next`.
#[async_trait]
pub trait RecursiveExecutable: Send + Sync {
    async fn execute(&self, qctx: &mut QueryContext, next: ChainWalker) -> Result<()>;
}

/// A named, typed plugin instance.
#[derive(Clone)]
pub enum Plugin {
    Matcher(Arc<dyn Matcher>),
    Executable(Arc<dyn Executable>),
    Recursive(Arc<dyn RecursiveExecutable>),
}

impl Plugin {
    pub fn kind(&self) -> &'static str {
        match self {
            Plugin::Matcher(_) => "matcher",
            Plugin::Executable(_) => "executable",
            Plugin::Recursive(_) => "recursive executable",
        }
    }
}

/// Factory: parses a TOML args node into a plugin instance. The
/// registry is available so composite plugins (sequences, fallback)
/// can resolve references to already-built instances.
pub type FactoryFn = fn(&toml::Value, &Registry) -> Result<Plugin>;

/// Maps type tags to factories and names to built instances. Populated
/// during startup, read-only afterwards.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<&'static str, FactoryFn>,
    instances: HashMap<String, Plugin>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_factory(&mut self, type_tag: &'static str, factory: FactoryFn) {
        self.factories.insert(type_tag, factory);
    }

    /// Build an anonymous instance of `type_tag` from `args`.
    pub fn build(&self, type_tag: &str, args: &toml::Value) -> Result<Plugin> {
        let factory = self
            .factories
            .get(type_tag)
            .ok_or_else(|| BifrostError::UnknownPluginType(type_tag.to_string()))?;
        factory(args, self)
    }

    pub fn insert_instance(&mut self, tag: &str, plugin: Plugin) -> Result<()> {
        if self.instances.contains_key(tag) {
            return Err(BifrostError::DuplicatePluginTag(tag.to_string()));
        }
        self.instances.insert(tag.to_string(), plugin);
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<&Plugin> {
        self.instances.get(tag)
    }

    /// Resolve a `$tag` reference.
    pub fn reference(&self, tag: &str) -> Result<Plugin> {
        self.get(tag)
            .cloned()
            .ok_or_else(|| BifrostError::UnknownPluginReference(tag.to_string()))
    }
}
