use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BifrostError, Result};
use crate::plugin::{Plugin, Registry};
use crate::plugins;
use crate::sequence::{DEFAULT_MAX_VISITS, RuleConfig, Sequence};

/// A named plugin declaration.
#[derive(Clone, Debug, Deserialize)]
pub struct PluginDecl {
    pub tag: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub args: Option<toml::Value>,
}

/// A named sub-sequence, referencable from rules as `$tag`.
#[derive(Clone, Debug, Deserialize)]
pub struct SequenceDecl {
    pub tag: String,
    pub rules: Vec<RuleConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address both listeners bind to.
    pub bind_addr: String,
    pub enable_tcp: bool,
    pub query_timeout_ms: u64,
    pub edns_buffer_size: u16,
    /// Walker visit budget per query.
    pub max_visits: u32,
    pub plugins: Vec<PluginDecl>,
    pub sequences: Vec<SequenceDecl>,
    /// The root sequence every query enters.
    pub sequence: Vec<RuleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:1053".to_string(),
            enable_tcp: true,
            query_timeout_ms: 5000,
            edns_buffer_size: 1200,
            max_visits: DEFAULT_MAX_VISITS,
            plugins: Vec::new(),
            sequences: Vec::new(),
            sequence: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| BifrostError::ConfigParseError(format!("{}: {err}", path.display())))?;
        let mut config: Config = toml::from_str(&text)
            .map_err(|err| BifrostError::ConfigParseError(err.to_string()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for the common knobs, useful in
    /// containers and CI.
    pub fn apply_env(&mut self) {
        if let Ok(bind) = std::env::var("BIFROST_BIND_ADDR") {
            self.bind_addr = bind;
        }
        if let Ok(timeout) = std::env::var("BIFROST_QUERY_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.query_timeout_ms = timeout;
            }
        }
        if let Ok(visits) = std::env::var("BIFROST_MAX_VISITS") {
            if let Ok(visits) = visits.parse() {
                self.max_visits = visits;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_socket_addr()?;
        if self.query_timeout_ms == 0 {
            return Err(BifrostError::InvalidTimeout("query_timeout_ms = 0".into()));
        }
        if self.max_visits == 0 {
            return Err(BifrostError::ConfigParseError("max_visits = 0".into()));
        }
        if self.sequence.is_empty() {
            return Err(BifrostError::ConfigParseError(
                "root sequence is empty".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr
            .parse()
            .map_err(|_| BifrostError::InvalidBindAddress(self.bind_addr.clone()))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Build the registry, named plugins, named sub-sequences and the
    /// root sequence. Declarations resolve in order, so later entries
    /// may reference earlier ones.
    pub fn build_pipeline(&self) -> Result<(Registry, Arc<Sequence>)> {
        let mut registry = Registry::new();
        plugins::register_builtins(&mut registry);

        for decl in &self.plugins {
            let args = decl
                .args
                .clone()
                .unwrap_or_else(|| toml::Value::String(String::new()));
            let plugin = registry.build(&decl.type_tag, &args)?;
            registry.insert_instance(&decl.tag, plugin)?;
        }

        for decl in &self.sequences {
            let sequence = Sequence::build(&decl.rules, &registry, self.max_visits)?;
            registry.insert_instance(&decl.tag, Plugin::Executable(Arc::new(sequence)))?;
        }

        let root = Sequence::build(&self.sequence, &registry, self.max_visits)?;
        Ok((registry, Arc::new(root)))
    }
}
