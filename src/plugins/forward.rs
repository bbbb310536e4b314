use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::bundle::UpstreamBundle;
use crate::context::QueryContext;
use crate::error::{BifrostError, Result};
use crate::plugin::{Executable, Plugin, Registry};
use crate::upstream::{UdpUpstream, Upstream, UpstreamConfig};

#[derive(Debug, Default, Deserialize)]
struct ForwardArgs {
    upstreams: Vec<UpstreamConfig>,
}

/// Resolves the query against an upstream bundle and installs the
/// winning response.
pub struct Forward {
    bundle: UpstreamBundle,
}

impl Forward {
    pub fn new(bundle: UpstreamBundle) -> Self {
        Self { bundle }
    }

    pub fn from_upstreams(upstreams: Vec<Arc<dyn Upstream>>) -> Self {
        Self::new(UpstreamBundle::new(upstreams))
    }
}

#[async_trait]
impl Executable for Forward {
    async fn execute(&self, qctx: &mut QueryContext) -> Result<()> {
        let response = self.bundle.exchange(qctx.query()).await?;
        qctx.set_response(Some(response));
        Ok(())
    }
}

pub(super) fn factory(args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    // Inline form: whitespace-separated addresses, all untrusted.
    let args = match args {
        toml::Value::String(text) if !text.trim().is_empty() => ForwardArgs {
            upstreams: text
                .split_whitespace()
                .map(|addr| UpstreamConfig {
                    addr: addr.to_string(),
                    trusted: false,
                    timeout_ms: None,
                })
                .collect(),
        },
        other => super::parse_args("forward", other)?,
    };

    if args.upstreams.is_empty() {
        return Err(BifrostError::InvalidPluginArgs(
            "forward".into(),
            "at least one upstream is required".into(),
        ));
    }

    let mut upstreams: Vec<Arc<dyn Upstream>> = Vec::with_capacity(args.upstreams.len());
    for config in &args.upstreams {
        upstreams.push(Arc::new(UdpUpstream::new(config)?));
    }

    Ok(Plugin::Executable(Arc::new(Forward::from_upstreams(
        upstreams,
    ))))
}
