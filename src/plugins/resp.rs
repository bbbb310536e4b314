use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashSet;

use crate::context::QueryContext;
use crate::dns::Rcode;
use crate::error::{BifrostError, Result};
use crate::plugin::{Matcher, Plugin, Registry};

use super::string_items;

/// Matches when a response has been installed.
pub struct HasRespMatcher;

#[async_trait]
impl Matcher for HasRespMatcher {
    async fn matches(&self, qctx: &mut QueryContext) -> Result<bool> {
        Ok(qctx.response().is_some())
    }
}

/// Matches when the installed response carries one of the configured
/// rcodes. No response means no match.
pub struct RcodeMatcher {
    rcodes: FxHashSet<u8>,
}

impl RcodeMatcher {
    pub fn new<I: IntoIterator<Item = Rcode>>(rcodes: I) -> Self {
        Self {
            rcodes: rcodes.into_iter().map(u8::from).collect(),
        }
    }
}

#[async_trait]
impl Matcher for RcodeMatcher {
    async fn matches(&self, qctx: &mut QueryContext) -> Result<bool> {
        Ok(qctx
            .response()
            .map(|response| self.rcodes.contains(&response.header.rcode))
            .unwrap_or(false))
    }
}

pub(super) fn has_resp_factory(_args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    Ok(Plugin::Matcher(Arc::new(HasRespMatcher)))
}

pub(super) fn rcode_factory(args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    let mut rcodes = Vec::new();
    for item in string_items("rcode", args)? {
        let rcode = Rcode::from_name(&item).ok_or_else(|| {
            BifrostError::InvalidPluginArgs("rcode".into(), format!("unknown rcode {item:?}"))
        })?;
        rcodes.push(rcode);
    }
    Ok(Plugin::Matcher(Arc::new(RcodeMatcher::new(rcodes))))
}
