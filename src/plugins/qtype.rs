use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashSet;

use crate::context::QueryContext;
use crate::dns::RecordType;
use crate::error::{BifrostError, Result};
use crate::plugin::{Matcher, Plugin, Registry};

use super::string_items;

/// Matches when the query type is one of the configured types.
pub struct QTypeMatcher {
    types: FxHashSet<u16>,
}

impl QTypeMatcher {
    pub fn new<I: IntoIterator<Item = RecordType>>(types: I) -> Self {
        Self {
            types: types.into_iter().map(u16::from).collect(),
        }
    }
}

#[async_trait]
impl Matcher for QTypeMatcher {
    async fn matches(&self, qctx: &mut QueryContext) -> Result<bool> {
        let Some(question) = qctx.query().first_question() else {
            return Ok(false);
        };
        Ok(self.types.contains(&u16::from(question.qtype)))
    }
}

pub(super) fn factory(args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    let mut types = Vec::new();
    for item in string_items("qtype", args)? {
        let rtype = RecordType::from_name(&item).ok_or_else(|| {
            BifrostError::InvalidPluginArgs("qtype".into(), format!("unknown type {item:?}"))
        })?;
        types.push(rtype);
    }
    Ok(Plugin::Matcher(Arc::new(QTypeMatcher::new(types))))
}
