use std::sync::Arc;

use async_trait::async_trait;

use crate::context::QueryContext;
use crate::error::{BifrostError, Result};
use crate::plugin::{Executable, Matcher, Plugin, Registry};

use super::string_items;

/// Stamps the configured marks onto the query context.
pub struct SetMark {
    marks: Vec<u32>,
}

#[async_trait]
impl Executable for SetMark {
    async fn execute(&self, qctx: &mut QueryContext) -> Result<()> {
        for &mark in &self.marks {
            qctx.add_mark(mark);
        }
        Ok(())
    }
}

/// Matches when any configured mark was stamped earlier in the chain.
pub struct HasMarkMatcher {
    marks: Vec<u32>,
}

#[async_trait]
impl Matcher for HasMarkMatcher {
    async fn matches(&self, qctx: &mut QueryContext) -> Result<bool> {
        Ok(self.marks.iter().any(|&mark| qctx.has_mark(mark)))
    }
}

fn parse_marks(type_tag: &str, args: &toml::Value) -> Result<Vec<u32>> {
    let items = string_items(type_tag, args)?;
    if items.is_empty() {
        return Err(BifrostError::InvalidPluginArgs(
            type_tag.to_string(),
            "at least one mark is required".into(),
        ));
    }
    items
        .iter()
        .map(|item| {
            item.parse::<u32>().map_err(|_| {
                BifrostError::InvalidPluginArgs(
                    type_tag.to_string(),
                    format!("bad mark {item:?}"),
                )
            })
        })
        .collect()
}

pub(super) fn set_factory(args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    Ok(Plugin::Executable(Arc::new(SetMark {
        marks: parse_marks("mark", args)?,
    })))
}

pub(super) fn has_factory(args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    Ok(Plugin::Matcher(Arc::new(HasMarkMatcher {
        marks: parse_marks("has_mark", args)?,
    })))
}
