use std::sync::Arc;

use async_trait::async_trait;

use crate::context::QueryContext;
use crate::dns::RecordType;
use crate::error::{BifrostError, Result};
use crate::plugin::{Executable, Plugin, Registry};

use super::string_items;

/// Clamps answer TTLs of the installed response into `[min, max]`.
pub struct TtlClamp {
    min: u32,
    max: u32,
}

impl TtlClamp {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

#[async_trait]
impl Executable for TtlClamp {
    async fn execute(&self, qctx: &mut QueryContext) -> Result<()> {
        if let Some(response) = qctx.response() {
            let mut response = response.clone();
            for record in response
                .answers
                .iter_mut()
                .chain(&mut response.authorities)
            {
                if record.rtype != RecordType::OPT {
                    record.ttl = record.ttl.clamp(self.min, self.max);
                }
            }
            qctx.set_response(Some(response));
        }
        Ok(())
    }
}

pub(super) fn factory(args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    let items = string_items("ttl", args)?;
    let parse = |item: &str| {
        item.parse::<u32>().map_err(|_| {
            BifrostError::InvalidPluginArgs("ttl".into(), format!("bad TTL {item:?}"))
        })
    };
    let (min, max) = match items.as_slice() {
        [min, max] => (parse(min)?, parse(max)?),
        [max] => (0, parse(max)?),
        _ => {
            return Err(BifrostError::InvalidPluginArgs(
                "ttl".into(),
                "expected: [min] max".into(),
            ));
        }
    };
    if min > max {
        return Err(BifrostError::InvalidPluginArgs(
            "ttl".into(),
            format!("min {min} exceeds max {max}"),
        ));
    }
    Ok(Plugin::Executable(Arc::new(TtlClamp::new(min, max))))
}
