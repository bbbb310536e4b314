use std::sync::Arc;

use async_trait::async_trait;

use crate::context::QueryContext;
use crate::dns::{Message, Rcode};
use crate::error::{BifrostError, Result};
use crate::plugin::{Executable, Plugin, Registry};

/// Synthesizes a response with a fixed rcode, REFUSED by default.
pub struct Reject {
    rcode: Rcode,
}

impl Reject {
    pub fn new(rcode: Rcode) -> Self {
        Self { rcode }
    }
}

#[async_trait]
impl Executable for Reject {
    async fn execute(&self, qctx: &mut QueryContext) -> Result<()> {
        let response = Message::response_shell(qctx.query(), self.rcode);
        qctx.set_response(Some(response));
        Ok(())
    }
}

pub(super) fn factory(args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    let rcode = match args {
        toml::Value::String(text) if !text.trim().is_empty() => Rcode::from_name(text.trim())
            .ok_or_else(|| {
                BifrostError::InvalidPluginArgs("reject".into(), format!("unknown rcode {text:?}"))
            })?,
        _ => Rcode::Refused,
    };
    Ok(Plugin::Executable(Arc::new(Reject::new(rcode))))
}
