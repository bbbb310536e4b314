mod client_ip;
mod domain_set;
mod forward;
mod hosts;
mod mark;
mod qtype;
mod reject;
mod resp;
mod ttl;

pub use client_ip::ClientIpMatcher;
pub use domain_set::DomainSetMatcher;
pub use forward::Forward;
pub use hosts::Hosts;
pub use mark::{HasMarkMatcher, SetMark};
pub use qtype::QTypeMatcher;
pub use reject::Reject;
pub use resp::{HasRespMatcher, RcodeMatcher};
pub use ttl::TtlClamp;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::cache::{CacheConfig, CachePlugin};
use crate::error::{BifrostError, Result};
use crate::fallback::{DEFAULT_THRESHOLD, Fallback};
use crate::plugin::{Plugin, Registry};
use crate::single_flight::SingleFlight;

/// Register every built-in plugin type.
pub fn register_builtins(registry: &mut Registry) {
    registry.register_factory("domain_set", domain_set::factory);
    registry.register_factory("qtype", qtype::factory);
    registry.register_factory("client_ip", client_ip::factory);
    registry.register_factory("has_resp", resp::has_resp_factory);
    registry.register_factory("rcode", resp::rcode_factory);
    registry.register_factory("mark", mark::set_factory);
    registry.register_factory("has_mark", mark::has_factory);
    registry.register_factory("hosts", hosts::factory);
    registry.register_factory("reject", reject::factory);
    registry.register_factory("ttl", ttl::factory);
    registry.register_factory("forward", forward::factory);
    registry.register_factory("cache", cache_factory);
    registry.register_factory("single_flight", single_flight_factory);
    registry.register_factory("fallback", fallback_factory);
}

/// Deserialize a structured args node; an empty inline string yields
/// the default.
pub(crate) fn parse_args<T>(type_tag: &str, args: &toml::Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match args {
        toml::Value::String(text) if text.trim().is_empty() => Ok(T::default()),
        other => other
            .clone()
            .try_into()
            .map_err(|err| BifrostError::InvalidPluginArgs(type_tag.to_string(), err.to_string())),
    }
}

/// Accept either an inline whitespace-separated string or a TOML array
/// of strings.
pub(crate) fn string_items(type_tag: &str, args: &toml::Value) -> Result<Vec<String>> {
    match args {
        toml::Value::String(text) => {
            Ok(text.split_whitespace().map(str::to_string).collect())
        }
        toml::Value::Array(values) => values
            .iter()
            .map(|value| {
                value.as_str().map(str::to_string).ok_or_else(|| {
                    BifrostError::InvalidPluginArgs(
                        type_tag.to_string(),
                        "expected an array of strings".into(),
                    )
                })
            })
            .collect(),
        _ => Err(BifrostError::InvalidPluginArgs(
            type_tag.to_string(),
            "expected a string or an array of strings".into(),
        )),
    }
}

fn cache_factory(args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    let config: CacheConfig = parse_args("cache", args)?;
    Ok(Plugin::Recursive(Arc::new(CachePlugin::new(&config))))
}

fn single_flight_factory(_args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    Ok(Plugin::Recursive(Arc::new(SingleFlight::new())))
}

#[derive(Debug, Default, Deserialize)]
struct FallbackArgs {
    primary: String,
    secondary: String,
    #[serde(default)]
    threshold_ms: Option<u64>,
    #[serde(default)]
    always_standby: bool,
}

fn fallback_factory(args: &toml::Value, registry: &Registry) -> Result<Plugin> {
    let args: FallbackArgs = parse_args("fallback", args)?;

    let resolve_branch = |name: &str| -> Result<Arc<dyn crate::plugin::Executable>> {
        let tag = name.strip_prefix('$').unwrap_or(name);
        match registry.reference(tag)? {
            Plugin::Executable(exec) => Ok(exec),
            other => Err(BifrostError::InvalidPluginArgs(
                "fallback".into(),
                format!("branch {name:?} resolved to a {}", other.kind()),
            )),
        }
    };

    let primary = resolve_branch(&args.primary)?;
    let secondary = resolve_branch(&args.secondary)?;
    let threshold = args
        .threshold_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_THRESHOLD);

    Ok(Plugin::Executable(Arc::new(Fallback::new(
        primary,
        secondary,
        threshold,
        args.always_standby,
    ))))
}
