use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::context::QueryContext;
use crate::dns::{Message, Rcode, Record, RecordType};
use crate::error::{BifrostError, Result};
use crate::plugin::{Executable, Plugin, Registry};

use super::parse_args;

const DEFAULT_TTL: u32 = 300;

#[derive(Debug, Default, Deserialize)]
struct HostsArgs {
    #[serde(default)]
    ttl: Option<u32>,
    #[serde(default)]
    entries: HashMap<String, Vec<String>>,
}

/// Static answer override: exact-name A/AAAA answers served without
/// consulting any upstream. Non-matching queries pass through
/// untouched.
pub struct Hosts {
    entries: HashMap<String, Vec<IpAddr>>,
    ttl: u32,
}

impl Hosts {
    pub fn new(entries: HashMap<String, Vec<IpAddr>>, ttl: u32) -> Self {
        let entries = entries
            .into_iter()
            .map(|(name, addrs)| (name.trim_matches('.').to_ascii_lowercase(), addrs))
            .collect();
        Self { entries, ttl }
    }

    fn answers_for(&self, qname: &str, qtype: RecordType) -> Option<Vec<Record>> {
        let addrs = self.entries.get(qname)?;
        let records: Vec<Record> = addrs
            .iter()
            .filter_map(|addr| match (qtype, addr) {
                (RecordType::A, IpAddr::V4(v4)) => {
                    Some(Record::new_a(qname, self.ttl, *v4))
                }
                (RecordType::AAAA, IpAddr::V6(v6)) => {
                    Some(Record::new_aaaa(qname, self.ttl, *v6))
                }
                _ => None,
            })
            .collect();
        if records.is_empty() { None } else { Some(records) }
    }
}

#[async_trait]
impl Executable for Hosts {
    async fn execute(&self, qctx: &mut QueryContext) -> Result<()> {
        let Some(question) = qctx.query().first_question() else {
            return Ok(());
        };
        if !matches!(question.qtype, RecordType::A | RecordType::AAAA) {
            return Ok(());
        }
        if let Some(answers) = self.answers_for(&question.qname(), question.qtype) {
            let mut response = Message::response_shell(qctx.query(), Rcode::NoError);
            response.answers = answers;
            response.update_counts();
            qctx.set_response(Some(response));
        }
        Ok(())
    }
}

pub(super) fn factory(args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    // Inline form: "name addr [addr...]" declares a single entry.
    let args = match args {
        toml::Value::String(text) if !text.trim().is_empty() => {
            let mut parts = text.split_whitespace();
            let name = parts.next().unwrap_or_default().to_string();
            let addrs: Vec<String> = parts.map(str::to_string).collect();
            if addrs.is_empty() {
                return Err(BifrostError::InvalidPluginArgs(
                    "hosts".into(),
                    "expected: <name> <addr> [addr...]".into(),
                ));
            }
            HostsArgs {
                ttl: None,
                entries: HashMap::from([(name, addrs)]),
            }
        }
        other => parse_args("hosts", other)?,
    };

    let mut entries = HashMap::new();
    for (name, addrs) in args.entries {
        let mut parsed = Vec::new();
        for addr in addrs {
            parsed.push(addr.parse::<IpAddr>().map_err(|_| {
                BifrostError::InvalidPluginArgs("hosts".into(), format!("bad address {addr:?}"))
            })?);
        }
        entries.insert(name, parsed);
    }

    Ok(Plugin::Executable(Arc::new(Hosts::new(
        entries,
        args.ttl.unwrap_or(DEFAULT_TTL),
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn serves_matching_family_only() {
        let hosts = Hosts::new(
            HashMap::from([(
                "router.lan".to_string(),
                vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))],
            )]),
            60,
        );
        assert!(hosts.answers_for("router.lan", RecordType::A).is_some());
        assert!(hosts.answers_for("router.lan", RecordType::AAAA).is_none());
        assert!(hosts.answers_for("other.lan", RecordType::A).is_none());
    }
}
