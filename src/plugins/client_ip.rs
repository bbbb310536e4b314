use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::QueryContext;
use crate::error::{BifrostError, Result};
use crate::plugin::{Matcher, Plugin, Registry};

use super::string_items;

/// A parsed CIDR block. Bare addresses are host routes.
#[derive(Clone, Copy, Debug)]
enum Cidr {
    V4 { net: u32, prefix: u8 },
    V6 { net: u128, prefix: u8 },
}

impl Cidr {
    fn parse(text: &str) -> Option<Self> {
        let (addr, prefix) = match text.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix.parse::<u8>().ok()?)),
            None => (text, None),
        };
        match addr.parse::<IpAddr>().ok()? {
            IpAddr::V4(v4) => {
                let prefix = prefix.unwrap_or(32);
                if prefix > 32 {
                    return None;
                }
                Some(Cidr::V4 {
                    net: u32::from(v4) & v4_mask(prefix),
                    prefix,
                })
            }
            IpAddr::V6(v6) => {
                let prefix = prefix.unwrap_or(128);
                if prefix > 128 {
                    return None;
                }
                Some(Cidr::V6 {
                    net: u128::from(v6) & v6_mask(prefix),
                    prefix,
                })
            }
        }
    }

    fn contains(&self, addr: IpAddr) -> bool {
        match (self, addr) {
            (Cidr::V4 { net, prefix }, IpAddr::V4(v4)) => {
                u32::from(v4) & v4_mask(*prefix) == *net
            }
            (Cidr::V6 { net, prefix }, IpAddr::V6(v6)) => {
                u128::from(v6) & v6_mask(*prefix) == *net
            }
            _ => false,
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) }
}

fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) }
}

/// Matches when the client address falls in any configured block.
pub struct ClientIpMatcher {
    blocks: Vec<Cidr>,
}

impl ClientIpMatcher {
    pub fn new<I, S>(blocks: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for block in blocks {
            let block = block.as_ref();
            parsed.push(Cidr::parse(block).ok_or_else(|| {
                BifrostError::InvalidPluginArgs(
                    "client_ip".into(),
                    format!("bad CIDR {block:?}"),
                )
            })?);
        }
        Ok(Self { blocks: parsed })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.blocks.iter().any(|block| block.contains(addr))
    }
}

#[async_trait]
impl Matcher for ClientIpMatcher {
    async fn matches(&self, qctx: &mut QueryContext) -> Result<bool> {
        Ok(self.contains(qctx.meta().client_addr.ip()))
    }
}

pub(super) fn factory(args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    let blocks = string_items("client_ip", args)?;
    Ok(Plugin::Matcher(Arc::new(ClientIpMatcher::new(blocks)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_membership() {
        let matcher =
            ClientIpMatcher::new(["192.168.0.0/16", "10.1.2.3", "fd00::/8"]).unwrap();
        assert!(matcher.contains("192.168.44.9".parse().unwrap()));
        assert!(!matcher.contains("192.169.0.1".parse().unwrap()));
        assert!(matcher.contains("10.1.2.3".parse().unwrap()));
        assert!(!matcher.contains("10.1.2.4".parse().unwrap()));
        assert!(matcher.contains("fd12::1".parse().unwrap()));
        assert!(!matcher.contains("fe80::1".parse().unwrap()));
    }

    #[test]
    fn zero_prefix_matches_everything_in_family() {
        let matcher = ClientIpMatcher::new(["0.0.0.0/0"]).unwrap();
        assert!(matcher.contains("203.0.113.7".parse().unwrap()));
        assert!(!matcher.contains("::1".parse().unwrap()));
    }

    #[test]
    fn bad_cidr_is_rejected() {
        assert!(ClientIpMatcher::new(["192.168.0.0/33"]).is_err());
        assert!(ClientIpMatcher::new(["not-an-ip"]).is_err());
    }
}
