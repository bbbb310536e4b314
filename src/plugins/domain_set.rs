use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::QueryContext;
use crate::error::Result;
use crate::plugin::{Matcher, Plugin, Registry};

use super::string_items;

#[derive(Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    terminal: bool,
}

/// QNAME matcher over a suffix trie: labels are inserted reversed, so
/// `example.com` matches itself and every subdomain.
pub struct DomainSetMatcher {
    root: TrieNode,
}

impl DomainSetMatcher {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = TrieNode::default();
        for domain in domains {
            let mut node = &mut root;
            for label in domain
                .as_ref()
                .trim_matches('.')
                .split('.')
                .rev()
                .filter(|label| !label.is_empty())
            {
                node = node
                    .children
                    .entry(label.to_ascii_lowercase())
                    .or_default();
            }
            node.terminal = true;
        }
        Self { root }
    }

    pub fn contains(&self, qname: &str) -> bool {
        let mut node = &self.root;
        for label in qname.trim_matches('.').split('.').rev() {
            match node.children.get(label) {
                Some(child) => {
                    node = child;
                    if node.terminal {
                        return true;
                    }
                }
                None => return false,
            }
        }
        false
    }
}

#[async_trait]
impl Matcher for DomainSetMatcher {
    async fn matches(&self, qctx: &mut QueryContext) -> Result<bool> {
        let Some(question) = qctx.query().first_question() else {
            return Ok(false);
        };
        Ok(self.contains(&question.qname()))
    }
}

pub(super) fn factory(args: &toml::Value, _registry: &Registry) -> Result<Plugin> {
    let domains = string_items("domain_set", args)?;
    Ok(Plugin::Matcher(Arc::new(DomainSetMatcher::new(domains))))
}
