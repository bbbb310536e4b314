use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::trace;

use crate::context::QueryContext;
use crate::error::{BifrostError, Result};
use crate::plugin::{Executable, Matcher, Plugin, RecursiveExecutable, Registry};

pub const DEFAULT_MAX_VISITS: u32 = 128;

/// One rule as it appears in configuration: match strings gating an
/// exec directive, with an optional tag for `goto`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub matches: Vec<String>,
    pub exec: String,
    #[serde(default)]
    pub tag: Option<String>,
}

struct MatchClause {
    matcher: Arc<dyn Matcher>,
    negate: bool,
}

enum Action {
    Exec(Arc<dyn Executable>),
    Recursive(Arc<dyn RecursiveExecutable>),
    Goto(usize),
    Return,
}

struct Node {
    matches: Vec<MatchClause>,
    action: Action,
}

/// An ordered chain of match/exec nodes. A sequence is itself an
/// executable, so registered sequences can be referenced from other
/// sequences' rules.
pub struct Sequence {
    nodes: Arc<[Node]>,
    max_visits: u32,
}

impl Sequence {
    pub fn build(rules: &[RuleConfig], registry: &Registry, max_visits: u32) -> Result<Self> {
        // Tags resolve before actions so backward and forward gotos
        // both work.
        let mut tags: HashMap<&str, usize> = HashMap::new();
        for (index, rule) in rules.iter().enumerate() {
            if let Some(tag) = &rule.tag {
                if tags.insert(tag.as_str(), index).is_some() {
                    return Err(BifrostError::InvalidRule(format!("duplicate tag {tag}")));
                }
            }
        }

        let mut nodes = Vec::with_capacity(rules.len());
        for rule in rules {
            let mut matches = Vec::with_capacity(rule.matches.len());
            for clause in &rule.matches {
                let (negate, text) = match clause.strip_prefix('!') {
                    Some(rest) => (true, rest.trim()),
                    None => (false, clause.trim()),
                };
                let plugin = resolve(text, registry)?;
                let matcher = match plugin {
                    Plugin::Matcher(matcher) => matcher,
                    other => {
                        return Err(BifrostError::InvalidRule(format!(
                            "match clause {text:?} resolved to a {}",
                            other.kind()
                        )));
                    }
                };
                matches.push(MatchClause { matcher, negate });
            }

            let directive = rule.exec.trim();
            let action = if directive == "return" {
                Action::Return
            } else if let Some(target) = directive.strip_prefix("goto ") {
                let target = target.trim();
                let index = tags
                    .get(target)
                    .copied()
                    .ok_or_else(|| BifrostError::UnknownJumpTarget(target.to_string()))?;
                Action::Goto(index)
            } else if directive.is_empty() {
                return Err(BifrostError::InvalidRule("empty exec directive".into()));
            } else {
                match resolve(directive, registry)? {
                    Plugin::Executable(exec) => Action::Exec(exec),
                    Plugin::Recursive(exec) => Action::Recursive(exec),
                    Plugin::Matcher(_) => {
                        return Err(BifrostError::InvalidRule(format!(
                            "exec directive {directive:?} resolved to a matcher"
                        )));
                    }
                }
            };

            nodes.push(Node { matches, action });
        }

        Ok(Sequence {
            nodes: nodes.into(),
            max_visits,
        })
    }

    pub async fn execute(&self, qctx: &mut QueryContext) -> Result<()> {
        ChainWalker {
            nodes: self.nodes.clone(),
            index: 0,
            max_visits: self.max_visits,
        }
        .run(qctx)
        .await
    }
}

#[async_trait]
impl Executable for Sequence {
    async fn execute(&self, qctx: &mut QueryContext) -> Result<()> {
        Sequence::execute(self, qctx).await
    }
}

/// Resolve a rule string: `$tag` references a registered instance, a
/// bare identifier names a type built inline from the remainder of the
/// string.
fn resolve(text: &str, registry: &Registry) -> Result<Plugin> {
    if let Some(tag) = text.strip_prefix('$') {
        return registry.reference(tag.trim());
    }
    let (type_tag, args) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim().to_string()),
        None => (text, String::new()),
    };
    registry.build(type_tag, &toml::Value::String(args))
}

/// A resumable snapshot of the walker. Recursive executables receive
/// one pointing at the node after their own and may run it zero, one
/// or many times; each call walks the remaining chain on the given
/// context.
#[derive(Clone)]
pub struct ChainWalker {
    nodes: Arc<[Node]>,
    index: usize,
    max_visits: u32,
}

impl ChainWalker {
    /// A walker with nothing left to run. Useful as a terminal
    /// continuation in tests and for plugins executed standalone.
    pub fn empty() -> Self {
        ChainWalker {
            nodes: Arc::from(Vec::new()),
            index: 0,
            max_visits: DEFAULT_MAX_VISITS,
        }
    }

    pub fn run<'a>(self, qctx: &'a mut QueryContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut index = self.index;

            while index < self.nodes.len() {
                qctx.tick_visit(self.max_visits)?;
                let node = &self.nodes[index];

                let mut matched = true;
                for clause in &node.matches {
                    let hit = clause.matcher.matches(qctx).await?;
                    if hit == clause.negate {
                        matched = false;
                        break;
                    }
                }
                if !matched {
                    index += 1;
                    continue;
                }

                match &node.action {
                    Action::Exec(exec) => {
                        exec.execute(qctx).await?;
                        index += 1;
                    }
                    Action::Recursive(exec) => {
                        // The continuation owns the rest of the chain;
                        // the walker ends here either way.
                        let next = ChainWalker {
                            nodes: self.nodes.clone(),
                            index: index + 1,
                            max_visits: self.max_visits,
                        };
                        return exec.execute(qctx, next).await;
                    }
                    Action::Goto(target) => {
                        trace!(query = qctx.id(), target = *target, "pipeline jump");
                        index = *target;
                    }
                    Action::Return => return Ok(()),
                }
            }

            Ok(())
        })
    }
}
