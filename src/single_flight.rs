use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::cache::QueryKey;
use crate::context::QueryContext;
use crate::dns::Message;
use crate::error::{BifrostError, Result};
use crate::plugin::RecursiveExecutable;
use crate::sequence::ChainWalker;

// The shared exchange runs detached from every waiter, so it carries
// its own bound instead of inheriting the leader's deadline.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

type SharedOutcome = Result<Message>;

struct Call {
    tx: broadcast::Sender<SharedOutcome>,
}

/// Coalesces concurrent identical queries onto one in-flight exchange.
/// The first arrival becomes the leader and drives the rest of the
/// chain in a detached task; everyone (leader included) waits on the
/// broadcast and receives its own copy of the outcome.
#[derive(Default)]
pub struct SingleFlight {
    calls: Arc<DashMap<QueryKey, Call>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecursiveExecutable for SingleFlight {
    async fn execute(&self, qctx: &mut QueryContext, next: ChainWalker) -> Result<()> {
        let Some(key) = QueryKey::from_message(qctx.query()) else {
            return next.run(qctx).await;
        };

        let flight_next = next.clone();
        let mut rx = match self.calls.entry(key.clone()) {
            Entry::Occupied(entry) => {
                trace!(query = qctx.id(), qname = %key.qname, "joining in-flight query");
                entry.get().tx.subscribe()
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = broadcast::channel(1);
                slot.insert(Call { tx: tx.clone() });

                trace!(query = qctx.id(), qname = %key.qname, "leading in-flight query");
                let calls = self.calls.clone();
                let mut flight_ctx = qctx.copy();
                flight_ctx.set_response(None);
                // Detached so the shared exchange survives any single
                // waiter's cancellation; followers adopt the result.
                tokio::spawn(async move {
                    let outcome =
                        match timeout(CALL_TIMEOUT, flight_next.run(&mut flight_ctx)).await {
                        Ok(Ok(())) => match flight_ctx.take_response() {
                            Some(response) => Ok(response),
                            None => Err(BifrostError::EmptyCoalescedResponse),
                        },
                        Ok(Err(err)) => Err(err),
                        Err(_) => Err(BifrostError::Timeout),
                    };
                    // Deregister before broadcasting so late arrivals
                    // start a fresh flight instead of missing the
                    // result.
                    calls.remove(&key);
                    let _ = tx.send(outcome);
                });
                rx
            }
        };

        match rx.recv().await {
            Ok(Ok(mut response)) => {
                // Every waiter gets its own copy with its own
                // transaction ID.
                response.header.id = qctx.query().header.id;
                qctx.set_response(Some(response));
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                // Broadcast dropped without a result; resolve alone.
                debug!(query = qctx.id(), "in-flight call vanished, resolving directly");
                next.run(qctx).await
            }
        }
    }
}
