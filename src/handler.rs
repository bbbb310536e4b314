use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::context::{QueryContext, RequestMeta, Transport};
use crate::dns::{Message, Rcode};
use crate::sequence::Sequence;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_EDNS_BUFFER_SIZE: u16 = 1200;

/// Adapter between the wire servers and the root sequence: owns the
/// per-query deadline, the EDNS0 shim and response synthesis.
pub struct EntryHandler {
    entry: Arc<Sequence>,
    query_timeout: Duration,
    edns_buffer_size: u16,
}

impl EntryHandler {
    pub fn new(entry: Arc<Sequence>, query_timeout: Duration, edns_buffer_size: u16) -> Self {
        Self {
            entry,
            query_timeout,
            edns_buffer_size,
        }
    }

    /// Handle one wire query. `None` means no response should be sent
    /// (unparseable input or a packing failure).
    pub async fn handle(&self, wire: &[u8], meta: RequestMeta) -> Option<Vec<u8>> {
        let mut query = match Message::parse(wire) {
            Ok(query) => query,
            Err(err) => {
                debug!("dropping malformed query from {}: {err}", meta.client_addr);
                return None;
            }
        };

        let client_udp_size = query.max_udp_payload_size();
        // RFC 6891: if we add EDNS for the upstream leg, the client
        // must not see it in the response.
        let edns_upgraded = query.ensure_edns(self.edns_buffer_size);

        let transport = meta.transport;
        let mut qctx = QueryContext::new(query, meta);
        qctx.set_deadline(Instant::now() + self.query_timeout);

        let outcome = timeout(self.query_timeout, self.entry.execute(&mut qctx)).await;

        let mut response = match outcome {
            Ok(Ok(())) => match qctx.take_response() {
                Some(response) => response,
                None => {
                    debug!(query = qctx.id(), "pipeline produced no response");
                    Message::response_shell(qctx.original_query(), Rcode::Refused)
                }
            },
            Ok(Err(err)) => {
                warn!(query = qctx.id(), "pipeline failed: {err}");
                Message::response_shell(qctx.original_query(), Rcode::ServFail)
            }
            Err(_) => {
                warn!(query = qctx.id(), "query deadline exceeded");
                Message::response_shell(qctx.original_query(), Rcode::ServFail)
            }
        };

        response.header.id = qctx.original_query().header.id;
        response.header.qr = true;
        response.header.ra = true;
        if edns_upgraded {
            response.strip_edns();
        }
        response.update_counts();

        let mut wire = match response.to_wire() {
            Ok(wire) => wire,
            Err(err) => {
                error!(query = qctx.id(), "failed to pack response: {err}");
                return None;
            }
        };

        if transport == Transport::Udp && wire.len() > client_udp_size as usize {
            debug!(
                query = qctx.id(),
                "response too large for UDP ({} > {client_udp_size}), truncating",
                wire.len()
            );
            let truncated = response.truncated();
            wire = match truncated.to_wire() {
                Ok(wire) => wire,
                Err(err) => {
                    error!(query = qctx.id(), "failed to pack truncated response: {err}");
                    return None;
                }
            };
        }

        Some(wire)
    }
}
