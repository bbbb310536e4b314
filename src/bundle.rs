use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dns::{Message, Rcode};
use crate::error::{BifrostError, Result};
use crate::upstream::Upstream;

/// Parallel fan-out coordinator over N upstreams. The first response
/// that is SUCCESS, or comes from a trusted upstream, wins; the first
/// non-SUCCESS answer from an untrusted upstream is remembered as a
/// last-resort candidate.
pub struct UpstreamBundle {
    upstreams: Vec<Arc<dyn Upstream>>,
}

impl UpstreamBundle {
    pub fn new(upstreams: Vec<Arc<dyn Upstream>>) -> Self {
        debug_assert!(!upstreams.is_empty());
        Self { upstreams }
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    pub async fn exchange(&self, query: &Message) -> Result<Message> {
        if self.upstreams.len() == 1 {
            return self.upstreams[0].exchange(query).await;
        }

        // Capacity covers every sender, so abandoned stragglers finish
        // into the channel instead of blocking after we return.
        let (tx, mut rx) = mpsc::channel(self.upstreams.len());
        for upstream in &self.upstreams {
            let upstream = upstream.clone();
            let query = query.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = upstream.exchange(&query).await;
                let _ = tx.send((result, upstream.trusted(), upstream.address().to_string())).await;
            });
        }
        drop(tx);

        let mut candidate: Option<Message> = None;
        while let Some((result, trusted, address)) = rx.recv().await {
            match result {
                Err(err) => {
                    warn!("upstream {address} failed: {err}");
                }
                Ok(response) if response.rcode() == Rcode::NoError || trusted => {
                    debug!("accepted response from {address}");
                    return Ok(response);
                }
                Ok(response) => {
                    debug!(
                        "untrusted {address} answered {:?}, kept as candidate",
                        response.rcode()
                    );
                    if candidate.is_none() {
                        candidate = Some(response);
                    }
                }
            }
        }

        candidate.ok_or(BifrostError::NoUpstreamResponse)
    }
}
