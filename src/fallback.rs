use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::context::QueryContext;
use crate::dns::Message;
use crate::error::{BifrostError, Result};
use crate::plugin::Executable;

pub const DEFAULT_THRESHOLD: Duration = Duration::from_millis(500);
const BRANCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PrimaryStatus {
    Pending,
    Done,
    Failed,
}

/// Primary/secondary race. The secondary stays parked until the
/// primary fails or the latency threshold fires; with `always_standby`
/// it runs immediately but withholds its response until one of those
/// triggers.
pub struct Fallback {
    primary: Arc<dyn Executable>,
    secondary: Arc<dyn Executable>,
    threshold: Duration,
    always_standby: bool,
}

impl Fallback {
    pub fn new(
        primary: Arc<dyn Executable>,
        secondary: Arc<dyn Executable>,
        threshold: Duration,
        always_standby: bool,
    ) -> Self {
        Self {
            primary,
            secondary,
            threshold,
            always_standby,
        }
    }
}

/// Run one branch on its own context clone with a bounded deadline.
async fn run_branch(
    exec: Arc<dyn Executable>,
    mut qctx: QueryContext,
    bound: Duration,
    label: &'static str,
) -> Option<Message> {
    match timeout(bound, exec.execute(&mut qctx)).await {
        Ok(Ok(())) => qctx.take_response(),
        Ok(Err(err)) => {
            warn!(query = qctx.id(), "fallback {label} branch failed: {err}");
            None
        }
        Err(_) => {
            warn!(query = qctx.id(), "fallback {label} branch timed out");
            None
        }
    }
}

/// Wait until the primary reaches a terminal status. Returns true when
/// the secondary should (or may) produce its result.
async fn primary_settled(mut rx: watch::Receiver<PrimaryStatus>) -> bool {
    loop {
        match *rx.borrow() {
            PrimaryStatus::Done => return false,
            PrimaryStatus::Failed => return true,
            PrimaryStatus::Pending => {}
        }
        if rx.changed().await.is_err() {
            return true;
        }
    }
}

#[async_trait]
impl Executable for Fallback {
    async fn execute(&self, qctx: &mut QueryContext) -> Result<()> {
        let bound = qctx.bounded_timeout(BRANCH_TIMEOUT);
        let threshold = self.threshold;
        let (status_tx, status_rx) = watch::channel(PrimaryStatus::Pending);
        let (result_tx, mut result_rx) = mpsc::channel::<Option<Message>>(2);

        let primary = self.primary.clone();
        let primary_ctx = qctx.copy();
        let primary_tx = result_tx.clone();
        tokio::spawn(async move {
            let response = run_branch(primary, primary_ctx, bound, "primary").await;
            let _ = status_tx.send(if response.is_some() {
                PrimaryStatus::Done
            } else {
                PrimaryStatus::Failed
            });
            let _ = primary_tx.send(response).await;
        });

        let secondary = self.secondary.clone();
        let secondary_ctx = qctx.copy();
        let always_standby = self.always_standby;
        tokio::spawn(async move {
            let response = if always_standby {
                // Run at once, but hold the result until the primary
                // settles or the threshold (measured from launch)
                // elapses.
                let release_timer = sleep(threshold);
                let response = run_branch(secondary, secondary_ctx, bound, "secondary").await;
                tokio::select! {
                    _ = primary_settled(status_rx) => {}
                    _ = release_timer => {}
                }
                response
            } else {
                let fire = tokio::select! {
                    fire = primary_settled(status_rx) => fire,
                    _ = sleep(threshold) => true,
                };
                if !fire {
                    let _ = result_tx.send(None).await;
                    return;
                }
                run_branch(secondary, secondary_ctx, bound, "secondary").await
            };
            let _ = result_tx.send(response).await;
        });

        while let Some(result) = result_rx.recv().await {
            if let Some(response) = result {
                debug!(query = qctx.id(), "fallback settled");
                qctx.set_response(Some(response));
                return Ok(());
            }
        }

        Err(BifrostError::FallbackFailed)
    }
}
