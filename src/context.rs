use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::dns::Message;
use crate::error::{BifrostError, Result};

static QUERY_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static KV_KEY_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Client-side metadata attached to every query.
#[derive(Clone, Debug)]
pub struct RequestMeta {
    pub client_addr: SocketAddr,
    pub transport: Transport,
    /// Tag of the listener that accepted the query.
    pub server_tag: Arc<str>,
    pub received_at: Instant,
}

impl RequestMeta {
    pub fn new(client_addr: SocketAddr, transport: Transport, server_tag: &str) -> Self {
        Self {
            client_addr,
            transport,
            server_tag: Arc::from(server_tag),
            received_at: Instant::now(),
        }
    }
}

/// Process-unique key into the per-query KV store. Allocate one per
/// plugin instance at init time and reuse it for every query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KvKey(u64);

impl KvKey {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        KvKey(KV_KEY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The mutable carrier threaded through every pipeline stage. The
/// walker never runs two stages concurrently on the same context;
/// forked executions work on `copy()` clones.
pub struct QueryContext {
    query: Message,
    original_query: Message,
    response: Option<Message>,
    meta: RequestMeta,
    id: u64,
    marks: SmallVec<[u32; 4]>,
    // Values are immutable snapshots shared by Arc, so clones of the
    // context stay race-free.
    kv: FxHashMap<KvKey, Arc<dyn Any + Send + Sync>>,
    visited: u32,
    deadline: Option<Instant>,
}

impl QueryContext {
    /// Snapshot `query` as the original (post-EDNS-shim, pre-plugin)
    /// form and assign a fresh query ID.
    pub fn new(query: Message, meta: RequestMeta) -> Self {
        Self {
            original_query: query.clone(),
            query,
            response: None,
            meta,
            id: QUERY_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            marks: SmallVec::new(),
            kv: FxHashMap::default(),
            visited: 0,
            deadline: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn query(&self) -> &Message {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut Message {
        &mut self.query
    }

    pub fn original_query(&self) -> &Message {
        &self.original_query
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    pub fn response(&self) -> Option<&Message> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: Option<Message>) {
        self.response = response;
    }

    pub fn take_response(&mut self) -> Option<Message> {
        self.response.take()
    }

    pub fn add_mark(&mut self, mark: u32) {
        if !self.marks.contains(&mark) {
            self.marks.push(mark);
        }
    }

    pub fn has_mark(&self, mark: u32) -> bool {
        self.marks.contains(&mark)
    }

    pub fn kv_insert<T: Any + Send + Sync>(&mut self, key: KvKey, value: T) {
        self.kv.insert(key, Arc::new(value));
    }

    pub fn kv_get<T: Any + Send + Sync>(&self, key: KvKey) -> Option<Arc<T>> {
        self.kv
            .get(&key)
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Remaining budget capped at `default`, for executables that fork
    /// work with an inner bound.
    pub fn bounded_timeout(&self, default: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(default),
            None => default,
        }
    }

    /// Count one walker node visit against the per-query budget.
    pub fn tick_visit(&mut self, max_visits: u32) -> Result<()> {
        self.visited += 1;
        if self.visited > max_visits {
            return Err(BifrostError::PipelineDepthExceeded);
        }
        Ok(())
    }

    /// Deep-enough clone for forked execution: the query, response and
    /// marks are owned copies, KV values are shared immutable Arcs.
    /// The query ID and visit count carry over so logs correlate and
    /// every branch stays inside the visit budget.
    pub fn copy(&self) -> Self {
        Self {
            query: self.query.clone(),
            original_query: self.original_query.clone(),
            response: self.response.clone(),
            meta: self.meta.clone(),
            id: self.id,
            marks: self.marks.clone(),
            kv: self.kv.clone(),
            visited: self.visited,
            deadline: self.deadline,
        }
    }
}
