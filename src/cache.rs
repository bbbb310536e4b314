use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
// tokio's Instant so the paused test clock drives TTL decay.
use tokio::time::{Instant, timeout};
use tracing::{debug, trace, warn};

use crate::context::QueryContext;
use crate::dns::{ClientSubnet, Message, Rcode, RecordType};
use crate::error::Result;
use crate::plugin::RecursiveExecutable;
use crate::sequence::ChainWalker;

const PREFETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Canonical identity of a query for caching and deduplication. The
/// transaction ID is deliberately excluded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryKey {
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
    pub subnet: Option<ClientSubnet>,
    pub do_bit: bool,
    pub cd_bit: bool,
    // Pre-computed so shard selection and map lookups hash once.
    hash: u64,
}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl QueryKey {
    pub fn from_message(message: &Message) -> Option<Self> {
        let question = message.first_question()?;
        let qname = question.qname();
        let qtype: u16 = question.qtype.into();
        let qclass: u16 = question.qclass.into();
        let subnet = message.client_subnet();
        let do_bit = message.do_bit();
        let cd_bit = message.cd_bit();

        let mut hasher = DefaultHasher::new();
        qname.hash(&mut hasher);
        qtype.hash(&mut hasher);
        qclass.hash(&mut hasher);
        subnet.hash(&mut hasher);
        do_bit.hash(&mut hasher);
        cd_bit.hash(&mut hasher);

        Some(Self {
            qname,
            qtype,
            qclass,
            subnet,
            do_bit,
            cd_bit,
            hash: hasher.finish(),
        })
    }

    pub fn shard_hash(&self) -> u64 {
        self.hash
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub size: usize,
    pub shards: usize,
    pub min_ttl_secs: u32,
    pub max_ttl_secs: u32,
    pub prefetch: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: 65536,
            shards: 16,
            min_ttl_secs: 1,
            max_ttl_secs: 86400,
            prefetch: false,
        }
    }
}

struct StoredEntry {
    response: Message,
    stored_at: Instant,
    expires_at: Instant,
    lifetime: Duration,
    seq: u64,
}

#[derive(Default)]
struct Shard {
    map: FxHashMap<u64, (QueryKey, StoredEntry)>,
    // LRU order: lowest sequence number is the coldest entry.
    order: BTreeMap<u64, u64>,
    seq: u64,
}

impl Shard {
    fn touch(&mut self, hash: u64) {
        let next = self.seq;
        self.seq += 1;
        if let Some((_, entry)) = self.map.get_mut(&hash) {
            self.order.remove(&entry.seq);
            entry.seq = next;
            self.order.insert(next, hash);
        }
    }

    fn remove(&mut self, hash: u64) {
        if let Some((_, entry)) = self.map.remove(&hash) {
            self.order.remove(&entry.seq);
        }
    }
}

/// Result of a cache lookup: the TTL-adjusted response plus whether
/// the entry is close enough to expiry to warrant a prefetch.
pub struct CacheHit {
    pub response: Message,
    pub near_expiry: bool,
}

/// Sharded, bounded LRU keyed by `QueryKey`.
pub struct MessageCache {
    shards: Vec<Mutex<Shard>>,
    per_shard_cap: usize,
    min_ttl: u32,
    max_ttl: u32,
}

impl MessageCache {
    pub fn new(config: &CacheConfig) -> Self {
        let shard_count = config.shards.max(1);
        let per_shard_cap = (config.size / shard_count).max(1);
        Self {
            shards: (0..shard_count)
                .map(|_| Mutex::new(Shard::default()))
                .collect(),
            per_shard_cap,
            min_ttl: config.min_ttl_secs.max(1),
            max_ttl: config.max_ttl_secs.max(1),
        }
    }

    fn shard(&self, key: &QueryKey) -> &Mutex<Shard> {
        let index = (key.shard_hash() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    pub fn get(&self, key: &QueryKey) -> Option<CacheHit> {
        let now = Instant::now();
        let mut shard = self.shard(key).lock();

        {
            let (stored_key, entry) = shard.map.get(&key.shard_hash())?;
            if stored_key != key {
                // Hash collision; treat as a miss.
                return None;
            }
            if now >= entry.expires_at {
                shard.remove(key.shard_hash());
                return None;
            }
        }

        let (_, entry) = shard.map.get(&key.shard_hash()).unwrap();
        let elapsed = now.duration_since(entry.stored_at).as_secs() as u32;
        let remaining = entry.expires_at.duration_since(now);
        let near_expiry = remaining.as_secs_f64() <= entry.lifetime.as_secs_f64() * 0.1;

        let mut response = entry.response.clone();
        for record in response.answers.iter_mut().chain(&mut response.authorities) {
            if record.rtype != RecordType::OPT {
                record.ttl = record.ttl.saturating_sub(elapsed).max(self.min_ttl);
            }
        }

        shard.touch(key.shard_hash());
        Some(CacheHit {
            response,
            near_expiry,
        })
    }

    /// Store `response` if it is cacheable; returns whether it was.
    pub fn insert(&self, key: QueryKey, response: &Message) -> bool {
        let Some(ttl) = cacheable_ttl(response) else {
            return false;
        };
        let ttl = ttl.clamp(self.min_ttl, self.max_ttl);
        let now = Instant::now();
        let lifetime = Duration::from_secs(ttl as u64);

        let mut shard = self.shard(&key).lock();
        while shard.map.len() >= self.per_shard_cap && !shard.map.contains_key(&key.shard_hash()) {
            let Some((_, coldest)) = shard.order.pop_first() else {
                break;
            };
            trace!("evicting cold cache entry");
            shard.map.remove(&coldest);
        }

        let seq = shard.seq;
        shard.seq += 1;
        let hash = key.shard_hash();
        if let Some((_, old)) = shard.map.insert(
            hash,
            (
                key,
                StoredEntry {
                    response: response.clone(),
                    stored_at: now,
                    expires_at: now + lifetime,
                    lifetime,
                    seq,
                },
            ),
        ) {
            shard.order.remove(&old.seq);
        }
        shard.order.insert(seq, hash);
        true
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decide cacheability and the stored TTL. SUCCESS or NXDOMAIN with
/// substance only; truncated replies are transient and never stored.
/// Negative answers take the SOA MINIMUM when one is present.
fn cacheable_ttl(response: &Message) -> Option<u32> {
    if response.header.tc {
        return None;
    }
    match response.rcode() {
        Rcode::NoError | Rcode::NxDomain => {}
        _ => return None,
    }

    if !response.answers.is_empty() {
        return response.min_ttl();
    }

    // Negative response: require an SOA in the authority section.
    for record in &response.authorities {
        if let crate::dns::RData::Soa(soa) = &record.rdata {
            return Some(soa.minimum.min(record.ttl));
        }
    }
    None
}

/// The cache pipeline stage: short-circuits on a hit, stores the
/// post-plugin response on a miss.
pub struct CachePlugin {
    store: Arc<MessageCache>,
    prefetch: bool,
    prefetching: Arc<DashMap<u64, ()>>,
}

impl CachePlugin {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            store: Arc::new(MessageCache::new(config)),
            prefetch: config.prefetch,
            prefetching: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<MessageCache> {
        self.store.clone()
    }

    fn spawn_prefetch(&self, qctx: &QueryContext, key: QueryKey, next: ChainWalker) {
        if self.prefetching.insert(key.shard_hash(), ()).is_some() {
            return;
        }
        let store = self.store.clone();
        let prefetching = self.prefetching.clone();
        let mut refresh_ctx = qctx.copy();
        refresh_ctx.set_response(None);

        debug!(query = qctx.id(), qname = %key.qname, "prefetching near-expiry entry");
        // Outside the caller's deadline on purpose; the client already
        // got its answer.
        tokio::spawn(async move {
            let hash = key.shard_hash();
            match timeout(PREFETCH_TIMEOUT, next.run(&mut refresh_ctx)).await {
                Ok(Ok(())) => {
                    if let Some(response) = refresh_ctx.response() {
                        store.insert(key, response);
                    }
                }
                Ok(Err(err)) => warn!("prefetch failed: {err}"),
                Err(_) => warn!("prefetch timed out"),
            }
            prefetching.remove(&hash);
        });
    }
}

#[async_trait]
impl RecursiveExecutable for CachePlugin {
    async fn execute(&self, qctx: &mut QueryContext, next: ChainWalker) -> Result<()> {
        let Some(key) = QueryKey::from_message(qctx.query()) else {
            return next.run(qctx).await;
        };

        if let Some(hit) = self.store.get(&key) {
            trace!(query = qctx.id(), qname = %key.qname, "cache hit");
            let mut response = hit.response;
            response.header.id = qctx.query().header.id;
            if self.prefetch && hit.near_expiry {
                self.spawn_prefetch(qctx, key, next);
            }
            qctx.set_response(Some(response));
            return Ok(());
        }

        next.run(qctx).await?;

        if let Some(response) = qctx.response() {
            if self.store.insert(key, response) {
                trace!(query = qctx.id(), "response stored");
            }
        }
        Ok(())
    }
}
