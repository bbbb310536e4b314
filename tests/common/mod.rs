#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use bifrost::context::{QueryContext, RequestMeta, Transport};
use bifrost::dns::{Message, Rcode, Record, RecordType};
use bifrost::error::{BifrostError, Result};
use bifrost::plugin::Executable;
use bifrost::upstream::Upstream;

/// Scripted upstream with a controlled latency, rcode and answer set.
pub struct MockUpstream {
    address: String,
    trusted: bool,
    delay: Duration,
    rcode: Rcode,
    answers: Vec<Record>,
    fail: bool,
    echo_edns: bool,
    pub hits: AtomicUsize,
}

impl MockUpstream {
    pub fn answering(address: &str, name: &str, addr: Ipv4Addr, ttl: u32) -> Self {
        Self {
            address: address.to_string(),
            trusted: false,
            delay: Duration::ZERO,
            rcode: Rcode::NoError,
            answers: vec![Record::new_a(name, ttl, addr)],
            fail: false,
            echo_edns: false,
            hits: AtomicUsize::new(0),
        }
    }

    pub fn with_rcode(address: &str, rcode: Rcode) -> Self {
        Self {
            address: address.to_string(),
            trusted: false,
            delay: Duration::ZERO,
            rcode,
            answers: Vec::new(),
            fail: false,
            echo_edns: false,
            hits: AtomicUsize::new(0),
        }
    }

    pub fn failing(address: &str) -> Self {
        Self {
            address: address.to_string(),
            trusted: false,
            delay: Duration::ZERO,
            rcode: Rcode::ServFail,
            answers: Vec::new(),
            fail: true,
            echo_edns: false,
            hits: AtomicUsize::new(0),
        }
    }

    pub fn trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn answers(mut self, answers: Vec<Record>) -> Self {
        self.answers = answers;
        self
    }

    /// Mirror EDNS back like a real resolver would.
    pub fn echo_edns(mut self) -> Self {
        self.echo_edns = true;
        self
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(BifrostError::UpstreamExchange(
                self.address.clone(),
                "scripted failure".into(),
            ));
        }
        let mut response = Message::response_shell(query, self.rcode);
        response.answers = self.answers.clone();
        if self.echo_edns && query.has_edns() {
            response.additionals.push(Record::new_opt(1232));
        }
        response.update_counts();
        Ok(response)
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn trusted(&self) -> bool {
        self.trusted
    }
}

/// Executable that installs a fixed answer after a scripted delay.
pub struct Responder {
    pub delay: Duration,
    pub name: String,
    pub addr: Ipv4Addr,
    pub fail: bool,
    pub hits: Arc<AtomicUsize>,
}

impl Responder {
    pub fn new(name: &str, addr: Ipv4Addr, delay: Duration) -> Self {
        Self {
            delay,
            name: name.to_string(),
            addr,
            fail: false,
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(delay: Duration) -> Self {
        Self {
            delay,
            name: String::new(),
            addr: Ipv4Addr::UNSPECIFIED,
            fail: true,
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Executable for Responder {
    async fn execute(&self, qctx: &mut QueryContext) -> Result<()> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(BifrostError::NoUpstreamResponse);
        }
        let mut response = Message::response_shell(qctx.query(), Rcode::NoError);
        response
            .answers
            .push(Record::new_a(&self.name, 300, self.addr));
        response.update_counts();
        qctx.set_response(Some(response));
        Ok(())
    }
}

pub fn a_query(name: &str) -> Message {
    Message::new_query(name, RecordType::A)
}

pub fn qctx_for(query: Message) -> QueryContext {
    QueryContext::new(query, udp_meta())
}

pub fn udp_meta() -> RequestMeta {
    RequestMeta::new("127.0.0.1:40000".parse().unwrap(), Transport::Udp, "test")
}

pub fn tcp_meta() -> RequestMeta {
    RequestMeta::new("127.0.0.1:40000".parse().unwrap(), Transport::Tcp, "test")
}

pub fn first_a(response: &Message) -> Option<Ipv4Addr> {
    response.answers.iter().find_map(|record| match &record.rdata {
        bifrost::dns::RData::A(addr) => Some(*addr),
        _ => None,
    })
}
