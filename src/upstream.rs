use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::dns::Message;
use crate::error::{BifrostError, Result};

const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_POOLED_SOCKETS: usize = 8;

/// One configured DNS endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamConfig {
    pub addr: String,
    #[serde(default)]
    pub trusted: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Opaque client for one DNS endpoint. Trust controls whether the
/// coordinator accepts non-SUCCESS rcodes from it outright.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn exchange(&self, query: &Message) -> Result<Message>;
    fn address(&self) -> &str;
    fn trusted(&self) -> bool;
}

/// UDP transport with pooled sockets and a TCP retry when the reply
/// comes back truncated.
pub struct UdpUpstream {
    addr: SocketAddr,
    address: String,
    trusted: bool,
    timeout: Duration,
    sockets: Mutex<Vec<UdpSocket>>,
}

impl UdpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let addr: SocketAddr = config
            .addr
            .parse()
            .map_err(|_| BifrostError::InvalidUpstreamAddress(config.addr.clone()))?;
        Ok(Self {
            addr,
            address: config.addr.clone(),
            trusted: config.trusted,
            timeout: config
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_EXCHANGE_TIMEOUT),
            sockets: Mutex::new(Vec::new()),
        })
    }

    async fn get_socket(&self) -> Result<UdpSocket> {
        if let Some(socket) = self.sockets.lock().await.pop() {
            trace!("reusing pooled UDP socket for {}", self.address);
            return Ok(socket);
        }

        let bind_addr = if self.addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.addr).await?;
        Ok(socket)
    }

    async fn return_socket(&self, socket: UdpSocket) {
        let mut pool = self.sockets.lock().await;
        if pool.len() < MAX_POOLED_SOCKETS {
            pool.push(socket);
        }
    }

    async fn exchange_udp(&self, wire: &[u8], txn_id: u16) -> Result<Message> {
        let socket = self.get_socket().await?;
        socket.send(wire).await?;

        let mut buf = vec![0u8; 4096];
        loop {
            let read = socket.recv(&mut buf).await?;
            let response = match Message::parse(&buf[..read]) {
                Ok(response) => response,
                Err(err) => {
                    debug!("discarding malformed reply from {}: {err}", self.address);
                    continue;
                }
            };
            // Late replies to earlier transactions share the socket;
            // keep waiting for ours.
            if response.header.id != txn_id {
                trace!(
                    "transaction ID mismatch from {} ({} != {txn_id})",
                    self.address, response.header.id
                );
                continue;
            }
            self.return_socket(socket).await;
            return Ok(response);
        }
    }

    async fn exchange_tcp(&self, wire: &[u8], txn_id: u16) -> Result<Message> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(&(wire.len() as u16).to_be_bytes()).await?;
        stream.write_all(wire).await?;
        stream.flush().await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await?;

        let response = Message::parse(&buf).map_err(BifrostError::from)?;
        if response.header.id != txn_id {
            return Err(BifrostError::UpstreamExchange(
                self.address.clone(),
                "TCP transaction ID mismatch".into(),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl Upstream for UdpUpstream {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        // The upstream owns its transaction ID space; the caller's ID
        // is restored on the way out.
        let txn_id: u16 = rand::random();
        let mut outbound = query.clone();
        outbound.header.id = txn_id;
        let wire = outbound.to_wire().map_err(BifrostError::from)?;

        let exchanged = timeout(self.timeout, async {
            let response = self.exchange_udp(&wire, txn_id).await?;
            if response.header.tc {
                debug!("truncated reply from {}, retrying over TCP", self.address);
                return self.exchange_tcp(&wire, txn_id).await;
            }
            Ok(response)
        })
        .await;

        match exchanged {
            Ok(Ok(mut response)) => {
                response.header.id = query.header.id;
                Ok(response)
            }
            Ok(Err(err)) => Err(BifrostError::UpstreamExchange(
                self.address.clone(),
                err.to_string(),
            )),
            Err(_) => Err(BifrostError::Timeout),
        }
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn trusted(&self) -> bool {
        self.trusted
    }
}
