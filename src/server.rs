use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::context::{RequestMeta, Transport};
use crate::error::Result;
use crate::handler::EntryHandler;
use crate::shutdown::SafeClose;

/// Run the UDP listener until the close signal fires. The socket is
/// bound by the caller so bind failures surface at startup.
pub async fn run_udp_server(
    sock: UdpSocket,
    server_tag: &str,
    handler: Arc<EntryHandler>,
    closer: SafeClose,
) -> Result<()> {
    let Some(_guard) = closer.attach() else {
        return Ok(());
    };
    let mut shutdown_rx = closer.subscribe();

    let sock = Arc::new(sock);
    if let Ok(local) = sock.local_addr() {
        info!("UDP DNS server listening on {local}");
    }

    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("UDP server received shutdown signal");
                break;
            }
            result = sock.recv_from(&mut buf) => {
                let (read, src_addr) = result?;
                let wire = buf[..read].to_vec();
                let handler = handler.clone();
                let sock = sock.clone();
                let meta = RequestMeta::new(src_addr, Transport::Udp, server_tag);
                tokio::spawn(async move {
                    if let Some(response) = handler.handle(&wire, meta).await {
                        if let Err(err) = sock.send_to(&response, src_addr).await {
                            warn!("failed to send UDP response to {src_addr}: {err}");
                        }
                    }
                });
            }
        }
    }

    Ok(())
}

/// Run the TCP listener until the close signal fires. The listener is
/// bound by the caller so bind failures surface at startup.
pub async fn run_tcp_server(
    listener: TcpListener,
    server_tag: &str,
    handler: Arc<EntryHandler>,
    closer: SafeClose,
) -> Result<()> {
    let Some(_guard) = closer.attach() else {
        return Ok(());
    };
    let mut shutdown_rx = closer.subscribe();

    if let Ok(local) = listener.local_addr() {
        info!("TCP DNS server listening on {local}");
    }

    let server_tag: Arc<str> = Arc::from(server_tag);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("TCP server received shutdown signal");
                break;
            }
            result = listener.accept() => {
                let (stream, src_addr) = result?;
                let handler = handler.clone();
                let server_tag = server_tag.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_tcp_connection(stream, src_addr, &server_tag, handler).await
                    {
                        debug!("TCP connection from {src_addr} ended: {err}");
                    }
                });
            }
        }
    }

    Ok(())
}

/// Serve length-prefixed queries on one TCP connection (RFC 1035
/// §4.2.2) until the peer closes it.
async fn handle_tcp_connection(
    mut stream: TcpStream,
    src_addr: SocketAddr,
    server_tag: &str,
    handler: Arc<EntryHandler>,
) -> std::io::Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut wire = vec![0u8; len];
        stream.read_exact(&mut wire).await?;

        let meta = RequestMeta::new(src_addr, Transport::Tcp, server_tag);
        if let Some(response) = handler.handle(&wire, meta).await {
            let mut frame = BytesMut::with_capacity(response.len() + 2);
            frame.put_u16(response.len() as u16);
            frame.put_slice(&response);
            stream.write_all(&frame).await?;
            stream.flush().await?;
        }
    }
}
