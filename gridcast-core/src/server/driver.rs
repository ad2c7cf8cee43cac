//! Tokio driver feeding real sockets into the connection machine.
//!
//! Owns the listening TCP socket and the UDP socket (same port), one
//! task per accepted connection. All protocol decisions live in
//! [`http`](super::http) and [`udp`](super::udp); this module only
//! moves bytes and time.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::GridcastError;
use crate::server::http::{ConnAction, ConnEvent, Connection};
use crate::server::{udp, PanelContext};

/// Interval between [`ConnEvent::Timer`] ticks on an open connection.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

const READ_BUF_SIZE: usize = 4096;

// ── IngestServer ─────────────────────────────────────────────────

/// Bound sockets ready to serve one panel.
pub struct IngestServer {
    tcp: TcpListener,
    udp: Arc<UdpSocket>,
}

impl IngestServer {
    /// Bind TCP and UDP on the same address. Either failure is
    /// returned to the caller, which decides whether the panel keeps
    /// rendering without network input.
    pub async fn bind(addr: SocketAddr) -> Result<Self, GridcastError> {
        let tcp = TcpListener::bind(addr).await?;
        // UDP shares the port the listener actually got (matters for
        // port 0 in tests).
        let bound = tcp.local_addr()?;
        let udp = Arc::new(UdpSocket::bind(bound).await?);
        info!(addr = %bound, "ingest server listening (tcp+udp)");
        Ok(Self { tcp, udp })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, GridcastError> {
        Ok(self.tcp.local_addr()?)
    }

    /// Serve until cancelled. Per-connection and accept errors are
    /// logged and contained; only cancellation ends the loop.
    pub async fn run(
        self,
        ctx: Arc<PanelContext>,
        cancel: CancellationToken,
    ) -> Result<(), GridcastError> {
        let udp_task = tokio::spawn(run_udp(
            self.udp.clone(),
            ctx.clone(),
            cancel.clone(),
        ));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.tcp.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        // ECONNABORTED and friends are routine; the
                        // listener itself is still good.
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    debug!(%peer, "connection accepted");
                    let ctx = ctx.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        ctx.active_connections.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = drive_connection(&ctx, stream, peer, cancel).await {
                            debug!(%peer, error = %e, "connection ended with error");
                        }
                        ctx.active_connections.fetch_sub(1, Ordering::Relaxed);
                    });
                }
            }
        }

        udp_task.abort();
        info!("ingest server stopped");
        Ok(())
    }
}

// ── Connection driving ───────────────────────────────────────────

async fn drive_connection(
    ctx: &PanelContext,
    mut stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), GridcastError> {
    let mut conn = Connection::new(peer.ip());
    let mut timer = tokio::time::interval(POLL_INTERVAL);
    // First tick fires immediately; skip it so the idle budget starts
    // at zero.
    timer.tick().await;
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let actions = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = timer.tick() => conn.handle(ctx, ConnEvent::Timer),
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    conn.handle(ctx, ConnEvent::Closed);
                    return Ok(());
                }
                Ok(n) => conn.handle(
                    ctx,
                    ConnEvent::Data(bytes::Bytes::copy_from_slice(&buf[..n])),
                ),
                Err(e) => {
                    conn.handle(ctx, ConnEvent::Error);
                    return Err(e.into());
                }
            },
        };
        if perform(&mut conn, ctx, &mut stream, actions).await? {
            return Ok(());
        }
    }
}

/// Execute actions in order, feeding send completions back into the
/// machine. Returns true when the connection should close.
async fn perform(
    conn: &mut Connection,
    ctx: &PanelContext,
    stream: &mut TcpStream,
    actions: Vec<ConnAction>,
) -> Result<bool, GridcastError> {
    let mut queue: VecDeque<ConnAction> = actions.into();
    while let Some(action) = queue.pop_front() {
        match action {
            ConnAction::Send(chunk) => {
                stream.write_all(&chunk).await?;
                queue.extend(conn.handle(ctx, ConnEvent::SentComplete));
            }
            ConnAction::Close => {
                let _ = stream.shutdown().await;
                return Ok(true);
            }
        }
    }
    Ok(false)
}

// ── UDP driving ──────────────────────────────────────────────────

async fn run_udp(socket: Arc<UdpSocket>, ctx: Arc<PanelContext>, cancel: CancellationToken) {
    // Largest valid datagram is a full frame; anything bigger is
    // over-read by one byte so the size check can reject it.
    let mut buf = vec![0u8; crate::frame::FRAME_SIZE + 1];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            recv = socket.recv_from(&mut buf) => match recv {
                Ok((len, from)) => {
                    udp::handle_datagram(&ctx, &buf[..len], from);
                }
                Err(e) => {
                    warn!(error = %e, "udp receive failed");
                }
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_SIZE;
    use crate::server::gate::BootloaderGate;

    async fn start() -> (SocketAddr, Arc<PanelContext>, CancellationToken) {
        let ctx = Arc::new(PanelContext::new(BootloaderGate::localhost_only()));
        let cancel = CancellationToken::new();
        let server = IngestServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run(ctx.clone(), cancel.clone()));
        (addr, ctx, cancel)
    }

    #[tokio::test]
    async fn http_status_over_real_socket() {
        let (addr, _ctx, cancel) = start().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/status HTTP/1.1\r\nHost: p\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();

        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains(r#""status":"running""#));
        cancel.cancel();
    }

    #[tokio::test]
    async fn udp_frame_lands_in_store() {
        let (addr, ctx, cancel) = start().await;

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(&[9u8; FRAME_SIZE], addr).await.unwrap();

        // Delivery is local but still async.
        for _ in 0..50 {
            if ctx.store.has_pending() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let pending = ctx.store.take_pending().expect("frame not delivered");
        assert_eq!(pending.pixels.as_bytes()[0], 9);
        cancel.cancel();
    }

    #[tokio::test]
    async fn survives_aborted_connections() {
        let (addr, _ctx, cancel) = start().await;

        // Clients that reset hard (RST on close) must not take the
        // accept loop down with them.
        for _ in 0..3 {
            let stream = TcpStream::connect(addr).await.unwrap();
            stream.set_linger(Some(Duration::ZERO)).unwrap();
            drop(stream);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/status HTTP/1.1\r\nHost: p\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 200 OK"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancel_stops_accepting() {
        let (addr, _ctx, cancel) = start().await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Bind may race with shutdown; the point is the server task
        // has exited, which the connect failure or EOF demonstrates.
        if let Ok(mut stream) = TcpStream::connect(addr).await {
            let mut buf = [0u8; 1];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            assert_eq!(n, 0);
        }
    }
}
