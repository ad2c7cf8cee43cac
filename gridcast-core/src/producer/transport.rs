//! Network client carrying encoded frames to a panel.
//!
//! Full frames prefer UDP (fire-and-forget, loss is healed by the
//! next full frame); deltas and anything UDP cannot deliver go over a
//! kept-alive HTTP connection. Connecting retries with doubling
//! backoff; send failures are counted and logged sparsely so a panel
//! that is simply off does not flood the journal.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::error::GridcastError;
use crate::frame::Frame;
use crate::producer::encoder::Outgoing;
use crate::wire;

/// First retry delay; doubles per attempt.
pub const BACKOFF_INITIAL: Duration = Duration::from_millis(250);
/// Backoff ceiling.
pub const BACKOFF_CAP: Duration = Duration::from_secs(8);
/// HTTP attempts per send before the error propagates (the second
/// attempt reconnects first).
const HTTP_ATTEMPTS: u32 = 2;
/// Log every Nth consecutive send failure after the first.
const ERROR_LOG_STRIDE: u64 = 50;

/// Delay before the `attempt`-th reconnect (0-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.min(BACKOFF_CAP.as_millis().ilog2());
    BACKOFF_INITIAL
        .saturating_mul(1u32 << exp.min(16))
        .min(BACKOFF_CAP)
}

// ── Link state ───────────────────────────────────────────────────

/// Lifecycle of the producer's view of the panel link. Transitions
/// are explicit; an out-of-order call is a bug surfaced as an error
/// rather than silently tolerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Uninitialized,
    Resolving,
    Ready(SocketAddr),
    Failed,
}

impl LinkState {
    pub fn begin_resolve(&mut self) -> Result<(), GridcastError> {
        match self {
            LinkState::Uninitialized | LinkState::Failed => {
                *self = LinkState::Resolving;
                Ok(())
            }
            _ => Err(GridcastError::InvalidTransition("begin_resolve")),
        }
    }

    pub fn resolved(&mut self, addr: SocketAddr) -> Result<(), GridcastError> {
        match self {
            LinkState::Resolving => {
                *self = LinkState::Ready(addr);
                Ok(())
            }
            _ => Err(GridcastError::InvalidTransition("resolved")),
        }
    }

    /// Any state may fail.
    pub fn fail(&mut self) {
        *self = LinkState::Failed;
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LinkState::Ready(_))
    }
}

// ── Ownership ────────────────────────────────────────────────────

/// Whether this producer brought the host network up itself.
///
/// A producer embedded in a host that already runs networking must
/// not tear the stack down on exit; one that initialized it must.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetOwnership {
    /// Attached to an already-initialized network; leave it running.
    Borrowed,
    /// We initialized it; release on shutdown.
    Owned,
}

// ── Config ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Panel hostname or numeric address.
    pub host: String,
    pub port: u16,
    /// Send full frames as datagrams instead of HTTP posts.
    pub prefer_udp: bool,
    /// Reconnect attempts before giving up.
    pub connect_attempts: u32,
    pub ownership: NetOwnership,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "gridcast.local".into(),
            port: 8080,
            prefer_udp: true,
            connect_attempts: 10,
            ownership: NetOwnership::Borrowed,
        }
    }
}

// ── Resolution ───────────────────────────────────────────────────

/// Numeric address first, DNS second.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, GridcastError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| GridcastError::ResolveFailed(format!("{host}: {e}")))?;
    addrs
        .next()
        .ok_or_else(|| GridcastError::ResolveFailed(format!("{host}: no addresses")))
}

// ── PanelClient ──────────────────────────────────────────────────

/// What a successful send cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPath {
    Udp,
    Http,
    /// Nothing needed sending.
    Skipped,
}

/// A connected producer-side client.
#[derive(Debug)]
pub struct PanelClient {
    addr: SocketAddr,
    udp: Option<UdpSocket>,
    /// Kept-alive HTTP connection, re-established on demand.
    http: Option<TcpStream>,
    ownership: NetOwnership,
    consecutive_errors: u64,
}

impl PanelClient {
    /// Resolve and connect, retrying with doubling backoff up to
    /// `config.connect_attempts` times. The panel is probed over HTTP
    /// so a listening-but-wrong service fails here, not mid-stream.
    pub async fn connect(config: &TransportConfig) -> Result<Self, GridcastError> {
        let mut link = LinkState::Uninitialized;
        let mut attempt = 0u32;

        loop {
            link.begin_resolve()?;
            match Self::try_connect(config).await {
                Ok(mut client) => {
                    link.resolved(client.addr)?;
                    info!(addr = %client.addr, udp = config.prefer_udp, "panel link ready");
                    client.probe().await?;
                    return Ok(client);
                }
                Err(e) => {
                    link.fail();
                    attempt += 1;
                    if attempt >= config.connect_attempts {
                        warn!(error = %e, attempts = attempt, "giving up on panel");
                        return Err(GridcastError::ConnectExhausted { attempts: attempt });
                    }
                    let delay = backoff_delay(attempt - 1);
                    debug!(error = %e, ?delay, "connect failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_connect(config: &TransportConfig) -> Result<Self, GridcastError> {
        let addr = resolve(&config.host, config.port).await?;
        let udp = if config.prefer_udp {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(addr).await?;
            Some(socket)
        } else {
            None
        };
        Ok(Self {
            addr,
            udp,
            http: None,
            ownership: config.ownership,
            consecutive_errors: 0,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ownership(&self) -> NetOwnership {
        self.ownership
    }

    /// Verify the peer actually speaks the panel API.
    async fn probe(&mut self) -> Result<(), GridcastError> {
        let body = self.request("GET", "/api/status", &[]).await?;
        if body.windows(9).any(|w| w == b"\"running\"") {
            Ok(())
        } else {
            Err(GridcastError::PanelRejected(
                String::from_utf8_lossy(&body).into_owned(),
            ))
        }
    }

    /// Ship one encoder decision. UDP failures fall back to HTTP
    /// within the same call; HTTP failures propagate after the retry
    /// budget and are counted for sparse logging.
    pub async fn send(&mut self, outgoing: &Outgoing) -> Result<SendPath, GridcastError> {
        let result = match outgoing {
            Outgoing::Unchanged => return Ok(SendPath::Skipped),
            Outgoing::Full(frame) => self.send_full(frame).await,
            Outgoing::Delta(update) => {
                let body = wire::encode_delta(update);
                self.post("/api/delta", &body).await.map(|_| SendPath::Http)
            }
        };
        match result {
            Ok(path) => {
                self.consecutive_errors = 0;
                Ok(path)
            }
            Err(e) => {
                self.record_error(&e);
                Err(e)
            }
        }
    }

    async fn send_full(&mut self, frame: &Frame) -> Result<SendPath, GridcastError> {
        if let Some(udp) = &self.udp {
            match udp.send(frame.as_bytes()).await {
                Ok(_) => return Ok(SendPath::Udp),
                Err(e) => {
                    // Datagram path broke; the post below heals state.
                    debug!(error = %e, "udp send failed, falling back to http");
                }
            }
        }
        self.post("/api/frame", frame.as_bytes())
            .await
            .map(|_| SendPath::Http)
    }

    /// POST with keep-alive reuse and one reconnect retry. A `busy`
    /// reply is surfaced as [`GridcastError::PanelRejected`] so the
    /// caller can simply try again next frame.
    async fn post(&mut self, path: &str, body: &[u8]) -> Result<(), GridcastError> {
        let reply = self.request("POST", path, body).await?;
        if reply.windows(6).any(|w| w == b"\"busy\"") {
            return Err(GridcastError::PanelRejected("busy".into()));
        }
        Ok(())
    }

    async fn request(
        &mut self,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, GridcastError> {
        let mut last_err = None;
        for attempt in 0..HTTP_ATTEMPTS {
            // Reuse the kept-alive stream only on the first try; any
            // retry starts from a fresh connection.
            let reused = if attempt == 0 { self.http.take() } else { None };
            let mut stream = match reused {
                Some(s) => s,
                None => match TcpStream::connect(self.addr).await {
                    Ok(s) => s,
                    Err(e) => {
                        debug!(attempt, error = %e, "reconnect failed");
                        last_err = Some(e.into());
                        continue;
                    }
                },
            };
            match Self::roundtrip(&mut stream, method, path, body).await {
                Ok(reply) => {
                    self.http = Some(stream);
                    return Ok(reply);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "http request failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(GridcastError::ConnectExhausted {
            attempts: HTTP_ATTEMPTS,
        }))
    }

    async fn roundtrip(
        stream: &mut TcpStream,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, GridcastError> {
        let mut request = format!(
            "{method} {path} HTTP/1.1\r\n\
             Host: panel\r\n\
             Content-Type: application/octet-stream\r\n\
             Content-Length: {}\r\n\
             Connection: keep-alive\r\n\
             \r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(body);
        stream.write_all(&request).await?;

        read_response(stream).await
    }

    fn record_error(&mut self, error: &GridcastError) {
        self.consecutive_errors += 1;
        if self.consecutive_errors == 1 || self.consecutive_errors % ERROR_LOG_STRIDE == 0 {
            warn!(
                count = self.consecutive_errors,
                error = %error,
                "send to panel failing"
            );
        }
    }

    /// Drop the sockets. Only meaningful teardown beyond this happens
    /// in the pipeline, and only for an [`NetOwnership::Owned`] link.
    pub fn close(&mut self) {
        self.udp = None;
        self.http = None;
    }
}

/// Read one HTTP response: headers, then exactly `Content-Length`
/// body bytes. Returns the body.
async fn read_response(stream: &mut TcpStream) -> Result<Vec<u8>, GridcastError> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(GridcastError::Connection(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed mid-response",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > 16 * 1024 {
            return Err(GridcastError::MalformedRequest);
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]);
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(GridcastError::Connection(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed mid-body",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf[header_end..header_end + content_length].to_vec())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_state_happy_path() {
        let mut link = LinkState::Uninitialized;
        link.begin_resolve().unwrap();
        assert_eq!(link, LinkState::Resolving);
        let addr: SocketAddr = "10.0.0.2:8080".parse().unwrap();
        link.resolved(addr).unwrap();
        assert!(link.is_ready());
    }

    #[test]
    fn link_state_rejects_out_of_order() {
        let mut link = LinkState::Uninitialized;
        let addr: SocketAddr = "10.0.0.2:8080".parse().unwrap();
        assert!(matches!(
            link.resolved(addr),
            Err(GridcastError::InvalidTransition(_))
        ));

        let mut ready = LinkState::Ready(addr);
        assert!(ready.begin_resolve().is_err());
    }

    #[test]
    fn link_state_failed_can_retry() {
        let mut link = LinkState::Resolving;
        link.fail();
        assert_eq!(link, LinkState::Failed);
        link.begin_resolve().unwrap();
        assert_eq!(link, LinkState::Resolving);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(250));
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_secs(1));
        assert_eq!(backoff_delay(5), Duration::from_secs(8));
        assert_eq!(backoff_delay(30), BACKOFF_CAP);
        assert_eq!(backoff_delay(u32::MAX), BACKOFF_CAP);
    }

    #[tokio::test]
    async fn resolve_numeric_skips_dns() {
        let addr = resolve("192.168.1.20", 8080).await.unwrap();
        assert_eq!(addr, "192.168.1.20:8080".parse().unwrap());
        let v6 = resolve("::1", 80).await.unwrap();
        assert!(v6.ip().is_loopback());
    }

    #[tokio::test]
    async fn connect_exhausts_against_dead_port() {
        // TEST-NET-1 address; connects fail fast or resolve fails.
        let config = TransportConfig {
            host: "nonexistent.invalid".into(),
            connect_attempts: 2,
            prefer_udp: false,
            ..Default::default()
        };
        let err = PanelClient::connect(&config).await.unwrap_err();
        assert!(matches!(err, GridcastError::ConnectExhausted { attempts: 2 }));
    }
}
