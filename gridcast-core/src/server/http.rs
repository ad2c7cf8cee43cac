//! Sans-I/O HTTP connection state machine.
//!
//! Each TCP connection owns one [`Connection`]. The socket driver
//! translates socket activity into [`ConnEvent`]s; the machine returns
//! [`ConnAction`]s for the driver to perform. No socket types appear
//! here, so the full request lifecycle — accumulation, parsing,
//! dispatch, chunked send, keep-alive, idle timeout — is testable with
//! plain byte buffers.

use std::net::IpAddr;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::server::routes::{self, Reply, Request};
use crate::server::PanelContext;

/// Hard cap on accumulated request bytes. Beyond this the body is
/// truncated and the request dispatched with whatever arrived.
pub const MAX_REQUEST_SIZE: usize = 16 * 1024;

/// Idle [`ConnEvent::Timer`] ticks (one per poll interval) before a
/// kept-alive connection is closed.
pub const KEEPALIVE_TIMEOUT_POLLS: u32 = 10;

/// Largest single write handed to the driver. Big static bodies cross
/// the socket as a sequence of these.
pub const SEND_CHUNK: usize = 2048;

// ── Events and actions ───────────────────────────────────────────

/// Socket activity, as reported by the driver.
#[derive(Debug)]
pub enum ConnEvent {
    /// Bytes arrived from the peer.
    Data(Bytes),
    /// The previously issued [`ConnAction::Send`] was fully written.
    SentComplete,
    /// One poll interval elapsed with the connection open.
    Timer,
    /// The peer closed the connection.
    Closed,
    /// The socket reported an error; no more events will follow.
    Error,
}

/// Work for the driver to perform, in order.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnAction {
    /// Write these bytes, then report [`ConnEvent::SentComplete`].
    Send(Bytes),
    /// Close the connection and stop delivering events.
    Close,
}

// ── Connection state ─────────────────────────────────────────────

/// An in-flight response being streamed chunk by chunk.
#[derive(Debug)]
struct SendState {
    data: Bytes,
    offset: usize,
    /// Close instead of returning to keep-alive once fully sent.
    then_close: bool,
}

impl SendState {
    fn next_chunk(&mut self) -> Option<Bytes> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = (self.offset + SEND_CHUNK).min(self.data.len());
        let chunk = self.data.slice(self.offset..end);
        self.offset = end;
        Some(chunk)
    }
}

#[derive(Debug)]
enum ConnState {
    /// Accumulating request bytes.
    Receiving,
    /// Response queued; waiting on send completions.
    Sending(SendState),
    /// Close issued; all further events are ignored.
    Done,
}

/// Per-connection request/response machine.
#[derive(Debug)]
pub struct Connection {
    peer: IpAddr,
    state: ConnState,
    buf: BytesMut,
    idle_polls: u32,
    /// Set once the accumulation cap was hit for the current request.
    truncated: bool,
}

impl Connection {
    pub fn new(peer: IpAddr) -> Self {
        Self {
            peer,
            state: ConnState::Receiving,
            buf: BytesMut::new(),
            idle_polls: 0,
            truncated: false,
        }
    }

    /// Advance the machine by one event.
    pub fn handle(&mut self, ctx: &PanelContext, event: ConnEvent) -> Vec<ConnAction> {
        if matches!(self.state, ConnState::Done) {
            return Vec::new();
        }
        match event {
            ConnEvent::Data(bytes) => self.on_data(ctx, bytes),
            ConnEvent::SentComplete => self.on_sent(ctx),
            ConnEvent::Timer => self.on_timer(),
            ConnEvent::Closed | ConnEvent::Error => {
                self.state = ConnState::Done;
                Vec::new()
            }
        }
    }

    fn on_data(&mut self, ctx: &PanelContext, bytes: Bytes) -> Vec<ConnAction> {
        self.idle_polls = 0;

        // Cap accumulation; keep what fits and remember the overflow.
        let room = MAX_REQUEST_SIZE.saturating_sub(self.buf.len());
        if bytes.len() > room {
            self.buf.extend_from_slice(&bytes[..room]);
            self.truncated = true;
            warn!(peer = %self.peer, "request exceeded size cap, truncating");
        } else {
            self.buf.extend_from_slice(&bytes);
        }

        if matches!(self.state, ConnState::Sending(_)) {
            // Pipelined bytes wait until the current response drains.
            return Vec::new();
        }
        self.try_dispatch(ctx)
    }

    fn on_sent(&mut self, ctx: &PanelContext) -> Vec<ConnAction> {
        let ConnState::Sending(send) = &mut self.state else {
            return Vec::new();
        };
        if let Some(chunk) = send.next_chunk() {
            return vec![ConnAction::Send(chunk)];
        }
        if send.then_close {
            self.state = ConnState::Done;
            return vec![ConnAction::Close];
        }
        // Keep-alive: ready for the next request, which may already be
        // sitting in the buffer.
        self.state = ConnState::Receiving;
        self.truncated = false;
        self.try_dispatch(ctx)
    }

    fn on_timer(&mut self) -> Vec<ConnAction> {
        self.idle_polls += 1;
        if self.idle_polls > KEEPALIVE_TIMEOUT_POLLS {
            debug!(peer = %self.peer, "closing idle connection");
            self.state = ConnState::Done;
            return vec![ConnAction::Close];
        }
        Vec::new()
    }

    // ── Request handling ─────────────────────────────────────────

    /// Parse and dispatch if a complete request is buffered.
    fn try_dispatch(&mut self, ctx: &PanelContext) -> Vec<ConnAction> {
        let parsed = match parse_request(&self.buf, self.truncated) {
            ParseOutcome::Incomplete => return Vec::new(),
            ParseOutcome::Malformed => {
                warn!(peer = %self.peer, "malformed request");
                return self.queue(
                    response(
                        "400 Bad Request",
                        "application/json",
                        br#"{"status":"error","message":"bad request"}"#,
                        false,
                    ),
                    true,
                );
            }
            ParseOutcome::Complete(req) => req,
        };

        let keep_alive = parsed.keep_alive;
        let consumed = parsed.consumed;
        trace!(peer = %self.peer, method = %parsed.method, path = %parsed.path, "request");

        // CORS preflight is answered before routing.
        if parsed.method == "OPTIONS" {
            let _ = self.buf.split_to(consumed);
            return self.queue(preflight_response(keep_alive), !keep_alive);
        }

        let reply = {
            let req = Request {
                method: &parsed.method,
                path: &parsed.path,
                body: &self.buf[parsed.body_start..parsed.body_start + parsed.body_len],
                peer: self.peer,
            };
            routes::dispatch(ctx, &req)
        };
        let _ = self.buf.split_to(consumed);

        match reply {
            Reply::Json { body } => self.queue(
                response("200 OK", "application/json", body.as_bytes(), keep_alive),
                !keep_alive,
            ),
            Reply::Static { content_type, body } => {
                // Large fixed bodies always close when done; the
                // streaming send would otherwise pin the buffer.
                self.queue(response("200 OK", content_type, body, false), true)
            }
            Reply::NotFound => self.queue(
                response("404 Not Found", "text/plain", b"not found", false),
                true,
            ),
        }
    }

    /// Stage `data` for chunked sending and emit the first chunk.
    fn queue(&mut self, data: Bytes, then_close: bool) -> Vec<ConnAction> {
        let mut send = SendState {
            data,
            offset: 0,
            then_close,
        };
        match send.next_chunk() {
            Some(chunk) => {
                self.state = ConnState::Sending(send);
                vec![ConnAction::Send(chunk)]
            }
            None => {
                // Empty response body cannot happen with our builders,
                // but close rather than wedge if it ever does.
                self.state = ConnState::Done;
                vec![ConnAction::Close]
            }
        }
    }
}

// ── Request parsing ──────────────────────────────────────────────

#[derive(Debug)]
struct ParsedRequest {
    method: String,
    path: String,
    body_start: usize,
    body_len: usize,
    /// Total bytes this request occupies in the buffer.
    consumed: usize,
    keep_alive: bool,
}

enum ParseOutcome {
    Incomplete,
    Malformed,
    Complete(ParsedRequest),
}

fn parse_request(buf: &[u8], truncated: bool) -> ParseOutcome {
    let Some(header_end) = find_header_end(buf) else {
        // No header terminator yet. Once the cap is hit nothing more
        // will arrive, so a header that never completes is malformed.
        return if truncated {
            ParseOutcome::Malformed
        } else {
            ParseOutcome::Incomplete
        };
    };

    let Ok(head) = std::str::from_utf8(&buf[..header_end]) else {
        return ParseOutcome::Malformed;
    };
    let mut lines = head.split("\r\n");
    let Some(request_line) = lines.next() else {
        return ParseOutcome::Malformed;
    };
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return ParseOutcome::Malformed;
    };
    if !version.starts_with("HTTP/") {
        return ParseOutcome::Malformed;
    }

    let mut content_length = 0usize;
    // HTTP/1.1 defaults to keep-alive; a Connection header overrides.
    let mut keep_alive = version == "HTTP/1.1";
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().unwrap_or(0);
        } else if name.eq_ignore_ascii_case("connection") {
            keep_alive = value.eq_ignore_ascii_case("keep-alive");
        }
    }

    let body_start = header_end + 4;
    let available = buf.len().saturating_sub(body_start);
    if available < content_length {
        if truncated {
            // Best effort: the peer declared more than the cap allows.
            // Dispatch what we have; the handler will reject a short
            // frame body on its own terms. No keep-alive — the rest of
            // the declared body would be misread as a new request.
            return ParseOutcome::Complete(ParsedRequest {
                method: method.to_string(),
                path: path.to_string(),
                body_start,
                body_len: available,
                consumed: buf.len(),
                keep_alive: false,
            });
        }
        return ParseOutcome::Incomplete;
    }

    ParseOutcome::Complete(ParsedRequest {
        method: method.to_string(),
        path: path.to_string(),
        body_start,
        body_len: content_length,
        consumed: body_start + content_length,
        keep_alive,
    })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

// ── Response building ────────────────────────────────────────────

fn response(status: &str, content_type: &str, body: &[u8], keep_alive: bool) -> Bytes {
    let connection = if keep_alive { "keep-alive" } else { "close" };
    let mut out = BytesMut::with_capacity(160 + body.len());
    out.extend_from_slice(
        format!(
            "HTTP/1.1 {status}\r\n\
             Content-Type: {content_type}\r\n\
             Content-Length: {}\r\n\
             Connection: {connection}\r\n\
             Access-Control-Allow-Origin: *\r\n\
             \r\n",
            body.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(body);
    out.freeze()
}

fn preflight_response(keep_alive: bool) -> Bytes {
    let connection = if keep_alive { "keep-alive" } else { "close" };
    Bytes::from(format!(
        "HTTP/1.1 204 No Content\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: 0\r\n\
         Connection: {connection}\r\n\
         \r\n"
    ))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_SIZE;
    use crate::server::gate::BootloaderGate;

    fn ctx() -> PanelContext {
        PanelContext::new(BootloaderGate::localhost_only())
    }

    fn conn() -> Connection {
        Connection::new("127.0.0.1".parse().unwrap())
    }

    fn drain(conn: &mut Connection, ctx: &PanelContext, mut actions: Vec<ConnAction>) -> (Vec<u8>, bool) {
        // Plays the driver: acknowledge every send, collect bytes.
        let mut wire = Vec::new();
        let mut closed = false;
        while let Some(action) = actions.first() {
            match action {
                ConnAction::Send(chunk) => {
                    wire.extend_from_slice(chunk);
                    actions = conn.handle(ctx, ConnEvent::SentComplete);
                }
                ConnAction::Close => {
                    closed = true;
                    break;
                }
            }
        }
        (wire, closed)
    }

    fn post(path: &str, body: &[u8]) -> Bytes {
        let mut req = format!(
            "POST {path} HTTP/1.1\r\nHost: panel\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        req.extend_from_slice(body);
        Bytes::from(req)
    }

    #[test]
    fn full_frame_post_accepted_and_kept_alive() {
        let ctx = ctx();
        let mut c = conn();
        let body = vec![7u8; FRAME_SIZE];

        let actions = c.handle(&ctx, ConnEvent::Data(post("/api/frame", &body)));
        let (wire, closed) = drain(&mut c, &ctx, actions);
        let text = String::from_utf8_lossy(&wire);

        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains(r#"{"status":"ok"}"#));
        assert!(text.contains("Connection: keep-alive"));
        assert!(!closed);
        assert!(ctx.store.has_pending());
    }

    #[test]
    fn request_split_across_reads() {
        let ctx = ctx();
        let mut c = conn();
        let full = post("/api/status", &[]);

        // First half: no complete request yet.
        let actions = c.handle(&ctx, ConnEvent::Data(full.slice(..10)));
        assert!(actions.is_empty());

        let actions = c.handle(&ctx, ConnEvent::Data(full.slice(10..)));
        let (wire, _) = drain(&mut c, &ctx, actions);
        assert!(String::from_utf8_lossy(&wire).contains(r#""status":"running""#));
    }

    #[test]
    fn two_requests_on_one_connection() {
        let ctx = ctx();
        let mut c = conn();

        let actions = c.handle(&ctx, ConnEvent::Data(post("/api/status", &[])));
        let (_, closed) = drain(&mut c, &ctx, actions);
        assert!(!closed);

        let actions = c.handle(
            &ctx,
            ConnEvent::Data(post("/api/brightness", br#"{"value":0.25}"#)),
        );
        let (wire, closed) = drain(&mut c, &ctx, actions);
        assert!(String::from_utf8_lossy(&wire).contains(r#"{"status":"ok"}"#));
        assert!(!closed);
        assert_eq!(ctx.brightness.take_pending(), Some(0.25));
    }

    #[test]
    fn pipelined_second_request_served_after_first_drains() {
        let ctx = ctx();
        let mut c = conn();
        let mut both = post("/api/status", &[]).to_vec();
        both.extend_from_slice(&post("/api/reboot", &[]));

        let actions = c.handle(&ctx, ConnEvent::Data(Bytes::from(both)));
        let (wire, closed) = drain(&mut c, &ctx, actions);
        let text = String::from_utf8_lossy(&wire);

        assert!(text.contains(r#""status":"running""#));
        assert!(text.contains(r#""status":"rebooting""#));
        assert!(!closed);
        assert!(ctx.reboot.pending());
    }

    #[test]
    fn connection_close_honored() {
        let ctx = ctx();
        let mut c = conn();
        let req = Bytes::from_static(
            b"GET /api/status HTTP/1.1\r\nHost: p\r\nConnection: close\r\n\r\n",
        );
        let actions = c.handle(&ctx, ConnEvent::Data(req));
        let (wire, closed) = drain(&mut c, &ctx, actions);
        assert!(String::from_utf8_lossy(&wire).contains("Connection: close"));
        assert!(closed);
    }

    #[test]
    fn http10_defaults_to_close() {
        let ctx = ctx();
        let mut c = conn();
        let req = Bytes::from_static(b"GET /api/status HTTP/1.0\r\n\r\n");
        let actions = c.handle(&ctx, ConnEvent::Data(req));
        let (_, closed) = drain(&mut c, &ctx, actions);
        assert!(closed);
    }

    #[test]
    fn malformed_request_line_gets_400_and_close() {
        let ctx = ctx();
        let mut c = conn();
        let actions = c.handle(&ctx, ConnEvent::Data(Bytes::from_static(b"garbage\r\n\r\n")));
        let (wire, closed) = drain(&mut c, &ctx, actions);
        assert!(String::from_utf8_lossy(&wire).starts_with("HTTP/1.1 400"));
        assert!(closed);
    }

    #[test]
    fn unknown_path_gets_404_and_close() {
        let ctx = ctx();
        let mut c = conn();
        let actions = c.handle(&ctx, ConnEvent::Data(post("/api/missing", &[])));
        let (wire, closed) = drain(&mut c, &ctx, actions);
        assert!(String::from_utf8_lossy(&wire).starts_with("HTTP/1.1 404"));
        assert!(closed);
    }

    #[test]
    fn options_preflight_answered_without_routing() {
        let ctx = ctx();
        let mut c = conn();
        let req = Bytes::from_static(b"OPTIONS /api/frame HTTP/1.1\r\nHost: p\r\n\r\n");
        let actions = c.handle(&ctx, ConnEvent::Data(req));
        let (wire, closed) = drain(&mut c, &ctx, actions);
        let text = String::from_utf8_lossy(&wire);
        assert!(text.starts_with("HTTP/1.1 204"));
        assert!(text.contains("Access-Control-Allow-Methods"));
        assert!(!closed);
        assert!(!ctx.store.has_pending());
    }

    #[test]
    fn idle_timeout_closes_after_poll_budget() {
        let ctx = ctx();
        let mut c = conn();
        for _ in 0..KEEPALIVE_TIMEOUT_POLLS {
            assert!(c.handle(&ctx, ConnEvent::Timer).is_empty());
        }
        assert_eq!(c.handle(&ctx, ConnEvent::Timer), vec![ConnAction::Close]);
        // A dead connection ignores further events.
        assert!(c.handle(&ctx, ConnEvent::Timer).is_empty());
    }

    #[test]
    fn data_resets_idle_budget() {
        let ctx = ctx();
        let mut c = conn();
        for _ in 0..KEEPALIVE_TIMEOUT_POLLS {
            c.handle(&ctx, ConnEvent::Timer);
        }
        let actions = c.handle(&ctx, ConnEvent::Data(post("/api/status", &[])));
        let (_, closed) = drain(&mut c, &ctx, actions);
        assert!(!closed);
        assert!(c.handle(&ctx, ConnEvent::Timer).is_empty());
    }

    #[test]
    fn socket_error_silences_machine() {
        let ctx = ctx();
        let mut c = conn();
        assert!(c.handle(&ctx, ConnEvent::Error).is_empty());
        let late = c.handle(&ctx, ConnEvent::Data(post("/api/status", &[])));
        assert!(late.is_empty());
        assert!(!ctx.store.has_pending());
    }

    #[test]
    fn oversized_request_truncated_and_dispatched() {
        let ctx = ctx();
        let mut c = conn();
        // Declares far more body than the cap allows. 0xFF fill makes
        // the truncated prefix decode as an absurd delta count.
        let huge = vec![0xFFu8; MAX_REQUEST_SIZE * 2];
        let actions = c.handle(&ctx, ConnEvent::Data(post("/api/delta", &huge)));
        let (wire, closed) = drain(&mut c, &ctx, actions);
        let text = String::from_utf8_lossy(&wire);
        // Truncated delta decodes as invalid; connection closes since
        // the remaining declared body cannot be trusted.
        assert!(text.contains("invalid delta") || text.contains("error"));
        assert!(closed);
    }

    #[test]
    fn landing_page_streamed_in_bounded_chunks() {
        let ctx = ctx();
        let mut c = conn();
        let req = Bytes::from_static(b"GET / HTTP/1.1\r\nHost: p\r\n\r\n");

        let mut actions = c.handle(&ctx, ConnEvent::Data(req));
        let mut chunks = 0usize;
        let mut total = Vec::new();
        let closed = loop {
            match actions.first() {
                Some(ConnAction::Send(chunk)) => {
                    assert!(chunk.len() <= SEND_CHUNK);
                    chunks += 1;
                    total.extend_from_slice(chunk);
                    actions = c.handle(&ctx, ConnEvent::SentComplete);
                }
                Some(ConnAction::Close) => break true,
                None => break false,
            }
        };
        assert!(closed);
        assert!(chunks > 1, "landing page should need several chunks");
        let text = String::from_utf8_lossy(&total);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("gridcast"));
    }

    #[test]
    fn busy_store_reported_over_http() {
        let ctx = ctx();
        let body = vec![0u8; FRAME_SIZE];

        let mut c1 = conn();
        let actions = c1.handle(&ctx, ConnEvent::Data(post("/api/frame", &body)));
        drain(&mut c1, &ctx, actions);

        let mut c2 = conn();
        let actions = c2.handle(&ctx, ConnEvent::Data(post("/api/frame", &body)));
        let (wire, _) = drain(&mut c2, &ctx, actions);
        assert!(String::from_utf8_lossy(&wire).contains(r#"{"status":"busy"}"#));
    }
}
