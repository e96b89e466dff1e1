//! The response object exposed to edge functions and its state machine
//! (§4.4):
//!
//! ```text
//! init → (status|setHeaders)* → [write → streaming] | [send → buffered] | [redirect|rewrite|next → terminal] → finished
//!                                    ↓                     ↓
//!                                   end                   end
//! ```

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;

use crate::edge::HeaderMultiMap;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    None,
    Buffered,
    Streaming,
    Terminal,
}

/// A value passed to [`EdgeResponse::send`]: objects are JSON-encoded,
/// everything else is sent as plain text (§4.4).
#[derive(Debug, Clone)]
pub enum SendBody {
    Json(serde_json::Value),
    Text(String),
}

/// Options accepted by [`EdgeResponse::cookie`]/[`EdgeResponse::clear_cookie`].
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub max_age_ms: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
    pub domain: Option<String>,
}

/// A cookie value: a plain string, or a structured value JSON-encoded with
/// the `j:` prefix (§4.4, §6).
#[derive(Debug, Clone)]
pub enum CookieValue {
    Text(String),
    Json(serde_json::Value),
}

impl CookieValue {
    fn encode(&self) -> String {
        match self {
            CookieValue::Text(s) => s.clone(),
            CookieValue::Json(v) => format!("j:{}", v),
        }
    }
}

/// `EdgeResponseState` (§3, §4.4).
#[derive(Debug)]
pub struct EdgeResponse {
    pub headers: HeaderMultiMap,
    pub status_code: u16,
    pub body_mode: BodyMode,
    pub finished: bool,
    pub headers_sent: bool,
    committed: bool,
    buffered_body: Option<Bytes>,
    stream_tx: Option<mpsc::UnboundedSender<Bytes>>,
    stream_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl Default for EdgeResponse {
    fn default() -> Self {
        EdgeResponse {
            headers: HeaderMultiMap::new(),
            status_code: 200,
            body_mode: BodyMode::None,
            finished: false,
            headers_sent: false,
            committed: false,
            buffered_body: None,
            stream_tx: None,
            stream_rx: None,
        }
    }
}

impl EdgeResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// `status(code)`: sets status, failing if headers are already sent.
    pub fn status(&mut self, code: u16) -> Result<(), GatewayError> {
        if self.headers_sent {
            return Err(GatewayError::HeadersAlreadySent("status".to_string()));
        }
        self.status_code = code;
        Ok(())
    }

    /// `setHeaders`/header append: replaces all existing values for `name`.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), GatewayError> {
        if self.headers_sent {
            return Err(GatewayError::HeadersAlreadySent("set_header".to_string()));
        }
        let name = name.into();
        let value = apply_charset_default(&name, value.into());
        self.headers.set(name, value);
        Ok(())
    }

    /// Header append that never replaces (`Set-Cookie` always accumulates).
    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), GatewayError> {
        if self.headers_sent {
            return Err(GatewayError::HeadersAlreadySent("append_header".to_string()));
        }
        self.headers.append(name, value);
        Ok(())
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// `cookie(name, value, opts)`: encodes and appends a `Set-Cookie`.
    pub fn cookie(&mut self, name: &str, value: CookieValue, opts: &CookieOptions) -> Result<(), GatewayError> {
        let encoded = build_set_cookie(name, &value.encode(), opts);
        self.append_header("set-cookie", encoded)
    }

    /// `clearCookie(name, opts)`: expires the cookie immediately.
    pub fn clear_cookie(&mut self, name: &str, opts: &CookieOptions) -> Result<(), GatewayError> {
        let mut opts = opts.clone();
        opts.max_age_ms = Some(0);
        let encoded = build_set_cookie(name, "", &opts);
        self.append_header("set-cookie", encoded)
    }

    /// `write(chunk)`: enqueue into the streaming body. First call commits
    /// the response as streaming; calls after a different effect already
    /// committed are a no-op (first writer wins, §4.4).
    pub fn write(&mut self, chunk: Bytes) -> Result<(), GatewayError> {
        if self.finished {
            return Ok(());
        }
        if self.committed && self.body_mode != BodyMode::Streaming {
            return Ok(());
        }
        if self.body_mode == BodyMode::None {
            let (tx, rx) = mpsc::unbounded_channel();
            self.stream_tx = Some(tx);
            self.stream_rx = Some(rx);
            self.body_mode = BodyMode::Streaming;
            self.headers_sent = true;
            self.committed = true;
        }
        if let Some(tx) = &self.stream_tx {
            let _ = tx.send(chunk);
        }
        Ok(())
    }

    /// `send(data, headers?)`: buffered body. `is_head` suppresses the body
    /// per the HEAD/204/205/304 rule.
    pub fn send(&mut self, data: SendBody, is_head: bool) -> Result<(), GatewayError> {
        if self.finished || self.committed {
            return Ok(());
        }
        self.committed = true;
        self.body_mode = BodyMode::Buffered;
        self.headers_sent = true;

        let (bytes, content_type) = match data {
            SendBody::Json(value) => (Bytes::from(value.to_string()), "application/json"),
            SendBody::Text(text) => (Bytes::from(text), "text/plain"),
        };

        if !self.headers.contains("content-type") {
            let _ = self.set_header_unchecked("content-type", content_type);
        }

        let suppress = is_head || matches!(self.status_code, 204 | 205 | 304);
        if suppress {
            self.buffered_body = Some(Bytes::new());
        } else {
            let _ = self.set_header_unchecked("content-length", bytes.len().to_string());
            self.buffered_body = Some(bytes);
        }
        Ok(())
    }

    fn set_header_unchecked(&mut self, name: &str, value: impl Into<String>) {
        let value = apply_charset_default(name, value.into());
        self.headers.set(name, value);
    }

    /// `redirect(url)` / `redirect(status, url)`: default status 302.
    pub fn redirect(&mut self, status: Option<u16>, url: &str) -> Result<(), GatewayError> {
        if self.finished || self.committed {
            return Ok(());
        }
        self.committed = true;
        self.finished = true;
        self.body_mode = BodyMode::Terminal;
        self.status_code = status.unwrap_or(302);
        self.headers.set("x-nextjs-redirect", url);
        if self.status_code == 308 {
            self.headers.set("refresh", format!("0;url={}", url));
        }
        Ok(())
    }

    /// `rewrite(url)`.
    pub fn rewrite(&mut self, url: &str) -> Result<(), GatewayError> {
        if self.finished || self.committed {
            return Ok(());
        }
        self.committed = true;
        self.finished = true;
        self.body_mode = BodyMode::Terminal;
        self.headers.set("x-nextjs-rewrite", url);
        Ok(())
    }

    /// `next()`: yields to the next edge function in the chain.
    pub fn next(&mut self) -> Result<(), GatewayError> {
        if self.finished || self.committed {
            return Ok(());
        }
        self.committed = true;
        self.finished = true;
        self.body_mode = BodyMode::Terminal;
        self.headers.set("x-nextjs-next", "1");
        Ok(())
    }

    /// `end(data?)`: terminal transition. Fails if the response already
    /// finished (second call).
    pub fn end(&mut self, data: Option<Bytes>) -> Result<(), GatewayError> {
        if self.finished {
            return Err(GatewayError::HeadersAlreadySent("end".to_string()));
        }
        if let Some(data) = data {
            if self.body_mode == BodyMode::None {
                self.buffered_body = Some(data);
                self.body_mode = BodyMode::Buffered;
            } else if self.body_mode == BodyMode::Streaming {
                self.write(data)?;
            }
        }
        self.headers_sent = true;
        self.finished = true;
        Ok(())
    }

    pub fn buffered_body(&self) -> Option<&Bytes> {
        self.buffered_body.as_ref()
    }

    pub fn take_stream(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.stream_rx.take()
    }

    pub fn is_streaming(&self) -> bool {
        self.body_mode == BodyMode::Streaming
    }

    pub fn sentinel_rewrite(&self) -> Option<&str> {
        self.headers.get("x-nextjs-rewrite")
    }

    pub fn sentinel_redirect(&self) -> Option<&str> {
        self.headers.get("x-nextjs-redirect")
    }

    pub fn sentinel_next(&self) -> bool {
        self.headers.contains("x-nextjs-next")
    }

    /// Preflight short-circuit (§4.6): 200, accumulated headers, empty
    /// body, regardless of whatever effect the chain already committed.
    pub fn apply_preflight(&mut self) {
        self.status_code = 200;
        self.body_mode = BodyMode::Buffered;
        self.buffered_body = Some(Bytes::new());
        self.headers_sent = true;
        self.finished = true;
    }

    pub fn set_functions_count(&mut self, count: u32) {
        self.headers.set("x-nextjs-functions", count.to_string());
    }

    /// An internal rewrite hands the response back to a fresh round of
    /// matching (§4.6): the accumulated headers survive, but the
    /// commit/terminal state resets so the next invocation can write or end.
    pub fn reset_for_internal_rewrite(&mut self) {
        self.committed = false;
        self.finished = false;
        self.body_mode = BodyMode::None;
        self.headers_sent = false;
    }
}

/// `location(url)` helper: `"back"` resolves to `Referer` or `/`.
pub fn resolve_location(url: &str, referer: Option<&str>) -> String {
    if url == "back" {
        referer.unwrap_or("/").to_string()
    } else {
        url.to_string()
    }
}

fn default_charset_for(media_type: &str) -> Option<&'static str> {
    let base = media_type.split(';').next().unwrap_or(media_type).trim().to_ascii_lowercase();
    match base.as_str() {
        "text/html" | "text/plain" | "text/css" | "text/javascript" | "application/javascript"
        | "application/json" | "application/xml" | "text/xml" => Some("utf-8"),
        _ => None,
    }
}

fn apply_charset_default(header_name: &str, value: String) -> String {
    if !header_name.eq_ignore_ascii_case("content-type") {
        return value;
    }
    if value.to_ascii_lowercase().contains("charset=") {
        return value;
    }
    match default_charset_for(&value) {
        Some(charset) => format!("{}; charset={}", value, charset),
        None => value,
    }
}

fn build_set_cookie(name: &str, value: &str, opts: &CookieOptions) -> String {
    let mut out = format!("{}={}", name, value);
    let path = opts.path.as_deref().unwrap_or("/");
    out.push_str(&format!("; Path={}", path));

    if let Some(max_age_ms) = opts.max_age_ms {
        let max_age_secs = max_age_ms / 1000;
        out.push_str(&format!("; Max-Age={}", max_age_secs));
        let expires = Utc::now() + ChronoDuration::milliseconds(max_age_ms);
        out.push_str(&format!("; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT")));
    }
    if let Some(domain) = &opts.domain {
        out.push_str(&format!("; Domain={}", domain));
    }
    if let Some(same_site) = &opts.same_site {
        out.push_str(&format!("; SameSite={}", same_site));
    }
    if opts.http_only {
        out.push_str("; HttpOnly");
    }
    if opts.secure {
        out.push_str("; Secure");
    }
    out
}
