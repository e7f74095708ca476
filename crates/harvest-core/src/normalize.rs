//! Header and body normalisation.
//!
//! Converts wire-level header maps and raw byte chunks into the canonical
//! [`Header`] and [`Body`] structures.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::{HeaderMap, Uri};

use crate::model::{Body, BodyEncoding, Header};

/// Default cap on buffered body bytes per message (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Number of leading bytes inspected by the binary heuristic.
const BINARY_SNIFF_LEN: usize = 512;

/// Converts a header map into one [`Header`] per distinct name.
///
/// Names keep their first-seen order; repeated values are joined with `,`.
pub fn normalize_headers(map: &HeaderMap) -> Vec<Header> {
    map.keys()
        .map(|name| {
            let value = map
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(",");
            Header::new(name.as_str(), value)
        })
        .collect()
}

/// Returns the `content-type` value, matched case-insensitively.
pub fn content_type(headers: &[Header]) -> Option<String> {
    header_value(headers, "content-type").map(str::to_string)
}

/// Looks up a header value by case-insensitive name.
pub fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Builds a body from the full accumulated payload.
///
/// Returns `None` for an empty payload. Never fails: undecodable bytes are
/// either Base64-encoded (binary) or converted lossily (text).
pub fn build_body(mime_type: Option<String>, bytes: &[u8]) -> Option<Body> {
    if bytes.is_empty() {
        return None;
    }

    match std::str::from_utf8(bytes) {
        Ok(text) if is_base64(text) => Some(Body {
            mime_type,
            text: Some(text.to_string()),
            encoding: Some(BodyEncoding::Base64),
        }),
        Ok(text) => Some(Body::text(mime_type, text)),
        Err(_) if looks_binary(bytes) => Some(Body {
            mime_type,
            text: Some(STANDARD.encode(bytes)),
            encoding: Some(BodyEncoding::Base64),
        }),
        Err(_) => Some(Body::text(
            mime_type,
            String::from_utf8_lossy(bytes).into_owned(),
        )),
    }
}

/// Returns true if `text` is a well-formed standard Base64 string.
pub fn is_base64(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.len() % 4 != 0 {
        return false;
    }
    let alphabet_ok = trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='));
    alphabet_ok && STANDARD.decode(trimmed).is_ok()
}

/// Heuristic: the leading bytes contain NUL or are more than 10% control bytes.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    if sniff.contains(&0) {
        return true;
    }
    let control = sniff
        .iter()
        .filter(|&&b| (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r')) || b == 0x7f)
        .count();
    control * 10 > sniff.len()
}

/// Rebuilds an absolute URL for an intercepted request.
///
/// The scheme comes from the URI when present, otherwise from the TLS flag.
/// The host comes from the `Host` header, falling back to the URI authority.
pub fn reconstruct_url(tls: bool, host_header: Option<&str>, uri: &Uri) -> String {
    let scheme = uri
        .scheme_str()
        .unwrap_or(if tls { "https" } else { "http" });
    let host = host_header
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.as_str().to_string()));
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    match host {
        Some(host) => format!("{}://{}{}", scheme, host, path),
        None => uri.to_string(),
    }
}

/// Bounded accumulator for streamed body chunks.
#[derive(Debug, Clone)]
pub struct BodyBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BodyBuffer {
    /// Creates an empty buffer holding at most `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Appends a chunk, dropping whatever exceeds the limit.
    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            if !self.truncated {
                tracing::warn!(
                    "Body exceeds {} bytes, truncating captured payload",
                    self.limit
                );
            }
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    /// Whether any bytes were dropped.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing has been buffered.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the buffered bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for BodyBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BODY_BYTES)
    }
}
