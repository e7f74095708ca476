//! Canonical traffic record types.
//!
//! One [`TrafficEntry`] is produced per completed request/response exchange.
//! Field names serialise in camelCase so the presentation layer sees the same
//! JSON shape for live events and stored entries.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single header. Repeated wire headers are coalesced into one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    /// Creates a header from a name and value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Transfer encoding of a body's `text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Base64,
}

impl BodyEncoding {
    /// Parses a HAR encoding string. Unknown encodings are treated as plain text.
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("base64") {
            Some(BodyEncoding::Base64)
        } else {
            None
        }
    }

    /// Returns the wire name of this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyEncoding::Base64 => "base64",
        }
    }
}

/// A request or response payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<BodyEncoding>,
}

impl Body {
    /// Creates a plain-text body.
    pub fn text(mime_type: Option<String>, text: impl Into<String>) -> Self {
        Self {
            mime_type,
            text: Some(text.into()),
            encoding: None,
        }
    }

    /// Length of the body text in bytes (0 when absent).
    pub fn size(&self) -> usize {
        self.text.as_deref().map(str::len).unwrap_or(0)
    }
}

/// The request half of an exchange. `url` is always absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The response half of an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    pub headers: Vec<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
}

/// One complete captured exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficEntry {
    pub id: Uuid,
    /// Completion time in epoch milliseconds.
    pub timestamp: i64,
    pub request: TrafficRequest,
    pub response: TrafficResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irrelevant: Option<bool>,
}

impl TrafficEntry {
    /// Creates an entry with a fresh id.
    pub fn new(timestamp: i64, request: TrafficRequest, response: TrafficResponse) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            request,
            response,
            irrelevant: None,
        }
    }

    /// Returns true unless an analysis pass marked this entry irrelevant.
    pub fn is_relevant(&self) -> bool {
        self.irrelevant != Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> TrafficEntry {
        TrafficEntry::new(
            1_700_000_000_000,
            TrafficRequest {
                method: "GET".to_string(),
                url: "https://api.example.com/users".to_string(),
                headers: vec![Header::new("accept", "application/json")],
                body: None,
                description: None,
            },
            TrafficResponse {
                status: 200,
                status_text: Some("OK".to_string()),
                headers: vec![],
                body: Some(Body::text(
                    Some("application/json".to_string()),
                    r#"{"id":1}"#,
                )),
            },
        )
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(sample_entry()).unwrap();
        assert_eq!(json["response"]["statusText"], "OK");
        assert_eq!(json["response"]["body"]["mimeType"], "application/json");
        assert!(json.get("irrelevant").is_none());
    }

    #[test]
    fn encoding_serializes_lowercase() {
        let body = Body {
            mime_type: None,
            text: Some("aGk=".to_string()),
            encoding: Some(BodyEncoding::Base64),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["encoding"], "base64");
    }

    #[test]
    fn relevance_defaults_to_true() {
        let mut entry = sample_entry();
        assert!(entry.is_relevant());
        entry.irrelevant = Some(false);
        assert!(entry.is_relevant());
        entry.irrelevant = Some(true);
        assert!(!entry.is_relevant());
    }

    #[test]
    fn fresh_ids_are_unique() {
        assert_ne!(sample_entry().id, sample_entry().id);
    }

    #[test]
    fn body_size_counts_bytes() {
        assert_eq!(Body::default().size(), 0);
        assert_eq!(Body::text(None, "héllo").size(), 6);
    }
}
