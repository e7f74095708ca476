//! HAR 1.2 codec.
//!
//! [`to_har`] is a total mapping from stored entries to a HAR document;
//! [`from_har`] is its inverse and regenerates ids. A malformed document or
//! one without `log.entries` is rejected as a whole, but a missing or
//! unparseable `startedDateTime` on one entry falls back to the current time.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HarError;
use crate::model::{Body, BodyEncoding, Header, TrafficEntry, TrafficRequest, TrafficResponse};

/// HAR format version written on export.
pub const HAR_VERSION: &str = "1.2";

/// Creator name written on export.
pub const CREATOR_NAME: &str = "harvest";

const HTTP_VERSION: &str = "HTTP/1.1";

/// Top-level HAR object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

/// HAR log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarLog {
    #[serde(default = "default_har_version")]
    pub version: String,
    #[serde(default)]
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

/// Creator information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

/// One request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    /// ISO-8601 string on export; anything is accepted on import.
    #[serde(default)]
    pub started_date_time: serde_json::Value,
    #[serde(default)]
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    #[serde(default)]
    pub cache: serde_json::Value,
    #[serde(default)]
    pub timings: HarTimings,
}

/// HAR header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

/// Query string parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarQueryParam {
    pub name: String,
    pub value: String,
}

/// Request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// HAR request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    #[serde(default = "default_http_version")]
    pub http_version: String,
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,
    #[serde(default)]
    pub headers: Vec<HarHeader>,
    #[serde(default)]
    pub query_string: Vec<HarQueryParam>,
    #[serde(default, alias = "body", skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
    #[serde(default = "unknown_size")]
    pub headers_size: i64,
    #[serde(default = "unknown_size")]
    pub body_size: i64,
    /// Free-form request description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// HAR response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default = "default_http_version")]
    pub http_version: String,
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,
    #[serde(default)]
    pub headers: Vec<HarHeader>,
    #[serde(default)]
    pub content: Option<HarContent>,
    #[serde(default, rename = "redirectURL")]
    pub redirect_url: String,
    #[serde(default = "unknown_size")]
    pub headers_size: i64,
    #[serde(default = "unknown_size")]
    pub body_size: i64,
}

/// Phase timings. Captured traffic does not record them, so all are zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarTimings {
    #[serde(default)]
    pub send: f64,
    #[serde(default)]
    pub wait: f64,
    #[serde(default)]
    pub receive: f64,
}

fn default_har_version() -> String {
    HAR_VERSION.to_string()
}

fn default_http_version() -> String {
    HTTP_VERSION.to_string()
}

fn unknown_size() -> i64 {
    -1
}

/// Formats epoch millis as RFC 3339 with millisecond precision.
pub fn format_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Local date-time layouts accepted when the value carries no offset.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses an ISO-8601 timestamp, falling back to now.
///
/// Values without an offset are read as UTC.
pub fn parse_timestamp(value: &str) -> i64 {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return parsed.timestamp_millis();
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return naive.and_utc().timestamp_millis();
        }
    }

    tracing::warn!("Unparseable startedDateTime {:?}, using now", value);
    Utc::now().timestamp_millis()
}

fn entry_timestamp(value: &serde_json::Value) -> i64 {
    match value.as_str() {
        Some(text) => parse_timestamp(text),
        None => {
            tracing::warn!("Missing startedDateTime ({}), using now", value);
            Utc::now().timestamp_millis()
        }
    }
}

fn to_har_headers(headers: &[Header]) -> Vec<HarHeader> {
    headers
        .iter()
        .map(|h| HarHeader {
            name: h.name.clone(),
            value: h.value.clone(),
        })
        .collect()
}

fn from_har_headers(headers: Vec<HarHeader>) -> Vec<Header> {
    headers
        .into_iter()
        .map(|h| Header::new(h.name, h.value))
        .collect()
}

fn query_string(url: &str) -> Vec<HarQueryParam> {
    let Some((_, query)) = url.split_once('?') else {
        return Vec::new();
    };
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            HarQueryParam {
                name: name.to_string(),
                value: value.to_string(),
            }
        })
        .collect()
}

fn to_har_entry(entry: &TrafficEntry) -> HarEntry {
    let request = &entry.request;
    let response = &entry.response;

    let post_data = request.body.as_ref().map(|body| HarPostData {
        mime_type: body.mime_type.clone(),
        text: body.text.clone(),
        encoding: body.encoding.map(|e| e.as_str().to_string()),
    });
    let request_body_size = request.body.as_ref().map(Body::size).unwrap_or(0) as i64;

    let content = response.body.as_ref().map_or_else(
        || HarContent {
            size: 0,
            mime_type: None,
            text: None,
            encoding: None,
        },
        |body| HarContent {
            size: body.size() as i64,
            mime_type: body.mime_type.clone(),
            text: body.text.clone(),
            encoding: body.encoding.map(|e| e.as_str().to_string()),
        },
    );
    let response_body_size = content.size;

    HarEntry {
        started_date_time: serde_json::Value::String(format_timestamp(entry.timestamp)),
        time: 0.0,
        request: HarRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            http_version: default_http_version(),
            cookies: Vec::new(),
            headers: to_har_headers(&request.headers),
            query_string: query_string(&request.url),
            post_data,
            headers_size: unknown_size(),
            body_size: request_body_size,
            comment: request.description.clone(),
        },
        response: HarResponse {
            status: response.status,
            status_text: response.status_text.clone().unwrap_or_default(),
            http_version: default_http_version(),
            cookies: Vec::new(),
            headers: to_har_headers(&response.headers),
            content: Some(content),
            redirect_url: String::new(),
            headers_size: unknown_size(),
            body_size: response_body_size,
        },
        cache: serde_json::Value::Object(Default::default()),
        timings: HarTimings::default(),
    }
}

fn from_har_entry(entry: HarEntry) -> TrafficEntry {
    let HarEntry {
        started_date_time,
        request,
        response,
        ..
    } = entry;

    let request_body = request.post_data.and_then(|data| {
        if data.text.is_none() && data.mime_type.is_none() {
            return None;
        }
        Some(Body {
            mime_type: data.mime_type,
            text: data.text,
            encoding: data.encoding.as_deref().and_then(BodyEncoding::parse),
        })
    });

    let response_body = response.content.and_then(|content| {
        content.text.as_ref()?;
        Some(Body {
            mime_type: content.mime_type,
            text: content.text,
            encoding: content.encoding.as_deref().and_then(BodyEncoding::parse),
        })
    });

    TrafficEntry::new(
        entry_timestamp(&started_date_time),
        TrafficRequest {
            method: request.method,
            url: request.url,
            headers: from_har_headers(request.headers),
            body: request_body,
            description: request.comment,
        },
        TrafficResponse {
            status: response.status,
            status_text: Some(response.status_text).filter(|s| !s.is_empty()),
            headers: from_har_headers(response.headers),
            body: response_body,
        },
    )
}

/// Converts entries to a HAR document, preserving order.
pub fn to_har(entries: &[TrafficEntry]) -> Har {
    Har {
        log: HarLog {
            version: default_har_version(),
            creator: HarCreator {
                name: CREATOR_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            entries: entries.iter().map(to_har_entry).collect(),
        },
    }
}

/// Converts a HAR document back into entries with fresh ids.
pub fn from_har(har: Har) -> Vec<TrafficEntry> {
    har.log.entries.into_iter().map(from_har_entry).collect()
}

/// Serialises a HAR document as 2-space indented JSON.
pub fn to_pretty_json(har: &Har) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(har)
}

/// Parses a HAR document, rejecting it whole on any error.
pub fn parse_har(json: &str) -> Result<Har, HarError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let log = value.get("log").ok_or(HarError::MissingLog)?;
    if !log.get("entries").is_some_and(serde_json::Value::is_array) {
        return Err(HarError::MissingEntries);
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(method: &str, url: &str, status: u16, body: Option<Body>) -> TrafficEntry {
        TrafficEntry::new(
            1_700_000_000_123,
            TrafficRequest {
                method: method.to_string(),
                url: url.to_string(),
                headers: vec![Header::new("host", "api.x.com")],
                body: None,
                description: None,
            },
            TrafficResponse {
                status,
                status_text: Some("OK".to_string()),
                headers: vec![Header::new("content-type", "application/json")],
                body,
            },
        )
    }

    #[test]
    fn document_shape() {
        let har = to_har(&[entry("GET", "https://api.x.com/users", 200, None)]);
        let json = serde_json::to_value(&har).unwrap();

        assert_eq!(json["log"]["version"], "1.2");
        assert_eq!(json["log"]["creator"]["name"], "harvest");
        let first = &json["log"]["entries"][0];
        assert_eq!(first["startedDateTime"], "2023-11-14T22:13:20.123Z");
        assert_eq!(first["request"]["method"], "GET");
        assert_eq!(first["response"]["content"]["size"], 0);
        assert!(first["response"]["redirectURL"].is_string());
    }

    #[test]
    fn response_body_nests_under_content_with_size() {
        let body = Body::text(Some("application/json".to_string()), r#"{"id":1}"#);
        let har = to_har(&[entry("GET", "https://api.x.com/users", 200, Some(body))]);
        let content = har.log.entries[0].response.content.clone().unwrap();
        assert_eq!(content.size, 8);
        assert_eq!(content.text.as_deref(), Some(r#"{"id":1}"#));
        assert_eq!(content.mime_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn round_trip_preserves_exchanges() {
        let mut post = entry("POST", "https://api.x.com/users?team=a&x", 201, None);
        post.request.body = Some(Body {
            mime_type: Some("application/octet-stream".to_string()),
            text: Some("AAEC".to_string()),
            encoding: Some(BodyEncoding::Base64),
        });
        post.request.description = Some("create user".to_string());
        let originals = vec![
            entry(
                "GET",
                "https://api.x.com/users",
                200,
                Some(Body::text(Some("application/json".to_string()), r#"{"id":1}"#)),
            ),
            post,
        ];

        let json = to_pretty_json(&to_har(&originals)).unwrap();
        let restored = from_har(parse_har(&json).unwrap());

        assert_eq!(restored.len(), originals.len());
        for (before, after) in originals.iter().zip(&restored) {
            assert_eq!(before.request, after.request);
            assert_eq!(before.response, after.response);
            assert_eq!(before.timestamp, after.timestamp);
            assert_ne!(before.id, after.id);
        }
    }

    #[test]
    fn query_string_is_exported() {
        let har = to_har(&[entry("GET", "https://x/a?b=1&c", 200, None)]);
        let params = &har.log.entries[0].request.query_string;
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "b");
        assert_eq!(params[0].value, "1");
        assert_eq!(params[1].name, "c");
    }

    #[test]
    fn bad_timestamp_falls_back_to_now() {
        let json = r#"{"log":{"version":"1.2","creator":{"name":"x","version":"1"},"entries":[
            {"startedDateTime":"yesterday","request":{"method":"GET","url":"https://x/"},
             "response":{"status":204}}]}"#;
        let before = Utc::now().timestamp_millis();
        let entries = from_har(parse_har(json).unwrap());
        assert_eq!(entries.len(), 1);
        assert!(entries[0].timestamp >= before);
        assert_eq!(entries[0].response.status_text, None);
    }

    #[test]
    fn missing_timestamp_keeps_rest_of_import() {
        let json = r#"{"log":{"version":"1.2","creator":{"name":"x","version":"1"},"entries":[
            {"request":{"method":"GET","url":"https://x/a"},"response":{"status":200}},
            {"startedDateTime":null,"request":{"method":"GET","url":"https://x/b"},
             "response":{"status":200}},
            {"startedDateTime":"2024-01-01T00:00:00.000Z",
             "request":{"method":"POST","url":"https://x/c"},"response":{"status":201}}]}"#;
        let before = Utc::now().timestamp_millis();
        let entries = from_har(parse_har(json).unwrap());

        assert_eq!(entries.len(), 3);
        assert!(entries[0].timestamp >= before);
        assert!(entries[1].timestamp >= before);
        assert_eq!(entries[2].request.url, "https://x/c");
        assert_eq!(entries[2].timestamp, 1_704_067_200_000);
    }

    #[test]
    fn timestamps_without_offset_are_utc() {
        assert_eq!(parse_timestamp("2024-01-01T00:00:00.000"), 1_704_067_200_000);
        assert_eq!(parse_timestamp("2024-01-01T00:00:01"), 1_704_067_201_000);
        assert_eq!(parse_timestamp("2024-01-01 00:00:00.250"), 1_704_067_200_250);
        assert_eq!(parse_timestamp("2024-01-01T02:00:00+02:00"), 1_704_067_200_000);
    }

    #[test]
    fn request_body_key_is_accepted() {
        let json = r#"{"log":{"version":"1.2","creator":{"name":"x","version":"1"},"entries":[
            {"startedDateTime":"2024-01-01T00:00:00.000Z",
             "request":{"method":"POST","url":"https://x/","headers":[],
                        "body":{"mimeType":"text/plain","text":"hi"}},
             "response":{"status":200,"headers":[],"content":{"size":0}}}]}"#;
        let entries = from_har(parse_har(json).unwrap());
        let body = entries[0].request.body.clone().unwrap();
        assert_eq!(body.text.as_deref(), Some("hi"));
        assert!(entries[0].response.body.is_none());
        assert_eq!(entries[0].timestamp, 1_704_067_200_000);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(matches!(parse_har("not json"), Err(HarError::Json(_))));
        assert!(matches!(parse_har("{}"), Err(HarError::MissingLog)));
        assert!(matches!(
            parse_har(r#"{"log":{}}"#),
            Err(HarError::MissingEntries)
        ));
        assert!(matches!(
            parse_har(r#"{"log":{"entries":{}}}"#),
            Err(HarError::MissingEntries)
        ));
    }

    #[test]
    fn pretty_json_uses_two_space_indent() {
        let json = to_pretty_json(&to_har(&[])).unwrap();
        assert!(json.starts_with("{\n  \"log\": {\n    \""));
    }
}
