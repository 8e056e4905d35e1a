//! JSON frame types for the control connection.
//!
//! One frame per WebSocket text message. Unknown `type` values and
//! malformed frames fail to parse; callers log and skip them rather than
//! dropping the connection.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single header value: HTTP allows repeated header names, so the wire
/// shape is either a bare string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    One(String),
    Many(Vec<String>),
}

/// Header map as carried on the wire.
pub type Headers = HashMap<String, HeaderValue>;

/// Flatten a header map into (name, value) pairs, expanding arrays.
pub fn header_pairs(headers: &Headers) -> impl Iterator<Item = (&str, &str)> {
    headers.iter().flat_map(|(name, value)| {
        let values: Vec<&str> = match value {
            HeaderValue::One(v) => vec![v.as_str()],
            HeaderValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        };
        values.into_iter().map(move |v| (name.as_str(), v))
    })
}

/// Control connection frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Client -> relay: claim a subdomain for this connection.
    Register { subdomain: String },

    /// Relay -> client: a forwarded HTTP request. No body is carried in
    /// the current shape; the field stays reserved on the wire.
    Request {
        #[serde(rename = "correlationId")]
        correlation_id: String,
        method: String,
        headers: Headers,
        url: String,
    },

    /// Client -> relay: the response for one forwarded request.
    /// `body` is standard base64.
    Response {
        #[serde(rename = "correlationId")]
        correlation_id: String,
        #[serde(rename = "statusCode")]
        status_code: u16,
        headers: Headers,
        body: String,
    },
}

impl Frame {
    /// Parse one frame from a text message.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(e.to_string()))
    }

    /// Serialize a frame for transmission.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Encode a response body for transport.
pub fn encode_body(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a transported response body.
pub fn decode_body(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text)
        .map_err(|e| Error::Protocol(format!("invalid base64 body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_frame_shape() {
        let frame = Frame::parse(r#"{"type":"register","subdomain":"foo"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Register {
                subdomain: "foo".into()
            }
        );
    }

    #[test]
    fn test_request_frame_field_names() {
        let frame = Frame::Request {
            correlation_id: "c1".into(),
            method: "GET".into(),
            headers: Headers::new(),
            url: "/x?q=1".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["correlationId"], "c1");
        assert_eq!(json["method"], "GET");
        assert_eq!(json["url"], "/x?q=1");
    }

    #[test]
    fn test_response_frame_round_trip() {
        let text = r#"{"type":"response","correlationId":"c2","statusCode":200,"headers":{"content-type":"text/plain"},"body":"aGVsbG8="}"#;
        let frame = Frame::parse(text).unwrap();
        match &frame {
            Frame::Response {
                correlation_id,
                status_code,
                body,
                ..
            } => {
                assert_eq!(correlation_id, "c2");
                assert_eq!(*status_code, 200);
                assert_eq!(decode_body(body).unwrap(), b"hello");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_header_string_or_array() {
        let text = r#"{"type":"response","correlationId":"c3","statusCode":204,"headers":{"x-one":"a","x-many":["b","c"]},"body":""}"#;
        let frame = Frame::parse(text).unwrap();
        let Frame::Response { headers, .. } = frame else {
            panic!("expected response");
        };
        let mut pairs: Vec<(String, String)> = header_pairs(&headers)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("x-many".to_string(), "b".to_string()),
                ("x-many".to_string(), "c".to_string()),
                ("x-one".to_string(), "a".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(Frame::parse(r#"{"type":"shutdown"}"#).is_err());
    }

    #[test]
    fn test_malformed_frame_rejected() {
        assert!(Frame::parse("not json at all").is_err());
        assert!(Frame::parse(r#"{"subdomain":"no-type"}"#).is_err());
    }

    #[test]
    fn test_body_transport() {
        assert_eq!(encode_body(b"hello"), "aGVsbG8=");
        assert_eq!(decode_body("aGVsbG8=").unwrap(), b"hello");
        assert!(decode_body("!!!").is_err());
    }
}
