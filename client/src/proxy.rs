//! Forwarding of tunneled requests to the local service.

use std::collections::HashMap;

use passage_shared::protocol::{self, header_pairs, Frame, HeaderValue, Headers};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue as HttpHeaderValue};
use tracing::warn;

/// Execute one forwarded request against the local service and build the
/// response frame. A failure to reach the service becomes a 502 frame, so
/// the public caller always gets an answer instead of a relay timeout.
pub async fn execute(
    http: &reqwest::Client,
    local_port: u16,
    correlation_id: String,
    method: &str,
    headers: &Headers,
    url: &str,
) -> Frame {
    match forward(http, local_port, method, headers, url).await {
        Ok((status_code, headers, body)) => Frame::Response {
            correlation_id,
            status_code,
            headers,
            body: protocol::encode_body(&body),
        },
        Err(e) => {
            warn!("local forward of {} {} failed: {}", method, url, e);
            Frame::Response {
                correlation_id,
                status_code: 502,
                headers: Headers::new(),
                body: protocol::encode_body(
                    format!("passage: local service unreachable: {e}").as_bytes(),
                ),
            }
        }
    }
}

async fn forward(
    http: &reqwest::Client,
    local_port: u16,
    method: &str,
    headers: &Headers,
    url: &str,
) -> anyhow::Result<(u16, Headers, Vec<u8>)> {
    let method = reqwest::Method::from_bytes(method.as_bytes())?;
    let target = format!("http://127.0.0.1:{local_port}{url}");

    let response = http
        .request(method, &target)
        .headers(request_headers(headers))
        .send()
        .await?;

    let status_code = response.status().as_u16();
    let headers = wire_headers(response.headers());
    let body = response.bytes().await?.to_vec();
    Ok((status_code, headers, body))
}

/// Carry the forwarded headers over to the local request. Host and
/// content-length describe the original hop, not this one.
fn request_headers(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in header_pairs(headers) {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HttpHeaderValue::from_str(value),
        ) {
            map.append(n, v);
        }
    }
    map
}

/// Collapse the local response's headers into the wire shape, grouping
/// repeated names into arrays.
fn wire_headers(map: &HeaderMap) -> Headers {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in map {
        if let Ok(v) = value.to_str() {
            grouped
                .entry(name.as_str().to_string())
                .or_default()
                .push(v.to_string());
        }
    }
    grouped
        .into_iter()
        .map(|(name, mut values)| {
            let value = if values.len() == 1 {
                HeaderValue::One(values.remove(0))
            } else {
                HeaderValue::Many(values)
            };
            (name, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers_skip_hop_fields() {
        let headers = Headers::from([
            ("Host".to_string(), HeaderValue::One("foo.example.com".into())),
            ("Content-Length".to_string(), HeaderValue::One("12".into())),
            ("X-Token".to_string(), HeaderValue::One("abc".into())),
            (
                "Accept".to_string(),
                HeaderValue::Many(vec!["text/html".into(), "application/json".into()]),
            ),
        ]);
        let map = request_headers(&headers);
        assert!(map.get("host").is_none());
        assert!(map.get("content-length").is_none());
        assert_eq!(map.get("x-token").unwrap(), "abc");
        assert_eq!(map.get_all("accept").iter().count(), 2);
    }

    #[test]
    fn test_wire_headers_group_repeats() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", HttpHeaderValue::from_static("a=1"));
        map.append("set-cookie", HttpHeaderValue::from_static("b=2"));
        map.insert("content-type", HttpHeaderValue::from_static("text/plain"));

        let wire = wire_headers(&map);
        assert_eq!(
            wire.get("set-cookie"),
            Some(&HeaderValue::Many(vec!["a=1".into(), "b=2".into()]))
        );
        assert_eq!(
            wire.get("content-type"),
            Some(&HeaderValue::One("text/plain".into()))
        );
    }

    #[tokio::test]
    async fn test_unreachable_service_becomes_502_frame() {
        let http = reqwest::Client::new();
        let frame = execute(&http, 1, "c1".into(), "GET", &Headers::new(), "/").await;
        let Frame::Response {
            correlation_id,
            status_code,
            body,
            ..
        } = frame
        else {
            panic!("expected response frame");
        };
        assert_eq!(correlation_id, "c1");
        assert_eq!(status_code, 502);
        assert!(!protocol::decode_body(&body).unwrap().is_empty());
    }
}
