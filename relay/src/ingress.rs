//! Public-facing HTTP handler.
//!
//! Routes each inbound request by the first label of its Host header,
//! forwards it over the matching control channel, and renders whatever
//! comes back: the client's response, or the error status for this relay's
//! failure taxonomy (400 bad host, 404 unknown subdomain, 502 channel
//! gone, 504 exchange deadline).

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header::HOST, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
};
use hyper::header::{HeaderName, HeaderValue as HttpHeaderValue};
use passage_shared::protocol::{self, Frame, HeaderValue, Headers};
use passage_shared::Error;
use tokio::time::timeout;
use tracing::warn;

use crate::registry::Registry;
use crate::tracker::ExchangeReply;
use crate::AppState;

pub async fn proxy_handler(State(state): State<AppState>, req: Request<Body>) -> Response {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    let Some(subdomain) = subdomain_from_host(host) else {
        return error_response(&Error::BadRequest("missing or empty Host header".into()));
    };
    let subdomain = subdomain.to_string();

    let method = req.method().to_string();
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = wire_headers(req.headers());

    match forward(
        &state.registry,
        &subdomain,
        &method,
        headers,
        &url,
        state.config.exchange_timeout,
    )
    .await
    {
        Ok(reply) => render_reply(reply),
        Err(e) => {
            warn!("{} {} for '{}' failed: {}", method, url, subdomain, e);
            error_response(&e)
        }
    }
}

/// First label of the Host header, with any port stripped. Empty or
/// missing is a caller error, not a lookup.
pub(crate) fn subdomain_from_host(host: &str) -> Option<&str> {
    let host = host.split(':').next().unwrap_or(host);
    let label = host.split('.').next().unwrap_or("");
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

/// Drive one exchange: look up the channel, send the request frame, await
/// the correlated reply. Releases the pending slot on every path where no
/// reply will be delivered to it.
pub(crate) async fn forward(
    registry: &Registry,
    subdomain: &str,
    method: &str,
    headers: Headers,
    url: &str,
    deadline: Duration,
) -> Result<ExchangeReply, Error> {
    let channel = registry
        .lookup(subdomain)
        .ok_or_else(|| Error::NoSuchTunnel(subdomain.to_string()))?;

    let id = channel.tracker().next_id();
    let rx = channel.tracker().register(&id);

    let frame = Frame::Request {
        correlation_id: id.clone(),
        method: method.to_string(),
        headers,
        url: url.to_string(),
    };
    if let Err(e) = channel.send(frame).await {
        channel.tracker().release(&id);
        return Err(e);
    }

    match timeout(deadline, rx).await {
        Ok(Ok(reply)) => Ok(reply),
        // Sender dropped: the channel pump cancelled us on disconnect.
        Ok(Err(_)) => Err(Error::UpstreamUnavailable),
        Err(_) => {
            channel.tracker().release(&id);
            Err(Error::Timeout)
        }
    }
}

/// Collapse an http::HeaderMap into the wire shape, grouping repeated
/// names into arrays. Values that are not valid UTF-8 are skipped.
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

fn render_reply(reply: ExchangeReply) -> Response {
    let status = match StatusCode::from_u16(reply.status_code) {
        Ok(s) => s,
        Err(_) => {
            return error_response(&Error::Protocol(format!(
                "invalid upstream status {}",
                reply.status_code
            )))
        }
    };
    let body = match protocol::decode_body(&reply.body) {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let mut builder = hyper::Response::builder().status(status);
    if let Some(headers_mut) = builder.headers_mut() {
        for (name, value) in protocol::header_pairs(&reply.headers) {
            if let (Ok(n), Ok(v)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HttpHeaderValue::from_str(value),
            ) {
                headers_mut.append(n, v);
            }
        }
    }
    match builder.body(Body::from(body)) {
        Ok(resp) => resp.into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Response build error").into_response(),
    }
}

pub(crate) fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        Error::NoSuchTunnel(_) => StatusCode::NOT_FOUND,
        Error::ChannelClosed | Error::UpstreamUnavailable | Error::Protocol(_) => {
            StatusCode::BAD_GATEWAY
        }
        Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &Error) -> Response {
    (status_for(err), err.to_string()).into_response()
}
