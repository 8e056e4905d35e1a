//! Control connection acceptance and the per-channel pump.
//!
//! A client connects, sends a `register` frame claiming a subdomain, and
//! the connection becomes that subdomain's control channel. The protocol
//! is permissive: frames that are malformed or out of place are logged and
//! skipped, never grounds for dropping an otherwise-healthy tunnel.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use passage_shared::protocol::Frame;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::channel::ControlChannel;
use crate::tracker::{CorrelationTracker, ExchangeReply};
use crate::AppState;

/// Outbound frames queued per channel before backpressure applies.
const OUTBOUND_QUEUE: usize = 100;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // Registration handshake: wait for a `register` frame, skipping
    // anything else the client sends first.
    let subdomain = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                Ok(Frame::Register { subdomain }) if !subdomain.is_empty() => break subdomain,
                Ok(frame) => debug!("ignoring pre-registration frame: {:?}", frame),
                Err(e) => warn!("ignoring malformed frame: {}", e),
            },
            Some(Ok(Message::Ping(data))) => {
                if socket.send(Message::Pong(data)).await.is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!("control connection closed before registration");
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("websocket error before registration: {}", e);
                return;
            }
        }
    };

    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
    let channel = ControlChannel::new(subdomain.clone(), tx);
    match state.registry.register(subdomain.clone(), channel.clone()) {
        Some(old) => info!(
            "tunnel '{}' re-registered (channel {} replaces {})",
            subdomain,
            channel.id(),
            old.id()
        ),
        None => info!("tunnel '{}' registered (channel {})", subdomain, channel.id()),
    }

    let (mut sender, mut receiver) = socket.split();
    let mut keepalive = interval_at(
        Instant::now() + state.config.ping_interval,
        state.config.ping_interval,
    );

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    dispatch(channel.tracker(), &subdomain, &text);
                }
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("websocket error on '{}': {}", subdomain, e);
                    break;
                }
            },
            Some(frame) = rx.recv() => {
                let text = match frame.encode() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("dropping unencodable frame for '{}': {}", subdomain, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            },
            _ = keepalive.tick() => {
                // Keeps idle control connections warm through proxies and
                // free-tier idle timeouts.
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Wake every handler still waiting on this channel, then detach the
    // mapping unless a newer registration already replaced it.
    let cancelled = channel.tracker().cancel_all();
    if state.registry.remove_if_current(&subdomain, &channel) {
        info!(
            "tunnel '{}' closed ({} pending exchanges cancelled)",
            subdomain, cancelled
        );
    } else {
        info!(
            "stale channel {} for '{}' disconnected; newer registration kept",
            channel.id(),
            subdomain
        );
    }
}

/// Route one inbound text frame from a registered client. Only `response`
/// frames act on the tracker; everything else is logged and ignored.
fn dispatch(tracker: &CorrelationTracker, subdomain: &str, text: &str) {
    match Frame::parse(text) {
        Ok(Frame::Response {
            correlation_id,
            status_code,
            headers,
            body,
        }) => {
            tracker.resolve(
                &correlation_id,
                ExchangeReply {
                    status_code,
                    headers,
                    body,
                },
            );
        }
        Ok(frame) => debug!("ignoring frame on '{}': {:?}", subdomain, frame),
        Err(e) => warn!("malformed frame on '{}': {}", subdomain, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passage_shared::protocol::Headers;

    #[tokio::test]
    async fn test_dispatch_resolves_response_frames() {
        let tracker = CorrelationTracker::new();
        let id = tracker.next_id();
        let rx = tracker.register(&id);

        let frame = Frame::Response {
            correlation_id: id.clone(),
            status_code: 200,
            headers: Headers::new(),
            body: "aGVsbG8=".into(),
        };
        dispatch(&tracker, "foo", &frame.encode().unwrap());

        let reply = rx.await.unwrap();
        assert_eq!(reply.status_code, 200);
        assert_eq!(reply.body, "aGVsbG8=");
    }

    #[tokio::test]
    async fn test_dispatch_tolerates_junk() {
        let tracker = CorrelationTracker::new();
        let id = tracker.next_id();
        let rx = tracker.register(&id);

        // None of these may disturb the pending exchange.
        dispatch(&tracker, "foo", "not json");
        dispatch(&tracker, "foo", r#"{"type":"register","subdomain":"foo"}"#);
        dispatch(&tracker, "foo", r#"{"type":"mystery"}"#);
        dispatch(
            &tracker,
            "foo",
            r#"{"type":"response","correlationId":"unknown","statusCode":200,"headers":{},"body":""}"#,
        );

        assert_eq!(tracker.pending_count(), 1);
        drop(rx);
    }
}
