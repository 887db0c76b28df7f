//! UI Broadcast (C5, spec §4.5).
//!
//! A single-producer / many-subscriber fan-out: every [`UiEvent`] published by
//! the orchestrator is delivered to each connected subscriber in order, with
//! best-effort, skip-not-block semantics. Subscribers also push inbound
//! tagged records (`user_action`, `ping`) back toward the orchestrator.
//!
//! Transport is an `axum` websocket route — `WebSocketUpgrade` into a split
//! sink/stream duplex loop — the same shape as the groblegark-style bridge
//! pattern used elsewhere in the ecosystem for this kind of fan-out, since
//! the teacher's own API surface is REST-only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::fsm::UiUpdate;

pub type SubscriberId = u64;

/// Outbound envelope sent to every subscriber (spec §6 UI protocol).
///
/// `Ping`/`Pong` carry an empty object payload rather than being unit
/// variants so the wire frame is exactly `{"type":"ping","data":{}}` /
/// `{"type":"pong","data":{}}` per spec §6 — a unit variant under
/// `#[serde(tag = "type", content = "data")]` serializes with no `data`
/// key at all, which a client expecting `.data` would read as `undefined`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    UiUpdate(UiUpdate),
    Ping(serde_json::Value),
    Pong(serde_json::Value),
}

impl OutboundMessage {
    fn ping() -> Self {
        Self::Ping(serde_json::json!({}))
    }

    fn pong() -> Self {
        Self::Pong(serde_json::json!({}))
    }
}

/// Inbound tagged record from a subscriber (spec §4.5 / §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    UserAction { data: UserActionPayload },
    Ping { data: serde_json::Value },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserActionPayload {
    pub action: String,
    pub intent_id: Option<String>,
}

/// An inbound event routed to the orchestrator, tagged with the subscriber
/// it came from (not part of the wire format — added by the broadcaster).
#[derive(Debug, Clone)]
pub enum InboundEvent {
    UserAction(UserActionPayload),
    Pong(SubscriberId),
}

struct Subscriber {
    tx: mpsc::Sender<OutboundMessage>,
}

/// Shared broadcaster state. Cheap to clone (`Arc`-backed).
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

struct BroadcasterInner {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    /// Last time each subscriber was heard from, used to enforce the
    /// heartbeat response deadline (spec §4.5 / §6 "ping timeout 10 s").
    last_seen: RwLock<HashMap<SubscriberId, Instant>>,
    next_id: AtomicU64,
    inbound_tx: mpsc::Sender<InboundEvent>,
    channel_capacity: usize,
}

impl Broadcaster {
    pub fn new(channel_capacity: usize) -> (Self, mpsc::Receiver<InboundEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(channel_capacity);
        let broadcaster = Self {
            inner: Arc::new(BroadcasterInner {
                subscribers: RwLock::new(HashMap::new()),
                last_seen: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                inbound_tx,
                channel_capacity,
            }),
        };
        (broadcaster, inbound_rx)
    }

    async fn add_subscriber(&self) -> (SubscriberId, mpsc::Receiver<OutboundMessage>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.channel_capacity);
        self.inner.subscribers.write().await.insert(id, Subscriber { tx });
        self.inner.last_seen.write().await.insert(id, Instant::now());
        (id, rx)
    }

    async fn remove_subscriber(&self, id: SubscriberId) {
        self.inner.subscribers.write().await.remove(&id);
        self.inner.last_seen.write().await.remove(&id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }

    /// Publish a UI Update to every connected subscriber. Best-effort: a
    /// subscriber whose channel is full is logged and skipped, never
    /// blocking the producer (spec §4.5).
    pub async fn publish(&self, update: UiUpdate) {
        let subscribers = self.inner.subscribers.read().await;
        for (id, sub) in subscribers.iter() {
            match sub.tx.try_send(OutboundMessage::UiUpdate(update.clone())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber_id = id, "subscriber channel full, skipping update");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber_id = id, "subscriber channel closed");
                }
            }
        }
    }

    /// Mark a subscriber as having responded, resetting its heartbeat
    /// deadline (spec §4.5). Called by the orchestrator whenever an inbound
    /// frame attributable to that subscriber arrives.
    pub async fn record_pong(&self, id: SubscriberId) {
        self.inner.last_seen.write().await.insert(id, Instant::now());
    }

    /// Drop every subscriber that hasn't been heard from within `timeout` of
    /// the last heartbeat, then send a fresh ping to everyone still
    /// connected. Returns the ids dropped for the deadline miss (spec §4.5:
    /// "a subscriber that fails the deadline is dropped").
    pub async fn reap_and_ping(&self, timeout: Duration) -> Vec<SubscriberId> {
        let now = Instant::now();
        let stale: Vec<SubscriberId> = self
            .inner
            .last_seen
            .read()
            .await
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            warn!(subscriber_id = id, "subscriber missed heartbeat deadline, dropping");
            self.remove_subscriber(*id).await;
        }

        let subscribers = self.inner.subscribers.read().await;
        for sub in subscribers.values() {
            let _ = sub.tx.try_send(OutboundMessage::ping());
        }

        stale
    }

    pub async fn drop_subscriber(&self, id: SubscriberId) {
        self.remove_subscriber(id).await;
    }
}

/// State shared by the websocket route: the broadcaster itself plus the
/// process-wide shutdown signal so every open connection tears down on the
/// same cancellation (spec §5, C5 torn down before the C1 monitors).
#[derive(Clone)]
pub struct RouterState {
    pub broadcaster: Broadcaster,
    pub shutdown: CancellationToken,
}

pub fn router(broadcaster: Broadcaster, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(RouterState { broadcaster, shutdown })
}

async fn ws_handler(State(state): State<RouterState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RouterState) {
    let RouterState { broadcaster, shutdown } = state;
    let (id, mut outbound_rx) = broadcaster.add_subscriber().await;
    let (mut ws_tx, mut ws_rx) = socket.split();
    let inbound_tx = broadcaster.inner.inbound_tx.clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            msg = outbound_rx.recv() => {
                match msg {
                    Some(out) => {
                        let Ok(text) = serde_json::to_string(&out) else { continue };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match route_inbound(&text, id, &inbound_tx).await {
                            Some(RouteOutcome::RepliesPong) => {
                                let Ok(pong) = serde_json::to_string(&OutboundMessage::pong()) else { continue };
                                if ws_tx.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                            None => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    broadcaster.drop_subscriber(id).await;
}

enum RouteOutcome {
    RepliesPong,
}

/// Parse and route one inbound text frame (spec §4.5 / §6). A client `ping`
/// both feeds subscriber liveness tracking and gets an immediate `pong` reply
/// — the two purposes are independent, so both happen here.
async fn route_inbound(
    text: &str,
    subscriber_id: SubscriberId,
    tx: &mpsc::Sender<InboundEvent>,
) -> Option<RouteOutcome> {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(InboundMessage::UserAction { data }) => {
            let _ = tx.send(InboundEvent::UserAction(data)).await;
            None
        }
        Ok(InboundMessage::Ping { .. }) => {
            let _ = tx.send(InboundEvent::Pong(subscriber_id)).await;
            Some(RouteOutcome::RepliesPong)
        }
        Err(e) => {
            warn!(error = %e, "unrecognized inbound message type, dropping");
            None
        }
    }
}

/// Heartbeat loop: every `interval`, drops any subscriber that hasn't been
/// heard from within `timeout` and pings everyone still connected (spec
/// §4.5: "a subscriber that fails the deadline is dropped").
pub async fn run_heartbeat(
    broadcaster: Broadcaster,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                broadcaster.reap_and_ping(timeout).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_registers_and_unregisters() {
        let (broadcaster, _rx) = Broadcaster::new(8);
        let (id, _outbound_rx) = broadcaster.add_subscriber().await;
        assert_eq!(broadcaster.subscriber_count().await, 1);
        broadcaster.drop_subscriber(id).await;
        assert_eq!(broadcaster.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let (broadcaster, _rx) = Broadcaster::new(8);
        let (_id1, mut rx1) = broadcaster.add_subscriber().await;
        let (_id2, mut rx2) = broadcaster.add_subscriber().await;

        let update = UiUpdate {
            state: crate::fsm::State::Suggesting,
            emotion: crate::fsm::Emotion::Curious,
            visible: true,
            bubble: None,
        };
        broadcaster.publish(update).await;

        assert!(matches!(
            rx1.recv().await,
            Some(OutboundMessage::UiUpdate(_))
        ));
        assert!(matches!(
            rx2.recv().await,
            Some(OutboundMessage::UiUpdate(_))
        ));
    }

    #[tokio::test]
    async fn user_action_routes_to_inbound_channel() {
        let (broadcaster, mut inbound_rx) = Broadcaster::new(8);
        let tx = broadcaster.inner.inbound_tx.clone();
        route_inbound(r#"{"type":"user_action","data":{"action":"Dismiss","intent_id":null}}"#, 1, &tx)
            .await;

        match inbound_rx.recv().await {
            Some(InboundEvent::UserAction(payload)) => assert_eq!(payload.action, "Dismiss"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_routes_to_pong_event() {
        let (broadcaster, mut inbound_rx) = Broadcaster::new(8);
        let tx = broadcaster.inner.inbound_tx.clone();
        route_inbound(r#"{"type":"ping","data":{}}"#, 7, &tx).await;

        match inbound_rx.recv().await {
            Some(InboundEvent::Pong(id)) => assert_eq!(id, 7),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_message_type_is_dropped_without_panicking() {
        let (broadcaster, mut inbound_rx) = Broadcaster::new(8);
        let tx = broadcaster.inner.inbound_tx.clone();
        route_inbound(r#"{"type":"unknown","data":{}}"#, 1, &tx).await;
        assert!(inbound_rx.try_recv().is_err());
    }

    #[test]
    fn pong_serializes_with_explicit_empty_data_object() {
        let wire = serde_json::to_string(&OutboundMessage::pong()).unwrap();
        assert_eq!(wire, r#"{"type":"pong","data":{}}"#);
    }

    #[test]
    fn ping_serializes_with_explicit_empty_data_object() {
        let wire = serde_json::to_string(&OutboundMessage::ping()).unwrap();
        assert_eq!(wire, r#"{"type":"ping","data":{}}"#);
    }

    #[tokio::test]
    async fn reap_and_ping_drops_subscribers_past_the_deadline() {
        let (broadcaster, _rx) = Broadcaster::new(8);
        let (stale_id, _stale_rx) = broadcaster.add_subscriber().await;
        let (fresh_id, _fresh_rx) = broadcaster.add_subscriber().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        broadcaster.record_pong(fresh_id).await;

        let dropped = broadcaster.reap_and_ping(Duration::from_millis(10)).await;
        assert_eq!(dropped, vec![stale_id]);
        assert_eq!(broadcaster.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn reap_and_ping_keeps_subscribers_within_the_deadline() {
        let (broadcaster, _rx) = Broadcaster::new(8);
        let (_id, _outbound_rx) = broadcaster.add_subscriber().await;

        let dropped = broadcaster.reap_and_ping(Duration::from_secs(10)).await;
        assert!(dropped.is_empty());
        assert_eq!(broadcaster.subscriber_count().await, 1);
    }
}
