use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

use super::api::SharedState;
use super::models::*;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    VehicleCreated {
        vehicle: Vehicle,
    },
    VehicleUpdated {
        vehicle: Vehicle,
    },
    VehicleStatusChanged {
        vehicle_id: String,
        owner_id: String,
        from: VehicleStatus,
        to: VehicleStatus,
    },
    RepairProgress {
        vehicle_id: String,
        owner_id: String,
        position: i32,
        progress: f64,
    },
    UserRegistered {
        user_id: String,
    },
}

impl WsMessage {
    /// The user this event concerns, used for per-owner subscriptions.
    pub fn owner_id(&self) -> &str {
        match self {
            WsMessage::VehicleCreated { vehicle } | WsMessage::VehicleUpdated { vehicle } => {
                &vehicle.owner_id
            }
            WsMessage::VehicleStatusChanged { owner_id, .. }
            | WsMessage::RepairProgress { owner_id, .. } => owner_id,
            WsMessage::UserRegistered { user_id } => user_id,
        }
    }
}

/// A serialized message on the broadcast channel, tagged with its owner so
/// sockets can filter without re-parsing.
#[derive(Debug, Clone)]
pub struct WsEvent {
    pub owner_id: String,
    pub payload: String,
}

pub type WsSender = broadcast::Sender<WsEvent>;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Only forward events about this user's records.
    pub owner: Option<String>,
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let rx = state.ws_tx.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx, query.owner))
}

async fn handle_socket(
    socket: WebSocket,
    rx: broadcast::Receiver<WsEvent>,
    owner: Option<String>,
) {
    let (sender, receiver) = socket.split();
    tracing::debug!(owner = owner.as_deref().unwrap_or("*"), "live subscriber connected");
    run_socket_loop(sender, receiver, rx, owner).await;
    tracing::debug!("live subscriber disconnected");
}

fn should_forward(event: &WsEvent, owner: Option<&str>) -> bool {
    match owner {
        Some(owner) => event.owner_id == owner,
        None => true,
    }
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards broadcast events (optionally filtered to one owner), answers
/// client frames, and drops the connection if no Pong arrives within
/// [`PONG_TIMEOUT`] of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<WsEvent>,
    owner: Option<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !should_forward(&event, owner.as_deref()) {
                            continue;
                        }
                        if sender.send(Message::Text(event.payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "live subscriber lagged behind");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to all connected subscribers.
/// Returns silently even if nobody is listening.
pub fn broadcast_message(tx: &WsSender, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(payload) => {
            let _ = tx.send(WsEvent {
                owner_id: msg.owner_id().to_string(),
                payload,
            });
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize live update");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vehicle() -> Vehicle {
        Vehicle {
            id: "veh-1".to_string(),
            owner_id: "user-1".to_string(),
            owner_email: None,
            model: "Renault Clio".to_string(),
            license_plate: "5678 TAB".to_string(),
            status: VehicleStatus::Pending,
            version: 1,
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
            paid_at: None,
            repairs: vec![],
        }
    }

    #[test]
    fn test_vehicle_created_serialization() {
        let msg = WsMessage::VehicleCreated {
            vehicle: sample_vehicle(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"VehicleCreated\""));
        assert!(json.contains("\"data\""));
        assert!(json.contains("\"model\":\"Renault Clio\""));
    }

    #[test]
    fn test_status_changed_serialization() {
        let msg = WsMessage::VehicleStatusChanged {
            vehicle_id: "veh-1".to_string(),
            owner_id: "user-1".to_string(),
            from: VehicleStatus::Repairing,
            to: VehicleStatus::Ready,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"VehicleStatusChanged\""));
        assert!(json.contains("\"from\":\"repairing\""));
        assert!(json.contains("\"to\":\"ready\""));
    }

    #[test]
    fn test_owner_id_for_each_message() {
        let created = WsMessage::VehicleCreated {
            vehicle: sample_vehicle(),
        };
        assert_eq!(created.owner_id(), "user-1");

        let progress = WsMessage::RepairProgress {
            vehicle_id: "veh-1".to_string(),
            owner_id: "user-2".to_string(),
            position: 0,
            progress: 0.5,
        };
        assert_eq!(progress.owner_id(), "user-2");

        let registered = WsMessage::UserRegistered {
            user_id: "user-3".to_string(),
        };
        assert_eq!(registered.owner_id(), "user-3");
    }

    #[test]
    fn test_should_forward_filters_by_owner() {
        let event = WsEvent {
            owner_id: "user-1".to_string(),
            payload: "{}".to_string(),
        };
        assert!(should_forward(&event, None));
        assert!(should_forward(&event, Some("user-1")));
        assert!(!should_forward(&event, Some("user-2")));
    }

    #[tokio::test]
    async fn test_broadcast_message_tags_owner() {
        let (tx, mut rx) = broadcast::channel(4);
        broadcast_message(
            &tx,
            &WsMessage::UserRegistered {
                user_id: "user-9".to_string(),
            },
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.owner_id, "user-9");
        assert!(event.payload.contains("UserRegistered"));
    }

    #[test]
    fn test_broadcast_without_receivers_is_silent() {
        let (tx, rx) = broadcast::channel::<WsEvent>(4);
        drop(rx);
        broadcast_message(
            &tx,
            &WsMessage::UserRegistered {
                user_id: "nobody".to_string(),
            },
        );
    }
}
