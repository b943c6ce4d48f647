use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use huddle_types::api::Identity;

use crate::error::GatewayError;
use crate::gateway::ChatGateway;
use crate::registry::{ConnectionHandle, Outbound};
use crate::store::ChatStore;

pub const UNAUTHORIZED_CLOSE_CODE: u16 = 1003;
pub const UNAUTHORIZED_CLOSE_REASON: &str = "Unauthorized";

/// Drive one upgraded WebSocket until either side goes away.
///
/// `identity` is whatever the HTTP handshake could verify. Without one the
/// socket is closed before anything is registered.
pub async fn handle_connection<S: ChatStore>(
    mut socket: WebSocket,
    gateway: ChatGateway<S>,
    identity: Option<Identity>,
) {
    let identity = match admit(identity) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Rejecting WebSocket: {}", e);
            let close = Message::Close(Some(CloseFrame {
                code: UNAUTHORIZED_CLOSE_CODE,
                reason: UNAUTHORIZED_CLOSE_REASON.into(),
            }));
            let _ = socket.send(close).await;
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();
    let (handle, mut outbound_rx) = ConnectionHandle::channel();
    let conn_id = handle.id();

    gateway.presence().connect(&identity, handle.clone()).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();
    let heartbeat_interval = gateway.config().heartbeat_interval;
    let username_send = identity.username.clone();

    // Outbound frames and heartbeat -> client
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                out = outbound_rx.recv() => {
                    match out {
                        Some(Outbound::Text(text)) => {
                            if sender.send(Message::Text((&*text).into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Close { code, reason }) => {
                            debug!("Closing connection of {}: {}", username_send, reason);
                            let _ = sender
                                .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout for {} (missed {} pongs), dropping connection", username_send, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client frames -> gateway
    let gateway_recv = gateway.clone();
    let identity_recv = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) = gateway_recv.handle_text(&identity_recv, text.as_str()).await {
                        log_frame_error(&identity_recv, text.as_str(), &e);
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.presence().disconnect(&identity, &handle).await;
    info!("{} ({}) connection {} closed", identity.username, identity.user_id, conn_id);
}

fn admit(identity: Option<Identity>) -> Result<Identity, GatewayError> {
    identity.ok_or(GatewayError::Unauthorized)
}

fn log_frame_error(identity: &Identity, raw: &str, e: &GatewayError) {
    match e {
        GatewayError::MalformedFrame(_) => {
            let preview: String = raw.chars().take(200).collect();
            debug!("{} ({}) bad frame: {} -- raw: {}", identity.username, identity.user_id, e, preview);
        }
        GatewayError::Rejected(_) => {
            debug!("{} ({}) frame rejected: {}", identity.username, identity.user_id, e);
        }
        GatewayError::Unauthorized | GatewayError::Persistence(_) | GatewayError::Runtime(_) => {
            warn!("{} ({}) frame dropped: {}", identity.username, identity.user_id, e);
        }
    }
}
