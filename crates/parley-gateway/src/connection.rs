use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use parley_types::events::{ChatEvent, ClientCommand};
use parley_types::models::Payload;
use parley_types::now_millis;

use crate::error::ChatResult;
use crate::hub::{Hub, Outgoing, Sent};
use crate::registry::{Delivery, SessionHandle};

/// Liveness policy: ping every `interval`, drop after `grace` missed pongs.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub interval: Duration,
    pub grace: u32,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(4),
            grace: 3,
        }
    }
}

/// Missed-pong bookkeeping for one connection. The receive side records pongs,
/// the send side checks on every heartbeat tick.
#[derive(Debug)]
pub struct Liveness {
    grace: u32,
    pong_seen: AtomicBool,
    missed: AtomicU32,
}

impl Liveness {
    pub fn new(grace: u32) -> Self {
        Self {
            grace,
            pong_seen: AtomicBool::new(true),
            missed: AtomicU32::new(0),
        }
    }

    pub fn on_pong(&self) {
        self.pong_seen.store(true, Ordering::Release);
    }

    /// Returns false once `grace` ticks in a row passed without a pong.
    pub fn on_tick(&self) -> bool {
        if self.pong_seen.swap(false, Ordering::AcqRel) {
            self.missed.store(0, Ordering::Relaxed);
            return true;
        }
        self.missed.fetch_add(1, Ordering::Relaxed) + 1 < self.grace
    }

    pub fn missed(&self) -> u32 {
        self.missed.load(Ordering::Relaxed)
    }
}

/// Hand an ack or ERROR to the issuing session. Returns false when the reply
/// was lost; the connection is then closed so the client reconnects and resyncs.
fn queue_reply(session: &SessionHandle, reply: ChatEvent) -> bool {
    match session.try_deliver(reply) {
        Delivery::Queued => true,
        outcome => {
            warn!(
                "Could not queue reply for {} ({:?}), closing session {}",
                session.user_id, outcome, session.id
            );
            false
        }
    }
}

type WsSink = SplitSink<WebSocket, WsMessage>;

async fn send_event(sink: &mut WsSink, event: &ChatEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode {:?} event: {}", event.kind, e);
            return true;
        }
    };
    sink.send(WsMessage::Text(text.into())).await.is_ok()
}

/// Drive one authenticated WebSocket until either side goes away.
///
/// The token was checked at the HTTP upgrade, so the session is registered
/// straight away. All writes go through the send task; the receive task only
/// enqueues replies on the session's own queue.
pub async fn handle_connection(socket: WebSocket, hub: Hub, user_id: String, heartbeat: Heartbeat) {
    let (mut sink, mut stream) = socket.split();

    // Subscribe before taking the snapshot so no transition falls in between.
    let mut presence_rx = hub.registry().subscribe_presence();
    for online in hub.online_users().await {
        if online == user_id {
            continue;
        }
        if !send_event(&mut sink, &ChatEvent::presence(&online, true, now_millis())).await {
            return;
        }
    }

    let (session, mut session_rx) = hub.registry().register(&user_id).await;
    info!("{} connected (session {})", user_id, session.id);

    let liveness = Arc::new(Liveness::new(heartbeat.grace));
    let send_liveness = liveness.clone();

    let send_user = user_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat.interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                result = presence_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Presence receiver for {} lagged by {} events", send_user, n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if event.sender.as_deref() == Some(send_user.as_str()) {
                        continue;
                    }
                    if !send_event(&mut sink, &event).await {
                        break;
                    }
                }
                event = session_rx.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut sink, &event).await {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !send_liveness.on_tick() {
                        warn!("{} missed {} pongs, dropping connection", send_user, send_liveness.missed());
                        break;
                    }
                    if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_hub = hub.clone();
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let reply = match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(cmd) => handle_command(&recv_hub, &recv_session, cmd).await,
                        Err(e) => {
                            warn!(
                                "{} bad command: {} -- raw: {}",
                                recv_session.user_id,
                                e,
                                text.chars().take(200).collect::<String>()
                            );
                            Some(ChatEvent::error(format!("malformed command: {}", e), None, now_millis()))
                        }
                    };
                    if let Some(reply) = reply {
                        if !queue_reply(&recv_session, reply) {
                            break;
                        }
                    }
                }
                WsMessage::Pong(_) => liveness.on_pong(),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.registry().unregister(&user_id, session.id).await;
    info!("{} disconnected (session {})", user_id, session.id);
}

/// Execute one client command. Returns the envelope owed to the issuing
/// session: an ack or an ERROR for durable commands, nothing for signals.
pub async fn handle_command(hub: &Hub, session: &SessionHandle, cmd: ClientCommand) -> Option<ChatEvent> {
    match cmd {
        ClientCommand::SendMessage { conversation_id, content, reply_to_id, client_ref } => {
            let result = hub
                .send(Outgoing {
                    conversation_id,
                    sender: session.user_id.clone(),
                    payload: Payload::Text(content),
                    reply_to_id,
                    origin: Some(session.id),
                })
                .await;
            Some(ack_or_error(&session.user_id, result, client_ref))
        }

        ClientCommand::SendFile { conversation_id, file_content, file_type, reply_to_id, client_ref } => {
            let result = match hub.store().file_payload(&file_content, &file_type) {
                Ok(payload) => {
                    hub.send(Outgoing {
                        conversation_id,
                        sender: session.user_id.clone(),
                        payload,
                        reply_to_id,
                        origin: Some(session.id),
                    })
                    .await
                }
                Err(e) => Err(e),
            };
            Some(ack_or_error(&session.user_id, result, client_ref))
        }

        ClientCommand::Typing { conversation_id } => {
            hub.typing(&conversation_id, &session.user_id).await;
            None
        }

        ClientCommand::Read { conversation_id } => {
            if let Err(e) = hub.mark_read(&conversation_id, &session.user_id).await {
                debug!("Dropping read receipt from {} in {}: {}", session.user_id, conversation_id, e);
            }
            None
        }
    }
}

fn ack_or_error(user_id: &str, result: ChatResult<Sent>, client_ref: Option<String>) -> ChatEvent {
    match result {
        Ok(sent) => sent.ack(client_ref),
        Err(e) => {
            warn!("Command from {} failed: {}", user_id, e);
            ChatEvent::error(e.to_string(), client_ref, now_millis())
        }
    }
}
