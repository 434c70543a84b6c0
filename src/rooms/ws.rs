use axum::{
    debug_handler,
    extract::{ws::Message as Frame, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::{
    appresult::{AppError, AppResult, Rejected},
    broadcast::Broadcaster,
    db::{RoomId, UserId},
    events::{ClientEvent, ServerEvent},
    registry::ConnectionId,
    rooms::{msg, require_member},
    session::CurrentUser,
};

#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(
    State(db_pool): State<SqlitePool>,
    State(broadcaster): State<Broadcaster>,
    CurrentUser(user_id): CurrentUser,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |stream| {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
        let connection_id = broadcaster.registry().connect(tx);
        broadcaster.registry().register(connection_id, user_id);
        tracing::info!(%connection_id, %user_id, "socket connected");

        let (mut sender, mut receiver) = stream.split();

        let mut writer_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(error = %err, "unserializable event dropped");
                        continue;
                    }
                };
                if sender.send(Frame::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        loop {
            let frame = tokio::select! {
                frame = receiver.next() => frame,
                _ = &mut writer_task => break,
            };
            let Some(Ok(frame)) = frame else {
                break;
            };

            let text = match frame {
                Frame::Text(text) => text,
                Frame::Close(_) => break,
                _ => continue,
            };
            let event = match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => event,
                Err(err) => {
                    let err = AppError::from(Rejected::Invalid(err.to_string()));
                    broadcaster.registry().send(connection_id, ServerEvent::from(&err));
                    continue;
                }
            };

            if let Err(err) = handle_event(&db_pool, &broadcaster, connection_id, user_id, event).await {
                if err.rejection().is_none() {
                    tracing::error!(%connection_id, error = %err.0, "socket event failed");
                }
                broadcaster.registry().send(connection_id, ServerEvent::from(&err));
            }
        }

        broadcaster.disconnect(connection_id);
        writer_task.abort();
        tracing::info!(%connection_id, %user_id, "socket disconnected");
    })
}

pub async fn handle_event(
    db_pool: &SqlitePool,
    broadcaster: &Broadcaster,
    connection_id: ConnectionId,
    user_id: UserId,
    event: ClientEvent,
) -> AppResult<()> {
    match event {
        ClientEvent::JoinUser(claimed) => {
            if claimed != user_id {
                return Err(Rejected::Unauthenticated.into());
            }
            broadcaster.registry().register(connection_id, user_id);
        }
        ClientEvent::JoinChat(room_id) => {
            require_member(db_pool, room_id, user_id).await?;
            broadcaster.join(connection_id, room_id);
        }
        ClientEvent::LeaveChat(room_id) => {
            broadcaster.leave(connection_id, room_id);
        }
        ClientEvent::SendMessage { room_id, message } => {
            msg::send_msg(db_pool, broadcaster, user_id, room_id, message, Some(connection_id)).await?;
        }
        ClientEvent::TypingStart { room_id, user_id: claimed } => {
            typing(broadcaster, connection_id, user_id, room_id, claimed, true);
        }
        ClientEvent::TypingStop { room_id, user_id: claimed } => {
            typing(broadcaster, connection_id, user_id, room_id, claimed, false);
        }
        ClientEvent::MarkRead { room_id, message_id, user_id: claimed } => {
            if claimed != user_id {
                return Err(Rejected::Unauthenticated.into());
            }
            msg::mark_read(db_pool, broadcaster, room_id, message_id, user_id, Some(connection_id)).await?;
        }
    }
    Ok(())
}

// best-effort: typing from a socket that isn't in the room is dropped
fn typing(
    broadcaster: &Broadcaster,
    connection_id: ConnectionId,
    user_id: UserId,
    room_id: RoomId,
    claimed: UserId,
    is_typing: bool,
) {
    if claimed == user_id && broadcaster.is_subscribed(connection_id, room_id) {
        broadcaster.typing(room_id, user_id, is_typing, Some(connection_id));
    }
}
