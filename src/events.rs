//! Socket protocol. Every frame is JSON text shaped `{"event": ..., "data": ...}`.

use serde::{Deserialize, Serialize};

use crate::{
    appresult::AppError,
    db::{Message, MessageId, MessageKind, Notification, RoomId, UserId},
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub body: String,
    #[serde(default)]
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinUser(UserId),
    JoinChat(RoomId),
    LeaveChat(RoomId),
    SendMessage { room_id: RoomId, message: OutgoingMessage },
    TypingStart { room_id: RoomId, user_id: UserId },
    TypingStop { room_id: RoomId, user_id: UserId },
    MarkRead { room_id: RoomId, message_id: MessageId, user_id: UserId },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    NewMessage { room_id: RoomId, message: Message },
    MessageSent { room_id: RoomId, message: Message },
    UserTyping { room_id: RoomId, user_id: UserId, is_typing: bool },
    MessageRead { room_id: RoomId, message_id: MessageId, user_id: UserId },
    Notification(Notification),
    Error { code: String, message: String },
}

impl From<&AppError> for ServerEvent {
    fn from(err: &AppError) -> Self {
        match err.rejection() {
            Some(rejected) => ServerEvent::Error {
                code: rejected.code().to_owned(),
                message: rejected.to_string(),
            },
            None => ServerEvent::Error {
                code: "internal".to_owned(),
                message: "something went wrong".to_owned(),
            },
        }
    }
}
