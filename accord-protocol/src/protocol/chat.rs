use serde::{Deserialize, Serialize};

use crate::ids::ChatID;
use crate::protocol::{MessageType, WirePayload};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: ChatID,
    pub clock: u64,
    pub timestamp: u64,
    pub text: String,
}

impl ChatMessage {
    pub fn new(chat_id: ChatID, clock: u64, timestamp: u64, text: String) -> Self {
        ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id,
            clock,
            timestamp,
            text,
        }
    }
}

impl WirePayload for ChatMessage {
    const MESSAGE_TYPE: MessageType = MessageType::ChatMessage;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditMessage {
    pub message_id: String,
    pub chat_id: ChatID,
    pub clock: u64,
    pub text: String,
}

impl WirePayload for EditMessage {
    const MESSAGE_TYPE: MessageType = MessageType::EditMessage;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMessage {
    pub message_id: String,
    pub chat_id: ChatID,
    pub clock: u64,
}

impl WirePayload for DeleteMessage {
    const MESSAGE_TYPE: MessageType = MessageType::DeleteMessage;
}
