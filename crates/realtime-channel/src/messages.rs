//! Realtime protocol messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control message types sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMessageType {
    SubscribeRecipe,
    UnsubscribeRecipe,
}

/// Subscription control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub msg_type: ControlMessageType,
    pub recipe_id: String,
}

impl ControlMessage {
    pub fn subscribe(topic: &str) -> Self {
        Self {
            msg_type: ControlMessageType::SubscribeRecipe,
            recipe_id: topic.to_string(),
        }
    }

    pub fn unsubscribe(topic: &str) -> Self {
        Self {
            msg_type: ControlMessageType::UnsubscribeRecipe,
            recipe_id: topic.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Topic of an inbound message: the value under `key`, as a string or number.
pub fn topic_of(message: &Value, key: &str) -> Option<String> {
    match message.as_object()?.get(key)? {
        Value::String(topic) => Some(topic.clone()),
        Value::Number(topic) => Some(topic.to_string()),
        _ => None,
    }
}
