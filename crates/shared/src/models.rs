//! Payload models carried inside protocol frames and authorization responses.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// --- Identifiers ---

/// User ids arrive as JSON strings or numbers; both normalize to a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

/// Like [`deserialize_id`], but any other JSON type reads as absent instead of failing.
pub fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

// --- Authorization ---

/// Response of a channel authorizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelAuthorizationData {
    pub auth: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,
}

impl ChannelAuthorizationData {
    pub fn new(auth: impl Into<String>) -> Self {
        Self {
            auth: auth.into(),
            ..Self::default()
        }
    }

    pub fn with_channel_data(mut self, channel_data: impl Into<String>) -> Self {
        self.channel_data = Some(channel_data.into());
        self
    }
}

/// Response of a user authenticator. `user_data` is a JSON document encoded as a string.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAuthenticationData {
    pub auth: String,
    pub user_data: String,
}

// --- Presence ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub id: String,
    pub info: Value,
}

impl Member {
    pub fn new(id: impl Into<String>, info: Value) -> Self {
        Self {
            id: id.into(),
            info,
        }
    }
}

/// Identity embedded in a presence channel's `channel_data`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PresenceChannelData {
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    #[serde(default)]
    pub user_info: Value,
}

/// `data` of a presence channel's subscription-succeeded event.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PresenceSubscriptionData {
    #[serde(default)]
    pub presence: PresenceSnapshot,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PresenceSnapshot {
    #[serde(default)]
    pub hash: HashMap<String, Value>,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub ids: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MemberAddedData {
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
    #[serde(default)]
    pub user_info: Value,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MemberRemovedData {
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_user_ids_become_strings() {
        let added: MemberAddedData =
            serde_json::from_value(json!({"user_id": 42, "user_info": {"name": "ada"}})).unwrap();
        assert_eq!(added.user_id, "42");
        assert_eq!(added.user_info, json!({"name": "ada"}));
    }

    #[test]
    fn authorization_data_omits_missing_channel_data() {
        let data = ChannelAuthorizationData::new("key:sig");
        assert_eq!(serde_json::to_value(&data).unwrap(), json!({"auth": "key:sig"}));
    }

    #[test]
    fn presence_snapshot_tolerates_missing_fields() {
        let data: PresenceSubscriptionData =
            serde_json::from_value(json!({"presence": {"hash": {"1": {"a": 1}}}})).unwrap();
        assert_eq!(data.presence.hash.len(), 1);
        assert_eq!(data.presence.count, 0);
    }
}
