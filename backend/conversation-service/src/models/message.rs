use crate::error::{ConversationError, ConversationResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    Text,
    Image,
    Video,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Text => "text",
            MessageFormat::Image => "image",
            MessageFormat::Video => "video",
        }
    }
}

impl fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageFormat {
    type Err = ConversationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(MessageFormat::Text),
            "image" => Ok(MessageFormat::Image),
            "video" => Ok(MessageFormat::Video),
            other => Err(ConversationError::InvalidMessage(format!(
                "unsupported message format: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub format: MessageFormat,
    /// Epoch milliseconds, strictly increasing within a conversation
    pub creation_time: i64,
}

/// Opaque position in a conversation's message stream.
///
/// Encodes the creation time of the last delivered message; listing resumes
/// strictly after it. Creation times are unique per conversation, so no
/// tie-breaker is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cursor {
    after: i64,
}

impl Cursor {
    const PREFIX: &'static str = "m1:";

    pub fn after(creation_time: i64) -> Self {
        Self {
            after: creation_time,
        }
    }

    pub fn position(&self) -> i64 {
        self.after
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}{}", Self::PREFIX, self.after))
    }

    pub fn decode(token: &str) -> ConversationResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ConversationError::InvalidCursor)?;
        let text = String::from_utf8(bytes).map_err(|_| ConversationError::InvalidCursor)?;
        let after = text
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.parse::<i64>().ok())
            .ok_or(ConversationError::InvalidCursor)?;
        Ok(Self { after })
    }
}

impl Serialize for Cursor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Cursor::decode(&token).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Present when more items may follow
    pub next_cursor: Option<Cursor>,
}
