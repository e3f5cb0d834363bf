use crate::error::{ConversationError, ConversationResult};
use crate::services::participant_key::{canonicalize, ParticipantKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A conversation row exactly as stored.
///
/// Rows written before the participant-key schema may lack any of the
/// current-schema fields and may still carry the legacy `participant_ids`
/// column. Only the migration runner fills those gaps in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: Uuid,
    /// Legacy participant column
    pub participant_ids: Option<Vec<Uuid>>,
    pub participants: Option<Vec<Uuid>>,
    pub participant_key: Option<ParticipantKey>,
    pub last_message_id: Option<Uuid>,
    pub last_message_time: Option<i64>,
}

/// Validated current-schema view of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// As originally supplied; display and audit only
    pub participants: Vec<Uuid>,
    /// Authoritative lookup key
    pub participant_key: ParticipantKey,
    pub last_message_id: Option<Uuid>,
    /// Epoch milliseconds of the newest message, `0` before any message
    pub last_message_time: i64,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participant_key.contains(user_id)
    }
}

/// Conversation about to be inserted by get-or-create
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub id: Uuid,
    pub participants: Vec<Uuid>,
    pub participant_key: ParticipantKey,
}

impl NewConversation {
    pub fn new(participants: Vec<Uuid>, participant_key: ParticipantKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            participants,
            participant_key,
        }
    }

    pub fn into_conversation(self) -> Conversation {
        Conversation {
            id: self.id,
            participants: self.participants,
            participant_key: self.participant_key,
            last_message_id: None,
            last_message_time: 0,
        }
    }
}

/// Closed set of fields the migration runner may fill on a legacy record.
///
/// `None` means "leave as is". Stores apply each `Some` field only while the
/// stored column is still absent, so a patch never overwrites a live value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillPatch {
    pub participants: Option<Vec<Uuid>>,
    pub participant_key: Option<ParticipantKey>,
    pub last_message_time: Option<i64>,
}

impl BackfillPatch {
    pub fn is_empty(&self) -> bool {
        self.participants.is_none()
            && self.participant_key.is_none()
            && self.last_message_time.is_none()
    }
}

impl ConversationRecord {
    /// The participant list a reader should use: current column first, legacy second
    pub fn effective_participants(&self) -> Option<&[Uuid]> {
        self.participants
            .as_deref()
            .or(self.participant_ids.as_deref())
    }
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = ConversationError;

    /// Read-side view of a possibly legacy record. Missing fields are derived
    /// in memory; nothing is written back.
    fn try_from(record: ConversationRecord) -> ConversationResult<Self> {
        let participants = record
            .effective_participants()
            .map(<[Uuid]>::to_vec)
            .ok_or_else(|| {
                ConversationError::StoreInconsistency(format!(
                    "conversation {} has no participant information",
                    record.id
                ))
            })?;

        let participant_key = match record.participant_key {
            Some(key) => key,
            None => canonicalize(&participants).map_err(|e| {
                ConversationError::StoreInconsistency(format!(
                    "conversation {} cannot derive a participant key: {e}",
                    record.id
                ))
            })?,
        };

        Ok(Conversation {
            id: record.id,
            participants,
            participant_key,
            last_message_id: record.last_message_id,
            last_message_time: record.last_message_time.unwrap_or(0),
        })
    }
}
