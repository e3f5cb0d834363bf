//! Storage ports for conversations and messages.
//!
//! Implementations must provide two atomic primitives:
//! - `insert_if_absent`: a conditional insert guarded by the uniqueness of
//!   `participant_key` (never a read followed by a write)
//! - `commit_message`: message insert plus conversation pointer update as one
//!   unit, conditional on the pointer still naming `expected_last`
//!
//! Everything else is plain reads or per-record idempotent patches.

pub mod memory;
pub mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

use crate::error::ConversationResult;
use crate::models::{BackfillPatch, ConversationRecord, Message, NewConversation};
use crate::services::participant_key::ParticipantKey;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another conversation already owns the participant key
    KeyTaken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The conversation pointer moved since it was read; nothing was written
    Stale,
    ConversationMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    Applied,
    /// Every patched column was already present; nothing was written
    Unchanged,
    /// The derived key belongs to a different conversation
    KeyTaken { owner: Uuid },
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Insert unless a conversation with the same participant key exists
    async fn insert_if_absent(&self, conversation: &NewConversation)
        -> ConversationResult<InsertOutcome>;

    async fn find_by_key(&self, key: &ParticipantKey)
        -> ConversationResult<Option<ConversationRecord>>;

    /// Unkeyed records whose participants canonicalize to `key`, in id order.
    ///
    /// These are legacy rows the migration runner has not reached yet.
    async fn find_unkeyed(&self, key: &ParticipantKey)
        -> ConversationResult<Vec<ConversationRecord>>;

    async fn get(&self, id: Uuid) -> ConversationResult<Option<ConversationRecord>>;

    /// Conversations containing `user_id`, newest activity first
    async fn list_for_participant(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> ConversationResult<Vec<ConversationRecord>>;

    /// Keyset scan over all records in id order, starting after `after`
    async fn scan(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> ConversationResult<Vec<ConversationRecord>>;

    /// Fill still-absent columns of one record from `patch`
    async fn apply_backfill(
        &self,
        id: Uuid,
        patch: &BackfillPatch,
    ) -> ConversationResult<BackfillOutcome>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist `message` and point its conversation at it, atomically, iff the
    /// conversation's `last_message_id` still equals `expected_last` and no
    /// stored message is at or after `message.creation_time`.
    async fn commit_message(
        &self,
        message: &Message,
        expected_last: Option<Uuid>,
    ) -> ConversationResult<CommitOutcome>;

    /// Creation time of the newest stored message, if any
    async fn latest_message_time(&self, conversation_id: Uuid) -> ConversationResult<Option<i64>>;

    /// Messages with `creation_time > after`, ascending, at most `limit`
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        after: Option<i64>,
        limit: usize,
    ) -> ConversationResult<Vec<Message>>;
}
