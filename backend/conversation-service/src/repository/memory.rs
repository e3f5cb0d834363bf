//! In-process repository.
//!
//! One `RwLock` guards all state, so every trait method is a single critical
//! section and the atomicity contracts of the ports hold trivially. Used by
//! tests and by embedders that do not need durability.

use super::{
    BackfillOutcome, CommitOutcome, ConversationRepository, InsertOutcome, MessageRepository,
};
use crate::error::{ConversationError, ConversationResult};
use crate::models::{BackfillPatch, ConversationRecord, Message, NewConversation};
use crate::services::participant_key::{canonicalize, ParticipantKey};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    conversations: BTreeMap<Uuid, ConversationRecord>,
    by_key: HashMap<ParticipantKey, Uuid>,
    /// conversation id -> creation_time -> message
    messages: HashMap<Uuid, BTreeMap<i64, Message>>,
}

#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw record as-is, e.g. a legacy row predating participant keys.
    ///
    /// Fails with `StoreConflict` if the record carries a key another
    /// conversation already owns.
    pub async fn seed_record(&self, record: ConversationRecord) -> ConversationResult<()> {
        let mut state = self.state.write().await;
        if let Some(key) = &record.participant_key {
            match state.by_key.get(key) {
                Some(owner) if *owner != record.id => {
                    return Err(ConversationError::StoreConflict(format!(
                        "participant key {key} already owned by {owner}"
                    )));
                }
                _ => {
                    state.by_key.insert(key.clone(), record.id);
                }
            }
        }
        state.conversations.insert(record.id, record);
        Ok(())
    }

    /// Store a message without touching the conversation pointer, e.g. history
    /// carried over from before `last_message_time` existed.
    pub async fn seed_message(&self, message: Message) -> ConversationResult<()> {
        let mut state = self.state.write().await;
        let stream = state.messages.entry(message.conversation_id).or_default();
        if stream.contains_key(&message.creation_time) {
            return Err(ConversationError::StoreConflict(format!(
                "creation_time {} already used in conversation {}",
                message.creation_time, message.conversation_id
            )));
        }
        stream.insert(message.creation_time, message);
        Ok(())
    }

    pub async fn conversation_count(&self) -> usize {
        self.state.read().await.conversations.len()
    }

    pub async fn message_count(&self, conversation_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .messages
            .get(&conversation_id)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ConversationRepository for MemoryRepository {
    async fn insert_if_absent(
        &self,
        conversation: &NewConversation,
    ) -> ConversationResult<InsertOutcome> {
        let mut state = self.state.write().await;
        if state.by_key.contains_key(&conversation.participant_key) {
            return Ok(InsertOutcome::KeyTaken);
        }

        state
            .by_key
            .insert(conversation.participant_key.clone(), conversation.id);
        state.conversations.insert(
            conversation.id,
            ConversationRecord {
                id: conversation.id,
                participant_ids: None,
                participants: Some(conversation.participants.clone()),
                participant_key: Some(conversation.participant_key.clone()),
                last_message_id: None,
                last_message_time: Some(0),
            },
        );
        Ok(InsertOutcome::Inserted)
    }

    async fn find_by_key(
        &self,
        key: &ParticipantKey,
    ) -> ConversationResult<Option<ConversationRecord>> {
        let state = self.state.read().await;
        Ok(state
            .by_key
            .get(key)
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    async fn find_unkeyed(
        &self,
        key: &ParticipantKey,
    ) -> ConversationResult<Vec<ConversationRecord>> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .filter(|record| record.participant_key.is_none())
            .filter(|record| {
                record
                    .effective_participants()
                    .and_then(|ids| canonicalize(ids).ok())
                    .as_ref()
                    == Some(key)
            })
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> ConversationResult<Option<ConversationRecord>> {
        Ok(self.state.read().await.conversations.get(&id).cloned())
    }

    async fn list_for_participant(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> ConversationResult<Vec<ConversationRecord>> {
        let state = self.state.read().await;
        let mut matching: Vec<ConversationRecord> = state
            .conversations
            .values()
            .filter(|record| {
                record
                    .effective_participants()
                    .map(|ids| ids.contains(&user_id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            b.last_message_time
                .unwrap_or(0)
                .cmp(&a.last_message_time.unwrap_or(0))
                .then(a.id.cmp(&b.id))
        });
        matching.truncate(limit);
        Ok(matching)
    }

    async fn scan(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> ConversationResult<Vec<ConversationRecord>> {
        let state = self.state.read().await;
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(state
            .conversations
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn apply_backfill(
        &self,
        id: Uuid,
        patch: &BackfillPatch,
    ) -> ConversationResult<BackfillOutcome> {
        let mut state = self.state.write().await;
        let State {
            conversations,
            by_key,
            ..
        } = &mut *state;

        let record = conversations.get_mut(&id).ok_or(ConversationError::NotFound)?;

        let new_key = match (&record.participant_key, &patch.participant_key) {
            (None, Some(key)) => {
                if let Some(owner) = by_key.get(key) {
                    if *owner != id {
                        return Ok(BackfillOutcome::KeyTaken { owner: *owner });
                    }
                }
                Some(key.clone())
            }
            _ => None,
        };

        let mut changed = false;
        if record.participants.is_none() {
            if let Some(participants) = &patch.participants {
                record.participants = Some(participants.clone());
                changed = true;
            }
        }
        if let Some(key) = new_key {
            by_key.insert(key.clone(), id);
            record.participant_key = Some(key);
            changed = true;
        }
        if record.last_message_time.is_none() {
            if let Some(time) = patch.last_message_time {
                record.last_message_time = Some(time);
                changed = true;
            }
        }

        Ok(if changed {
            BackfillOutcome::Applied
        } else {
            BackfillOutcome::Unchanged
        })
    }
}

#[async_trait]
impl MessageRepository for MemoryRepository {
    async fn commit_message(
        &self,
        message: &Message,
        expected_last: Option<Uuid>,
    ) -> ConversationResult<CommitOutcome> {
        let mut state = self.state.write().await;
        let State {
            conversations,
            messages,
            ..
        } = &mut *state;

        let Some(record) = conversations.get_mut(&message.conversation_id) else {
            return Ok(CommitOutcome::ConversationMissing);
        };

        if record.last_message_id != expected_last
            || message.creation_time <= record.last_message_time.unwrap_or(0)
        {
            return Ok(CommitOutcome::Stale);
        }

        let stream = messages.entry(message.conversation_id).or_default();
        if let Some((newest, _)) = stream.last_key_value() {
            if message.creation_time <= *newest {
                return Ok(CommitOutcome::Stale);
            }
        }

        stream.insert(message.creation_time, message.clone());
        record.last_message_id = Some(message.id);
        record.last_message_time = Some(message.creation_time);
        Ok(CommitOutcome::Committed)
    }

    async fn latest_message_time(&self, conversation_id: Uuid) -> ConversationResult<Option<i64>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .get(&conversation_id)
            .and_then(|stream| stream.last_key_value())
            .map(|(time, _)| *time))
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        after: Option<i64>,
        limit: usize,
    ) -> ConversationResult<Vec<Message>> {
        let state = self.state.read().await;
        let Some(stream) = state.messages.get(&conversation_id) else {
            return Ok(Vec::new());
        };

        let lower = match after {
            Some(t) => Bound::Excluded(t),
            None => Bound::Unbounded,
        };
        Ok(stream
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, message)| message.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageFormat;

    fn new_conversation() -> NewConversation {
        let participants = vec![Uuid::new_v4(), Uuid::new_v4()];
        let key = canonicalize(&participants).unwrap();
        NewConversation::new(participants, key)
    }

    fn message(conversation_id: Uuid, author_id: Uuid, creation_time: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            author_id,
            body: "hi".into(),
            format: MessageFormat::Text,
            creation_time,
        }
    }

    #[test]
    fn test_insert_if_absent_refuses_second_owner_of_key() {
        tokio_test::block_on(async {
            let repo = MemoryRepository::new();
            let first = new_conversation();
            let mut second = new_conversation();
            second.participant_key = first.participant_key.clone();

            assert_eq!(repo.insert_if_absent(&first).await.unwrap(), InsertOutcome::Inserted);
            assert_eq!(repo.insert_if_absent(&second).await.unwrap(), InsertOutcome::KeyTaken);
            assert_eq!(repo.conversation_count().await, 1);
        });
    }

    #[test]
    fn test_commit_is_conditional_on_expected_pointer() {
        tokio_test::block_on(async {
            let repo = MemoryRepository::new();
            let conversation = new_conversation();
            let author = conversation.participants[0];
            repo.insert_if_absent(&conversation).await.unwrap();

            let m1 = message(conversation.id, author, 10);
            assert_eq!(
                repo.commit_message(&m1, None).await.unwrap(),
                CommitOutcome::Committed
            );

            // Stale expectation: pointer already moved to m1
            let m2 = message(conversation.id, author, 20);
            assert_eq!(repo.commit_message(&m2, None).await.unwrap(), CommitOutcome::Stale);
            assert_eq!(repo.message_count(conversation.id).await, 1);

            assert_eq!(
                repo.commit_message(&m2, Some(m1.id)).await.unwrap(),
                CommitOutcome::Committed
            );
            let record = repo.get(conversation.id).await.unwrap().unwrap();
            assert_eq!(record.last_message_id, Some(m2.id));
            assert_eq!(record.last_message_time, Some(20));
        });
    }

    #[test]
    fn test_commit_rejects_non_increasing_time() {
        tokio_test::block_on(async {
            let repo = MemoryRepository::new();
            let conversation = new_conversation();
            let author = conversation.participants[0];
            repo.insert_if_absent(&conversation).await.unwrap();

            let m1 = message(conversation.id, author, 10);
            repo.commit_message(&m1, None).await.unwrap();
            let same_time = message(conversation.id, author, 10);
            assert_eq!(
                repo.commit_message(&same_time, Some(m1.id)).await.unwrap(),
                CommitOutcome::Stale
            );
        });
    }

    #[test]
    fn test_commit_rejects_time_behind_unpointed_history() {
        tokio_test::block_on(async {
            let repo = MemoryRepository::new();
            let conversation = new_conversation();
            let author = conversation.participants[0];
            repo.insert_if_absent(&conversation).await.unwrap();
            repo.seed_message(message(conversation.id, author, 500))
                .await
                .unwrap();

            assert_eq!(
                repo.latest_message_time(conversation.id).await.unwrap(),
                Some(500)
            );
            let behind = message(conversation.id, author, 200);
            assert_eq!(
                repo.commit_message(&behind, None).await.unwrap(),
                CommitOutcome::Stale
            );
            let ahead = message(conversation.id, author, 501);
            assert_eq!(
                repo.commit_message(&ahead, None).await.unwrap(),
                CommitOutcome::Committed
            );
        });
    }

    #[test]
    fn test_find_unkeyed_matches_participant_set() {
        tokio_test::block_on(async {
            let repo = MemoryRepository::new();
            let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
            let legacy = ConversationRecord {
                id: Uuid::new_v4(),
                participant_ids: Some(vec![b, a, b]),
                participants: None,
                participant_key: None,
                last_message_id: None,
                last_message_time: None,
            };
            repo.seed_record(legacy.clone()).await.unwrap();

            let key = canonicalize(&[a, b]).unwrap();
            assert_eq!(repo.find_unkeyed(&key).await.unwrap(), vec![legacy]);
            let other = canonicalize(&[a, c]).unwrap();
            assert!(repo.find_unkeyed(&other).await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_commit_to_unknown_conversation() {
        tokio_test::block_on(async {
            let repo = MemoryRepository::new();
            let m = message(Uuid::new_v4(), Uuid::new_v4(), 1);
            assert_eq!(
                repo.commit_message(&m, None).await.unwrap(),
                CommitOutcome::ConversationMissing
            );
        });
    }

    #[test]
    fn test_scan_is_keyset_paginated() {
        tokio_test::block_on(async {
            let repo = MemoryRepository::new();
            for _ in 0..5 {
                repo.insert_if_absent(&new_conversation()).await.unwrap();
            }

            let first = repo.scan(None, 3).await.unwrap();
            let rest = repo.scan(first.last().map(|r| r.id), 3).await.unwrap();
            assert_eq!(first.len(), 3);
            assert_eq!(rest.len(), 2);
            assert!(first.last().unwrap().id < rest[0].id);
        });
    }
}
