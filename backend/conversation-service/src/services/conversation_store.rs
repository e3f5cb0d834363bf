use crate::error::{ConversationError, ConversationResult};
use crate::metrics::{CONVERSATIONS_CREATED, GET_OR_CREATE_CONFLICTS};
use crate::models::{Conversation, NewConversation};
use crate::repository::{BackfillOutcome, ConversationRepository, InsertOutcome};
use crate::services::migration_runner::plan_backfill;
use crate::services::participant_key::{canonicalize, ParticipantKey};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedConversation {
    pub conversation_id: Uuid,
    /// True only for the caller whose insert created the record
    pub created: bool,
}

pub struct ConversationStore {
    repo: Arc<dyn ConversationRepository>,
}

impl ConversationStore {
    pub fn new(repo: Arc<dyn ConversationRepository>) -> Self {
        Self { repo }
    }

    /// Return the conversation for exactly this participant set, creating it
    /// if needed.
    ///
    /// Creation is a conditional insert against the unique participant key.
    /// A caller that loses the insert race re-reads once and returns the
    /// winner's id. If that re-read still finds nothing the store is treated
    /// as inconsistent and the caller gets a retryable `StoreInconsistency`.
    pub async fn get_or_create(
        &self,
        participant_ids: &[Uuid],
    ) -> ConversationResult<ResolvedConversation> {
        let key = canonicalize(participant_ids)?;

        if let Some(existing) = self.repo.find_by_key(&key).await? {
            return Ok(ResolvedConversation {
                conversation_id: existing.id,
                created: false,
            });
        }

        if let Some(conversation_id) = self.claim_legacy(&key).await? {
            return Ok(ResolvedConversation {
                conversation_id,
                created: false,
            });
        }

        let candidate = NewConversation::new(participant_ids.to_vec(), key.clone());
        match self.repo.insert_if_absent(&candidate).await? {
            InsertOutcome::Inserted => {
                CONVERSATIONS_CREATED.inc();
                info!(
                    conversation_id = %candidate.id,
                    participant_key = %key,
                    "conversation created"
                );
                Ok(ResolvedConversation {
                    conversation_id: candidate.id,
                    created: true,
                })
            }
            InsertOutcome::KeyTaken => {
                GET_OR_CREATE_CONFLICTS.inc();
                debug!(participant_key = %key, "lost conversation insert race, re-reading");

                match self.repo.find_by_key(&key).await? {
                    Some(winner) => Ok(ResolvedConversation {
                        conversation_id: winner.id,
                        created: false,
                    }),
                    None => {
                        warn!(
                            participant_key = %key,
                            "participant key reported taken but no owner is visible"
                        );
                        Err(ConversationError::StoreInconsistency(format!(
                            "participant key {key} is taken but has no visible owner"
                        )))
                    }
                }
            }
        }
    }

    /// Adopt an unmigrated record for this participant set by writing its key.
    ///
    /// Uses the same fill-only-absent patch as the migration runner. Returns
    /// the id that owns the key afterwards, or `None` when no legacy record
    /// matches.
    async fn claim_legacy(&self, key: &ParticipantKey) -> ConversationResult<Option<Uuid>> {
        let candidates = self.repo.find_unkeyed(key).await?;
        let Some(record) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let patch = plan_backfill(&record).map_err(|e| {
            ConversationError::StoreInconsistency(format!(
                "legacy conversation {} matched {key} but cannot be keyed: {e}",
                record.id
            ))
        })?;

        match self.repo.apply_backfill(record.id, &patch).await? {
            BackfillOutcome::Applied => {
                info!(
                    conversation_id = %record.id,
                    participant_key = %key,
                    "legacy conversation keyed on resolve"
                );
                Ok(Some(record.id))
            }
            // Another resolve keyed a conversation first
            BackfillOutcome::KeyTaken { owner } => Ok(Some(owner)),
            BackfillOutcome::Unchanged => Ok(self.repo.find_by_key(key).await?.map(|r| r.id)),
        }
    }

    pub async fn get(&self, conversation_id: Uuid) -> ConversationResult<Conversation> {
        let record = self
            .repo
            .get(conversation_id)
            .await?
            .ok_or(ConversationError::NotFound)?;
        Conversation::try_from(record)
    }

    /// Inbox view: conversations containing `user_id`, most recent activity first.
    ///
    /// Records too damaged to read are logged and left out rather than
    /// failing the whole listing.
    pub async fn list_for_participant(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> ConversationResult<Vec<Conversation>> {
        let records = self.repo.list_for_participant(user_id, limit).await?;

        let mut conversations = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id;
            match Conversation::try_from(record) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => warn!(conversation_id = %id, error = %e, "skipping unreadable conversation"),
            }
        }
        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackfillPatch, ConversationRecord};
    use crate::repository::MemoryRepository;
    use async_trait::async_trait;

    /// Repository whose unique index always reports a conflict yet never
    /// shows the owning row.
    struct PhantomOwnerRepository;

    #[async_trait]
    impl ConversationRepository for PhantomOwnerRepository {
        async fn insert_if_absent(&self, _: &NewConversation) -> ConversationResult<InsertOutcome> {
            Ok(InsertOutcome::KeyTaken)
        }

        async fn find_by_key(&self, _: &ParticipantKey) -> ConversationResult<Option<ConversationRecord>> {
            Ok(None)
        }

        async fn find_unkeyed(&self, _: &ParticipantKey) -> ConversationResult<Vec<ConversationRecord>> {
            Ok(Vec::new())
        }

        async fn get(&self, _: Uuid) -> ConversationResult<Option<ConversationRecord>> {
            Ok(None)
        }

        async fn list_for_participant(&self, _: Uuid, _: usize) -> ConversationResult<Vec<ConversationRecord>> {
            Ok(Vec::new())
        }

        async fn scan(&self, _: Option<Uuid>, _: usize) -> ConversationResult<Vec<ConversationRecord>> {
            Ok(Vec::new())
        }

        async fn apply_backfill(&self, _: Uuid, _: &BackfillPatch) -> ConversationResult<BackfillOutcome> {
            Ok(BackfillOutcome::Unchanged)
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_order_and_duplicate_insensitive() {
        let store = ConversationStore::new(Arc::new(MemoryRepository::new()));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let first = store.get_or_create(&[a, b]).await.unwrap();
        let second = store.get_or_create(&[b, a, b]).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.conversation_id, second.conversation_id);
    }

    #[tokio::test]
    async fn test_get_or_create_rejects_single_participant() {
        let store = ConversationStore::new(Arc::new(MemoryRepository::new()));
        let a = Uuid::new_v4();
        assert!(matches!(
            store.get_or_create(&[a, a]).await,
            Err(ConversationError::InvalidParticipants(_))
        ));
    }

    #[tokio::test]
    async fn test_conflict_without_visible_owner_is_inconsistency() {
        let store = ConversationStore::new(Arc::new(PhantomOwnerRepository));
        let result = store.get_or_create(&[Uuid::new_v4(), Uuid::new_v4()]).await;

        let err = result.unwrap_err();
        assert!(matches!(err, ConversationError::StoreInconsistency(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_get_or_create_adopts_unkeyed_legacy_record() {
        let repo = Arc::new(MemoryRepository::new());
        let store = ConversationStore::new(repo.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let legacy_id = Uuid::new_v4();
        repo.seed_record(ConversationRecord {
            id: legacy_id,
            participant_ids: Some(vec![a, b]),
            participants: None,
            participant_key: None,
            last_message_id: None,
            last_message_time: None,
        })
        .await
        .unwrap();

        let resolved = store.get_or_create(&[b, a]).await.unwrap();
        assert_eq!(resolved.conversation_id, legacy_id);
        assert!(!resolved.created);
        assert_eq!(repo.conversation_count().await, 1);

        let stored = repo.get(legacy_id).await.unwrap().unwrap();
        assert_eq!(stored.participant_key, Some(canonicalize(&[a, b]).unwrap()));
        assert_eq!(stored.participants, Some(vec![a, b]));
        assert_eq!(stored.last_message_time, Some(0));
    }

    #[tokio::test]
    async fn test_get_unknown_conversation() {
        let store = ConversationStore::new(Arc::new(MemoryRepository::new()));
        assert!(matches!(
            store.get(Uuid::new_v4()).await,
            Err(ConversationError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_skips_unreadable_records() {
        let repo = Arc::new(MemoryRepository::new());
        let store = ConversationStore::new(repo.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.get_or_create(&[a, b]).await.unwrap();

        // Legacy row listing `a` alone can never yield a key
        repo.seed_record(ConversationRecord {
            id: Uuid::new_v4(),
            participant_ids: Some(vec![a]),
            participants: None,
            participant_key: None,
            last_message_id: None,
            last_message_time: None,
        })
        .await
        .unwrap();

        let listed = store.list_for_participant(a, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
