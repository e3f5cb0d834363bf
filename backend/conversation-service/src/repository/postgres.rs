//! PostgreSQL repository.
//!
//! `insert_if_absent` relies on `ON CONFLICT (participant_key) DO NOTHING`.
//! `commit_message` runs the pointer UPDATE first inside a transaction: the
//! UPDATE takes the conversation row lock, so concurrent appends to the same
//! conversation serialize there, and a loser re-evaluates the
//! `last_message_id IS NOT DISTINCT FROM` guard against the winner's row
//! version and affects zero rows. The same UPDATE also refuses a creation
//! time at or behind any stored message, which covers legacy rows whose
//! history predates `last_message_time`.

use super::{
    BackfillOutcome, CommitOutcome, ConversationRepository, InsertOutcome, MessageRepository,
};
use crate::error::{ConversationError, ConversationResult};
use crate::models::{BackfillPatch, ConversationRecord, Message, NewConversation};
use crate::services::participant_key::ParticipantKey;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str =
    "id, participant_ids, participants, participant_key, last_message_id, last_message_time";

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn conversation_exists(&self, id: Uuid) -> ConversationResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM conversations WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: Uuid,
    participant_ids: Option<Vec<Uuid>>,
    participants: Option<Vec<Uuid>>,
    participant_key: Option<String>,
    last_message_id: Option<Uuid>,
    last_message_time: Option<i64>,
}

impl TryFrom<ConversationRow> for ConversationRecord {
    type Error = ConversationError;

    fn try_from(row: ConversationRow) -> ConversationResult<Self> {
        let participant_key = row
            .participant_key
            .as_deref()
            .map(ParticipantKey::parse)
            .transpose()
            .map_err(|e| {
                ConversationError::StoreInconsistency(format!(
                    "conversation {} has a malformed participant_key: {e}",
                    row.id
                ))
            })?;

        Ok(ConversationRecord {
            id: row.id,
            participant_ids: row.participant_ids,
            participants: row.participants,
            participant_key,
            last_message_id: row.last_message_id,
            last_message_time: row.last_message_time,
        })
    }
}

fn into_records(rows: Vec<ConversationRow>) -> ConversationResult<Vec<ConversationRecord>> {
    rows.into_iter().map(ConversationRecord::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    author_id: Uuid,
    body: String,
    format: String,
    creation_time: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = ConversationError;

    fn try_from(row: MessageRow) -> ConversationResult<Self> {
        let format = row.format.parse().map_err(|_| {
            ConversationError::StoreInconsistency(format!(
                "message {} has unknown format {}",
                row.id, row.format
            ))
        })?;

        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            author_id: row.author_id,
            body: row.body,
            format,
            creation_time: row.creation_time,
        })
    }
}

#[async_trait]
impl ConversationRepository for PgRepository {
    async fn insert_if_absent(
        &self,
        conversation: &NewConversation,
    ) -> ConversationResult<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversations (id, participants, participant_key, last_message_time)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (participant_key) DO NOTHING
            "#,
        )
        .bind(conversation.id)
        .bind(&conversation.participants)
        .bind(conversation.participant_key.as_str())
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::KeyTaken
        })
    }

    async fn find_by_key(
        &self,
        key: &ParticipantKey,
    ) -> ConversationResult<Option<ConversationRecord>> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE participant_key = $1");
        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(ConversationRecord::try_from)
            .transpose()
    }

    async fn find_unkeyed(
        &self,
        key: &ParticipantKey,
    ) -> ConversationResult<Vec<ConversationRecord>> {
        // Array containment both ways is set equality, duplicates ignored
        let members = key.members();
        let sql = format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations
            WHERE participant_key IS NULL
              AND ((participants @> $1 AND participants <@ $1)
                OR (participants IS NULL AND participant_ids @> $1 AND participant_ids <@ $1))
            ORDER BY id ASC
            "#
        );
        let rows = sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(&members)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    async fn get(&self, id: Uuid) -> ConversationResult<Option<ConversationRecord>> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1");
        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ConversationRecord::try_from)
            .transpose()
    }

    async fn list_for_participant(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> ConversationResult<Vec<ConversationRecord>> {
        let sql = format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations
            WHERE $1 = ANY(COALESCE(participants, participant_ids))
            ORDER BY COALESCE(last_message_time, 0) DESC, id ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    async fn scan(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> ConversationResult<Vec<ConversationRecord>> {
        let sql = format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations
            WHERE ($1::uuid IS NULL OR id > $1)
            ORDER BY id ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(after)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        into_records(rows)
    }

    async fn apply_backfill(
        &self,
        id: Uuid,
        patch: &BackfillPatch,
    ) -> ConversationResult<BackfillOutcome> {
        let key = patch.participant_key.as_ref().map(ParticipantKey::as_str);

        // COALESCE keeps any value written concurrently by live traffic
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET participants = COALESCE(participants, $2),
                participant_key = COALESCE(participant_key, $3),
                last_message_time = COALESCE(last_message_time, $4)
            WHERE id = $1
              AND (($2::uuid[] IS NOT NULL AND participants IS NULL)
                OR ($3::text IS NOT NULL AND participant_key IS NULL)
                OR ($4::bigint IS NOT NULL AND last_message_time IS NULL))
            "#,
        )
        .bind(id)
        .bind(patch.participants.as_deref())
        .bind(key)
        .bind(patch.last_message_time)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => Ok(BackfillOutcome::Applied),
            Ok(_) => {
                if self.conversation_exists(id).await? {
                    Ok(BackfillOutcome::Unchanged)
                } else {
                    Err(ConversationError::NotFound)
                }
            }
            Err(e) => match ConversationError::from(e) {
                ConversationError::StoreConflict(reason) => {
                    let owner = match &patch.participant_key {
                        Some(key) => self.find_by_key(key).await?.map(|record| record.id),
                        None => None,
                    };
                    match owner {
                        Some(owner) if owner != id => Ok(BackfillOutcome::KeyTaken { owner }),
                        _ => Err(ConversationError::StoreConflict(reason)),
                    }
                }
                other => Err(other),
            },
        }
    }
}

#[async_trait]
impl MessageRepository for PgRepository {
    async fn commit_message(
        &self,
        message: &Message,
        expected_last: Option<Uuid>,
    ) -> ConversationResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_id = $2,
                last_message_time = $3
            WHERE id = $1
              AND last_message_id IS NOT DISTINCT FROM $4
              AND COALESCE(last_message_time, 0) < $3
              AND NOT EXISTS (
                  SELECT 1 FROM messages
                  WHERE conversation_id = $1 AND created_at >= $3
              )
            "#,
        )
        .bind(message.conversation_id)
        .bind(message.id)
        .bind(message.creation_time)
        .bind(expected_last)
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            tx.rollback().await?;
            let outcome = if self.conversation_exists(message.conversation_id).await? {
                CommitOutcome::Stale
            } else {
                CommitOutcome::ConversationMissing
            };
            debug!(
                conversation_id = %message.conversation_id,
                ?outcome,
                "message commit not applied"
            );
            return Ok(outcome);
        }

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, author_id, body, format, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.author_id)
        .bind(&message.body)
        .bind(message.format.as_str())
        .bind(message.creation_time)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    async fn latest_message_time(&self, conversation_id: Uuid) -> ConversationResult<Option<i64>> {
        let newest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM messages WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(newest)
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        after: Option<i64>,
        limit: usize,
    ) -> ConversationResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, conversation_id, author_id, body, format, created_at AS creation_time
            FROM messages
            WHERE conversation_id = $1
              AND ($2::bigint IS NULL OR created_at > $2)
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(conversation_id)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }
}
