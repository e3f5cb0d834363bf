use crate::config::Config;
use crate::error::ConversationResult;
use crate::models::{Conversation, Cursor, Message, MessageFormat, Page};
use crate::repository::{ConversationRepository, MessageRepository, PgRepository};
use crate::services::clock::{Clock, SystemClock};
use crate::services::conversation_store::ConversationStore;
use crate::services::identity::IdentityResolver;
use crate::services::message_store::MessageStore;
use crate::services::migration_runner::{MigrationReport, MigrationRunner};
use futures::stream::BoxStream;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Entry point for request handlers. Safe to share across tasks.
pub struct ConversationService {
    config: Config,
    repo: Arc<dyn ConversationRepository>,
    conversations: ConversationStore,
    messages: MessageStore,
    identity: Arc<dyn IdentityResolver>,
}

impl ConversationService {
    pub fn new<R>(
        repo: Arc<R>,
        identity: Arc<dyn IdentityResolver>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self
    where
        R: ConversationRepository + MessageRepository + 'static,
    {
        let conversation_repo: Arc<dyn ConversationRepository> = repo.clone();
        let message_repo: Arc<dyn MessageRepository> = repo;

        Self {
            conversations: ConversationStore::new(Arc::clone(&conversation_repo)),
            messages: MessageStore::new(
                Arc::clone(&conversation_repo),
                message_repo,
                clock,
                config.clone(),
            ),
            repo: conversation_repo,
            identity,
            config,
        }
    }

    pub fn with_postgres(pool: PgPool, identity: Arc<dyn IdentityResolver>, config: Config) -> Self {
        Self::new(
            Arc::new(PgRepository::new(pool)),
            identity,
            Arc::new(SystemClock),
            config,
        )
    }

    /// Conversation id for this exact participant set, created on first use
    pub async fn resolve_conversation(&self, participant_ids: &[Uuid]) -> ConversationResult<Uuid> {
        Ok(self
            .conversations
            .get_or_create(participant_ids)
            .await?
            .conversation_id)
    }

    /// Like [`resolve_conversation`](Self::resolve_conversation) with the
    /// authenticated caller added to the set
    pub async fn resolve_conversation_as(
        &self,
        caller: &str,
        other_participants: &[Uuid],
    ) -> ConversationResult<Uuid> {
        let caller_id = self.identity.resolve(caller).await?;
        let mut participants = Vec::with_capacity(other_participants.len() + 1);
        participants.push(caller_id);
        participants.extend_from_slice(other_participants);
        self.resolve_conversation(&participants).await
    }

    pub async fn get_conversation(&self, conversation_id: Uuid) -> ConversationResult<Conversation> {
        self.conversations.get(conversation_id).await
    }

    /// Inbox for `user_id`, newest activity first
    pub async fn list_conversations(
        &self,
        user_id: Uuid,
        limit: Option<usize>,
    ) -> ConversationResult<Vec<Conversation>> {
        let limit = self.config.effective_page_size(limit);
        self.conversations.list_for_participant(user_id, limit).await
    }

    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        author_id: Uuid,
        body: &str,
        format: MessageFormat,
    ) -> ConversationResult<Uuid> {
        Ok(self
            .messages
            .append(conversation_id, author_id, body, format)
            .await?
            .id)
    }

    pub async fn send_message_as(
        &self,
        caller: &str,
        conversation_id: Uuid,
        body: &str,
        format: MessageFormat,
    ) -> ConversationResult<Uuid> {
        let author_id = self.identity.resolve(caller).await?;
        self.send_message(conversation_id, author_id, body, format)
            .await
    }

    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        cursor: Option<Cursor>,
        page_size: Option<usize>,
    ) -> ConversationResult<Page<Message>> {
        self.messages.list(conversation_id, cursor, page_size).await
    }

    pub async fn message_stream(
        &self,
        conversation_id: Uuid,
        cursor: Option<Cursor>,
    ) -> ConversationResult<BoxStream<'static, ConversationResult<Message>>> {
        self.messages.stream(conversation_id, cursor).await
    }

    pub async fn run_conversation_migration(&self) -> ConversationResult<MigrationReport> {
        MigrationRunner::new(Arc::clone(&self.repo), self.config.migration_batch_size)
            .run()
            .await
    }
}
