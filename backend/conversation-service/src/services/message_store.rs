//! Message append and listing.
//!
//! Appends are optimistic: read the conversation, build the message with a
//! creation time strictly after the current pointer, then commit it together
//! with the pointer move only if the pointer has not changed in between. A
//! stale commit writes nothing and the whole step is repeated, up to
//! `append_max_attempts` times.

use crate::config::Config;
use crate::error::{ConversationError, ConversationResult};
use crate::metrics::{APPEND_RETRIES, MESSAGES_APPENDED};
use crate::models::{Conversation, Cursor, Message, MessageFormat, Page};
use crate::repository::{CommitOutcome, ConversationRepository, MessageRepository};
use crate::services::clock::Clock;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct MessageStore {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl MessageStore {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            conversations,
            messages,
            clock,
            config,
        }
    }

    fn validate_body(&self, body: &str) -> ConversationResult<()> {
        if body.trim().is_empty() {
            return Err(ConversationError::InvalidMessage(
                "message body is empty".into(),
            ));
        }
        if body.len() > self.config.max_body_bytes {
            return Err(ConversationError::InvalidMessage(format!(
                "message body is {} bytes, limit is {}",
                body.len(),
                self.config.max_body_bytes
            )));
        }
        Ok(())
    }

    async fn load(&self, conversation_id: Uuid) -> ConversationResult<Conversation> {
        let record = self
            .conversations
            .get(conversation_id)
            .await?
            .ok_or(ConversationError::NotFound)?;
        Conversation::try_from(record)
    }

    pub async fn append(
        &self,
        conversation_id: Uuid,
        author_id: Uuid,
        body: &str,
        format: MessageFormat,
    ) -> ConversationResult<Message> {
        self.validate_body(body)?;

        let attempts = self.config.append_max_attempts;
        for attempt in 1..=attempts {
            let conversation = self.load(conversation_id).await?;
            if !conversation.is_participant(author_id) {
                return Err(ConversationError::UnauthorizedAuthor {
                    conversation_id,
                    author_id,
                });
            }

            // Legacy rows can hold history newer than their pointer time
            let newest_stored = self
                .messages
                .latest_message_time(conversation_id)
                .await?
                .unwrap_or(0);
            let floor = conversation.last_message_time.max(newest_stored);

            // Wall clock may tie or run behind the newest stored message
            let creation_time = self.clock.now_millis().max(floor + 1);

            let message = Message {
                id: Uuid::new_v4(),
                conversation_id,
                author_id,
                body: body.to_string(),
                format,
                creation_time,
            };

            match self
                .messages
                .commit_message(&message, conversation.last_message_id)
                .await
            {
                Ok(CommitOutcome::Committed) => {
                    MESSAGES_APPENDED.inc();
                    debug!(
                        conversation_id = %conversation_id,
                        message_id = %message.id,
                        creation_time,
                        attempt,
                        "message appended"
                    );
                    return Ok(message);
                }
                Ok(CommitOutcome::ConversationMissing) => return Err(ConversationError::NotFound),
                Ok(CommitOutcome::Stale) | Err(ConversationError::StoreConflict(_)) => {
                    APPEND_RETRIES.inc();
                    debug!(
                        conversation_id = %conversation_id,
                        attempt,
                        "conversation pointer moved during append, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            conversation_id = %conversation_id,
            attempts,
            "append gave up after repeated pointer conflicts"
        );
        Err(ConversationError::StoreInconsistency(format!(
            "append to conversation {conversation_id} lost {attempts} consecutive commit races"
        )))
    }

    /// One page of messages in creation order, resuming after `cursor`
    pub async fn list(
        &self,
        conversation_id: Uuid,
        cursor: Option<Cursor>,
        page_size: Option<usize>,
    ) -> ConversationResult<Page<Message>> {
        self.load(conversation_id).await?;

        let limit = self.config.effective_page_size(page_size);
        let mut items = self
            .messages
            .list_messages(conversation_id, cursor.map(|c| c.position()), limit + 1)
            .await?;

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|m| Cursor::after(m.creation_time))
        } else {
            None
        };

        Ok(Page { items, next_cursor })
    }

    /// Lazy, finite stream over the whole conversation starting after `cursor`.
    ///
    /// Pages of `page_size` are fetched only as the consumer pulls. The stream
    /// ends at the newest message visible when its last page is read; it can be
    /// restarted from the `creation_time` of any delivered message.
    pub async fn stream(
        &self,
        conversation_id: Uuid,
        cursor: Option<Cursor>,
    ) -> ConversationResult<BoxStream<'static, ConversationResult<Message>>> {
        self.load(conversation_id).await?;

        let messages = Arc::clone(&self.messages);
        let batch = self.config.page_size;
        let start = cursor.map(|c| c.position());

        let pages = stream::try_unfold((start, false), move |(after, exhausted)| {
            let messages = Arc::clone(&messages);
            async move {
                if exhausted {
                    return Ok(None);
                }
                let page = messages
                    .list_messages(conversation_id, after, batch)
                    .await?;
                if page.is_empty() {
                    return Ok(None);
                }

                let next = (page.last().map(|m| m.creation_time), page.len() < batch);
                let items = stream::iter(page.into_iter().map(Ok::<_, ConversationError>));
                Ok::<_, ConversationError>(Some((items, next)))
            }
        });

        Ok(pages.try_flatten().boxed())
    }
}
