use thiserror::Error;
use uuid::Uuid;

pub type ConversationResult<T> = Result<T, ConversationError>;

/// Distinguishes between retryable and permanent errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Permanent,
}

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("not found")]
    NotFound,

    #[error("author {author_id} is not a participant of conversation {conversation_id}")]
    UnauthorizedAuthor {
        conversation_id: Uuid,
        author_id: Uuid,
    },

    /// Transient race on a unique key or pointer update. Recovered internally.
    #[error("store conflict: {0}")]
    StoreConflict(String),

    /// A race that persisted after the internal retry.
    #[error("store inconsistency: {0}")]
    StoreInconsistency(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for ConversationError {
    fn from(e: sqlx::Error) -> Self {
        // 23505 = unique_violation
        let is_unique_violation = e
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code == "23505")
            .unwrap_or(false);

        if is_unique_violation {
            ConversationError::StoreConflict(e.to_string())
        } else {
            ConversationError::Database(e)
        }
    }
}

impl ConversationError {
    pub fn kind(&self) -> ErrorKind {
        if self.is_retryable() {
            ErrorKind::Retryable
        } else {
            ErrorKind::Permanent
        }
    }

    /// Returns whether the caller may safely retry the same request
    pub fn is_retryable(&self) -> bool {
        match self {
            ConversationError::StoreConflict(_) | ConversationError::StoreInconsistency(_) => true,
            ConversationError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }

    /// Returns HTTP status code for gateways that surface these errors
    pub fn status_code(&self) -> u16 {
        match self {
            ConversationError::InvalidParticipants(_)
            | ConversationError::InvalidMessage(_)
            | ConversationError::InvalidCursor => 400,
            ConversationError::Unauthenticated => 401,
            ConversationError::UnauthorizedAuthor { .. } => 403,
            ConversationError::NotFound => 404,
            ConversationError::StoreConflict(_) => 409,
            ConversationError::StoreInconsistency(_) => 503,
            ConversationError::Config(_) | ConversationError::Database(_) => 500,
        }
    }
}

/// Why a single record could not be backfilled. Never aborts a migration run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationRecordError {
    #[error("record has no participant information")]
    MissingParticipants,

    #[error("record has fewer than two distinct participants")]
    TooFewParticipants,

    #[error("participant key {key} already belongs to conversation {owner}")]
    DuplicateKey { key: String, owner: Uuid },

    #[error("write failed: {0}")]
    Store(String),
}
