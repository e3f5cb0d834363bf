use db_pool::env_utils::env_or;
use dotenvy::dotenv;

pub const SERVICE_NAME: &str = "conversation-service";

/// Service configuration. Database pool settings live in [`db_pool::DbConfig`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Default number of messages per page
    pub page_size: usize,
    /// Upper bound a caller may request per page
    pub max_page_size: usize,
    /// Maximum message body size in bytes
    pub max_body_bytes: usize,
    /// Conditional-commit attempts before an append gives up
    pub append_max_attempts: u32,
    /// Records fetched per migration scan batch
    pub migration_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_page_size: 200,
            max_body_bytes: 8 * 1024,
            append_max_attempts: 5,
            migration_batch_size: 200,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::ConversationError> {
        dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            page_size: env_or("CONVERSATION_PAGE_SIZE", defaults.page_size),
            max_page_size: env_or("CONVERSATION_MAX_PAGE_SIZE", defaults.max_page_size),
            max_body_bytes: env_or("MESSAGE_MAX_BODY_BYTES", defaults.max_body_bytes),
            append_max_attempts: env_or("APPEND_MAX_ATTEMPTS", defaults.append_max_attempts),
            migration_batch_size: env_or("MIGRATION_BATCH_SIZE", defaults.migration_batch_size),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), crate::error::ConversationError> {
        use crate::error::ConversationError::Config as Invalid;

        if self.page_size == 0 || self.max_page_size == 0 {
            return Err(Invalid("page sizes must be positive".into()));
        }
        if self.page_size > self.max_page_size {
            return Err(Invalid(format!(
                "CONVERSATION_PAGE_SIZE ({}) exceeds CONVERSATION_MAX_PAGE_SIZE ({})",
                self.page_size, self.max_page_size
            )));
        }
        if self.append_max_attempts == 0 {
            return Err(Invalid("APPEND_MAX_ATTEMPTS must be at least 1".into()));
        }
        if self.migration_batch_size == 0 {
            return Err(Invalid("MIGRATION_BATCH_SIZE must be positive".into()));
        }
        Ok(())
    }

    /// Clamp a caller-requested page size into `1..=max_page_size`
    pub fn effective_page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.page_size)
            .clamp(1, self.max_page_size)
    }
}
