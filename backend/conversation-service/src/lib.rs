//! Direct-messaging conversation core.
//!
//! Conversations are identified by their canonical participant set and are
//! created on first use. Messages are appended with strictly increasing
//! creation times, and each append moves the conversation's last-message
//! pointer atomically with the message write. A migration runner backfills
//! records written before the participant-key schema.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod services;

pub use config::Config;
pub use error::{ConversationError, ConversationResult, ErrorKind, MigrationRecordError};
pub use models::{Conversation, ConversationRecord, Cursor, Message, MessageFormat, Page};
pub use repository::{MemoryRepository, PgRepository};
pub use services::{
    Clock, ConversationService, IdentityResolver, ManualClock, MigrationReport, MigrationRunner,
    ParticipantKey, StaticIdentityResolver, SystemClock,
};
