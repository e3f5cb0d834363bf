pub mod clock;
pub mod conversation_service;
pub mod conversation_store;
pub mod identity;
pub mod message_store;
pub mod migration_runner;
pub mod participant_key;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation_service::ConversationService;
pub use conversation_store::{ConversationStore, ResolvedConversation};
pub use identity::{IdentityResolver, StaticIdentityResolver};
pub use message_store::MessageStore;
pub use migration_runner::{is_migrated, plan_backfill, MigrationFailure, MigrationReport, MigrationRunner};
pub use participant_key::{canonicalize, ParticipantKey};
