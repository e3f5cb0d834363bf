pub mod conversation;
pub mod message;

pub use conversation::{BackfillPatch, Conversation, ConversationRecord, NewConversation};
pub use message::{Cursor, Message, MessageFormat, Page};
