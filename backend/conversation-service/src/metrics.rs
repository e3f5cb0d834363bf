//! Prometheus counters for the conversation core

use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

lazy_static::lazy_static! {
    pub static ref CONVERSATIONS_CREATED: IntCounter = register_int_counter!(
        "conversations_created_total",
        "Conversations created by get-or-create"
    ).expect("Prometheus metrics registration should succeed at startup");

    /// get-or-create inserts that lost the race on participant_key
    pub static ref GET_OR_CREATE_CONFLICTS: IntCounter = register_int_counter!(
        "conversation_get_or_create_conflicts_total",
        "Conversation inserts that lost the unique participant_key race"
    ).expect("Prometheus metrics registration should succeed at startup");

    pub static ref MESSAGES_APPENDED: IntCounter = register_int_counter!(
        "messages_appended_total",
        "Messages committed together with their conversation pointer"
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Conditional commits rejected because another append won
    pub static ref APPEND_RETRIES: IntCounter = register_int_counter!(
        "message_append_retries_total",
        "Message appends retried after a stale last_message_id"
    ).expect("Prometheus metrics registration should succeed at startup");

    pub static ref MIGRATION_RECORDS: IntCounterVec = register_int_counter_vec!(
        "conversation_migration_records_total",
        "Conversation records visited by the migration runner by outcome",
        &["outcome"]
    ).expect("Prometheus metrics registration should succeed at startup");
}
