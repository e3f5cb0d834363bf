//! Caller identity resolution.
//!
//! The conversation core never authenticates anyone itself. Gateways hand it
//! an opaque caller token and an [`IdentityResolver`] turns that into the
//! stable user id used as a participant.

use crate::error::{ConversationError, ConversationResult};
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Fails with `Unauthenticated` when the token maps to no user
    async fn resolve(&self, caller: &str) -> ConversationResult<Uuid>;
}

/// Fixed token table, for tests and single-tenant embedders
#[derive(Debug, Default, Clone)]
pub struct StaticIdentityResolver {
    tokens: HashMap<String, Uuid>,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: impl Into<String>, user_id: Uuid) -> Self {
        self.tokens.insert(token.into(), user_id);
        self
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, caller: &str) -> ConversationResult<Uuid> {
        self.tokens
            .get(caller)
            .copied()
            .ok_or(ConversationError::Unauthenticated)
    }
}
