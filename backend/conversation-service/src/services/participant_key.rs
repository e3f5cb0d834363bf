//! Canonical participant keys
//!
//! A conversation is identified for lookup purposes by the *set* of its
//! participants, never by the order they were supplied in. The key is the
//! sorted, de-duplicated list of hyphenated lowercase UUIDs joined by `:`.
//! `conversations.participant_key` carries a unique index on this value.

use crate::error::{ConversationError, ConversationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

const SEPARATOR: &str = ":";

/// Minimum number of distinct identities a conversation needs
pub const MIN_PARTICIPANTS: usize = 2;

/// Order- and duplicate-independent encoding of a participant set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantKey(String);

impl ParticipantKey {
    /// Validate a key read back from storage.
    ///
    /// The stored form must already be canonical; a key that decodes but is not
    /// in canonical order is rejected rather than silently re-encoded.
    pub fn parse(raw: &str) -> ConversationResult<Self> {
        let mut members = Vec::new();
        for part in raw.split(SEPARATOR) {
            let id = Uuid::parse_str(part).map_err(|_| {
                ConversationError::InvalidParticipants(format!("malformed key segment: {part}"))
            })?;
            members.push(id);
        }

        let key = canonicalize(&members)?;
        if key.0 != raw {
            return Err(ConversationError::InvalidParticipants(
                "participant key is not canonical".into(),
            ));
        }
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sorted distinct members encoded in the key
    pub fn members(&self) -> Vec<Uuid> {
        self.0
            .split(SEPARATOR)
            .filter_map(|part| Uuid::parse_str(part).ok())
            .collect()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.members().binary_search(&id).is_ok()
    }
}

impl fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalize a participant list into its lookup key.
///
/// Fails with `InvalidParticipants` if fewer than two distinct identities are
/// supplied. Whether the identities exist is the caller's concern.
pub fn canonicalize(participant_ids: &[Uuid]) -> ConversationResult<ParticipantKey> {
    let distinct: BTreeSet<Uuid> = participant_ids.iter().copied().collect();

    if distinct.len() < MIN_PARTICIPANTS {
        return Err(ConversationError::InvalidParticipants(format!(
            "a conversation needs at least {} distinct participants, got {}",
            MIN_PARTICIPANTS,
            distinct.len()
        )));
    }

    let encoded = distinct
        .iter()
        .map(|id| id.hyphenated().to_string())
        .collect::<Vec<_>>()
        .join(SEPARATOR);

    Ok(ParticipantKey(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_order_and_duplicates_do_not_matter() {
        let v = ids(3);
        let (a, b, c) = (v[0], v[1], v[2]);

        let reference = canonicalize(&[a, b, c]).unwrap();
        for input in [
            vec![c, b, a],
            vec![b, a, c, a],
            vec![a, a, b, b, c, c],
            vec![c, a, b, c],
        ] {
            assert_eq!(canonicalize(&input).unwrap(), reference);
        }
    }

    #[test]
    fn test_rejects_fewer_than_two_distinct() {
        let a = Uuid::new_v4();
        assert!(matches!(
            canonicalize(&[]),
            Err(ConversationError::InvalidParticipants(_))
        ));
        assert!(matches!(
            canonicalize(&[a]),
            Err(ConversationError::InvalidParticipants(_))
        ));
        assert!(matches!(
            canonicalize(&[a, a, a]),
            Err(ConversationError::InvalidParticipants(_))
        ));
    }

    #[test]
    fn test_members_are_sorted_and_distinct() {
        let v = ids(4);
        let key = canonicalize(&[v[3], v[1], v[3], v[0], v[2]]).unwrap();

        let mut expected = v.clone();
        expected.sort();
        assert_eq!(key.members(), expected);
        assert!(key.contains(v[2]));
        assert!(!key.contains(Uuid::new_v4()));
    }

    #[test]
    fn test_parse_round_trips_canonical_form_only() {
        let v = ids(2);
        let key = canonicalize(&v).unwrap();
        assert_eq!(ParticipantKey::parse(key.as_str()).unwrap(), key);

        let mut sorted = v.clone();
        sorted.sort();
        let reversed = format!("{}:{}", sorted[1], sorted[0]);
        assert!(ParticipantKey::parse(&reversed).is_err());
        assert!(ParticipantKey::parse("not-a-uuid:also-not").is_err());
    }

    #[test]
    fn test_uppercase_input_uuid_still_canonical() {
        // Uuid parsing normalises case, so the key is stable regardless of how
        // the identity was spelled upstream.
        let a = Uuid::parse_str("A1A2A3A4-B1B2-C1C2-D1D2-D3D4D5D6D7D8").unwrap();
        let b = Uuid::new_v4();
        let key = canonicalize(&[a, b]).unwrap();
        assert_eq!(key.as_str(), key.as_str().to_lowercase());
    }
}
