//! Conversation addressing.
//!
//! A conversation lives under one key in the remote tree and in every local
//! cache namespace. The key is the two participant IDs, sorted and joined,
//! so both sides compute the same value without coordinating.

use crate::constants::CONVERSATION_ID_SEPARATOR;
use crate::error::ValidationError;
use crate::types::{ConversationId, UserId};

/// Derive the canonical conversation ID for two participants.
///
/// Order-independent. Rejects empty IDs and self-conversations.
pub fn conversation_id(a: &UserId, b: &UserId) -> Result<ConversationId, ValidationError> {
    if a.is_empty() || b.is_empty() {
        return Err(ValidationError::EmptyParticipant);
    }
    if a == b {
        return Err(ValidationError::SelfConversation);
    }

    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    Ok(ConversationId::from_raw(format!(
        "{}{}{}",
        first.as_str(),
        CONVERSATION_ID_SEPARATOR,
        second.as_str()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_pair() {
        let u1 = UserId::from("u1");
        let u2 = UserId::from("u2");
        assert_eq!(conversation_id(&u1, &u2).unwrap().as_str(), "u1_u2");
        assert_eq!(conversation_id(&u2, &u1).unwrap().as_str(), "u1_u2");
    }

    #[test]
    fn test_symmetric_for_many_pairs() {
        let ids = ["alice", "Bob", "carol_9", "0x1f", "zz", "a"];
        for a in ids {
            for b in ids {
                if a == b {
                    continue;
                }
                let (a, b) = (UserId::from(a), UserId::from(b));
                assert_eq!(conversation_id(&a, &b).unwrap(), conversation_id(&b, &a).unwrap());
            }
        }
    }

    #[test]
    fn test_distinct_pairs_differ() {
        let a = UserId::from("a");
        let b = UserId::from("b");
        let c = UserId::from("c");
        assert_ne!(conversation_id(&a, &b).unwrap(), conversation_id(&a, &c).unwrap());
        assert_ne!(conversation_id(&a, &b).unwrap(), conversation_id(&b, &c).unwrap());
    }

    #[test]
    fn test_self_conversation_rejected() {
        let a = UserId::from("same");
        assert_eq!(
            conversation_id(&a, &a),
            Err(ValidationError::SelfConversation)
        );
    }

    #[test]
    fn test_empty_participant_rejected() {
        assert_eq!(
            conversation_id(&UserId::from(""), &UserId::from("x")),
            Err(ValidationError::EmptyParticipant)
        );
    }
}
