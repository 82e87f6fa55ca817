//! Where things live in the remote tree.

use tandem_shared::{ConversationId, UserId};

pub fn user(user: &UserId) -> String {
    format!("users/{user}")
}

pub fn credits(user: &UserId) -> String {
    format!("users/{user}/credits")
}

pub fn public_key(user: &UserId) -> String {
    format!("users/{user}/publicKey")
}

pub fn favorites(user: &UserId) -> String {
    format!("favorites/{user}")
}

pub fn summary(conversation: &ConversationId) -> String {
    format!("chats/{conversation}")
}

pub fn messages(conversation: &ConversationId) -> String {
    format!("messages/{conversation}")
}

pub fn message(conversation: &ConversationId, message_id: &str) -> String {
    format!("messages/{conversation}/{message_id}")
}

/// A user's conversation index.
pub fn pointers(user: &UserId) -> String {
    format!("user_chats/{user}")
}

pub fn pointer(user: &UserId, conversation: &ConversationId) -> String {
    format!("user_chats/{user}/{conversation}")
}

/// Blob path for an uploaded image: `chat_images/{conversation}/{ts}_{name}`.
pub fn image_blob(conversation: &ConversationId, timestamp: i64, file_name: &str) -> String {
    format!(
        "chat_images/{conversation}/{timestamp}_{}",
        sanitize_file_name(file_name)
    )
}

/// Keep ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    // Only the final component of whatever path the picker handed us.
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned.to_string()
    }
}
