/// Application name
pub const APP_NAME: &str = "Tandem";

/// Separator placed between the two sorted participant IDs
pub const CONVERSATION_ID_SEPARATOR: char = '_';

/// Profile and favorites cache lifetime (30 minutes)
pub const PROFILE_CACHE_TTL_MS: i64 = 30 * 60 * 1000;

/// A cached chat summary is reused only while its `updatedAt` is this recent (5 minutes)
pub const SUMMARY_FRESHNESS_MS: i64 = 5 * 60 * 1000;

/// Number of most recently touched conversations tracked by list and badge subscriptions
pub const RECENT_CONVERSATION_LIMIT: usize = 20;

/// Unread messages older than this stop counting toward the badge (24 hours)
pub const UNREAD_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Maximum image attachment size in bytes (8 MiB)
pub const MAX_IMAGE_SIZE: usize = 8 * 1024 * 1024;

/// Credits spent per sent message
pub const CREDITS_PER_MESSAGE: i64 = 1;

/// RSA modulus size for the messaging keypair
pub const RSA_KEY_BITS: usize = 2048;

/// SHA-256 digest length, used to size the OAEP plaintext limit
pub const OAEP_DIGEST_SIZE: usize = 32;

/// How often the live unread badge re-applies the time window (seconds)
pub const UNREAD_RECOUNT_SECS: u64 = 60;
