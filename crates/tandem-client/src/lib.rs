//! # tandem-client
//!
//! Chat synchronization, caching and credit-gated messaging for two-party
//! conversations over a hosted tree store.
//!
//! The UI layer talks to [`ChatClient`]; everything underneath is split by
//! concern:
//! - [`sync`] serves cached conversation lists and message threads, then
//!   keeps them live from remote subscriptions
//! - [`pipeline`] validates, persists and bills outgoing messages
//! - [`receipts`] marks messages read and aggregates the unread badge
//! - [`keys`] runs the keypair lifecycle at login
//! - [`profile`] and [`balance`] wrap cached profile and credit reads

pub mod balance;
pub mod client;
pub mod config;
pub mod error;
pub mod feedback;
pub mod keys;
pub mod layout;
pub mod pipeline;
pub mod profile;
pub mod receipts;
pub mod sync;

pub use client::ChatClient;
pub use config::ClientConfig;
pub use error::{ClientError, SendError};
pub use feedback::Notice;
pub use pipeline::{SendOutcome, SendRequest, SendStage};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber. Honors `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("tandem_client=debug,tandem_remote=info,tandem_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
