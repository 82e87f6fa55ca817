//! Credit balance reads and the transactional debit.
//!
//! `users/{uid}/credits` is the only remote value that concurrent clients
//! race on, so it is only ever written through a transaction. The last value
//! seen is cached in the `balances` namespace for the send pre-check.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use tandem_remote::{RemoteError, RemoteStore, TxDecision};
use tandem_shared::UserId;
use tandem_store::{CacheNamespace, CacheService};

use crate::layout;

#[derive(Clone)]
pub struct BalanceService {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<CacheService>,
}

impl BalanceService {
    pub fn new(remote: Arc<dyn RemoteStore>, cache: Arc<CacheService>) -> Self {
        Self { remote, cache }
    }

    /// Last balance seen for `user`, without touching the network.
    pub fn cached(&self, user: &UserId) -> Option<i64> {
        match self.cache.get(CacheNamespace::BALANCES, user.as_str()) {
            Ok(balance) => balance,
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to read cached balance");
                None
            }
        }
    }

    /// Cached balance, fetched from the remote store on a miss.
    pub async fn balance(&self, user: &UserId) -> Result<i64, RemoteError> {
        match self.cached(user) {
            Some(balance) => Ok(balance),
            None => self.refresh(user).await,
        }
    }

    /// Read the remote counter and update the cache.
    pub async fn refresh(&self, user: &UserId) -> Result<i64, RemoteError> {
        let value = self.remote.get(&layout::credits(user)).await?;
        let balance = parse_credits(value.as_ref());
        self.remember(user, balance);
        Ok(balance)
    }

    /// Atomically subtract `amount`, never going below zero. Returns the new
    /// balance.
    pub async fn debit(&self, user: &UserId, amount: i64) -> Result<i64, RemoteError> {
        let outcome = self
            .remote
            .transaction(
                &layout::credits(user),
                Box::new(move |current| {
                    let balance = parse_credits(current.as_ref());
                    TxDecision::Commit(Some(json!((balance - amount).max(0))))
                }),
            )
            .await?;

        let balance = parse_credits(outcome.snapshot.as_ref());
        debug!(user = %user, amount, balance, "Debited credits");
        self.remember(user, balance);
        Ok(balance)
    }

    fn remember(&self, user: &UserId, balance: i64) {
        if let Err(e) = self.cache.set(CacheNamespace::BALANCES, user.as_str(), &balance) {
            warn!(user = %user, error = %e, "Failed to cache balance");
        }
    }
}

/// Missing or non-numeric balances count as zero.
fn parse_credits(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.floor() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
