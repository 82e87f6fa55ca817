//! Cached profile and favorites lookups.
//!
//! Both namespaces expire 30 minutes after write; a miss falls through to
//! the remote store and repopulates the cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use tandem_remote::RemoteStore;
use tandem_shared::UserId;
use tandem_store::{CacheNamespace, CacheService};

use crate::error::ClientError;
use crate::layout;

/// Public part of `users/{uid}`. The credit counter is deliberately not part
/// of it; see [`BalanceService`](crate::balance::BalanceService).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

#[derive(Clone)]
pub struct ProfileService {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<CacheService>,
}

impl ProfileService {
    pub fn new(remote: Arc<dyn RemoteStore>, cache: Arc<CacheService>) -> Self {
        Self { remote, cache }
    }

    /// Profile of `user`, or `None` if the user has no profile node.
    pub async fn profile(&self, user: &UserId) -> Result<Option<Profile>, ClientError> {
        if let Some(profile) = self.cache.get::<Profile>(CacheNamespace::PROFILES, user.as_str())? {
            debug!(user = %user, "Profile cache hit");
            return Ok(Some(profile));
        }

        let Some(value) = self.remote.get(&layout::user(user)).await? else {
            return Ok(None);
        };
        let profile: Profile = match serde_json::from_value(value) {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user = %user, error = %e, "Ignoring unreadable profile");
                return Ok(None);
            }
        };
        self.cache
            .set(CacheNamespace::PROFILES, user.as_str(), &profile)?;
        Ok(Some(profile))
    }

    /// Drop the cached profile so the next read goes to the remote store.
    pub fn invalidate(&self, user: &UserId) -> Result<(), ClientError> {
        self.cache.invalidate(CacheNamespace::PROFILES, user.as_str())?;
        Ok(())
    }

    pub async fn favorites(&self, user: &UserId) -> Result<Vec<UserId>, ClientError> {
        if let Some(favorites) = self
            .cache
            .get::<Vec<UserId>>(CacheNamespace::FAVORITES, user.as_str())?
        {
            return Ok(favorites);
        }

        let node = self.remote.get(&layout::favorites(user)).await?;
        let mut favorites: Vec<UserId> = match node {
            Some(Value::Object(map)) => map
                .into_iter()
                .filter(|(_, v)| v.as_bool().unwrap_or(true))
                .map(|(k, _)| UserId::new(k))
                .collect(),
            _ => Vec::new(),
        };
        favorites.sort();
        self.cache
            .set(CacheNamespace::FAVORITES, user.as_str(), &favorites)?;
        Ok(favorites)
    }

    pub async fn set_favorite(
        &self,
        user: &UserId,
        other: &UserId,
        favorite: bool,
    ) -> Result<(), ClientError> {
        let mut change = Map::new();
        change.insert(
            other.as_str().to_string(),
            if favorite { Value::Bool(true) } else { Value::Null },
        );
        self.remote.update(&layout::favorites(user), change).await?;
        self.cache.invalidate(CacheNamespace::FAVORITES, user.as_str())?;
        Ok(())
    }
}
