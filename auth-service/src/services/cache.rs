//! Derived principal cache and its invalidation rules.
//!
//! Every cached value is derived from the principal record. After a mutation,
//! `invalidation_keys` diffs the before/after records and names exactly the
//! key families whose source fields changed. A racing reader can re-populate
//! a key with pre-mutation data between commit and purge; such entries live
//! at most one TTL.

use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use super::error::ServiceError;
use super::redis::Cache;
use super::store::PrincipalStore;
use crate::models::{Principal, PrincipalSnapshot};
use crate::utils::{bounded, Timeouts};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    /// Snapshot, deleted or not.
    AnyById(Uuid),
    /// Snapshot, only while not deleted.
    ActiveById(Uuid),
    /// Login to id, deleted or not.
    AnyByLogin(String),
    /// Login to id, only while not deleted.
    ActiveByLogin(String),
    RolesById(Uuid),
    DeletedById(Uuid),
    VersionById(Uuid),
}

impl CacheKey {
    pub fn family(&self) -> &'static str {
        match self {
            CacheKey::AnyById(_) => "any-by-id",
            CacheKey::ActiveById(_) => "active-by-id",
            CacheKey::AnyByLogin(_) => "any-by-login",
            CacheKey::ActiveByLogin(_) => "active-by-login",
            CacheKey::RolesById(_) => "roles-by-id",
            CacheKey::DeletedById(_) => "deleted-by-id",
            CacheKey::VersionById(_) => "version-by-id",
        }
    }

    /// Every key derived from `principal` as it currently is.
    pub fn all_for(principal: &Principal) -> Vec<CacheKey> {
        let id = principal.id;
        vec![
            CacheKey::AnyById(id),
            CacheKey::ActiveById(id),
            CacheKey::AnyByLogin(principal.login.clone()),
            CacheKey::ActiveByLogin(principal.login.clone()),
            CacheKey::RolesById(id),
            CacheKey::DeletedById(id),
            CacheKey::VersionById(id),
        ]
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::AnyById(id)
            | CacheKey::ActiveById(id)
            | CacheKey::RolesById(id)
            | CacheKey::DeletedById(id)
            | CacheKey::VersionById(id) => write!(f, "{}:{}", self.family(), id),
            CacheKey::AnyByLogin(login) | CacheKey::ActiveByLogin(login) => {
                write!(f, "{}:{}", self.family(), login)
            }
        }
    }
}

/// Keys made stale by the transition `old -> new` of the same principal.
///
/// Deleted-scoped families are only touched when the principal was active on
/// at least one side of the transition.
pub fn invalidation_keys(old: &Principal, new: &Principal) -> Vec<CacheKey> {
    let id = new.id;
    let old_active = !old.is_deleted();
    let new_active = !new.is_deleted();

    let login_changed = old.login != new.login;
    let roles_changed = old.roles != new.roles;
    let deleted_at_changed = old.deleted_at != new.deleted_at;
    let deleted_state_changed = old_active != new_active;

    let mut keys = Vec::new();

    if login_changed || roles_changed || deleted_at_changed {
        keys.push(CacheKey::AnyById(id));
        if old_active || new_active {
            keys.push(CacheKey::ActiveById(id));
        }
    }

    if login_changed {
        keys.push(CacheKey::AnyByLogin(old.login.clone()));
        keys.push(CacheKey::AnyByLogin(new.login.clone()));
        if old_active {
            keys.push(CacheKey::ActiveByLogin(old.login.clone()));
        }
        if new_active {
            keys.push(CacheKey::ActiveByLogin(new.login.clone()));
        }
    }

    if deleted_state_changed {
        keys.push(CacheKey::ActiveByLogin(new.login.clone()));
    }

    if roles_changed {
        keys.push(CacheKey::RolesById(id));
    }
    if deleted_at_changed {
        keys.push(CacheKey::DeletedById(id));
    }
    if old.version != new.version {
        keys.push(CacheKey::VersionById(id));
    }

    keys.sort();
    keys.dedup();
    keys
}

/// Compare a token's version claim to the principal's current version.
pub fn check_version(claim: i64, current: i64) -> Result<(), ServiceError> {
    if claim == current {
        Ok(())
    } else {
        Err(ServiceError::VersionDesynchronized {
            token: claim,
            current,
        })
    }
}

/// Read-through cache over the principal store.
#[derive(Clone)]
pub struct PrincipalCache {
    cache: Arc<dyn Cache>,
    store: Arc<dyn PrincipalStore>,
    ttl_seconds: u64,
    timeouts: Timeouts,
}

impl PrincipalCache {
    pub fn new(
        cache: Arc<dyn Cache>,
        store: Arc<dyn PrincipalStore>,
        ttl_seconds: u64,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            cache,
            store,
            ttl_seconds,
            timeouts,
        }
    }

    async fn read_through<T, F, Fut>(&self, key: CacheKey, load: F) -> Result<Option<T>, ServiceError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, ServiceError>>,
    {
        let rendered = key.to_string();

        match bounded(self.timeouts.cache, "cache_get", self.cache.get(&rendered)).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    tracing::warn!(key = %rendered, error = %e, "Undecodable cache entry, deleting");
                    let keys = [rendered.clone()];
                    if let Err(e) =
                        bounded(self.timeouts.cache, "cache_delete", self.cache.delete(&keys)).await
                    {
                        tracing::warn!(key = %rendered, error = %e, "Failed to delete undecodable cache entry");
                    }
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(key = %rendered, error = %e, "Cache read failed, falling back to store");
            }
        }

        let loaded = load().await?;

        if let Some(value) = &loaded {
            match serde_json::to_string(value) {
                Ok(encoded) => {
                    if let Err(e) = bounded(
                        self.timeouts.cache,
                        "cache_set",
                        self.cache.set(&rendered, &encoded, self.ttl_seconds),
                    )
                    .await
                    {
                        tracing::warn!(key = %rendered, error = %e, "Cache write failed");
                    }
                }
                Err(e) => tracing::error!(key = %rendered, error = %e, "Failed to encode cache entry"),
            }
        }

        Ok(loaded)
    }

    async fn load_by_id(&self, id: Uuid) -> Result<Option<Principal>, ServiceError> {
        bounded(self.timeouts.store, "get_principal_by_id", self.store.get_principal_by_id(id)).await
    }

    async fn load_by_login(&self, login: &str) -> Result<Option<Principal>, ServiceError> {
        bounded(
            self.timeouts.store,
            "get_principal_by_login",
            self.store.get_principal_by_login(login),
        )
        .await
    }

    /// Snapshot by id. With `include_deleted = false`, deleted principals read as absent.
    pub async fn snapshot_by_id(
        &self,
        id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<PrincipalSnapshot>, ServiceError> {
        let key = if include_deleted {
            CacheKey::AnyById(id)
        } else {
            CacheKey::ActiveById(id)
        };
        self.read_through(key, || async move {
            Ok(self
                .load_by_id(id)
                .await?
                .filter(|p| include_deleted || !p.is_deleted())
                .map(|p| p.snapshot()))
        })
        .await
    }

    pub async fn snapshot_by_login(
        &self,
        login: &str,
        include_deleted: bool,
    ) -> Result<Option<PrincipalSnapshot>, ServiceError> {
        let key = if include_deleted {
            CacheKey::AnyByLogin(login.to_string())
        } else {
            CacheKey::ActiveByLogin(login.to_string())
        };
        let id: Option<Uuid> = self
            .read_through(key, || async move {
                Ok(self
                    .load_by_login(login)
                    .await?
                    .filter(|p| include_deleted || !p.is_deleted())
                    .map(|p| p.id))
            })
            .await?;

        let Some(id) = id else {
            return Ok(None);
        };

        // The id snapshot carries the login; a mismatch means the login key
        // outlived a rename.
        match self.snapshot_by_id(id, include_deleted).await? {
            Some(snapshot) if snapshot.login == login => Ok(Some(snapshot)),
            _ => Ok(self
                .load_by_login(login)
                .await?
                .filter(|p| include_deleted || !p.is_deleted())
                .map(|p| p.snapshot())),
        }
    }

    pub async fn roles_by_id(&self, id: Uuid) -> Result<Option<Vec<String>>, ServiceError> {
        self.read_through(CacheKey::RolesById(id), || async move {
            Ok(self.load_by_id(id).await?.map(|p| p.roles))
        })
        .await
    }

    /// `Some(true)` if soft-deleted, `None` if no such principal.
    pub async fn deleted_by_id(&self, id: Uuid) -> Result<Option<bool>, ServiceError> {
        self.read_through(CacheKey::DeletedById(id), || async move {
            Ok(self.load_by_id(id).await?.map(|p| p.is_deleted()))
        })
        .await
    }

    pub async fn version_by_id(&self, id: Uuid) -> Result<Option<i64>, ServiceError> {
        self.read_through(CacheKey::VersionById(id), || async move {
            Ok(self.load_by_id(id).await?.map(|p| p.version))
        })
        .await
    }

    /// Purge keys made stale by `old -> new`. Never fails; errors are logged.
    pub async fn invalidate(&self, old: &Principal, new: &Principal) -> Vec<CacheKey> {
        let keys = invalidation_keys(old, new);
        self.purge(new.id, &keys).await;
        keys
    }

    /// Purge every key derived from `principal`.
    pub async fn purge_all(&self, principal: &Principal) -> Result<u64, ServiceError> {
        let rendered: Vec<String> = CacheKey::all_for(principal)
            .iter()
            .map(ToString::to_string)
            .collect();
        bounded(self.timeouts.cache, "cache_delete", self.cache.delete(&rendered)).await
    }

    async fn purge(&self, id: Uuid, keys: &[CacheKey]) {
        if keys.is_empty() {
            return;
        }
        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        match bounded(self.timeouts.cache, "cache_delete", self.cache.delete(&rendered)).await {
            Ok(removed) => {
                tracing::debug!(user_id = %id, keys = ?rendered, removed, "Cache invalidated");
            }
            Err(e) => {
                tracing::error!(
                    user_id = %id,
                    keys = ?rendered,
                    error = %e,
                    "Cache invalidation failed; entries expire by TTL"
                );
            }
        }
    }
}
