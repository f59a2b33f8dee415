//! Unread messages, served through a short-lived snapshot cache.
//!
//! Nothing invalidates an entry when messages are sent or read: a snapshot
//! lives for the whole TTL window unless [`UnreadCache::flush`] or
//! [`UnreadCache::invalidate`] drops it first.
//!
//! Each key owns its own slot. A refill holds only that slot's lock while it
//! reads the store, so other keys keep serving hits, and concurrent misses on
//! one key wait for a single refill instead of each querying the store.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::{Extension, Json, extract::State, http::StatusCode};
use dashmap::DashMap;
use tracing::{debug, error, warn};

use courier_db::MessageStore;
use courier_types::api::{Claims, UnreadMessage};

use crate::auth::AppState;
use crate::convert;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// How cache entries are keyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheScope {
    /// One entry per receiving user.
    #[default]
    PerUser,
    /// A single entry shared by every caller, as a page-level cache would
    /// behave. Users see each other's snapshot within a window; only for
    /// reproducing that behavior.
    Shared,
}

impl FromStr for CacheScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-user" | "per_user" | "user" => Ok(Self::PerUser),
            "shared" | "global" => Ok(Self::Shared),
            other => Err(anyhow::anyhow!("unknown unread cache scope '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    User(String),
    Shared,
}

struct Snapshot {
    fetched_at: Instant,
    messages: Arc<Vec<UnreadMessage>>,
}

impl Snapshot {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.fetched_at) < ttl
    }
}

/// Empty until the first successful refill.
type Slot = Arc<Mutex<Option<Snapshot>>>;

pub struct UnreadCache {
    ttl: Duration,
    scope: CacheScope,
    entries: DashMap<CacheKey, Slot>,
}

impl UnreadCache {
    pub fn new(ttl: Duration, scope: CacheScope) -> Self {
        Self {
            ttl,
            scope,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn scope(&self) -> CacheScope {
        self.scope
    }

    /// Return the cached unread set for `user_id`, calling `fetch` on a miss
    /// or an expired entry.
    ///
    /// A failed fetch leaves the previous state of the entry untouched and is
    /// not cached.
    pub fn get_or_refresh<F>(&self, user_id: &str, fetch: F) -> Result<Arc<Vec<UnreadMessage>>>
    where
        F: FnOnce() -> Result<Vec<UnreadMessage>>,
    {
        self.get_or_refresh_at(user_id, Instant::now(), fetch)
    }

    fn get_or_refresh_at<F>(
        &self,
        user_id: &str,
        now: Instant,
        fetch: F,
    ) -> Result<Arc<Vec<UnreadMessage>>>
    where
        F: FnOnce() -> Result<Vec<UnreadMessage>>,
    {
        let key = self.key_for(user_id);
        let slot = self.slot_for(&key);
        let mut snapshot = lock_slot(&slot);

        if let Some(hit) = snapshot.as_ref().filter(|s| s.is_fresh(now, self.ttl)) {
            debug!("Unread cache hit for {:?}", key);
            return Ok(hit.messages.clone());
        }

        debug!("Unread cache miss for {:?}", key);
        let messages = Arc::new(fetch()?);
        *snapshot = Some(Snapshot {
            fetched_at: now,
            messages: messages.clone(),
        });
        drop(snapshot);

        self.evict_expired(now);
        Ok(messages)
    }

    /// Drop the entry serving `user_id`. Under [`CacheScope::Shared`] this
    /// drops the one shared entry.
    pub fn invalidate(&self, user_id: &str) {
        self.entries.remove(&self.key_for(user_id));
    }

    /// Drop every entry.
    pub fn flush(&self) {
        self.entries.clear();
    }

    fn key_for(&self, user_id: &str) -> CacheKey {
        match self.scope {
            CacheScope::PerUser => CacheKey::User(user_id.to_string()),
            CacheScope::Shared => CacheKey::Shared,
        }
    }

    fn slot_for(&self, key: &CacheKey) -> Slot {
        if let Some(slot) = self.entries.get(key) {
            return slot.value().clone();
        }
        self.entries.entry(key.clone()).or_default().value().clone()
    }

    /// Remove stale and empty entries so callers who never come back do not
    /// keep their snapshot alive. Slots locked by a refill in progress stay.
    fn evict_expired(&self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, slot| match slot.try_lock() {
            Ok(snapshot) => snapshot.as_ref().is_some_and(|s| s.is_fresh(now, self.ttl)),
            Err(_) => true,
        });

        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!("Unread cache evicted {} expired entries", evicted);
        }
    }
}

impl Default for UnreadCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, CacheScope::default())
    }
}

/// A panic during a refill poisons only that slot. The snapshot is swapped in
/// whole after a successful fetch, so whatever it holds is still consistent.
fn lock_slot(slot: &Mutex<Option<Snapshot>>) -> MutexGuard<'_, Option<Snapshot>> {
    slot.lock().unwrap_or_else(|poisoned| {
        warn!("Unread cache entry was poisoned by a failed refill, recovering");
        slot.clear_poison();
        poisoned.into_inner()
    })
}

/// GET /unread_messages
pub async fn unread_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<UnreadMessage>>, StatusCode> {
    // Run blocking DB query off the async runtime
    let db = state.clone();
    let user_id = claims.sub.to_string();

    let messages = tokio::task::spawn_blocking(move || {
        db.unread_cache.get_or_refresh(&user_id, || {
            let rows = db.db.unread_for(&user_id)?;
            Ok(rows.into_iter().map(convert::unread_message).collect())
        })
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("Unread lookup failed: {:#}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(messages.as_ref().clone()))
}
