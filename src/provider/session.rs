//! Process-wide session cache.
//!
//! A session is reused for every request until its validity window runs out
//! or the provider rejects its token. The provider issues tokens valid for 24
//! hours; the default window stops an hour short of that.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ProviderError;

use super::{Session, StorageProvider};

/// Default validity window of a cached session (23 hours).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(23 * 60 * 60);

struct CachedSession {
    session: Arc<Session>,
    issued_at: Instant,
}

/// Time-bounded memoization of the provider's authorize call.
pub struct SessionCache {
    ttl: Duration,
    slot: RwLock<Option<CachedSession>>,
}

impl SessionCache {
    /// Create an empty cache with the given validity window.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Validity window of cached sessions.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached session, authorizing first if it is missing or stale.
    pub async fn get<P>(&self, provider: &P) -> Result<Arc<Session>, ProviderError>
    where
        P: StorageProvider + ?Sized,
    {
        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref().filter(|c| self.is_fresh(c)) {
                return Ok(Arc::clone(&cached.session));
            }
        }

        let mut slot = self.slot.write().await;

        // Another request may have refreshed while we waited for the lock
        if let Some(cached) = slot.as_ref().filter(|c| self.is_fresh(c)) {
            return Ok(Arc::clone(&cached.session));
        }

        if slot.is_some() {
            info!("Cached provider session expired, re-authorizing");
        } else {
            debug!("Authorizing with storage provider");
        }

        let session = Arc::new(provider.authorize().await?);
        *slot = Some(CachedSession {
            session: Arc::clone(&session),
            issued_at: Instant::now(),
        });

        Ok(session)
    }

    /// Drop `stale` from the cache.
    ///
    /// A newer session cached by a concurrent request is left untouched.
    pub async fn invalidate(&self, stale: &Session) {
        let mut slot = self.slot.write().await;
        let matches = slot
            .as_ref()
            .map(|c| c.session.authorization_token == stale.authorization_token)
            .unwrap_or(false);

        if matches {
            info!("Provider rejected cached session token, dropping it");
            *slot = None;
        }
    }

    /// Whether a fresh session is currently cached.
    pub async fn is_warm(&self) -> bool {
        self.slot
            .read()
            .await
            .as_ref()
            .map(|c| self.is_fresh(c))
            .unwrap_or(false)
    }

    fn is_fresh(&self, cached: &CachedSession) -> bool {
        cached.issued_at.elapsed() < self.ttl
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}
