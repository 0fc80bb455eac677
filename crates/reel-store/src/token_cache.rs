//! OAuth token cache for Firestore.
//!
//! Tokens are refreshed a minute before expiry. Refresh happens under the
//! write lock, so concurrent callers wait for one refresh instead of racing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Used when the provider reports an expiry we cannot convert.
const FALLBACK_TTL: Duration = Duration::from_secs(50 * 60);

pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    cached: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            cached: RwLock::new(None),
        }
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    pub async fn get_token(&self) -> StoreResult<String> {
        if let Some(token) = self.fresh(&*self.cached.read().await) {
            return Ok(token);
        }

        let mut cached = self.cached.write().await;
        if let Some(token) = self.fresh(&cached) {
            return Ok(token);
        }

        match self.provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                let ttl = (token.expires_at() - Utc::now())
                    .to_std()
                    .unwrap_or(FALLBACK_TTL);
                let value = token.as_str().to_string();
                *cached = Some(CachedToken {
                    value: value.clone(),
                    expires_at: Instant::now() + ttl,
                });
                debug!(ttl_secs = ttl.as_secs(), "Refreshed Firestore access token");
                Ok(value)
            }
            Err(e) => match cached.as_ref() {
                // Still inside the refresh margin: keep using the old token.
                Some(old) if Instant::now() < old.expires_at => {
                    warn!("Token refresh failed, using existing token: {}", e);
                    Ok(old.value.clone())
                }
                _ => Err(StoreError::auth_error(format!("Failed to obtain auth token: {}", e))),
            },
        }
    }

    fn fresh(&self, cached: &Option<CachedToken>) -> Option<String> {
        cached
            .as_ref()
            .filter(|t| Instant::now() + REFRESH_MARGIN < t.expires_at)
            .map(|t| t.value.clone())
    }
}
