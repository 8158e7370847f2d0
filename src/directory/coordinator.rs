//! Single-flight, rate-limit aware directory refresh

use crate::directory::stats::CacheCounters;
use crate::directory::{CallContext, Credential, DirectoryEntry, DirectoryStore};
use crate::error::{DirectoryError, Result, UpstreamError};
use crate::logging::{Timer, log_error};
use crate::upstream::UpstreamClient;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// How often and how hard the coordinator talks to the upstream directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Store age below which no refresh is attempted
    pub ttl: Duration,
    /// Upstream calls per refresh before giving up on rate limits
    pub max_attempts: u32,
    /// Added to the upstream's retry-after hint before retrying
    pub retry_margin: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_attempts: 3,
            retry_margin: Duration::from_secs(1),
        }
    }
}

/// Outcome of the most recent refresh attempt, guarded by the refresh lock
#[derive(Debug, Default)]
struct RefreshState {
    last_failure: Option<DirectoryError>,
}

/// Keeps the store within its TTL while making at most one upstream fetch
/// at a time.
///
/// Callers that arrive during a refresh wait on the refresh lock and then
/// share its outcome instead of fetching again. The lock is never taken by
/// lookups, so cache hits keep being served from the previous snapshot while
/// a refresh is backing off.
pub struct RefreshCoordinator {
    store: Arc<DirectoryStore>,
    upstream: Arc<dyn UpstreamClient>,
    policy: RefreshPolicy,
    refresh_lock: Mutex<RefreshState>,
    /// Bumped (under the lock) each time a refresh attempt completes
    generation: AtomicU64,
    counters: Arc<CacheCounters>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<DirectoryStore>,
        upstream: Arc<dyn UpstreamClient>,
        policy: RefreshPolicy,
    ) -> Self {
        Self::with_counters(store, upstream, policy, Arc::new(CacheCounters::default()))
    }

    pub(crate) fn with_counters(
        store: Arc<DirectoryStore>,
        upstream: Arc<dyn UpstreamClient>,
        policy: RefreshPolicy,
        counters: Arc<CacheCounters>,
    ) -> Self {
        Self {
            store,
            upstream,
            policy,
            refresh_lock: Mutex::new(RefreshState::default()),
            generation: AtomicU64::new(0),
            counters,
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<DirectoryStore> {
        &self.store
    }

    /// Make sure the store is younger than the TTL, refreshing if needed.
    ///
    /// Returns immediately without any network access while the store is
    /// fresh. A failed refresh leaves the previous snapshot in place.
    pub async fn ensure_fresh(&self, credential: &Credential, ctx: &CallContext) -> Result<()> {
        if self.store.is_fresh(self.policy.ttl) {
            self.counters.record_fresh_skip();
            return Ok(());
        }

        ctx.run(self.refresh(credential)).await
    }

    async fn refresh(&self, credential: &Credential) -> Result<()> {
        let observed = self.generation.load(Ordering::Acquire);
        let mut state = self.refresh_lock.lock().await;

        if self.store.is_fresh(self.policy.ttl) {
            self.counters.record_coalesced();
            tracing::debug!("Directory refreshed by another caller while waiting");
            return Ok(());
        }

        // A refresh finished while we waited: share its outcome, whatever the TTL
        if self.generation.load(Ordering::Acquire) != observed {
            self.counters.record_coalesced();
            return match state.last_failure.clone() {
                Some(err) => {
                    tracing::debug!(error = %err, "Sharing failure of concurrent directory refresh");
                    Err(err)
                }
                None => Ok(()),
            };
        }

        let refresh_id = Uuid::new_v4();
        let _timer = Timer::new(format!("directory_refresh:{}", refresh_id));
        tracing::info!(
            refresh_id = %refresh_id,
            credential = %credential.redacted(),
            "Refreshing Slack user directory"
        );

        let outcome = match self.fetch_with_retry(credential, refresh_id).await {
            Ok(entries) => {
                let fetched = entries.len();
                let indexed = self.store.replace_all(entries);
                self.counters.record_refresh();
                tracing::info!(
                    refresh_id = %refresh_id,
                    fetched = fetched,
                    indexed = indexed,
                    "Directory refreshed"
                );
                Ok(())
            }
            Err(err) => {
                self.counters.record_refresh_failure();
                log_error("directory_refresh", &err);
                Err(err)
            }
        };

        state.last_failure = outcome.as_ref().err().cloned();
        self.generation.fetch_add(1, Ordering::Release);
        outcome
    }

    /// Call the upstream until it answers, backing off on rate limits.
    ///
    /// Transport and auth failures are returned at once. The sleep after a
    /// rate limit is `retry_after + retry_margin`; there is no sleep after
    /// the final attempt.
    async fn fetch_with_retry(
        &self,
        credential: &Credential,
        refresh_id: Uuid,
    ) -> Result<Vec<DirectoryEntry>> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.counters.record_api_call();

            match self.upstream.fetch_all(credential).await {
                Ok(entries) => return Ok(entries),
                Err(UpstreamError::RateLimited { retry_after }) => {
                    self.counters.record_rate_limited();

                    if attempt >= max_attempts {
                        tracing::warn!(
                            refresh_id = %refresh_id,
                            attempts = attempt,
                            "Slack directory still rate limited, giving up"
                        );
                        return Err(DirectoryError::UpstreamUnavailable { attempts: attempt });
                    }

                    let backoff = retry_after.saturating_add(self.policy.retry_margin);
                    tracing::warn!(
                        refresh_id = %refresh_id,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        backoff_secs = backoff.as_secs_f64(),
                        "Slack directory rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(UpstreamError::Auth(msg)) => return Err(DirectoryError::Auth(msg)),
                Err(UpstreamError::Transport(msg)) => return Err(DirectoryError::Transport(msg)),
            }
        }
    }
}
