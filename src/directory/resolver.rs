//! Public lookup facade over the directory cache

use crate::directory::stats::CacheCounters;
use crate::directory::{
    CacheStats, CallContext, Credential, DirectoryEntry, DirectoryStore, RefreshCoordinator,
    RefreshPolicy,
};
use crate::error::{DirectoryError, Result};
use crate::upstream::UpstreamClient;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The key a lookup was made with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey<'a> {
    Id(&'a str),
    Email(&'a str),
}

impl fmt::Display for LookupKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKey::Id(id) => write!(f, "{}", id),
            LookupKey::Email(email) => write!(f, "{}", email),
        }
    }
}

/// Resolves Slack identities through a lazily refreshed directory.
///
/// A hit is served straight from the store, even past TTL. Only a miss asks
/// the coordinator for a refresh, after which the lookup is tried once more.
pub struct DirectoryResolver {
    store: Arc<DirectoryStore>,
    coordinator: Arc<RefreshCoordinator>,
    counters: Arc<CacheCounters>,
    default_timeout: Option<Duration>,
}

impl DirectoryResolver {
    /// Build a resolver with its own empty store
    pub fn new(upstream: Arc<dyn UpstreamClient>, policy: RefreshPolicy) -> Self {
        let store = Arc::new(DirectoryStore::new());
        let counters = Arc::new(CacheCounters::default());
        let coordinator = Arc::new(RefreshCoordinator::with_counters(
            store.clone(),
            upstream,
            policy,
            counters.clone(),
        ));

        tracing::info!(
            ttl_secs = policy.ttl.as_secs(),
            max_attempts = policy.max_attempts,
            "Creating Slack directory resolver"
        );

        Self {
            store,
            coordinator,
            counters,
            default_timeout: None,
        }
    }

    /// Bound every lookup made without an explicit context
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<DirectoryStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    fn default_context(&self) -> CallContext {
        match self.default_timeout {
            Some(timeout) => CallContext::background().with_timeout(timeout),
            None => CallContext::background(),
        }
    }

    pub async fn resolve_by_id(&self, id: &str, credential: &Credential) -> Result<DirectoryEntry> {
        self.resolve(LookupKey::Id(id), credential, &self.default_context())
            .await
    }

    pub async fn resolve_by_email(
        &self,
        email: &str,
        credential: &Credential,
    ) -> Result<DirectoryEntry> {
        self.resolve(LookupKey::Email(email), credential, &self.default_context())
            .await
    }

    pub async fn resolve_by_id_with(
        &self,
        id: &str,
        credential: &Credential,
        ctx: &CallContext,
    ) -> Result<DirectoryEntry> {
        self.resolve(LookupKey::Id(id), credential, ctx).await
    }

    pub async fn resolve_by_email_with(
        &self,
        email: &str,
        credential: &Credential,
        ctx: &CallContext,
    ) -> Result<DirectoryEntry> {
        self.resolve(LookupKey::Email(email), credential, ctx).await
    }

    /// Email of the user with the given Slack id
    pub async fn resolve_email_for_id(&self, id: &str, credential: &Credential) -> Result<String> {
        self.resolve_email_for_id_with(id, credential, &self.default_context())
            .await
    }

    pub async fn resolve_email_for_id_with(
        &self,
        id: &str,
        credential: &Credential,
        ctx: &CallContext,
    ) -> Result<String> {
        let entry = self.resolve(LookupKey::Id(id), credential, ctx).await?;
        entry
            .email
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))
    }

    /// Slack id of the user with the given email
    pub async fn resolve_id_for_email(
        &self,
        email: &str,
        credential: &Credential,
    ) -> Result<String> {
        self.resolve_id_for_email_with(email, credential, &self.default_context())
            .await
    }

    pub async fn resolve_id_for_email_with(
        &self,
        email: &str,
        credential: &Credential,
        ctx: &CallContext,
    ) -> Result<String> {
        Ok(self.resolve(LookupKey::Email(email), credential, ctx).await?.id)
    }

    /// Resolve many emails to Slack ids.
    ///
    /// Members unknown to the workspace come back as `None` and are logged;
    /// any other failure aborts the batch. Misses share a single refresh.
    pub async fn resolve_ids_for_emails<'a, I>(
        &self,
        emails: I,
        credential: &Credential,
    ) -> Result<Vec<(String, Option<String>)>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut resolved = Vec::new();
        for email in emails {
            match self.resolve_id_for_email(email, credential).await {
                Ok(id) => resolved.push((email.to_string(), Some(id))),
                Err(e) if e.is_not_found() => {
                    tracing::warn!(email = %email, "Member not found in Slack workspace");
                    resolved.push((email.to_string(), None));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(resolved)
    }

    async fn resolve(
        &self,
        key: LookupKey<'_>,
        credential: &Credential,
        ctx: &CallContext,
    ) -> Result<DirectoryEntry> {
        if let Some(entry) = self.lookup(key) {
            self.counters.record_hit();
            tracing::trace!(key = %key, user_id = %entry.id, "Directory cache hit");
            return Ok(entry);
        }

        self.counters.record_miss();
        tracing::debug!(key = %key, "Directory cache miss, ensuring fresh directory");

        self.coordinator.ensure_fresh(credential, ctx).await?;

        match self.lookup(key) {
            Some(entry) => Ok(entry),
            None => {
                self.counters.record_not_found();
                Err(DirectoryError::NotFound(key.to_string()))
            }
        }
    }

    fn lookup(&self, key: LookupKey<'_>) -> Option<DirectoryEntry> {
        match key {
            LookupKey::Id(id) => self.store.lookup_by_id(id),
            LookupKey::Email(email) => self.store.lookup_by_email(email),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.counters
            .snapshot(self.store.len(), self.store.last_refreshed_at())
    }

    /// Log cache statistics (for periodic monitoring)
    pub fn log_stats(&self) {
        let stats = self.stats();
        tracing::info!(
            users_cached = stats.entries,
            hit_rate = stats.hit_rate(),
            refreshes = stats.refreshes,
            api_calls = stats.api_calls,
            rate_limited = stats.rate_limited,
            refresh_failures = stats.refresh_failures,
            last_refresh = ?stats.last_refresh,
            "Directory cache statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::cancel_pair;
    use crate::directory::testing::ScriptedUpstream;
    use crate::error::UpstreamError;
    use tokio_test::assert_ok;

    fn credential() -> Credential {
        Credential::new("xoxb-test")
    }

    fn workspace() -> Vec<DirectoryEntry> {
        vec![
            DirectoryEntry::new("U1", "a@x.com"),
            DirectoryEntry::new("U2", "b@x.com"),
            DirectoryEntry {
                is_bot: true,
                ..DirectoryEntry::new("B1", "bot@x.com")
            },
        ]
    }

    fn resolver(upstream: Arc<ScriptedUpstream>) -> DirectoryResolver {
        DirectoryResolver::new(upstream, RefreshPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_lookup_fetches_once_then_hits() {
        let upstream = Arc::new(ScriptedUpstream::always(vec![DirectoryEntry::new("U1", "a@x.com")]));
        let resolver = resolver(upstream.clone());

        let entry = resolver.resolve_by_email("a@x.com", &credential()).await.unwrap();
        assert_eq!(entry.id, "U1");
        assert_eq!(upstream.calls(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        let entry = resolver.resolve_by_email("a@x.com", &credential()).await.unwrap();
        assert_eq!(entry.id, "U1");
        assert_eq!(upstream.calls(), 1);

        let stats = resolver.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!(stats.last_refresh.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_key_is_not_found_after_refresh() {
        let upstream = Arc::new(ScriptedUpstream::always(workspace()));
        let resolver = resolver(upstream.clone());

        let err = resolver
            .resolve_by_id("U404", &credential())
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::NotFound("U404".to_string()));

        // Second miss inside the TTL does not hit Slack again
        let err = resolver
            .resolve_by_email("bot@x.com", &credential())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(upstream.calls(), 1);
        assert_eq!(resolver.stats().not_found, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entries_served_when_refresh_fails() {
        let upstream = Arc::new(
            ScriptedUpstream::new(vec![Ok(workspace())]).then_forever(Err(UpstreamError::RateLimited {
                retry_after: Duration::from_secs(1),
            })),
        );
        let resolver = resolver(upstream.clone());

        assert_ok!(resolver.resolve_by_id("U1", &credential()).await);
        tokio::time::advance(Duration::from_secs(120)).await;

        // Miss forces a refresh that exhausts its retries
        let err = resolver
            .resolve_by_id("U3", &credential())
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::UpstreamUnavailable { attempts: 3 });
        assert!(err.is_retryable());

        // Keys already cached are still answered without touching Slack
        let calls = upstream.calls();
        let entry = resolver.resolve_by_id("U1", &credential()).await.unwrap();
        assert_eq!(entry.email.as_deref(), Some("a@x.com"));
        assert_eq!(upstream.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cold_misses_share_one_fetch() {
        let upstream = Arc::new(ScriptedUpstream::always(workspace()).with_latency(Duration::from_millis(250)));
        let resolver = Arc::new(resolver(upstream.clone()));

        let lookups = ["a@x.com", "b@x.com", "a@x.com", "b@x.com", "c@x.com"].map(|email| {
            let resolver = resolver.clone();
            async move { resolver.resolve_by_email(email, &credential()).await }
        });
        let results = futures::future::join_all(lookups).await;

        assert_eq!(upstream.calls(), 1);
        assert_eq!(results[0].as_ref().unwrap().id, "U1");
        assert_eq!(results[1].as_ref().unwrap().id, "U2");
        assert_eq!(results[2].as_ref().unwrap().id, "U1");
        assert_eq!(results[3].as_ref().unwrap().id, "U2");
        assert!(results[4].as_ref().unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_derived_lookups_project_fields() {
        let upstream = Arc::new(ScriptedUpstream::always(workspace()));
        let resolver = resolver(upstream);

        assert_eq!(
            resolver.resolve_email_for_id("U2", &credential()).await.unwrap(),
            "b@x.com"
        );
        assert_eq!(
            resolver.resolve_id_for_email("a@x.com", &credential()).await.unwrap(),
            "U1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_resolution_skips_unknown_members() {
        let upstream = Arc::new(ScriptedUpstream::always(workspace()));
        let resolver = resolver(upstream.clone());

        let resolved = resolver
            .resolve_ids_for_emails(["a@x.com", "nobody@x.com", "b@x.com"], &credential())
            .await
            .unwrap();

        assert_eq!(
            resolved,
            vec![
                ("a@x.com".to_string(), Some("U1".to_string())),
                ("nobody@x.com".to_string(), None),
                ("b@x.com".to_string(), Some("U2".to_string())),
            ]
        );
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_resolution_propagates_upstream_failure() {
        let upstream = Arc::new(
            ScriptedUpstream::new(vec![]).then_forever(Err(UpstreamError::Auth("token_revoked".into()))),
        );
        let resolver = resolver(upstream);

        let err = resolver
            .resolve_ids_for_emails(["a@x.com"], &credential())
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::Auth("token_revoked".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_applies_to_plain_lookups() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![]).then_forever(Err(
            UpstreamError::RateLimited {
                retry_after: Duration::from_secs(30),
            },
        )));
        let resolver = resolver(upstream).with_default_timeout(Some(Duration::from_secs(5)));

        let err = resolver
            .resolve_by_id("U1", &credential())
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_derived_lookup_honors_deadline() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![]).then_forever(Err(
            UpstreamError::RateLimited {
                retry_after: Duration::from_secs(30),
            },
        )));
        let resolver = resolver(upstream.clone());
        let ctx = CallContext::background().with_timeout(Duration::from_secs(5));

        let err = resolver
            .resolve_id_for_email_with("a@x.com", &credential(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::Timeout);
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_derived_lookup_honors_cancel() {
        let upstream = Arc::new(
            ScriptedUpstream::always(workspace()).with_latency(Duration::from_secs(10)),
        );
        let resolver = resolver(upstream);
        let (handle, signal) = cancel_pair();
        let ctx = CallContext::background().with_cancel(signal);
        let credential = credential();

        let (result, _) = tokio::join!(
            resolver.resolve_email_for_id_with("U1", &credential, &ctx),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                handle.cancel();
            }
        );
        assert_eq!(result.unwrap_err(), DirectoryError::Cancelled);

        let email = resolver
            .resolve_email_for_id_with("U1", &credential, &CallContext::background())
            .await
            .unwrap();
        assert_eq!(email, "a@x.com");
    }
}
