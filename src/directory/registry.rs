//! Resolver lookup by credential

use crate::directory::{Credential, DirectoryResolver, RefreshPolicy};
use crate::upstream::UpstreamClient;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Hands out the resolver responsible for a credential.
///
/// By default every credential shares one directory, matching a single
/// workspace deployment. With partitioning enabled each credential gets its
/// own store, TTL clock and refresh lock.
pub struct DirectoryRegistry {
    upstream: Arc<dyn UpstreamClient>,
    policy: RefreshPolicy,
    default_timeout: Option<Duration>,
    mode: Mode,
}

enum Mode {
    Shared(Arc<DirectoryResolver>),
    Partitioned(DashMap<Credential, Arc<DirectoryResolver>>),
}

impl DirectoryRegistry {
    pub fn new(upstream: Arc<dyn UpstreamClient>, policy: RefreshPolicy) -> Self {
        Self::build(upstream, policy, None, false)
    }

    pub fn partitioned(upstream: Arc<dyn UpstreamClient>, policy: RefreshPolicy) -> Self {
        Self::build(upstream, policy, None, true)
    }

    pub fn build(
        upstream: Arc<dyn UpstreamClient>,
        policy: RefreshPolicy,
        default_timeout: Option<Duration>,
        partition_by_credential: bool,
    ) -> Self {
        let mode = if partition_by_credential {
            Mode::Partitioned(DashMap::new())
        } else {
            Mode::Shared(Arc::new(
                DirectoryResolver::new(upstream.clone(), policy)
                    .with_default_timeout(default_timeout),
            ))
        };

        Self {
            upstream,
            policy,
            default_timeout,
            mode,
        }
    }

    pub fn is_partitioned(&self) -> bool {
        matches!(self.mode, Mode::Partitioned(_))
    }

    pub fn resolver(&self, credential: &Credential) -> Arc<DirectoryResolver> {
        let partitions = match &self.mode {
            Mode::Shared(shared) => return shared.clone(),
            Mode::Partitioned(partitions) => partitions,
        };

        partitions
            .entry(credential.clone())
            .or_insert_with(|| {
                tracing::info!(
                    credential = %credential.redacted(),
                    "Creating directory partition"
                );
                Arc::new(
                    DirectoryResolver::new(self.upstream.clone(), self.policy)
                        .with_default_timeout(self.default_timeout),
                )
            })
            .clone()
    }

    /// All resolvers currently in use
    pub fn resolvers(&self) -> Vec<Arc<DirectoryResolver>> {
        match &self.mode {
            Mode::Shared(shared) => vec![shared.clone()],
            Mode::Partitioned(partitions) => partitions.iter().map(|r| r.value().clone()).collect(),
        }
    }

    pub fn log_stats(&self) {
        for resolver in self.resolvers() {
            resolver.log_stats();
        }
    }
}
