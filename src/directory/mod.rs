//! Cached view of the Slack user directory
//!
//! Identity lookups (id to email and back) are answered from an in-memory
//! snapshot of `users.list`. The snapshot is refreshed lazily:
//! - Hits never touch the network, even past TTL
//! - A miss refreshes at most once per TTL window (60s default)
//! - Concurrent misses share a single upstream fetch
//! - Rate limits are retried after `Retry-After + 1s`, up to 3 attempts
//! - A failed refresh keeps serving the previous snapshot

mod context;
mod coordinator;
mod entry;
mod registry;
mod resolver;
mod stats;
mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{CallContext, CancelHandle, CancelSignal, cancel_pair};
pub use coordinator::{RefreshCoordinator, RefreshPolicy};
pub use entry::{Credential, DirectoryEntry};
pub use registry::DirectoryRegistry;
pub use resolver::{DirectoryResolver, LookupKey};
pub use stats::CacheStats;
pub use store::{DirectorySnapshot, DirectoryStore};
