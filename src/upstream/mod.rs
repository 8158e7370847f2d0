//! Sources of the full workspace user directory

mod slack;

pub use slack::SlackUserDirectory;

use crate::directory::{Credential, DirectoryEntry};
use crate::error::UpstreamError;
use async_trait::async_trait;

/// Fetches the complete user directory for a credential.
///
/// Implementations hide pagination and classify failures. Rate limiting must
/// be reported as [`UpstreamError::RateLimited`] so the caller can back off.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch_all(
        &self,
        credential: &Credential,
    ) -> std::result::Result<Vec<DirectoryEntry>, UpstreamError>;
}
