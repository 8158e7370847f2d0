//! Scripted upstream for exercising refresh behavior

use crate::directory::{Credential, DirectoryEntry};
use crate::error::UpstreamError;
use crate::upstream::UpstreamClient;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type FetchResult = Result<Vec<DirectoryEntry>, UpstreamError>;

/// Replays queued responses in order, then repeats a fallback forever
pub(crate) struct ScriptedUpstream {
    script: Mutex<VecDeque<FetchResult>>,
    fallback: FetchResult,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedUpstream {
    pub(crate) fn new(script: Vec<FetchResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Ok(Vec::new()),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn always(entries: Vec<DirectoryEntry>) -> Self {
        Self::new(vec![]).then_forever(Ok(entries))
    }

    pub(crate) fn then_forever(mut self, result: FetchResult) -> Self {
        self.fallback = result;
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn fetch_all(&self, _credential: &Credential) -> FetchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self
            .script
            .lock()
            .expect("script lock poisoned")
            .pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
