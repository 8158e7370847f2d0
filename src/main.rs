use anyhow::Context;
use regex::Regex;
use serde_json::json;
use slack_directory::config::load_settings;
use slack_directory::directory::{CallContext, DirectoryRegistry, cancel_pair};
use slack_directory::logging::init_tracing;
use slack_directory::upstream::SlackUserDirectory;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("slack_directory=debug");

    let queries: Vec<String> = std::env::args().skip(1).collect();
    if queries.is_empty() {
        anyhow::bail!("usage: slack-directory <user-id | email>...");
    }

    // Load configuration
    let settings = load_settings().context("loading configuration")?;
    tracing::info!(
        ttl_secs = settings.directory.ttl_secs,
        max_attempts = settings.directory.max_attempts,
        partitioned = settings.directory.partition_by_credential,
        "Configuration loaded"
    );

    let upstream = Arc::new(SlackUserDirectory::new(&settings.slack)?);
    let registry = DirectoryRegistry::build(
        upstream,
        settings.directory.refresh_policy(),
        settings.directory.lookup_timeout(),
        settings.directory.partition_by_credential,
    );

    let credential = settings.slack.bot_token.clone();
    let resolver = registry.resolver(&credential);

    // Ctrl-C abandons lookups still waiting on Slack
    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, cancelling pending lookups");
            cancel.cancel();
        }
    });

    let mut ctx = CallContext::background().with_cancel(signal);
    if let Some(timeout) = settings.directory.lookup_timeout() {
        ctx = ctx.with_timeout(timeout);
    }

    let user_id = Regex::new(r"^[UW][A-Z0-9]+$").context("compiling user id pattern")?;
    let lookups = queries.iter().map(|query| {
        let resolver = resolver.clone();
        let credential = credential.clone();
        let ctx = ctx.clone();
        let by_id = user_id.is_match(query);
        async move {
            let result = if by_id {
                resolver.resolve_by_id_with(query, &credential, &ctx).await
            } else {
                resolver.resolve_by_email_with(query, &credential, &ctx).await
            };
            (query, result)
        }
    });

    let mut failures = 0;
    for (query, result) in futures::future::join_all(lookups).await {
        let line = match result {
            Ok(entry) => json!({ "query": query, "entry": entry }),
            Err(e) => {
                if !e.is_not_found() {
                    failures += 1;
                }
                json!({
                    "query": query,
                    "error": e.to_string(),
                    "not_found": e.is_not_found(),
                    "retryable": e.is_retryable(),
                })
            }
        };
        println!("{}", line);
    }

    registry.log_stats();

    if failures > 0 {
        anyhow::bail!("{} lookup(s) failed", failures);
    }
    Ok(())
}
