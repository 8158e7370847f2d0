use crate::directory::{Credential, RefreshPolicy};
use crate::error::{DirectoryError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub slack: SlackConfig,
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub bot_token: Credential,
    pub api_base_url: String,
    pub page_limit: u16,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub ttl_secs: u64,
    pub max_attempts: u32,
    pub retry_margin_secs: u64,
    pub lookup_timeout_secs: Option<u64>,
    pub partition_by_credential: bool,
}

impl DirectoryConfig {
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            ttl: Duration::from_secs(self.ttl_secs),
            max_attempts: self.max_attempts,
            retry_margin: Duration::from_secs(self.retry_margin_secs),
        }
    }

    pub fn lookup_timeout(&self) -> Option<Duration> {
        self.lookup_timeout_secs.map(Duration::from_secs)
    }
}

pub fn load_settings() -> Result<Settings> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    Settings::from_lookup(|key| std::env::var(key).ok())
}

/// Load settings from a dotenv file, falling back to the process environment
/// for keys the file does not define.
pub fn load_settings_from(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let vars = dotenvy::from_path_iter(path)
        .map_err(|e| DirectoryError::Config(format!("{}: {}", path.display(), e)))?
        .collect::<std::result::Result<HashMap<_, _>, _>>()
        .map_err(|e| DirectoryError::Config(format!("{}: {}", path.display(), e)))?;

    Settings::from_lookup(|key| vars.get(key).cloned().or_else(|| std::env::var(key).ok()))
}

impl Settings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = lookup("SLACK_BOT_TOKEN")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| DirectoryError::Config("SLACK_BOT_TOKEN not set".to_string()))?;

        let slack = SlackConfig {
            bot_token: Credential::new(bot_token),
            api_base_url: lookup("SLACK_API_BASE_URL")
                .unwrap_or_else(|| "https://slack.com/api".to_string())
                .trim_end_matches('/')
                .to_string(),
            page_limit: parse_or(&lookup, "SLACK_PAGE_LIMIT", 200)?,
            http_timeout_secs: parse_or(&lookup, "SLACK_HTTP_TIMEOUT_SECS", 30)?,
        };

        let directory = DirectoryConfig {
            ttl_secs: parse_or(&lookup, "DIRECTORY_TTL_SECS", 60)?,
            max_attempts: parse_or(&lookup, "DIRECTORY_MAX_ATTEMPTS", 3)?,
            retry_margin_secs: parse_or(&lookup, "DIRECTORY_RETRY_MARGIN_SECS", 1)?,
            lookup_timeout_secs: lookup("DIRECTORY_LOOKUP_TIMEOUT_SECS")
                .map(|v| parse_value("DIRECTORY_LOOKUP_TIMEOUT_SECS", &v))
                .transpose()?,
            partition_by_credential: parse_or(&lookup, "DIRECTORY_PARTITION_BY_CREDENTIAL", false)?,
        };

        if directory.max_attempts == 0 {
            return Err(DirectoryError::Config(
                "DIRECTORY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if slack.page_limit == 0 {
            return Err(DirectoryError::Config(
                "SLACK_PAGE_LIMIT must be at least 1".to_string(),
            ));
        }

        Ok(Settings { slack, directory })
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DirectoryError::Config(format!("Invalid {}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_reference_policy() {
        let settings = Settings::from_lookup(lookup_from(&[("SLACK_BOT_TOKEN", "xoxb-test")])).unwrap();

        assert_eq!(settings.slack.bot_token.expose(), "xoxb-test");
        assert_eq!(settings.slack.api_base_url, "https://slack.com/api");
        assert_eq!(settings.slack.page_limit, 200);

        let policy = settings.directory.refresh_policy();
        assert_eq!(policy.ttl, Duration::from_secs(60));
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.retry_margin, Duration::from_secs(1));
        assert_eq!(settings.directory.lookup_timeout(), None);
        assert!(!settings.directory.partition_by_credential);
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let err = Settings::from_lookup(lookup_from(&[])).unwrap_err();
        assert_eq!(err, DirectoryError::Config("SLACK_BOT_TOKEN not set".to_string()));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = Settings::from_lookup(lookup_from(&[
            ("SLACK_BOT_TOKEN", "xoxb-test"),
            ("DIRECTORY_TTL_SECS", "soon"),
        ]))
        .unwrap_err();
        assert_eq!(err, DirectoryError::Config("Invalid DIRECTORY_TTL_SECS".to_string()));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = Settings::from_lookup(lookup_from(&[
            ("SLACK_BOT_TOKEN", "xoxb-test"),
            ("DIRECTORY_MAX_ATTEMPTS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, DirectoryError::Config(_)));
    }

    #[test]
    fn test_load_settings_from_dotenv_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "SLACK_BOT_TOKEN=xoxb-from-file").unwrap();
        writeln!(file, "SLACK_API_BASE_URL=http://localhost:9999/api/").unwrap();
        writeln!(file, "DIRECTORY_TTL_SECS=120").unwrap();
        writeln!(file, "DIRECTORY_LOOKUP_TIMEOUT_SECS=15").unwrap();
        writeln!(file, "DIRECTORY_PARTITION_BY_CREDENTIAL=true").unwrap();

        let settings = load_settings_from(file.path()).unwrap();

        assert_eq!(settings.slack.bot_token.expose(), "xoxb-from-file");
        assert_eq!(settings.slack.api_base_url, "http://localhost:9999/api");
        assert_eq!(settings.directory.ttl_secs, 120);
        assert_eq!(settings.directory.lookup_timeout(), Some(Duration::from_secs(15)));
        assert!(settings.directory.partition_by_credential);
    }

    #[test]
    fn test_load_settings_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings_from(dir.path().join("absent.env")).unwrap_err();
        assert!(matches!(err, DirectoryError::Config(_)));
    }
}
