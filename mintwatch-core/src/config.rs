use crate::error::ConfigError;
use crate::policy::PolicyConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/reddit.toml";
pub const DEFAULT_PROMO_LINK: &str =
    "https://www.fiverr.com/nathanjones8676/design-deploy-and-launch-your-nft-collection";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub reddit: RedditSettings,
    #[serde(default)]
    pub bot: BotSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    pub refresh_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub subreddits: String,
    pub allowlist: String,
    pub denylist: String,
    pub cooldown_minutes: u64,
    pub promo_link: String,
    pub creation_template: Option<String>,
    pub minting_template: Option<String>,
    pub leads_path: PathBuf,
    pub log_dir: PathBuf,
    pub stream_backoff_secs: u64,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            subreddits: "all".to_string(),
            allowlist: String::new(),
            denylist: String::new(),
            cooldown_minutes: 5,
            promo_link: DEFAULT_PROMO_LINK.to_string(),
            creation_template: None,
            minting_template: None,
            leads_path: PathBuf::from("leads.csv"),
            log_dir: PathBuf::from("logs"),
            stream_backoff_secs: 10,
        }
    }
}

fn default_redirect_uri() -> String {
    "http://localhost:8080".to_string()
}

/// How the bot account proves who it is when streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    RefreshToken(String),
    Password { username: String, password: String },
    /// Token for the app itself: listings only, no account to reply as.
    ApplicationOnly,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => ConfigError::PermissionDenied {
                path: path.display().to_string(),
            },
            _ => ConfigError::FileNotFound {
                path: path.display().to_string(),
            },
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("reddit.client_id", &self.reddit.client_id),
            ("reddit.client_secret", &self.reddit.client_secret),
            ("reddit.user_agent", &self.reddit.user_agent),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        if self.bot.subreddits.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "bot.subreddits".to_string(),
                value: self.bot.subreddits.clone(),
            });
        }
        if self.bot.promo_link.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "bot.promo_link".to_string(),
                value: self.bot.promo_link.clone(),
            });
        }
        Ok(())
    }

    /// Refresh token first, then username and password.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        if let Some(token) = non_empty(&self.reddit.refresh_token) {
            return Ok(Credentials::RefreshToken(token));
        }
        match (
            non_empty(&self.reddit.username),
            non_empty(&self.reddit.password),
        ) {
            (Some(username), Some(password)) => Ok(Credentials::Password { username, password }),
            _ => Err(ConfigError::MissingField {
                field: "reddit.refresh_token".to_string(),
            }),
        }
    }

    /// Log mode only reads listings, so it falls back to an app-only token.
    pub fn read_only_credentials(&self) -> Credentials {
        self.credentials().unwrap_or(Credentials::ApplicationOnly)
    }

    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig::from_lists(&self.bot.allowlist, &self.bot.denylist, self.cooldown())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.bot.cooldown_minutes.saturating_mul(60))
    }

    pub fn stream_backoff(&self) -> Duration {
        Duration::from_secs(self.bot.stream_backoff_secs)
    }
}
