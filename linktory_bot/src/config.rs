use std::{str::FromStr, time::Duration};

use teloxide::types::ChatId;

/// Settings that aren't the bot key. Each comes from an environment variable
/// and falls back to a default if it's not set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `LINKTORY_DB`: sqlx connection string for the SQLite database.
    pub database_url: String,
    /// `LINKTORY_MODERATOR_CHAT`: ID of the private chat whose members may
    /// review links. Reviews are disabled if unset.
    pub moderator_chat: Option<ChatId>,
    /// `LINKTORY_PENDING_TIMEOUT_SECS`: how long the bot waits for the link
    /// after a menu button was pressed.
    pub pending_timeout: Duration,
}

/// Nobody waits a whole day for a link.
pub const MAX_PENDING_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// A setting that was set, but to something unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("environment variable {name} has an invalid value {value:?}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: String::from("sqlite:linktory.sqlite"),
            moderator_chat: None,
            pending_timeout: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config reading variables with `lookup` instead of from the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError { name, value })
        }

        let mut config = Config::default();

        if let Some(url) = lookup("LINKTORY_DB") {
            config.database_url = url;
        }

        if let Some(chat) = lookup("LINKTORY_MODERATOR_CHAT") {
            config.moderator_chat = Some(ChatId(parse("LINKTORY_MODERATOR_CHAT", chat)?));
        }

        if let Some(secs) = lookup("LINKTORY_PENDING_TIMEOUT_SECS") {
            let secs: u64 = parse("LINKTORY_PENDING_TIMEOUT_SECS", secs.clone())?;
            if secs == 0 || secs > MAX_PENDING_TIMEOUT_SECS {
                return Err(ConfigError {
                    name: "LINKTORY_PENDING_TIMEOUT_SECS",
                    value: secs.to_string(),
                });
            }
            config.pending_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
