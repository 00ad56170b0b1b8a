//! Layered settings: built-in defaults, then an optional `depthsync.toml`
//! (or the file given with `--config`), then `DEPTHSYNC__SECTION__KEY` env vars.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::market_data::book::DEFAULT_MAX_LEVELS;

pub const DEFAULT_CONFIG_FILE: &str = "depthsync";

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSettings {
    pub base_url: String,
    pub quote_asset: String,
    pub stream: String,
    /// Frames buffered between the socket reader and the session.
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookSettings {
    pub max_levels: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub feed: FeedSettings,
    pub book: BookSettings,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feed: FeedSettings {
                base_url: "wss://stream.binance.com:9443/ws".into(),
                quote_asset: "usdt".into(),
                stream: "depth10@100ms".into(),
                channel_capacity: 1024,
            },
            book: BookSettings { max_levels: DEFAULT_MAX_LEVELS },
            log: LogSettings { filter: "info".into() },
        }
    }
}

impl Settings {
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let d = Settings::default();
        let file = match path {
            Some(p) => File::with_name(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings: Settings = Config::builder()
            .set_default("feed.base_url", d.feed.base_url)?
            .set_default("feed.quote_asset", d.feed.quote_asset)?
            .set_default("feed.stream", d.feed.stream)?
            .set_default("feed.channel_capacity", d.feed.channel_capacity as u64)?
            .set_default("book.max_levels", d.book.max_levels as u64)?
            .set_default("log.filter", d.log.filter)?
            .add_source(file)
            .add_source(Environment::with_prefix("DEPTHSYNC").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.book.max_levels == 0 {
            return Err(ConfigError::Message("book.max_levels must be at least 1".into()));
        }
        if self.feed.channel_capacity == 0 {
            return Err(ConfigError::Message("feed.channel_capacity must be at least 1".into()));
        }
        Ok(self)
    }
}
