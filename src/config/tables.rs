use super::defaults;
use super::models::{AppConfig, LogLevel};
use serde::Deserialize;

/// On-disk layout: one TOML table per concern.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub(super) struct ConfigTables {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    reading: ReadingConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

impl From<ConfigTables> for AppConfig {
    fn from(tables: ConfigTables) -> Self {
        AppConfig {
            server_url: tables.server.url,
            request_timeout_secs: tables.server.request_timeout_secs,
            cache_dir: tables.cache.dir,
            chapter_label: tables.reading.chapter_label,
            chapter_separator: tables.reading.chapter_separator,
            log_level: tables.logging.log_level,
        }
    }
}

impl From<&AppConfig> for ConfigTables {
    fn from(config: &AppConfig) -> Self {
        ConfigTables {
            server: ServerConfig {
                url: config.server_url.clone(),
                request_timeout_secs: config.request_timeout_secs,
            },
            cache: CacheConfig {
                dir: config.cache_dir.clone(),
            },
            reading: ReadingConfig {
                chapter_label: config.chapter_label.clone(),
                chapter_separator: config.chapter_separator.clone(),
            },
            logging: LoggingConfig {
                log_level: config.log_level,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct ServerConfig {
    #[serde(default = "defaults::default_server_url")]
    url: String,
    #[serde(default = "defaults::default_request_timeout_secs")]
    request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            url: defaults::default_server_url(),
            request_timeout_secs: defaults::default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct CacheConfig {
    #[serde(default = "defaults::default_cache_dir")]
    dir: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            dir: defaults::default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct ReadingConfig {
    #[serde(default = "defaults::default_chapter_label")]
    chapter_label: String,
    #[serde(default = "defaults::default_chapter_separator")]
    chapter_separator: String,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        ReadingConfig {
            chapter_label: defaults::default_chapter_label(),
            chapter_separator: defaults::default_chapter_separator(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    log_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: defaults::default_log_level(),
        }
    }
}
