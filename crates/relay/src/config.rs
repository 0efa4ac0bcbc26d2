use std::path::PathBuf;

use crate::store::{DatabaseConfig, DatabaseType};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub chat: ChatConfig,
    /// Key-value store connection URL (dedup set + incident records).
    pub kv_url: String,
    pub database: Option<DatabaseConfig>,
    pub queue: Option<QueueConfig>,
    /// Bearer token for the HTTP surface; unset disables auth.
    pub auth_token: Option<String>,
    pub rules_file: Option<PathBuf>,
    /// Fold the rules file into the persisted config once at startup.
    pub migrate_rules_on_start: bool,
    pub audit_ttl: Option<String>,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub bot_token: String,
    pub default_channel_id: Option<String>,
    pub guild_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub url: String,
    pub region: Option<String>,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();

        let bot_token = env_opt("DISCORD_BOT_TOKEN").ok_or_else(|| {
            crate::Error::Config("DISCORD_BOT_TOKEN must be set".to_string())
        })?;

        let database = match std::env::var("DATABASE_TYPE")
            .unwrap_or_else(|_| "sqlite".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => None,
            "postgres" => Some(DatabaseConfig {
                db_type: DatabaseType::Postgres,
                sqlite_path: None,
                postgres_url: env_opt("DATABASE_URL"),
                max_connections: env_max_connections(),
            }),
            _ => Some(DatabaseConfig {
                db_type: DatabaseType::Sqlite,
                sqlite_path: Some(
                    env_opt("SQLITE_PATH")
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from("data/incident-relay.db")),
                ),
                postgres_url: None,
                max_connections: env_max_connections(),
            }),
        };

        let config = Config {
            server: ServerConfig {
                addr: std::env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            },
            chat: ChatConfig {
                bot_token,
                default_channel_id: env_opt("DEFAULT_CHANNEL_ID"),
                guild_id: env_opt("GUILD_ID"),
            },
            kv_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            database,
            queue: env_opt("SQS_QUEUE_URL").map(|url| QueueConfig {
                url,
                region: env_opt("AWS_REGION"),
            }),
            auth_token: env_opt("AUTH_BEARER_TOKEN"),
            rules_file: env_opt("RULES_FILE").map(PathBuf::from),
            migrate_rules_on_start: env_opt("MIGRATE_RULES_ON_START")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            audit_ttl: env_opt("AUDIT_TTL"),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        };

        if config.auth_token.is_none() {
            tracing::warn!("AUTH_BEARER_TOKEN is not set. HTTP endpoints are unauthenticated.");
        }

        if let Some(database) = &config.database {
            database.validate()?;
        }

        Ok(config)
    }
}

fn env_max_connections() -> u32 {
    std::env::var("DATABASE_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5)
}
