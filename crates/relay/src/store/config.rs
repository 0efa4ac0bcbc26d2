use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: DatabaseType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres_url: Option<String>,

    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Postgres,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DatabaseType::Sqlite,
            sqlite_path: Some(PathBuf::from("data/incident-relay.db")),
            postgres_url: None,
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> crate::Result<()> {
        match self.db_type {
            DatabaseType::Sqlite => {
                if self.sqlite_path.is_none() {
                    return Err(crate::Error::Config(
                        "SQLITE_PATH must be set when using SQLite".to_string(),
                    ));
                }
            }
            DatabaseType::Postgres => {
                if self.postgres_url.is_none() {
                    return Err(crate::Error::Config(
                        "DATABASE_URL must be set when using PostgreSQL".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
