use super::{Database, DatabaseConfig, DatabaseType};
use crate::Result;
use std::sync::Arc;

pub async fn create_database(config: &DatabaseConfig) -> Result<Arc<dyn Database>> {
    config.validate()?;
    match config.db_type {
        DatabaseType::Sqlite => {
            let path = config
                .sqlite_path
                .as_ref()
                .ok_or_else(|| crate::Error::Config("SQLite path not configured".into()))?;
            let db = super::SqliteDatabase::new(&path.display().to_string(), config.max_connections)
                .await?;
            Ok(Arc::new(db))
        }
        DatabaseType::Postgres => {
            let url = config
                .postgres_url
                .as_ref()
                .ok_or_else(|| crate::Error::Config("PostgreSQL URL not configured".into()))?;
            let db = super::PostgresDatabase::new(url, config.max_connections).await?;
            Ok(Arc::new(db))
        }
    }
}
