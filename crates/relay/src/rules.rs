//! Rule configuration: mapping rule name -> routing and behavior, merged
//! from a config file and the database, cached in memory, hot-reloadable.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::store::Database;
use crate::{Error, Result};

pub const DEFAULT_SUPPRESS_WINDOW_MS: u64 = 5 * 60 * 1000;

fn default_suppress_window_ms() -> u64 {
    DEFAULT_SUPPRESS_WINDOW_MS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    pub channel_id: String,
    #[serde(default = "default_suppress_window_ms")]
    pub suppress_window_ms: u64,
    #[serde(default)]
    pub important_labels: Vec<String>,
    #[serde(default)]
    pub hidden_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Ordered responder handles for the escalation loop.
    #[serde(default)]
    pub mentions: Vec<String>,
}

impl RuleConfig {
    /// Bare rule carrying only a destination, used for the default-channel
    /// fallback.
    pub fn for_channel(channel_id: String) -> Self {
        Self {
            channel_id,
            suppress_window_ms: DEFAULT_SUPPRESS_WINDOW_MS,
            important_labels: Vec::new(),
            hidden_labels: Vec::new(),
            thumbnail_url: None,
            mentions: Vec::new(),
        }
    }
}

/// Validate a raw config value into typed rules. The input must be a JSON
/// object; every entry must carry a non-empty string `channelId`; mention
/// lists are filtered down to their string elements.
pub fn validate_rules(value: &JsonValue) -> Result<HashMap<String, RuleConfig>> {
    let entries = value
        .as_object()
        .ok_or_else(|| Error::Validation("rule config must be a JSON object".to_string()))?;

    let mut rules = HashMap::with_capacity(entries.len());
    for (name, entry) in entries {
        if !entry.is_object() {
            return Err(Error::Validation(format!("rule '{name}' must be an object")));
        }
        match entry.get("channelId") {
            Some(JsonValue::String(id)) if !id.is_empty() => {}
            _ => {
                return Err(Error::Validation(format!(
                    "rule '{name}' is missing a string channelId"
                )));
            }
        }

        let mut cleaned = entry.clone();
        if let Some(mentions) = cleaned.get_mut("mentions") {
            let strings: Vec<JsonValue> = mentions
                .as_array()
                .map(|arr| arr.iter().filter(|v| v.is_string()).cloned().collect())
                .unwrap_or_default();
            *mentions = JsonValue::Array(strings);
        }

        let rule: RuleConfig = serde_json::from_value(cleaned)
            .map_err(|e| Error::Validation(format!("rule '{name}': {e}")))?;
        rules.insert(name.clone(), rule);
    }
    Ok(rules)
}

/// Merge two raw config objects; entries in `overlay` win on collision.
fn merge_configs(base: &JsonValue, overlay: &JsonValue) -> JsonValue {
    let mut merged = base.as_object().cloned().unwrap_or_default();
    if let Some(overlay) = overlay.as_object() {
        for (name, entry) in overlay {
            merged.insert(name.clone(), entry.clone());
        }
    }
    JsonValue::Object(merged)
}

/// Cached rule configuration shared by the processor, the chat mirror,
/// and the background loops.
pub struct ConfigService {
    db: Option<Arc<dyn Database>>,
    file_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    default_channel: Option<String>,
    cache: RwLock<HashMap<String, RuleConfig>>,
}

impl ConfigService {
    pub fn new(
        db: Option<Arc<dyn Database>>,
        file_path: Option<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            file_path,
            clock,
            default_channel: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Route alerts with no matching rule (and no `"default"` entry) to
    /// this channel instead of suppressing them.
    pub fn with_default_channel(mut self, channel_id: Option<String>) -> Self {
        self.default_channel = channel_id.filter(|id| !id.is_empty());
        self
    }

    fn read_file(&self) -> Result<JsonValue> {
        let Some(path) = &self.file_path else {
            return Err(Error::Config("no rules file configured".to_string()));
        };
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn file_config(&self) -> Result<Option<JsonValue>> {
        match &self.file_path {
            Some(path) if path.exists() => Ok(Some(self.read_file()?)),
            Some(path) => {
                warn!(component = "config", path = %path.display(), "Rules file not found");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Load configuration at startup. A non-empty persisted config is
    /// authoritative and is cached as-is without consulting the file, so
    /// restarts never clobber runtime config pushes. The file only feeds
    /// the cache (and seeds the database) when nothing is persisted yet.
    pub async fn bootstrap(&self) -> Result<usize> {
        if let Some(db) = &self.db {
            if let Some(persisted) = db.load_rules_config().await? {
                if persisted.as_object().is_some_and(|entries| !entries.is_empty()) {
                    let rules = validate_rules(&persisted)?;
                    let entries = rules.len();
                    *self.cache.write().await = rules;
                    info!(
                        component = "config",
                        entries, "Rule configuration loaded from database"
                    );
                    return Ok(entries);
                }
            }
        }

        let file_config = self.file_config()?;
        let rules = match &file_config {
            Some(file) => validate_rules(file)?,
            None => HashMap::new(),
        };
        if let (Some(db), Some(file)) = (&self.db, &file_config) {
            db.save_rules_config(file, self.clock.now()).await?;
        }
        let entries = rules.len();
        *self.cache.write().await = rules;
        info!(component = "config", entries, "Rule configuration loaded from file");
        Ok(entries)
    }

    /// Fold the rules file into the persisted config: file entries win on
    /// key collision, the merged result is validated, written back, and
    /// cached. Runs only on explicit operator request, never implicitly at
    /// startup.
    pub async fn migrate_from_file(&self) -> Result<usize> {
        let Some(file) = self.file_config()? else {
            return Err(Error::Config("no rules file to migrate from".to_string()));
        };

        let merged = match &self.db {
            Some(db) => {
                let persisted = db
                    .load_rules_config()
                    .await?
                    .unwrap_or_else(|| serde_json::json!({}));
                merge_configs(&persisted, &file)
            }
            None => file,
        };
        let rules = validate_rules(&merged)?;
        if let Some(db) = &self.db {
            db.save_rules_config(&merged, self.clock.now()).await?;
        }

        let entries = rules.len();
        *self.cache.write().await = rules;
        info!(component = "config", entries, "Rule configuration migrated from file");
        Ok(entries)
    }

    /// Re-read the rules file. The cache is only replaced when the new
    /// content validates.
    pub async fn reload_from_file(&self) -> Result<usize> {
        let value = self.read_file()?;
        let rules = validate_rules(&value)?;
        let entries = rules.len();
        *self.cache.write().await = rules;
        info!(component = "config", entries, "Rule configuration reloaded from file");
        Ok(entries)
    }

    /// Validate a pushed config, persist it when a database is configured,
    /// then swap the cache.
    pub async fn push(&self, value: JsonValue) -> Result<usize> {
        let rules = validate_rules(&value)?;
        if let Some(db) = &self.db {
            db.save_rules_config(&value, self.clock.now()).await?;
        }
        let entries = rules.len();
        *self.cache.write().await = rules;
        info!(component = "config", entries, "Rule configuration pushed");
        Ok(entries)
    }

    /// Find the rule for an alert name, falling back to the `"default"`
    /// catch-all entry when present, then to the operator-wide default
    /// channel.
    pub async fn lookup(&self, rule_name: &str) -> Option<RuleConfig> {
        let cache = self.cache.read().await;
        cache
            .get(rule_name)
            .or_else(|| cache.get("default"))
            .cloned()
            .or_else(|| self.default_channel.clone().map(RuleConfig::for_channel))
    }

    pub async fn snapshot(&self) -> JsonValue {
        let cache = self.cache.read().await;
        serde_json::to_value(&*cache).unwrap_or_else(|_| serde_json::json!({}))
    }
}
