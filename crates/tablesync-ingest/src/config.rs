//! Sync configuration: TOML file, then environment overrides, then validation

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tablesync_common::Identifier;

use crate::mapper::DEFAULT_KEY_SEPARATOR;
use crate::reconcile::DEFAULT_BATCH_SIZE;
use crate::source::{SourceLocation, DEFAULT_FETCH_TIMEOUT_SECS};

// ============================================================================
// Defaults
// ============================================================================

/// Where the reference deployment publishes its CSV snapshots
pub const DEFAULT_SOURCE_BASE: &str =
    "https://raw.githubusercontent.com/Thom-Max/l21s_migration/main/L21s_migration/";

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/tablesync";

/// Default maximum database connections in the pool.
///
/// Entity types run one after another, so a small pool is plenty.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 30;

const DEFAULT_KEY_COLUMN: &str = "id";

fn default_key_column() -> String {
    DEFAULT_KEY_COLUMN.to_string()
}

fn default_separator() -> String {
    DEFAULT_KEY_SEPARATOR.to_string()
}

// ============================================================================
// Configuration types
// ============================================================================

/// Full configuration of a sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL or directory every `source_file` is resolved against
    pub source_base: String,
    /// Records per upsert statement
    pub batch_size: usize,
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    /// Entity types in the order they are synchronized
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// HTTP timeout for fetching one source file
    pub timeout_secs: u64,
}

/// One entry of the dispatch table: source file, mapping policy, target table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityConfig {
    pub name: String,
    pub source_file: String,
    pub table: String,
    pub mapping: MappingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MappingConfig {
    /// First field is the key, the rest map onto `payload_columns` in order
    Direct {
        #[serde(default = "default_key_column")]
        key_column: String,
        payload_columns: Vec<String>,
    },
    /// `natural,label` rows keyed by `natural<separator>resolved_id`
    CompositeKey {
        #[serde(default = "default_key_column")]
        key_column: String,
        natural_column: String,
        reference_column: String,
        #[serde(default = "default_separator")]
        separator: String,
        reference: ReferenceTableConfig,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferenceTableConfig {
    pub table: String,
    #[serde(default = "default_key_column")]
    pub id_column: String,
    pub label_column: String,
}

impl MappingConfig {
    pub fn policy(&self) -> &'static str {
        match self {
            MappingConfig::Direct { .. } => "direct",
            MappingConfig::CompositeKey { .. } => "composite_key",
        }
    }

    /// Every SQL identifier this mapping names
    fn identifiers(&self) -> Vec<&str> {
        match self {
            MappingConfig::Direct {
                key_column,
                payload_columns,
            } => std::iter::once(key_column.as_str())
                .chain(payload_columns.iter().map(String::as_str))
                .collect(),
            MappingConfig::CompositeKey {
                key_column,
                natural_column,
                reference_column,
                reference,
                ..
            } => vec![
                key_column.as_str(),
                natural_column.as_str(),
                reference_column.as_str(),
                reference.table.as_str(),
                reference.id_column.as_str(),
                reference.label_column.as_str(),
            ],
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

impl Default for SyncConfig {
    /// The reference deployment: users and their permissions
    fn default() -> Self {
        Self {
            source_base: DEFAULT_SOURCE_BASE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            database: DatabaseConfig::default(),
            source: SourceConfig::default(),
            entities: vec![
                EntityConfig {
                    name: "users".to_string(),
                    source_file: "users.csv".to_string(),
                    table: "l21s_users".to_string(),
                    mapping: MappingConfig::Direct {
                        key_column: default_key_column(),
                        payload_columns: vec!["mail".to_string()],
                    },
                },
                EntityConfig {
                    name: "user_permissions".to_string(),
                    source_file: "roles.csv".to_string(),
                    table: "l21s_user_permissions".to_string(),
                    mapping: MappingConfig::CompositeKey {
                        key_column: default_key_column(),
                        natural_column: "user_id".to_string(),
                        reference_column: "permission_type_id".to_string(),
                        separator: default_separator(),
                        reference: ReferenceTableConfig {
                            table: "l21s_permission_types".to_string(),
                            id_column: default_key_column(),
                            label_column: "permission_type".to_string(),
                        },
                    },
                },
            ],
        }
    }
}

impl SyncConfig {
    /// Load configuration from an optional TOML file, `.env` and the environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `DATABASE_URL`, `DB_MAX_CONNECTIONS`, `DB_CONNECT_TIMEOUT`,
    /// `TABLESYNC_SOURCE_BASE` and `TABLESYNC_BATCH_SIZE` from `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }

        if let Some(value) = lookup("DB_MAX_CONNECTIONS") {
            self.database.max_connections = value
                .parse()
                .with_context(|| format!("DB_MAX_CONNECTIONS is not a number: {value}"))?;
        }

        if let Some(value) = lookup("DB_CONNECT_TIMEOUT") {
            self.database.connect_timeout_secs = value
                .parse()
                .with_context(|| format!("DB_CONNECT_TIMEOUT is not a number: {value}"))?;
        }

        if let Some(base) = lookup("TABLESYNC_SOURCE_BASE") {
            self.source_base = base;
        }

        if let Some(value) = lookup("TABLESYNC_BATCH_SIZE") {
            self.batch_size = value
                .parse()
                .with_context(|| format!("TABLESYNC_BATCH_SIZE is not a number: {value}"))?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.source_base.is_empty() {
            anyhow::bail!("source_base cannot be empty");
        }

        if self.entities.is_empty() {
            anyhow::bail!("No entity types configured");
        }

        let mut names = HashSet::new();
        for entity in &self.entities {
            if entity.name.is_empty() {
                anyhow::bail!("Entity name cannot be empty");
            }
            if !names.insert(entity.name.as_str()) {
                anyhow::bail!("Entity '{}' is configured more than once", entity.name);
            }
            if entity.source_file.is_empty() {
                anyhow::bail!("Entity '{}' has no source_file", entity.name);
            }

            if let MappingConfig::Direct {
                payload_columns, ..
            } = &entity.mapping
            {
                if payload_columns.is_empty() {
                    anyhow::bail!("Entity '{}' needs at least one payload column", entity.name);
                }
            }

            for identifier in std::iter::once(entity.table.as_str()).chain(entity.mapping.identifiers())
            {
                Identifier::parse(identifier)
                    .with_context(|| format!("Entity '{}'", entity.name))?;
            }
        }

        Ok(())
    }

    /// Source location of an entity type
    pub fn location_of(&self, entity: &EntityConfig) -> String {
        SourceLocation::join(&self.source_base, &entity.source_file)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }

    /// Entity types to run, in configured order. An empty filter selects all.
    pub fn select(&self, names: &[String]) -> anyhow::Result<Vec<&EntityConfig>> {
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.entities.iter().any(|e| &e.name == *name))
        {
            anyhow::bail!("Unknown entity type '{unknown}'");
        }

        Ok(self
            .entities
            .iter()
            .filter(|e| names.is_empty() || names.contains(&e.name))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use std::io::Write;

    const EXAMPLE: &str = r#"
source_base = "./fixtures"
batch_size = 250

[database]
url = "postgresql://sync@db/tablesync"
max_connections = 2

[source]
timeout_secs = 5

[[entities]]
name = "users"
source_file = "users.csv"
table = "l21s_users"
mapping = { policy = "direct", payload_columns = ["mail"] }

[[entities]]
name = "user_permissions"
source_file = "https://cdn.example.com/roles.csv"
table = "l21s_user_permissions"

[entities.mapping]
policy = "composite_key"
natural_column = "user_id"
reference_column = "permission_type_id"
reference = { table = "l21s_permission_types", label_column = "permission_type" }
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_describe_reference_deployment() {
        let config = SyncConfig::default();
        config.validate().unwrap();

        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.entities.len(), 2);
        assert_eq!(config.entities[0].table, "l21s_users");
        assert_eq!(config.entities[1].mapping.policy(), "composite_key");
        assert_eq!(
            config.location_of(&config.entities[1]),
            "https://raw.githubusercontent.com/Thom-Max/l21s_migration/main/L21s_migration/roles.csv"
        );
    }

    #[test]
    fn test_parse_toml() {
        let config = SyncConfig::from_toml(EXAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.batch_size, 250);
        assert_eq!(config.database.max_connections, 2);
        // Missing keys fall back to defaults
        assert_eq!(
            config.database.connect_timeout_secs,
            DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS
        );
        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));

        match &config.entities[1].mapping {
            MappingConfig::CompositeKey {
                key_column,
                separator,
                reference,
                ..
            } => {
                assert_eq!(key_column, "id");
                assert_eq!(separator, "_");
                assert_eq!(reference.id_column, "id");
            },
            other => panic!("expected composite mapping, got {other:?}"),
        }

        assert_eq!(config.location_of(&config.entities[0]), "./fixtures/users.csv");
        assert_eq!(
            config.location_of(&config.entities[1]),
            "https://cdn.example.com/roles.csv"
        );
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let text = r#"
[[entities]]
name = "users"
source_file = "users.csv"
table = "l21s_users"
mapping = { policy = "by_filename" }
"#;
        assert!(SyncConfig::from_toml(text).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SyncConfig::default();
        config
            .apply_env(env(&[
                ("DATABASE_URL", "postgresql://override/db"),
                ("DB_MAX_CONNECTIONS", "9"),
                ("TABLESYNC_SOURCE_BASE", "/srv/snapshots"),
                ("TABLESYNC_BATCH_SIZE", "17"),
            ]))
            .unwrap();

        assert_eq!(config.database.url, "postgresql://override/db");
        assert_eq!(config.database.max_connections, 9);
        assert_eq!(config.source_base, "/srv/snapshots");
        assert_eq!(config.batch_size, 17);
        assert_eq!(config.location_of(&config.entities[0]), "/srv/snapshots/users.csv");
    }

    #[test]
    fn test_env_override_must_parse() {
        let mut config = SyncConfig::default();
        let err = config
            .apply_env(env(&[("TABLESYNC_BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("TABLESYNC_BATCH_SIZE"));
    }

    #[test]
    #[serial]
    fn test_load_reads_file_and_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();

        std::env::set_var("TABLESYNC_BATCH_SIZE", "42");
        let config = SyncConfig::load(Some(file.path()));
        std::env::remove_var("TABLESYNC_BATCH_SIZE");

        let config = config.unwrap();
        assert_eq!(config.batch_size, 42);
        assert_eq!(config.source_base, "./fixtures");
    }

    #[test]
    #[serial]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SyncConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = SyncConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.entities[1].name = "users".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));

        let mut config = SyncConfig::default();
        config.entities[0].table = "users; DROP TABLE x".to_string();
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.entities[0].mapping = MappingConfig::Direct {
            key_column: "id".to_string(),
            payload_columns: vec![],
        };
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.entities.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_select_keeps_configured_order() {
        let config = SyncConfig::default();

        let all = config.select(&[]).unwrap();
        assert_eq!(all.len(), 2);

        let picked = config
            .select(&["user_permissions".to_string(), "users".to_string()])
            .unwrap();
        let names: Vec<&str> = picked.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["users", "user_permissions"]);

        assert!(config.select(&["groups".to_string()]).is_err());
    }
}
