//! Reference-table lookups (label -> numeric id)

use sqlx::PgConnection;
use std::collections::HashMap;
use tablesync_common::Identifier;
use tracing::info;

use crate::error::{Result, SyncError};

/// Which table and columns hold a label -> id mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTable {
    pub table: Identifier,
    pub id_column: Identifier,
    pub label_column: Identifier,
}

impl ReferenceTable {
    pub fn new(table: &str, id_column: &str, label_column: &str) -> tablesync_common::Result<Self> {
        Ok(Self {
            table: Identifier::parse(table)?,
            id_column: Identifier::parse(id_column)?,
            label_column: Identifier::parse(label_column)?,
        })
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT CAST({id} AS BIGINT), CAST({label} AS TEXT) FROM {table} ORDER BY 1",
            id = self.id_column.quoted(),
            label = self.label_column.quoted(),
            table = self.table.quoted(),
        )
    }
}

/// Immutable snapshot of a reference table, loaded once per entity run
#[derive(Debug, Clone, Default)]
pub struct ReferenceMap {
    table: String,
    ids: HashMap<String, i64>,
}

impl ReferenceMap {
    /// Build a map from (label, id) pairs. A label listed twice with
    /// different ids is rejected.
    pub fn from_entries(
        table: impl Into<String>,
        entries: impl IntoIterator<Item = (String, i64)>,
    ) -> Result<Self> {
        let table = table.into();
        let mut ids = HashMap::new();

        for (label, id) in entries {
            match ids.get(&label) {
                Some(&existing) if existing != id => {
                    return Err(SyncError::AmbiguousReferenceLabel { table, label });
                },
                Some(_) => {},
                None => {
                    ids.insert(label, id);
                },
            }
        }

        Ok(Self { table, ids })
    }

    /// Read the whole reference table over the given connection
    pub async fn load(conn: &mut PgConnection, source: &ReferenceTable) -> Result<Self> {
        let rows: Vec<(i64, String)> = sqlx::query_as(&source.select_sql())
            .fetch_all(&mut *conn)
            .await?;

        let map = Self::from_entries(
            source.table.as_str(),
            rows.into_iter().map(|(id, label)| (label, id)),
        )?;

        info!(table = %source.table, labels = map.len(), "Loaded reference map");
        Ok(map)
    }

    /// Look up a label; unknown labels are an error, never skipped
    pub fn resolve(&self, label: &str, line: u64) -> Result<i64> {
        self.ids
            .get(label)
            .copied()
            .ok_or_else(|| SyncError::UnknownReferenceLabel {
                line,
                label: label.to_string(),
                table: self.table.clone(),
            })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn permissions() -> ReferenceMap {
        ReferenceMap::from_entries(
            "l21s_permission_types",
            vec![("admin".to_string(), 1), ("editor".to_string(), 2)],
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_known_label() {
        let map = permissions();
        assert_eq!(map.resolve("admin", 2).unwrap(), 1);
        assert_eq!(map.resolve("editor", 3).unwrap(), 2);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_resolve_is_exact() {
        let map = permissions();
        assert!(map.resolve("Admin", 4).is_err());
        assert!(map.resolve(" admin", 4).is_err());
    }

    #[test]
    fn test_unknown_label_reports_line_and_table() {
        match permissions().resolve("viewer", 12) {
            Err(SyncError::UnknownReferenceLabel { line, label, table }) => {
                assert_eq!(line, 12);
                assert_eq!(label, "viewer");
                assert_eq!(table, "l21s_permission_types");
            },
            other => panic!("expected UnknownReferenceLabel, got {other:?}"),
        }
    }

    #[test]
    fn test_ambiguous_label_rejected() {
        let result = ReferenceMap::from_entries(
            "types",
            vec![("admin".to_string(), 1), ("admin".to_string(), 5)],
        );
        assert!(matches!(
            result,
            Err(SyncError::AmbiguousReferenceLabel { .. })
        ));

        let repeated = ReferenceMap::from_entries(
            "types",
            vec![("admin".to_string(), 1), ("admin".to_string(), 1)],
        )
        .unwrap();
        assert_eq!(repeated.len(), 1);
    }

    #[test]
    fn test_select_sql_quotes_identifiers() {
        let table = ReferenceTable::new("l21s_permission_types", "id", "permission_type").unwrap();
        assert_eq!(
            table.select_sql(),
            "SELECT CAST(\"id\" AS BIGINT), CAST(\"permission_type\" AS TEXT) \
             FROM \"l21s_permission_types\" ORDER BY 1"
        );
    }
}
