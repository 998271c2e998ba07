//! Target table column contract and the SQL shapes issued against it

use tablesync_common::Identifier;

/// Lifecycle columns every target table carries
pub const CREATED_COLUMN: &str = "created";
pub const EDITED_COLUMN: &str = "edited";
pub const DELETED_COLUMN: &str = "deleted";

/// Alias of the existing row inside the upsert statement
const CURRENT: &str = "cur";

/// A target table: primary key, change-tracked payload columns, and the
/// `created` / `edited` / `deleted` lifecycle columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTable {
    name: Identifier,
    key_column: Identifier,
    payload_columns: Vec<Identifier>,
}

impl TargetTable {
    pub fn new(
        name: Identifier,
        key_column: Identifier,
        payload_columns: Vec<Identifier>,
    ) -> tablesync_common::Result<Self> {
        if payload_columns.is_empty() {
            return Err(tablesync_common::TableSyncError::config(format!(
                "table {name} needs at least one payload column"
            )));
        }

        Ok(Self {
            name,
            key_column,
            payload_columns,
        })
    }

    pub fn name(&self) -> &Identifier {
        &self.name
    }

    pub fn payload_columns(&self) -> &[Identifier] {
        &self.payload_columns
    }

    /// Bind parameters one row occupies in the upsert: key, payload, created
    pub fn params_per_row(&self) -> usize {
        self.payload_columns.len() + 2
    }

    /// `INSERT INTO "t" AS cur ("id", "mail", "created") ` (VALUES follow)
    pub fn insert_prefix(&self) -> String {
        let mut columns = vec![self.key_column.quoted()];
        columns.extend(self.payload_columns.iter().map(Identifier::quoted));
        columns.push(quote(CREATED_COLUMN));

        format!(
            "INSERT INTO {} AS {CURRENT} ({}) ",
            self.name.quoted(),
            columns.join(", ")
        )
    }

    /// `(cur."a", cur."b") IS DISTINCT FROM (EXCLUDED."a", EXCLUDED."b")`
    pub fn payload_changed(&self) -> String {
        format!(
            "({}) IS DISTINCT FROM ({})",
            self.qualified_payload(CURRENT),
            self.qualified_payload("EXCLUDED"),
        )
    }

    /// `ON CONFLICT ("id") DO UPDATE SET "a" = EXCLUDED."a", ..., "edited" = CASE WHEN <changed> THEN `
    ///
    /// The run timestamp is bound right after this fragment, then
    /// [`TargetTable::upsert_suffix`] closes the statement.
    pub fn upsert_conflict_head(&self) -> String {
        let assignments: Vec<String> = self
            .payload_columns
            .iter()
            .map(|c| format!("{} = EXCLUDED.{}", c.quoted(), c.quoted()))
            .collect();

        format!(
            " ON CONFLICT ({key}) DO UPDATE SET {assignments}, {edited} = CASE WHEN {changed} THEN ",
            key = self.key_column.quoted(),
            assignments = assignments.join(", "),
            edited = quote(EDITED_COLUMN),
            changed = self.payload_changed(),
        )
    }

    /// Closes the upsert: resurrect, skip untouched rows, report inserts.
    pub fn upsert_suffix(&self) -> String {
        format!(
            " ELSE {CURRENT}.{edited} END, {deleted} = NULL \
             WHERE {CURRENT}.{deleted} IS NOT NULL OR {changed} \
             RETURNING (xmax = 0) AS inserted",
            edited = quote(EDITED_COLUMN),
            deleted = quote(DELETED_COLUMN),
            changed = self.payload_changed(),
        )
    }

    /// Soft-delete active rows whose key is not in the bound `TEXT[]` ($2)
    pub fn soft_delete_excluding_sql(&self) -> String {
        format!(
            "UPDATE {table} SET {deleted} = $1 WHERE {deleted} IS NULL AND NOT ({key} = ANY($2))",
            table = self.name.quoted(),
            deleted = quote(DELETED_COLUMN),
            key = self.key_column.quoted(),
        )
    }

    /// Soft-delete every active row (empty snapshot)
    pub fn soft_delete_all_sql(&self) -> String {
        format!(
            "UPDATE {table} SET {deleted} = $1 WHERE {deleted} IS NULL",
            table = self.name.quoted(),
            deleted = quote(DELETED_COLUMN),
        )
    }

    fn qualified_payload(&self, alias: &str) -> String {
        self.payload_columns
            .iter()
            .map(|c| format!("{alias}.{}", c.quoted()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn quote(column: &str) -> String {
    format!("\"{column}\"")
}
