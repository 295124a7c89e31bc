//! Host table DDL generated from the finalized host definition.
//!
//! # Responsibility
//! - Create the host table and its indexes when missing.
//! - Add columns for fields introduced by newly configured extensions.
//!
//! # Invariants
//! - Applying the same host definition twice is a no-op.
//! - Columns are never dropped or retyped; a type mismatch is an error.
//! - Every `IndexSpec` becomes one `<table>_<fields>_index` index.

use crate::db::{quote_ident, DbError, DbResult};
use crate::schema::host::{HostDefinition, PRIMARY_KEY};
use crate::schema::{FieldSpec, FieldType, IndexSpec, RelationKind, RelationTarget};
use log::info;
use rusqlite::Connection;
use std::collections::BTreeMap;

/// Host table layout version written to `PRAGMA user_version`.
pub const SCHEMA_VERSION: u32 = 1;

/// Creates or extends the host table inside one transaction.
pub fn apply_host_schema(conn: &mut Connection, host: &HostDefinition) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    if current_version > SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction()?;
    tx.execute_batch(&create_table_sql(host))?;

    let existing = existing_columns(&tx, &host.table)?;
    let mut added = 0usize;
    for field in &host.fields {
        let expected = column_type(field.field_type);
        match existing.get(field.name.as_str()) {
            Some(found) if found.eq_ignore_ascii_case(expected) => {}
            Some(found) => {
                return Err(DbError::ColumnTypeMismatch {
                    table: host.table.clone(),
                    column: field.name.clone(),
                    expected,
                    found: found.clone(),
                });
            }
            None => {
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {};",
                    quote_ident(&host.table),
                    column_sql(host, field)
                ))?;
                added += 1;
            }
        }
    }

    for index in &host.indexes {
        tx.execute_batch(&create_index_sql(&host.table, index))?;
    }
    tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    tx.commit()?;

    info!(
        "event=host_schema_apply module=db status=ok table={} columns_added={}",
        host.table, added
    );
    Ok(())
}

/// `CREATE TABLE IF NOT EXISTS` statement for the host.
pub fn create_table_sql(host: &HostDefinition) -> String {
    let mut columns = vec![format!("{} TEXT PRIMARY KEY NOT NULL", quote_ident(PRIMARY_KEY))];
    columns.extend(host.fields.iter().map(|field| column_sql(host, field)));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        quote_ident(&host.table),
        columns.join(",\n    ")
    )
}

/// `CREATE [UNIQUE] INDEX IF NOT EXISTS` statement for one index.
pub fn create_index_sql(table: &str, index: &IndexSpec) -> String {
    let columns: Vec<String> = index.fields.iter().map(|field| quote_ident(field)).collect();
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index_name(table, index)),
        quote_ident(table),
        columns.join(", ")
    )
}

pub fn index_name(table: &str, index: &IndexSpec) -> String {
    format!("{table}_{}_index", index.fields.join("_"))
}

fn column_sql(host: &HostDefinition, field: &FieldSpec) -> String {
    let mut column = format!("{} {}", quote_ident(&field.name), column_type(field.field_type));
    if references_host(host, &field.name) {
        column.push_str(&format!(
            " REFERENCES {}({})",
            quote_ident(&host.table),
            quote_ident(PRIMARY_KEY)
        ));
    }
    column
}

fn column_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String | FieldType::Id => "TEXT",
        FieldType::Integer | FieldType::Boolean | FieldType::UtcDatetime => "INTEGER",
    }
}

/// Whether `column` is the foreign key of a `belongs_to` relation to the host.
fn references_host(host: &HostDefinition, column: &str) -> bool {
    host.relations.iter().any(|relation| {
        relation.kind == RelationKind::BelongsTo
            && relation.foreign_key() == column
            && relation.target == RelationTarget::Entity(host.entity.clone())
    })
}

fn existing_columns(conn: &Connection, table: &str) -> DbResult<BTreeMap<String, String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        let declared: String = row.get("type")?;
        columns.insert(name, declared);
    }
    Ok(columns)
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::{create_index_sql, create_table_sql};
    use crate::schema::host::HostDefinition;
    use crate::schema::{FieldSpec, FieldType, IndexSpec, RelationSpec, RelationTarget};

    fn host() -> HostDefinition {
        HostDefinition {
            entity: "User".to_string(),
            table: "users".to_string(),
            fields: vec![
                FieldSpec::new("email", FieldType::String),
                FieldSpec::new("invited_by_id", FieldType::Id),
                FieldSpec::new("team_id", FieldType::Id),
            ],
            relations: vec![
                RelationSpec::belongs_to("invited_by", RelationTarget::Entity("User".to_string())),
                RelationSpec::belongs_to("team", RelationTarget::Entity("Team".to_string())),
            ],
            indexes: vec![IndexSpec::unique(&["email"])],
        }
    }

    #[test]
    fn table_sql_references_host_only_for_host_relations() {
        let sql = create_table_sql(&host());
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"users\""));
        assert!(sql.contains("\"id\" TEXT PRIMARY KEY NOT NULL"));
        assert!(sql.contains("\"invited_by_id\" TEXT REFERENCES \"users\"(\"id\")"));
        assert!(sql.ends_with("\"team_id\" TEXT\n);"));
    }

    #[test]
    fn index_sql_uses_table_and_field_names() {
        assert_eq!(
            create_index_sql("users", &IndexSpec::unique(&["email"])),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"users_email_index\" ON \"users\" (\"email\");"
        );
        assert_eq!(
            create_index_sql("users", &IndexSpec::non_unique(&["a", "b"])),
            "CREATE INDEX IF NOT EXISTS \"users_a_b_index\" ON \"users\" (\"a\", \"b\");"
        );
    }
}
