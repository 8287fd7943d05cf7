//! The subcommands `schema-cli` exposes, and the tiny hand-rolled DDL
//! shorthand (`schema.table(column:type, ...)`) that drives
//! [`schema_kv::manager::SchemaManager::apply_ddl`] from a terminal. This is
//! explicitly not a SQL front end -- the parser/planner/executor that would
//! normally sit here are out of scope per spec.md §1.

use anyhow::{anyhow, Result};
use clap::Subcommand;
use schema_kv::ais::Column;
use schema_kv::online::{ChangeSet, ChangeSetKind};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs (or re-runs) schema-manager startup and reports the resulting
    /// generation/version state. spec.md §8 scenario S1.
    Init,

    /// Prints the current generation, versions, and a schema/table summary.
    Status,

    /// Creates a table: `schema.table(col:type, col:type, ...)`.
    CreateTable { spec: String },

    /// Drops a table: `schema.table`.
    DropTable { spec: String },

    /// Renames a table: `old_schema.old_table new_schema.new_table`.
    RenameTable { from: String, to: String },

    /// Lists every storage path (tree name) the current AIS references.
    Gc,

    #[command(subcommand)]
    Online(OnlineCommand),
}

#[derive(Debug, Subcommand)]
pub enum OnlineCommand {
    /// Begins a new online (concurrent) DDL session and prints its id.
    Begin,

    /// Records a ChangeSet against an online id: `<id> <table_id> <kind>`.
    AddChange { id: i64, table_id: u32, kind: String },

    /// Stages a candidate AIS under an online id:
    /// `<id> <comma,separated,schemas> <table_id> <kind>`.
    Stage { id: i64, schemas: String, table_id: u32, kind: String },

    /// Publishes a staged online change.
    Finalize { id: i64 },

    /// Discards a staged online change.
    Abort { id: i64 },
}

/// `schema.table(col:type, col:type, ...)` -> (schema, table, columns).
pub fn parse_create_table_spec(spec: &str) -> Result<(String, String, Vec<Column>)> {
    let open = spec.find('(').ok_or_else(|| anyhow!("expected `schema.table(col:type, ...)`, got {spec:?}"))?;
    let close = spec
        .rfind(')')
        .filter(|&c| c > open)
        .ok_or_else(|| anyhow!("missing closing ')' in table spec {spec:?}"))?;
    let (schema, table) = parse_qualified_name(&spec[..open])?;

    let mut columns = Vec::new();
    for (position, raw) in spec[open + 1..close].split(',').enumerate() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (name, type_name) =
            raw.split_once(':').ok_or_else(|| anyhow!("expected `name:type` in column spec {raw:?}"))?;
        columns.push(Column {
            name: name.trim().to_string(),
            position: position as u32,
            type_name: type_name.trim().to_uppercase(),
            nullable: true,
        });
    }
    if columns.is_empty() {
        return Err(anyhow!("table spec {spec:?} declares no columns"));
    }
    Ok((schema, table, columns))
}

/// `schema.table` -> (schema, table).
pub fn parse_qualified_name(spec: &str) -> Result<(String, String)> {
    let (schema, table) = spec
        .trim()
        .split_once('.')
        .ok_or_else(|| anyhow!("expected `schema.table`, got {spec:?}"))?;
    if schema.is_empty() || table.is_empty() {
        return Err(anyhow!("expected `schema.table`, got {spec:?}"));
    }
    Ok((schema.to_string(), table.to_string()))
}

/// `add-column:name`, `drop-column:name`, `alter-type:name:newtype`, or
/// `alter-pk` -> a [`ChangeSet`] for `table_id`.
pub fn parse_change_set(table_id: u32, kind: &str) -> Result<ChangeSet> {
    let mut parts = kind.splitn(3, ':');
    let tag = parts.next().unwrap_or_default();
    let kind = match tag {
        "add-column" => ChangeSetKind::AddColumn {
            column: parts.next().ok_or_else(|| anyhow!("add-column requires a column name"))?.to_string(),
        },
        "drop-column" => ChangeSetKind::DropColumn {
            column: parts.next().ok_or_else(|| anyhow!("drop-column requires a column name"))?.to_string(),
        },
        "alter-type" => {
            let column = parts.next().ok_or_else(|| anyhow!("alter-type requires a column name"))?.to_string();
            let new_type =
                parts.next().ok_or_else(|| anyhow!("alter-type requires a new type"))?.to_uppercase();
            ChangeSetKind::AlterColumnType { column, new_type }
        }
        "alter-pk" => ChangeSetKind::AlterPrimaryKey,
        other => ChangeSetKind::Other(other.to_string()),
    };
    Ok(ChangeSet { table_id, kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table_spec() {
        let (schema, table, columns) = parse_create_table_spec("test.t(a:int, b:text)").unwrap();
        assert_eq!(schema, "test");
        assert_eq!(table, "t");
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "a");
        assert_eq!(columns[0].type_name, "INT");
        assert_eq!(columns[1].name, "b");
    }

    #[test]
    fn rejects_spec_without_columns() {
        assert!(parse_create_table_spec("test.t()").is_err());
    }

    #[test]
    fn parses_qualified_name() {
        let (schema, table) = parse_qualified_name("a.b").unwrap();
        assert_eq!((schema.as_str(), table.as_str()), ("a", "b"));
        assert!(parse_qualified_name("noschema").is_err());
    }

    #[test]
    fn parses_change_set_kinds() {
        let cs = parse_change_set(1, "add-column:x").unwrap();
        assert!(matches!(cs.kind, ChangeSetKind::AddColumn { column } if column == "x"));
        let cs = parse_change_set(1, "alter-type:x:bigint").unwrap();
        assert!(matches!(cs.kind, ChangeSetKind::AlterColumnType { column, new_type } if column == "x" && new_type == "BIGINT"));
    }
}
