//! The Akiban Information Schema (AIS): the in-memory snapshot of every
//! schema, table, index, sequence, routine and foreign key the schema
//! manager knows about.
//!
//! Per the design note in spec.md §9 ("cyclic graph... own entities in
//! arenas indexed by stable 32-bit ids; cross-references are stored as ids,
//! resolved via lookup; AIS is immutable once frozen so references never
//! dangle"), tables live in a flat `TableId`-indexed arena and everything
//! that would otherwise be a back-reference (index→table, foreign key
//! child/parent→table) is stored as an id and resolved through [`Ais`]'s
//! accessors rather than as a live pointer.

pub mod codec;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{CResult, Error};

pub type TableId = u32;
pub type IndexId = u32;

/// A table column. Positions are 0-based and dense within a table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Column {
    pub name: String,
    pub position: u32,
    pub type_name: String,
    pub nullable: bool,
}

/// An index on a table: either the table's primary key, a unique secondary
/// index, or a plain secondary index. `columns` names table columns by
/// name, in index key order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Index {
    pub id: IndexId,
    pub name: String,
    pub columns: Vec<String>,
    pub is_primary: bool,
    pub is_unique: bool,
}

/// A sequence generator, associated with a schema rather than a table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Sequence {
    pub name: String,
    pub start_with: i64,
    pub increment: i64,
}

/// A stored routine (procedure/function). The body is kept opaque: this
/// subsystem persists and versions routines, it does not execute them.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Routine {
    pub name: String,
    pub definition: String,
}

/// A foreign key from a child table to a parent table, both identified by
/// id so the reference survives table renames.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub child_table: TableId,
    pub child_columns: Vec<String>,
    pub parent_table: TableId,
    pub parent_columns: Vec<String>,
}

/// A table: its columns, indexes, and the bookkeeping the schema manager
/// needs (the per-table `version`, whether it's a memory-only table, and
/// which hkey-sharing group it belongs to, per spec.md §9's "table→group"
/// back-reference).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Table {
    pub id: TableId,
    pub schema: String,
    pub name: String,
    /// Per-table monotonic version. Bumped whenever this table's own
    /// definition changes (spec.md §3: "per-table version (32-bit,
    /// per-table monotonic)").
    pub version: u32,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    /// True for system/in-process catalogs that are never persisted
    /// (spec.md §3 invariant 6). Excluded from the persisted fragments by
    /// [`codec::WriteSelector::ExcludingMemoryAndSystemRoutines`].
    pub is_memory_table: bool,
    /// Name of the storage group (hkey-sharing tree) this table belongs
    /// to; `None` until a tree name has been assigned.
    pub group_name: Option<String>,
    /// The synthesized `__hkey_id` column backing a hidden primary key
    /// (spec.md §4.2 "hidden PK generation"), kept out of `columns`: it is
    /// bookkeeping the schema manager introduced, not part of the table a
    /// caller declared. Akiban's own hidden-PK column is likewise tracked
    /// apart from the user's declared column list.
    pub hidden_pk_column: Option<Column>,
}

impl Table {
    pub fn primary_index(&self) -> Option<&Index> {
        self.indexes.iter().find(|i| i.is_primary)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.hidden_pk_column.as_ref().filter(|c| c.name == name))
    }
}

/// A schema: a named collection of tables (held by id), sequences and
/// routines.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Schema {
    pub name: String,
    pub tables: BTreeMap<String, TableId>,
    pub sequences: BTreeMap<String, Sequence>,
    pub routines: BTreeMap<String, Routine>,
}

/// An immutable, frozen schema snapshot. Per spec.md §3: "Invariant: a
/// frozen AIS is never mutated; any change produces a new AIS with
/// `generation > previous.generation`." Construct new values via
/// [`AisBuilder`] and [`AisBuilder::finish`], never by mutating one in
/// place.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Ais {
    pub generation: i64,
    schemas: BTreeMap<String, Schema>,
    tables: BTreeMap<TableId, Table>,
    foreign_keys: Vec<ForeignKey>,
}

impl Ais {
    pub fn empty() -> Self {
        Self { generation: 0, schemas: BTreeMap::new(), tables: BTreeMap::new(), foreign_keys: Vec::new() }
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn schema_names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(&id)
    }

    pub fn table_by_name(&self, schema: &str, table: &str) -> Option<&Table> {
        let id = self.schemas.get(schema)?.tables.get(table)?;
        self.tables.get(id)
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Every storage path (group tree name) referenced by a table in this
    /// AIS. Backs `SchemaManager::list_storage_paths` (spec.md §4.6).
    pub fn storage_paths(&self) -> std::collections::BTreeSet<String> {
        self.tables.values().filter_map(|t| t.group_name.clone()).collect()
    }
}

/// A mutable clone-and-mutate staging area for building a new [`Ais`].
/// `SchemaManager::apply_ddl` clones the current AIS into one of these,
/// applies the caller's mutator, then calls [`AisBuilder::finish`] to
/// validate and freeze it (spec.md §4.6, §4.2 `finish`).
#[derive(Debug, Clone)]
pub struct AisBuilder {
    schemas: BTreeMap<String, Schema>,
    tables: BTreeMap<TableId, Table>,
    foreign_keys: Vec<ForeignKey>,
}

impl AisBuilder {
    pub fn from_ais(ais: &Ais) -> Self {
        Self { schemas: ais.schemas.clone(), tables: ais.tables.clone(), foreign_keys: ais.foreign_keys.clone() }
    }

    pub fn ensure_schema(&mut self, name: &str) -> &mut Schema {
        self.schemas.entry(name.to_string()).or_insert_with(|| Schema { name: name.to_string(), ..Default::default() })
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(&id)
    }

    pub fn table_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(&id)
    }

    pub fn table_by_name(&self, schema: &str, table: &str) -> Option<&Table> {
        let id = self.schemas.get(schema)?.tables.get(table)?;
        self.tables.get(id)
    }

    /// Adds a brand new table, previously minted via the name generator
    /// (C3). `columns` must be non-empty; a hidden primary key is
    /// synthesized at `finish` time if none of `indexes` is primary.
    pub fn add_table(&mut self, id: TableId, schema: &str, name: &str, columns: Vec<Column>) -> CResult<()> {
        if self.tables.contains_key(&id) {
            return Err(Error::Internal(format!("table id {id} already in use")));
        }
        self.ensure_schema(schema);
        let table = Table {
            id,
            schema: schema.to_string(),
            name: name.to_string(),
            version: 1,
            columns,
            indexes: Vec::new(),
            is_memory_table: false,
            group_name: None,
            hidden_pk_column: None,
        };
        self.schemas.get_mut(schema).unwrap().tables.insert(name.to_string(), id);
        self.tables.insert(id, table);
        Ok(())
    }

    pub fn add_memory_table(&mut self, id: TableId, schema: &str, name: &str, columns: Vec<Column>) -> CResult<()> {
        self.add_table(id, schema, name, columns)?;
        self.tables.get_mut(&id).unwrap().is_memory_table = true;
        Ok(())
    }

    pub fn add_index(&mut self, table_id: TableId, index: Index) -> CResult<()> {
        let table = self.tables.get_mut(&table_id).ok_or_else(|| Error::Internal(format!("unknown table id {table_id}")))?;
        table.indexes.push(index);
        table.version += 1;
        Ok(())
    }

    pub fn add_column(&mut self, table_id: TableId, column: Column) -> CResult<()> {
        let table = self.tables.get_mut(&table_id).ok_or_else(|| Error::Internal(format!("unknown table id {table_id}")))?;
        table.columns.push(column);
        table.version += 1;
        Ok(())
    }

    pub fn drop_column(&mut self, table_id: TableId, column_name: &str) -> CResult<()> {
        let table = self.tables.get_mut(&table_id).ok_or_else(|| Error::Internal(format!("unknown table id {table_id}")))?;
        table.columns.retain(|c| c.name != column_name);
        table.indexes.retain(|i| !i.columns.iter().any(|c| c == column_name));
        table.version += 1;
        Ok(())
    }

    pub fn set_group_name(&mut self, table_id: TableId, group_name: String) -> CResult<()> {
        let table = self.tables.get_mut(&table_id).ok_or_else(|| Error::Internal(format!("unknown table id {table_id}")))?;
        table.group_name = Some(group_name);
        Ok(())
    }

    pub fn add_foreign_key(&mut self, fk: ForeignKey) -> CResult<()> {
        if !self.tables.contains_key(&fk.child_table) || !self.tables.contains_key(&fk.parent_table) {
            return Err(Error::InvalidSchema { reasons: vec![format!("foreign key {} references an unknown table", fk.name)] });
        }
        self.foreign_keys.push(fk);
        Ok(())
    }

    pub fn add_sequence(&mut self, schema: &str, sequence: Sequence) {
        self.ensure_schema(schema).sequences.insert(sequence.name.clone(), sequence);
    }

    pub fn add_routine(&mut self, schema: &str, routine: Routine) {
        self.ensure_schema(schema).routines.insert(routine.name.clone(), routine);
    }

    pub fn rename_table(&mut self, old_schema: &str, old_name: &str, new_schema: &str, new_name: &str) -> CResult<()> {
        let id = *self
            .schemas
            .get(old_schema)
            .and_then(|s| s.tables.get(old_name))
            .ok_or_else(|| Error::InvalidSchema { reasons: vec![format!("no such table {old_schema}.{old_name}")] })?;
        if self.schemas.get(new_schema).map(|s| s.tables.contains_key(new_name)).unwrap_or(false) {
            return Err(Error::InvalidSchema { reasons: vec![format!("table {new_schema}.{new_name} already exists")] });
        }
        self.schemas.get_mut(old_schema).unwrap().tables.remove(old_name);
        self.ensure_schema(new_schema).tables.insert(new_name.to_string(), id);
        let table = self.tables.get_mut(&id).unwrap();
        table.schema = new_schema.to_string();
        table.name = new_name.to_string();
        Ok(())
    }

    pub fn drop_table(&mut self, schema: &str, name: &str) -> CResult<TableId> {
        let id = self
            .schemas
            .get_mut(schema)
            .and_then(|s| s.tables.remove(name))
            .ok_or_else(|| Error::InvalidSchema { reasons: vec![format!("no such table {schema}.{name}")] })?;
        self.tables.remove(&id);
        self.foreign_keys.retain(|fk| fk.child_table != id && fk.parent_table != id);
        Ok(id)
    }

    /// Synthesizes a single-column hidden primary key (`__hkey_id`) for any
    /// table that declares none, per the design note in spec.md §4.2
    /// ("invokes per-table finalization (hidden PK generation...)").
    fn synthesize_hidden_pks(&mut self) {
        for table in self.tables.values_mut() {
            if table.primary_index().is_none() {
                let hidden_col = "__hkey_id".to_string();
                if table.hidden_pk_column.is_none() {
                    table.hidden_pk_column = Some(Column {
                        name: hidden_col.clone(),
                        position: table.columns.len() as u32,
                        type_name: "BIGINT".to_string(),
                        nullable: false,
                    });
                }
                let next_index_id = table.indexes.iter().map(|i| i.id).max().map(|n| n + 1).unwrap_or(1);
                table.indexes.push(Index {
                    id: next_index_id,
                    name: "__hidden_pk".to_string(),
                    columns: vec![hidden_col],
                    is_primary: true,
                    is_unique: true,
                });
            }
        }
    }

    /// Validates the candidate AIS as a whole. Used both at `finish` time
    /// and by the round-trip codec path (spec.md §4.2 `finish`: "...
    /// validates with the full validator set; fails with
    /// `InvalidSchema{reasons}` otherwise").
    fn validate(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        for schema in self.schemas.values() {
            for (table_name, table_id) in &schema.tables {
                match self.tables.get(table_id) {
                    None => reasons.push(format!("schema {} references missing table id {table_id}", schema.name)),
                    Some(table) => {
                        if &table.name != table_name {
                            reasons.push(format!("table id {table_id} name mismatch: schema says {table_name}, table says {}", table.name));
                        }
                        if table.columns.is_empty() {
                            reasons.push(format!("table {}.{} has no columns", schema.name, table.name));
                        }
                        let mut seen = std::collections::HashSet::new();
                        for column in &table.columns {
                            if !seen.insert(&column.name) {
                                reasons.push(format!("table {}.{} has duplicate column {}", schema.name, table.name, column.name));
                            }
                        }
                        for index in &table.indexes {
                            for col in &index.columns {
                                if table.column(col).is_none() {
                                    reasons.push(format!(
                                        "index {} on table {}.{} references unknown column {col}",
                                        index.name, schema.name, table.name
                                    ));
                                }
                            }
                        }
                        if table.indexes.iter().filter(|i| i.is_primary).count() > 1 {
                            reasons.push(format!("table {}.{} has more than one primary index", schema.name, table.name));
                        }
                    }
                }
            }
        }
        for fk in &self.foreign_keys {
            match (self.tables.get(&fk.child_table), self.tables.get(&fk.parent_table)) {
                (Some(child), Some(parent)) => {
                    for col in &fk.child_columns {
                        if child.column(col).is_none() {
                            reasons.push(format!("foreign key {} child column {col} not found on table {}", fk.name, child.name));
                        }
                    }
                    for col in &fk.parent_columns {
                        if parent.column(col).is_none() {
                            reasons.push(format!("foreign key {} parent column {col} not found on table {}", fk.name, parent.name));
                        }
                    }
                }
                _ => reasons.push(format!("foreign key {} references a missing table", fk.name)),
            }
        }
        reasons
    }

    /// Resolves references, synthesizes hidden PKs, validates, and freezes
    /// this builder into an immutable [`Ais`]. The returned AIS has
    /// `generation == 0`; the caller (C4/C6) is responsible for assigning
    /// the real generation once one has been allocated.
    pub fn finish(mut self) -> CResult<Ais> {
        self.synthesize_hidden_pks();
        let reasons = self.validate();
        if !reasons.is_empty() {
            return Err(Error::InvalidSchema { reasons });
        }
        Ok(Ais { generation: 0, schemas: self.schemas, tables: self.tables, foreign_keys: self.foreign_keys })
    }
}

/// Table ids claimed (in this AIS) by schema, for [`crate::namegen`]'s
/// `merge_ais` and [`crate::online::OnlineCache`]'s uniqueness checks.
pub fn table_ids(ais: &Ais) -> Vec<TableId> {
    ais.tables.keys().copied().collect()
}

pub type SharedAis = Arc<Ais>;

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, pos: u32) -> Column {
        Column { name: name.to_string(), position: pos, type_name: "INT".to_string(), nullable: true }
    }

    #[test]
    fn hidden_pk_synthesized_when_missing() {
        let mut builder = AisBuilder::from_ais(&Ais::empty());
        builder.add_table(1, "test", "t", vec![col("a", 0)]).unwrap();
        let ais = builder.finish().unwrap();
        let table = ais.table_by_name("test", "t").unwrap();
        assert!(table.primary_index().is_some());
        assert!(table.column("__hkey_id").is_some());
        assert!(table.columns.iter().all(|c| c.name != "__hkey_id"));
    }

    #[test]
    fn validation_rejects_empty_table() {
        let mut builder = AisBuilder::from_ais(&Ais::empty());
        builder.add_table(1, "test", "t", vec![]).unwrap();
        let err = builder.finish().unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn rename_moves_table_between_schemas() {
        let mut builder = AisBuilder::from_ais(&Ais::empty());
        builder.add_table(1, "a", "t", vec![col("x", 0)]).unwrap();
        builder.rename_table("a", "t", "b", "t2").unwrap();
        let ais = builder.finish().unwrap();
        assert!(ais.table_by_name("a", "t").is_none());
        assert!(ais.table_by_name("b", "t2").is_some());
    }
}
