//! C2 — the AIS codec: serialize a schema's worth of an [`Ais`] into a
//! canonical binary fragment, and read fragments back into an accumulating
//! reader that `finish`es into a fresh `Ais`.
//!
//! spec.md §4.2 and §9 ("Protobuf-framed metadata... framed by schema name
//! so partial re-writes cost O(changed schemas)"). This crate has no
//! protobuf dependency in its corpus, so fragments are framed with
//! `bincode` instead -- the teacher's own on-disk framing idiom (see
//! `codec::bytes_codec` in the teacher's `kv` crate, which length-prefixes
//! `bincode`-encoded values for the log file). Generation is deliberately
//! absent from the fragment: spec.md is explicit that "generation is not
//! part of the fragments; it is set separately by C4".

use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

use crate::ais::{Ais, AisBuilder, Column, ForeignKey, Index, Routine, Sequence, Table, TableId};
use crate::error::{CResult, Error};

/// Governs which elements of a schema a fragment includes. spec.md §4.2
/// names three standard selectors.
#[derive(Debug, Clone)]
pub enum WriteSelector {
    /// Every table, index, sequence and routine in the schema.
    AllSchemas,
    /// Same as `AllSchemas`, but documents that the fragment is meant to
    /// stand alone as a single schema's complete state (used when staging
    /// or publishing one schema at a time).
    SingleSchema,
    /// Excludes memory-only tables, and excludes routines entirely for the
    /// schemas named in `system_schemas` (spec.md §4.2: "a schema-filtered
    /// variant that excludes memory tables or excludes routines in
    /// selected system schemas").
    ExcludingMemoryAndSystemRoutines { system_schemas: Vec<String> },
}

impl WriteSelector {
    fn includes_table(&self, table: &Table) -> bool {
        match self {
            WriteSelector::ExcludingMemoryAndSystemRoutines { .. } => !table.is_memory_table,
            _ => true,
        }
    }

    fn includes_routines(&self, schema_name: &str) -> bool {
        match self {
            WriteSelector::ExcludingMemoryAndSystemRoutines { system_schemas } => {
                !system_schemas.iter().any(|s| s == schema_name)
            }
            _ => true,
        }
    }
}

/// The on-the-wire shape of one schema's fragment: enough to reconstruct
/// every table/index/sequence/routine that belongs to the schema, plus the
/// foreign keys whose child lives in it (so a parent-only reference to a
/// table in another, unchanged schema doesn't force that schema to be
/// rewritten too).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaFragment {
    schema_name: String,
    tables: Vec<Table>,
    sequences: BTreeMap<String, Sequence>,
    routines: BTreeMap<String, Routine>,
    foreign_keys: Vec<ForeignKey>,
}

/// Serializes the named schema out of `ais` into a standalone fragment,
/// honoring `selector`'s filtering rules. Returns an error if the schema
/// does not exist in `ais`.
pub fn serialize(ais: &Ais, schema_name: &str, selector: &WriteSelector) -> CResult<Vec<u8>> {
    let schema = ais.schema(schema_name).ok_or_else(|| Error::Internal(format!("no such schema {schema_name}")))?;
    let tables: Vec<Table> = schema
        .tables
        .values()
        .filter_map(|id| ais.table(*id))
        .filter(|t| selector.includes_table(t))
        .cloned()
        .collect();
    let table_ids: std::collections::HashSet<TableId> = tables.iter().map(|t| t.id).collect();
    let foreign_keys = ais.foreign_keys().iter().filter(|fk| table_ids.contains(&fk.child_table)).cloned().collect();
    let routines = if selector.includes_routines(schema_name) { schema.routines.clone() } else { BTreeMap::new() };
    let fragment = SchemaFragment {
        schema_name: schema_name.to_string(),
        tables,
        sequences: schema.sequences.clone(),
        routines,
        foreign_keys,
    };
    bincode::serialize(&fragment).map_err(|e| Error::Parse(e.to_string()))
}

/// Accumulates fragments read from storage (one per schema) into a single
/// builder, ready for [`AisReader::finish`].
pub struct AisReader {
    builder: AisBuilder,
}

impl Default for AisReader {
    fn default() -> Self {
        Self { builder: AisBuilder::from_ais(&Ais::empty()) }
    }
}

impl AisReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one schema's fragment into the reader. Fragments may be fed
    /// in any order; a later fragment for a schema already seen replaces
    /// that schema's tables/sequences/routines/foreign-keys wholesale
    /// (fragments are always whole-schema snapshots, never deltas).
    pub fn read_into(&mut self, bytes: &[u8]) -> CResult<()> {
        let fragment: SchemaFragment = bincode::deserialize(bytes).map_err(|e| Error::Parse(e.to_string()))?;
        self.builder.ensure_schema(&fragment.schema_name);
        // Drop whatever this schema previously contributed before re-adding
        // it, so re-reading a fragment (e.g. during a retry) is idempotent.
        let stale: Vec<(String, String)> = self
            .builder
            .schema(&fragment.schema_name)
            .map(|s| s.tables.keys().cloned().map(|t| (fragment.schema_name.clone(), t)).collect())
            .unwrap_or_default();
        for (schema, table) in stale {
            let _ = self.builder.drop_table(&schema, &table);
        }
        for table in fragment.tables {
            let columns: Vec<Column> = table.columns.clone();
            self.builder.add_table(table.id, &table.schema, &table.name, columns)?;
            for index in table.indexes {
                self.builder.add_index(table.id, index)?;
            }
            if table.is_memory_table {
                self.builder.table_mut(table.id).unwrap().is_memory_table = true;
            }
            if let Some(group) = table.group_name {
                self.builder.set_group_name(table.id, group)?;
            }
            // The hidden PK column lives outside `columns` (see
            // `Table::hidden_pk_column`); its backing index came back above
            // via `add_index`, but the column itself has to be restored
            // separately since `add_table` only takes the visible columns.
            self.builder.table_mut(table.id).unwrap().hidden_pk_column = table.hidden_pk_column;
            // `add_table`/`add_index` each bump `version`; restore the
            // fragment's own version afterward since this is a read, not a
            // mutation.
            self.builder.table_mut(table.id).unwrap().version = table.version;
        }
        for sequence in fragment.sequences.into_values() {
            self.builder.add_sequence(&fragment.schema_name, sequence);
        }
        for routine in fragment.routines.into_values() {
            self.builder.add_routine(&fragment.schema_name, routine);
        }
        for fk in fragment.foreign_keys {
            self.builder.add_foreign_key(fk)?;
        }
        Ok(())
    }

    /// Resolves references, runs per-table finalization and the full
    /// validator set, and returns the resulting AIS (spec.md §4.2
    /// `finish`). The returned AIS's `generation` is always `0`; callers
    /// set it from C4's registry.
    pub fn finish(self) -> CResult<Ais> {
        self.builder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ais::{AisBuilder, Column};

    fn col(name: &str) -> Column {
        Column { name: name.to_string(), position: 0, type_name: "INT".to_string(), nullable: true }
    }

    #[test]
    fn round_trip_single_schema() {
        let mut builder = AisBuilder::from_ais(&Ais::empty());
        builder.add_table(1, "test", "t", vec![col("a"), col("b")]).unwrap();
        builder.add_index(1, Index { id: 1, name: "pk".into(), columns: vec!["a".into()], is_primary: true, is_unique: true }).unwrap();
        let ais = builder.finish().unwrap();

        let bytes = serialize(&ais, "test", &WriteSelector::AllSchemas).unwrap();
        let mut reader = AisReader::new();
        reader.read_into(&bytes).unwrap();
        let round_tripped = reader.finish().unwrap();

        let original_table = ais.table_by_name("test", "t").unwrap();
        let rt_table = round_tripped.table_by_name("test", "t").unwrap();
        assert_eq!(original_table.columns, rt_table.columns);
        assert_eq!(original_table.indexes, rt_table.indexes);
    }

    #[test]
    fn excludes_memory_tables_when_filtered() {
        let mut builder = AisBuilder::from_ais(&Ais::empty());
        builder.add_table(1, "sys", "real", vec![col("a")]).unwrap();
        builder.add_memory_table(2, "sys", "mem", vec![col("a")]).unwrap();
        let ais = builder.finish().unwrap();

        let selector = WriteSelector::ExcludingMemoryAndSystemRoutines { system_schemas: vec![] };
        let bytes = serialize(&ais, "sys", &selector).unwrap();
        let mut reader = AisReader::new();
        reader.read_into(&bytes).unwrap();
        let filtered = reader.finish().unwrap();

        assert!(filtered.table_by_name("sys", "real").is_some());
        assert!(filtered.table_by_name("sys", "mem").is_none());
    }

    #[test]
    fn multi_schema_fragments_merge() {
        let mut builder = AisBuilder::from_ais(&Ais::empty());
        builder.add_table(1, "a", "t1", vec![col("x")]).unwrap();
        builder.add_table(2, "b", "t2", vec![col("y")]).unwrap();
        let ais = builder.finish().unwrap();

        let mut reader = AisReader::new();
        reader.read_into(&serialize(&ais, "a", &WriteSelector::AllSchemas).unwrap()).unwrap();
        reader.read_into(&serialize(&ais, "b", &WriteSelector::AllSchemas).unwrap()).unwrap();
        let merged = reader.finish().unwrap();

        assert!(merged.table_by_name("a", "t1").is_some());
        assert!(merged.table_by_name("b", "t2").is_some());
    }
}
