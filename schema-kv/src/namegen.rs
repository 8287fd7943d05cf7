//! C3 — the name generator: mints globally unique table ids, per-table
//! index ids, and storage tree names.
//!
//! spec.md §4.3 describes two layers: an in-process [`DefaultNameGenerator`]
//! that tracks identifiers already in use (so a freshly loaded AIS doesn't
//! collide with ids a concurrent DDL is about to claim), and a per-call
//! KV-backed minter -- implemented here as free functions over a
//! [`Transaction`] -- that actually allocates the next id under the
//! schema-manager directory (or, for online DDL, under that online
//! session's own subtree, per "data-path" vs. "online-path" in spec.md
//! §4.3). Uniqueness across nodes falls out of spec.md's concurrency
//! model: the id counter lives in the same transaction as the generation
//! bump, so two concurrent claims conflict and one of them retries.

use std::collections::{HashMap, HashSet};

use crate::ais::{Ais, IndexId, TableId};
use crate::error::CResult;
use crate::kv::directory;
use crate::kv::engine::Engine;
use crate::kv::transaction::Transaction;
use crate::kv::tuple;

/// In-process tracker of identifiers already claimed by some AIS this
/// process has seen, so the KV-backed minter can skip over anything
/// already in use even if the KV counter hasn't caught up yet (e.g. right
/// after `CLEAR_INCOMPATIBLE_DATA` reinitializes the counter but an
/// in-memory table still claims a low id).
#[derive(Debug, Default)]
pub struct DefaultNameGenerator {
    used_table_ids: HashSet<TableId>,
    used_index_ids: HashMap<TableId, HashSet<IndexId>>,
    used_tree_names: HashSet<String>,
}

impl DefaultNameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds every id/name already used by `ais` into the tracker. Called
    /// whenever a freshly loaded or staged AIS becomes known to this
    /// process (spec.md §4.3 `merge_ais`).
    pub fn merge_ais(&mut self, ais: &Ais) {
        for table in ais.tables() {
            self.used_table_ids.insert(table.id);
            let indexes = self.used_index_ids.entry(table.id).or_default();
            for index in &table.indexes {
                indexes.insert(index.id);
            }
            if let Some(tree) = &table.group_name {
                self.used_tree_names.insert(tree.clone());
            }
        }
    }

    fn is_table_id_used(&self, id: TableId) -> bool {
        self.used_table_ids.contains(&id)
    }

    fn claim_table_id(&mut self, id: TableId) {
        self.used_table_ids.insert(id);
    }

    fn is_index_id_used(&self, table_id: TableId, id: IndexId) -> bool {
        self.used_index_ids.get(&table_id).map(|s| s.contains(&id)).unwrap_or(false)
    }

    fn claim_index_id(&mut self, table_id: TableId, id: IndexId) {
        self.used_index_ids.entry(table_id).or_default().insert(id);
    }

    fn is_tree_name_used(&self, name: &str) -> bool {
        self.used_tree_names.contains(name)
    }

    fn claim_tree_name(&mut self, name: &str) {
        self.used_tree_names.insert(name.to_string());
    }
}

const TABLE_COUNTER: &str = "nextTableId";
const TREE_COUNTER: &str = "nextTreeId";

fn counter_next<E: Engine>(txn: &Transaction<E>, root: &[String], counter_name: &str) -> CResult<i64> {
    let dir = directory::create_or_open(txn, &[root, &["idGen".to_string()]].concat())?;
    let key = directory::pack(&dir, counter_name.as_bytes());
    let next = match txn.get(&key)? {
        Some(v) => tuple::unpack_i64(&v)? + 1,
        None => 1,
    };
    txn.set(&key, tuple::pack_i64(next))?;
    Ok(next)
}

/// The schema-manager's own root path (`["schemaManager"]`), under which
/// the data-path counters live.
pub fn data_path_root() -> Vec<String> {
    vec!["schemaManager".to_string()]
}

/// Root path for an online session's own counters, per spec.md's
/// `online/<id>/` subtree.
pub fn online_path_root(online_id: i64) -> Vec<String> {
    vec!["schemaManager".to_string(), "online".to_string(), online_id.to_string()]
}

/// Claims the next globally unique table id under `root`, reconciling
/// against `local` so an id already in use (by any AIS this process has
/// merged in) is never handed out twice even if the KV counter is behind.
pub fn next_table_id<E: Engine>(txn: &Transaction<E>, root: &[String], local: &mut DefaultNameGenerator) -> CResult<TableId> {
    loop {
        let candidate = counter_next(txn, root, TABLE_COUNTER)? as TableId;
        if !local.is_table_id_used(candidate) {
            local.claim_table_id(candidate);
            return Ok(candidate);
        }
    }
}

/// Claims the next index id unique within `table_id`.
pub fn next_index_id<E: Engine>(
    txn: &Transaction<E>,
    root: &[String],
    table_id: TableId,
    local: &mut DefaultNameGenerator,
) -> CResult<IndexId> {
    let counter = format!("nextIndexId/{table_id}");
    loop {
        let candidate = counter_next(txn, root, &counter)? as IndexId;
        if !local.is_index_id_used(table_id, candidate) {
            local.claim_index_id(table_id, candidate);
            return Ok(candidate);
        }
    }
}

/// Claims a fresh storage tree name for a table, derived from its
/// schema-qualified name plus a disambiguating counter so repeated
/// renames never collide.
pub fn next_tree_name<E: Engine>(
    txn: &Transaction<E>,
    root: &[String],
    schema: &str,
    table: &str,
    local: &mut DefaultNameGenerator,
) -> CResult<String> {
    loop {
        let n = counter_next(txn, root, TREE_COUNTER)?;
        let candidate = format!("{schema}.{table}.{n}");
        if !local.is_tree_name_used(&candidate) {
            local.claim_tree_name(&candidate);
            return Ok(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::Memory;
    use crate::kv::mvcc::{MVCCDef, MVCC};

    #[test]
    fn table_ids_are_monotonic_and_unique() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let mut local = DefaultNameGenerator::new();
        let root = data_path_root();
        let a = next_table_id(&txn, &root, &mut local).unwrap();
        let b = next_table_id(&txn, &root, &mut local).unwrap();
        assert_ne!(a, b);
        txn.commit().unwrap();
    }

    #[test]
    fn merge_ais_prevents_reissuing_ids() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let mut local = DefaultNameGenerator::new();

        let mut builder = crate::ais::AisBuilder::from_ais(&Ais::empty());
        builder.add_table(1, "s", "t", vec![]).ok();
        // force a table with id 1 directly into `local` the way `merge_ais` would
        local.claim_table_id(1);

        let root = data_path_root();
        let next = next_table_id(&txn, &root, &mut local).unwrap();
        assert_ne!(next, 1);
        txn.commit().unwrap();
    }

    #[test]
    fn index_ids_unique_per_table() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let mut local = DefaultNameGenerator::new();
        let root = data_path_root();
        let a = next_index_id(&txn, &root, 7, &mut local).unwrap();
        let b = next_index_id(&txn, &root, 7, &mut local).unwrap();
        let c = next_index_id(&txn, &root, 8, &mut local).unwrap();
        assert_ne!(a, b);
        assert_eq!(c, a);
        txn.commit().unwrap();
    }
}
