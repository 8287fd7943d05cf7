//! C5 — the online session tracker: the per-DDL staging area that lets an
//! online (concurrent) schema change publish a staged AIS visible only to
//! its owner until finalize, while concurrent DML against the affected
//! tables logs the hkeys it touches so the DDL can replay corrections at
//! finalize time.
//!
//! spec.md §4.5: five states (Open/Staged/Active/Finalized/Aborted), the
//! `begin`/`stage`/`add_change_set`/`record_dml_hkey`/
//! `enumerate_dml_hkeys`/`finalize`/`abort` transitions, and the
//! `OnlineCache` build with its two uniqueness assertions.

use std::collections::{HashMap, HashSet};

use crate::ais::codec::{self, AisReader, WriteSelector};
use crate::ais::Ais;
use crate::error::{CResult, Error};
use crate::generation::GenerationRegistry;
use crate::kv::directory::{self, Dir};
use crate::kv::engine::Engine;
use crate::kv::transaction::Transaction;
use crate::kv::tuple;

/// A structured description of one table's logical change during an
/// online DDL, consumed at finalize (spec.md's ChangeSet glossary entry).
/// Kept as a small closed set of kinds plus a free-form fallback rather
/// than modeling the SQL grammar this subsystem explicitly leaves out of
/// scope (spec.md §1).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChangeSetKind {
    AddColumn { column: String },
    DropColumn { column: String },
    AlterColumnType { column: String, new_type: String },
    AlterPrimaryKey,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChangeSet {
    pub table_id: u32,
    pub kind: ChangeSetKind,
}

fn online_root(online_id: i64) -> Vec<String> {
    vec!["schemaManager".to_string(), "online".to_string(), online_id.to_string()]
}

fn data_root() -> Vec<String> {
    vec!["schemaManager".to_string()]
}

const GENERATION_KEY: &[u8] = b"generation";
const UNPUBLISHED: i64 = -1;

/// The online tracker: stateless except for the directory paths it
/// derives; all real state lives in the KV store, per spec.md §5 ("The
/// online session tracker holds no in-process locks -- its authority
/// lives in the KV store").
pub struct OnlineSessionTracker;

impl OnlineSessionTracker {
    /// Allocates a fresh online id and transitions it to Open: directory
    /// created, `generation = -1`, no staged protobuf.
    pub fn begin<E: Engine>(txn: &Transaction<E>) -> CResult<i64> {
        let root_dir = directory::create_or_open(txn, &data_root())?;
        let key = directory::pack(&root_dir, b"onlineSession");
        let id = match txn.get(&key)? {
            Some(v) => tuple::unpack_i64(&v)? + 1,
            None => 1,
        };
        txn.set(&key, tuple::pack_i64(id))?;

        let online_dir = directory::create_or_open(txn, &online_root(id))?;
        txn.set(&directory::pack(&online_dir, GENERATION_KEY), tuple::pack_i64(UNPUBLISHED))?;
        Ok(id)
    }

    /// Stages a new AIS for the given schemas under this online id: bumps
    /// the generation registry to allocate the generation this change will
    /// publish at, writes that generation and each schema's fragment into
    /// `online/<id>/`, then bumps the global generation *again* so the
    /// allocated-but-unpublished generation is never what a concurrent
    /// `get_transactional_generation` call sees as current (spec.md §4.5,
    /// §9 open question (b)).
    pub fn stage<E: Engine>(
        txn: &Transaction<E>,
        online_id: i64,
        registry: &GenerationRegistry,
        staged: &Ais,
        schemas: &[String],
    ) -> CResult<i64> {
        Self::check_stage_conflicts(txn, online_id, schemas)?;

        let dir = directory::create_or_open(txn, &online_root(online_id))?;
        let staged_generation = registry.next_generation(txn)?;
        txn.set(&directory::pack(&dir, GENERATION_KEY), tuple::pack_i64(staged_generation))?;

        let protobuf_dir = directory::create_or_open(txn, &[online_root(online_id), vec!["protobuf".to_string()]].concat())?;
        for schema in schemas {
            let bytes = codec::serialize(staged, schema, &WriteSelector::SingleSchema)?;
            txn.set(&directory::pack(&protobuf_dir, schema.as_bytes()), bytes)?;
        }

        // The defensive second bump: the staged generation above is not
        // yet visible to anyone (no protobuf exists at the *global*
        // `protobuf/<schema>` path), so the value any other transaction
        // observes via `get_transactional_generation` must move past it.
        registry.next_generation(txn)?;
        Ok(staged_generation)
    }

    /// Fails with `ConflictingOnlineChange` if any schema in `schemas` is
    /// already staged under a different online id (spec.md §7: raised
    /// "during online-cache build or stage").
    fn check_stage_conflicts<E: Engine>(txn: &Transaction<E>, online_id: i64, schemas: &[String]) -> CResult<()> {
        let online_ids = match directory::list(txn, &data_root().into_iter().chain(["online".to_string()]).collect::<Vec<_>>()) {
            Ok(ids) => ids,
            Err(_) => return Ok(()),
        };
        for id_str in online_ids {
            let other_id: i64 = id_str.parse().map_err(|_| Error::Internal(format!("non-numeric online id {id_str}")))?;
            if other_id == online_id {
                continue;
            }
            let protobuf_dir = match directory::open_dir(txn, &[online_root(other_id), vec!["protobuf".to_string()]].concat()) {
                Ok(dir) => dir,
                Err(_) => continue,
            };
            let (start, end) = directory::range(&protobuf_dir);
            let prefix_len = protobuf_dir.prefix.len();
            for (key, _) in txn.scan(start..end)?.collect()? {
                let staged_schema = String::from_utf8(key[prefix_len..].to_vec()).map_err(|e| Error::Parse(e.to_string()))?;
                if schemas.iter().any(|s| s == &staged_schema) {
                    return Err(Error::ConflictingOnlineChange(format!(
                        "schema {staged_schema} already staged under online id {other_id}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Appends a ChangeSet for `table_id`, unique per (online id, table).
    /// Claiming a table this way makes the online session externally
    /// visible the same as staging does: if the online id hasn't bumped the
    /// generation yet (its `generation` key is still `UNPUBLISHED`), this
    /// bumps it now and records the allocated generation, so a
    /// change-set-only session that later aborts still invalidates readers
    /// who may have cached the old generation (spec.md §4.5 `add_change_set`:
    /// "bumps the generation ... if not already bumped this transaction").
    pub fn add_change_set<E: Engine>(txn: &Transaction<E>, online_id: i64, cs: &ChangeSet, registry: &GenerationRegistry) -> CResult<()> {
        let dir = directory::create_or_open(txn, &[online_root(online_id), vec!["changes".to_string()]].concat())?;
        let key = directory::pack(&dir, cs.table_id.to_string().as_bytes());
        if txn.get(&key)?.is_some() {
            return Err(Error::Internal(format!("change set for table {} already recorded on online id {online_id}", cs.table_id)));
        }
        let bytes = bincode::serialize(cs).map_err(|e| Error::Parse(e.to_string()))?;
        txn.set(&key, bytes)?;

        let online_dir = directory::create_or_open(txn, &online_root(online_id))?;
        let generation_key = directory::pack(&online_dir, GENERATION_KEY);
        let already_bumped = match txn.get(&generation_key)? {
            Some(v) => tuple::unpack_i64(&v)? != UNPUBLISHED,
            None => false,
        };
        if !already_bumped {
            let generation = registry.next_generation(txn)?;
            txn.set(&generation_key, tuple::pack_i64(generation))?;
        }
        Ok(())
    }

    /// Logs that a DML statement wrote row `hkey` in `table_id` while an
    /// online change was active against it. Fails with
    /// `NoSuchOnlineChange` if no online session claims this table
    /// (spec.md §7).
    pub fn record_dml_hkey<E: Engine>(txn: &Transaction<E>, online_id: i64, table_id: u32, hkey: &[u8]) -> CResult<()> {
        let changes_dir = directory::open_dir(txn, &[online_root(online_id), vec!["changes".to_string()]].concat())
            .map_err(|_| Error::NoSuchOnlineChange(format!("no online change tracked for table {table_id}")))?;
        if txn.get(&directory::pack(&changes_dir, table_id.to_string().as_bytes()))?.is_none() {
            return Err(Error::NoSuchOnlineChange(format!("table {table_id} is not claimed by online id {online_id}")));
        }
        let dml_dir = directory::create_or_open(
            txn,
            &[online_root(online_id), vec!["dml".to_string(), table_id.to_string()]].concat(),
        )?;
        txn.set(&directory::pack(&dml_dir, hkey), vec![])
    }

    /// Yields the hkeys recorded for `table_id` since staging began, in
    /// lexicographic order, optionally starting strictly after
    /// `start_hkey`. Returns a fully materialized, real `Iterator` with a
    /// working `has_next` -- spec.md §9's REDESIGN FLAG: the teacher's
    /// source leaves this unsupported, which is a bug site, not an
    /// intentional contract.
    pub fn enumerate_dml_hkeys<E: Engine>(
        txn: &Transaction<E>,
        online_id: i64,
        table_id: u32,
        start_hkey: Option<&[u8]>,
    ) -> CResult<DmlHKeyIter> {
        let path = [online_root(online_id), vec!["dml".to_string(), table_id.to_string()]].concat();
        let dir = match directory::open_dir(txn, &path) {
            Ok(dir) => dir,
            Err(_) => return Ok(DmlHKeyIter::empty()),
        };
        let (start, end) = directory::range(&dir);
        let prefix_len = dir.prefix.len();
        let mut hkeys: Vec<Vec<u8>> =
            txn.scan(start..end)?.collect()?.into_iter().map(|(k, _)| k[prefix_len..].to_vec()).collect();
        if let Some(after) = start_hkey {
            hkeys.retain(|h| h.as_slice() > after);
        }
        Ok(DmlHKeyIter::new(hkeys))
    }

    /// Copies the staged protobuf fragments into the global `protobuf/`
    /// area, removes the online subtree, and bumps the global generation
    /// once more so the finalized state is the one now current.
    pub fn finalize<E: Engine>(txn: &Transaction<E>, online_id: i64, registry: &GenerationRegistry) -> CResult<()> {
        let protobuf_path = [online_root(online_id), vec!["protobuf".to_string()]].concat();
        let global_protobuf_dir = directory::create_or_open(txn, &[data_root(), vec!["protobuf".to_string()]].concat())?;
        if let Ok(staged_dir) = directory::open_dir(txn, &protobuf_path) {
            let (start, end) = directory::range(&staged_dir);
            let prefix_len = staged_dir.prefix.len();
            for (key, value) in txn.scan(start..end)?.collect()? {
                let schema_name = key[prefix_len..].to_vec();
                txn.set(&directory::pack(&global_protobuf_dir, &schema_name), value)?;
            }
        }
        directory::remove(txn, &online_root(online_id))?;
        registry.next_generation(txn)?;
        Ok(())
    }

    /// Removes the online subtree without publishing anything. If the
    /// staged state was ever externally visible (i.e. `stage` ran and
    /// bumped the generation), one more bump is needed to invalidate it;
    /// otherwise the Open-state session never affected anyone else's view
    /// and no bump is necessary (spec.md §4.5 state 5, Aborted).
    pub fn abort<E: Engine>(txn: &Transaction<E>, online_id: i64, was_externally_visible: bool, registry: &GenerationRegistry) -> CResult<()> {
        directory::remove(txn, &online_root(online_id))?;
        if was_externally_visible {
            registry.next_generation(txn)?;
        }
        Ok(())
    }
}

/// A materialized, order-preserving iterator over hkeys logged for one
/// table. `has_next` is a real, working predicate (see
/// `OnlineSessionTracker::enumerate_dml_hkeys`'s doc comment).
pub struct DmlHKeyIter {
    items: std::vec::IntoIter<Vec<u8>>,
    peeked: Option<Vec<u8>>,
}

impl DmlHKeyIter {
    fn new(mut items: Vec<Vec<u8>>) -> Self {
        items.sort();
        Self { items: items.into_iter(), peeked: None }
    }

    fn empty() -> Self {
        Self { items: Vec::new().into_iter(), peeked: None }
    }

    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_some() {
            return true;
        }
        self.peeked = self.items.next();
        self.peeked.is_some()
    }
}

impl Iterator for DmlHKeyIter {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.peeked.take() {
            return Some(item);
        }
        self.items.next()
    }
}

/// A read-only snapshot of every online session currently tracked,
/// collected inside one transaction: which schemas/tables each online id
/// claims, the ChangeSets recorded against each, and the per-id staged
/// AIS. spec.md §4.5 "OnlineCache build".
#[derive(Default)]
pub struct OnlineCache {
    pub schema_to_online: HashMap<String, i64>,
    pub table_to_online: HashMap<u32, i64>,
    pub online_to_change_sets: HashMap<i64, Vec<ChangeSet>>,
    pub online_ais: HashMap<i64, Ais>,
}

impl OnlineCache {
    /// Builds the cache by scanning `schemaManager/online/*`. Fails with
    /// `ConflictingOnlineChange` if two online ids claim the same schema or
    /// table (spec.md §4.5 assertion).
    pub fn build<E: Engine>(txn: &Transaction<E>, committed: &Ais) -> CResult<Self> {
        let mut cache = OnlineCache::default();
        let online_ids = match directory::list(txn, &data_root().into_iter().chain(["online".to_string()]).collect::<Vec<_>>()) {
            Ok(ids) => ids,
            Err(_) => return Ok(cache),
        };

        for id_str in online_ids {
            let online_id: i64 = id_str.parse().map_err(|_| Error::Internal(format!("non-numeric online id {id_str}")))?;
            let dir = directory::open_dir(txn, &online_root(online_id))?;
            let generation = match txn.get(&directory::pack(&dir, GENERATION_KEY))? {
                Some(v) => tuple::unpack_i64(&v)?,
                None => continue,
            };

            if generation != UNPUBLISHED {
                if let Ok(protobuf_dir) = directory::open_dir(txn, &[online_root(online_id), vec!["protobuf".to_string()]].concat()) {
                    let (start, end) = directory::range(&protobuf_dir);
                    let prefix_len = protobuf_dir.prefix.len();
                    let mut reader = AisReader::new();
                    let mut staged_schemas = HashSet::new();
                    for (key, value) in txn.scan(start..end)?.collect()? {
                        let schema_name = String::from_utf8(key[prefix_len..].to_vec())
                            .map_err(|e| Error::Parse(e.to_string()))?;
                        reader.read_into(&value)?;
                        staged_schemas.insert(schema_name);
                    }
                    // Overlay the rest of the committed AIS's schemas so the
                    // per-id AIS is a complete, consistent snapshot: this
                    // online id's staged schemas plus every other schema as
                    // currently committed.
                    for schema in committed.schema_names() {
                        if !staged_schemas.contains(&schema) {
                            let bytes = codec::serialize(committed, &schema, &WriteSelector::AllSchemas)?;
                            reader.read_into(&bytes)?;
                        }
                    }
                    let online_ais = reader.finish()?;

                    for schema in &staged_schemas {
                        if let Some(existing) = cache.schema_to_online.insert(schema.clone(), online_id) {
                            return Err(Error::ConflictingOnlineChange(format!(
                                "schema {schema} claimed by both online id {existing} and {online_id}"
                            )));
                        }
                    }
                    cache.online_ais.insert(online_id, online_ais);
                }
            }

            if let Ok(changes_dir) = directory::open_dir(txn, &[online_root(online_id), vec!["changes".to_string()]].concat()) {
                let (start, end) = directory::range(&changes_dir);
                for (_, value) in txn.scan(start..end)?.collect()? {
                    let cs: ChangeSet = bincode::deserialize(&value).map_err(|e| Error::Parse(e.to_string()))?;
                    if let Some(existing) = cache.table_to_online.insert(cs.table_id, online_id) {
                        if existing != online_id {
                            return Err(Error::ConflictingOnlineChange(format!(
                                "table {} claimed by both online id {existing} and {online_id}",
                                cs.table_id
                            )));
                        }
                    }
                    cache.online_to_change_sets.entry(online_id).or_default().push(cs);
                }
            }
        }

        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::Memory;
    use crate::kv::mvcc::{MVCCDef, MVCC};

    fn init_registry<E: Engine>(txn: &Transaction<E>) -> GenerationRegistry {
        let registry = GenerationRegistry::open(txn, &data_root()).unwrap();
        registry.initialize(txn).unwrap();
        registry
    }

    #[test]
    fn begin_creates_open_state() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let id = OnlineSessionTracker::begin(&txn).unwrap();
        let dir = directory::open_dir(&txn, &online_root(id)).unwrap();
        let generation = tuple::unpack_i64(&txn.get(&directory::pack(&dir, GENERATION_KEY)).unwrap().unwrap()).unwrap();
        assert_eq!(generation, UNPUBLISHED);
        txn.commit().unwrap();
    }

    #[test]
    fn dml_hkeys_enumerate_in_order() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let registry = init_registry(&txn);
        let id = OnlineSessionTracker::begin(&txn).unwrap();
        OnlineSessionTracker::add_change_set(
            &txn,
            id,
            &ChangeSet { table_id: 1, kind: ChangeSetKind::AddColumn { column: "x".into() } },
            &registry,
        )
        .unwrap();
        OnlineSessionTracker::record_dml_hkey(&txn, id, 1, b"k3").unwrap();
        OnlineSessionTracker::record_dml_hkey(&txn, id, 1, b"k1").unwrap();
        OnlineSessionTracker::record_dml_hkey(&txn, id, 1, b"k2").unwrap();

        let mut iter = OnlineSessionTracker::enumerate_dml_hkeys(&txn, id, 1, None).unwrap();
        let mut seen = Vec::new();
        while iter.has_next() {
            seen.push(iter.next().unwrap());
        }
        assert_eq!(seen, vec![b"k1".to_vec(), b"k2".to_vec(), b"k3".to_vec()]);
        txn.commit().unwrap();
    }

    #[test]
    fn add_change_set_bumps_generation_once() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let registry = init_registry(&txn);
        let before = registry.get_transactional_generation(&txn).unwrap();
        let id = OnlineSessionTracker::begin(&txn).unwrap();

        OnlineSessionTracker::add_change_set(
            &txn,
            id,
            &ChangeSet { table_id: 1, kind: ChangeSetKind::AddColumn { column: "x".into() } },
            &registry,
        )
        .unwrap();
        let after_first = registry.get_transactional_generation(&txn).unwrap();
        assert_eq!(after_first, before + 1);

        // A second ChangeSet against the same online id must not bump again.
        OnlineSessionTracker::add_change_set(
            &txn,
            id,
            &ChangeSet { table_id: 2, kind: ChangeSetKind::AddColumn { column: "y".into() } },
            &registry,
        )
        .unwrap();
        let after_second = registry.get_transactional_generation(&txn).unwrap();
        assert_eq!(after_second, after_first);
        txn.commit().unwrap();
    }

    #[test]
    fn abort_after_change_set_only_still_invalidates() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let registry = init_registry(&txn);
        let before = registry.get_transactional_generation(&txn).unwrap();
        let id = OnlineSessionTracker::begin(&txn).unwrap();
        OnlineSessionTracker::add_change_set(
            &txn,
            id,
            &ChangeSet { table_id: 1, kind: ChangeSetKind::AddColumn { column: "x".into() } },
            &registry,
        )
        .unwrap();

        OnlineSessionTracker::abort(&txn, id, true, &registry).unwrap();
        let after_abort = registry.get_transactional_generation(&txn).unwrap();
        assert_eq!(after_abort, before + 2);
        txn.commit().unwrap();
    }

    #[test]
    fn stage_rejects_schema_already_staged_by_another_online_id() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let registry = init_registry(&txn);

        let mut builder = crate::ais::AisBuilder::from_ais(&Ais::empty());
        builder
            .add_table(1, "test", "t", vec![crate::ais::Column { name: "a".into(), position: 0, type_name: "INT".into(), nullable: true }])
            .unwrap();
        let staged = builder.finish().unwrap();

        let first = OnlineSessionTracker::begin(&txn).unwrap();
        OnlineSessionTracker::stage(&txn, first, &registry, &staged, &["test".to_string()]).unwrap();

        let second = OnlineSessionTracker::begin(&txn).unwrap();
        let err = OnlineSessionTracker::stage(&txn, second, &registry, &staged, &["test".to_string()]).unwrap_err();
        assert!(matches!(err, Error::ConflictingOnlineChange(_)));
        txn.commit().unwrap();
    }

    #[test]
    fn record_dml_hkey_without_change_set_fails() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let id = OnlineSessionTracker::begin(&txn).unwrap();
        let err = OnlineSessionTracker::record_dml_hkey(&txn, id, 99, b"k").unwrap_err();
        assert!(matches!(err, Error::NoSuchOnlineChange(_)));
        txn.commit().unwrap();
    }

    #[test]
    fn finalize_publishes_staged_protobuf_and_removes_subtree() {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let registry = init_registry(&txn);
        let id = OnlineSessionTracker::begin(&txn).unwrap();

        let mut builder = crate::ais::AisBuilder::from_ais(&Ais::empty());
        builder
            .add_table(1, "test", "t", vec![crate::ais::Column { name: "a".into(), position: 0, type_name: "INT".into(), nullable: true }])
            .unwrap();
        let staged = builder.finish().unwrap();

        OnlineSessionTracker::stage(&txn, id, &registry, &staged, &["test".to_string()]).unwrap();
        OnlineSessionTracker::finalize(&txn, id, &registry).unwrap();

        assert!(directory::open_dir(&txn, &online_root(id)).is_err());
        let global_dir = directory::open_dir(&txn, &[data_root(), vec!["protobuf".to_string()]].concat()).unwrap();
        assert!(txn.get(&directory::pack(&global_dir, b"test")).unwrap().is_some());
        txn.commit().unwrap();
    }
}
