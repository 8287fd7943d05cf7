//! C6 — the schema manager front: the one object client code actually
//! holds. Wires `KvFacade` (C1), the AIS codec (C2), the name generator
//! (C3), the generation registry and per-session cache (C4), and the
//! online session tracker (C5) into the operations spec.md §4.6 names:
//! startup, `get_ais`/`get_online_ais`, `apply_ddl`, the `*_online`
//! family, and the storage-path bookkeeping that backs `rename_table`/
//! `drop_table`/`list_storage_paths`.

use std::sync::{Arc, Mutex};

use crate::ais::codec::{self, AisReader, WriteSelector};
use crate::ais::{Ais, AisBuilder, Column, TableId};
use crate::config::SchemaManagerConfig;
use crate::error::{CResult, Error};
use crate::generation::{GenerationRegistry, Session};
use crate::kv::directory;
use crate::kv::engine::Engine;
use crate::kv::facade::KvFacade;
use crate::kv::transaction::Transaction;
use crate::kv::tuple;
use crate::namegen::{self, DefaultNameGenerator};
use crate::online::{ChangeSet, OnlineCache, OnlineSessionTracker};

/// Stored alongside `generation` at the schema-manager root; bumped
/// whenever the on-disk row/key layout this crate assumes changes in a
/// way that isn't safe to read with an older build (spec.md §4.6).
pub const CURRENT_DATA_VERSION: i64 = 5;

/// Stored alongside `dataVersion`; bumped whenever the AIS fragment
/// shape itself changes incompatibly (spec.md §4.6).
pub const CURRENT_META_VERSION: i64 = 3;

const DATA_VERSION_KEY: &[u8] = b"dataVersion";
const META_VERSION_KEY: &[u8] = b"metaDataVersion";

fn protobuf_dir_path(root: &[String]) -> Vec<String> {
    [root.to_vec(), vec!["protobuf".to_string()]].concat()
}

fn data_dir_path(root: &[String], schema: &str, table: &str) -> Vec<String> {
    [root.to_vec(), vec!["data".to_string(), schema.to_string(), table.to_string()]].concat()
}

fn data_schema_dir_path(root: &[String], schema: &str) -> Vec<String> {
    [root.to_vec(), vec!["data".to_string(), schema.to_string()]].concat()
}

/// Process-wide state shared by every `Session` a `SchemaManager` serves:
/// the last-installed committed AIS, the in-process name generator, and
/// the schema-manager's own root path.
struct SchemaContext {
    root: Vec<String>,
    cur_ais: Mutex<Arc<Ais>>,
    name_generator: Mutex<DefaultNameGenerator>,
}

impl SchemaContext {
    /// Installs `ais` as the current committed snapshot, but only if it is
    /// actually newer -- a retried `apply_ddl` attempt that lost a race to
    /// install first must not clobber a later generation with a stale one.
    fn install_cur_ais(&self, ais: Arc<Ais>) {
        let mut cur = self.cur_ais.lock().unwrap();
        if ais.generation > cur.generation {
            *cur = ais;
        }
    }
}

/// The schema manager: startup, AIS access, DDL application and online
/// (concurrent) DDL lifecycle, all on top of a single [`KvFacade`].
pub struct SchemaManager<E: Engine> {
    facade: KvFacade<E>,
    ctx: SchemaContext,
}

impl<E: Engine> SchemaManager<E> {
    /// Runs spec.md §4.6's startup procedure: ensures the schema-manager
    /// directories exist, checks `dataVersion`/`metaDataVersion`
    /// compatibility (wiping and reinitializing only if
    /// `config.clear_incompatible_data` authorizes it), loads the
    /// committed AIS plus every in-flight online change, and primes the
    /// name generator against all of it so a freshly started process
    /// never reissues an id already claimed by a staged-but-unpublished
    /// change.
    pub fn start(engine: E, config: SchemaManagerConfig) -> CResult<Self> {
        let facade = KvFacade::new(engine);
        let root = config.root_path.clone();

        let outcome = facade.transact(|txn| Self::check_versions(txn, &root))?;
        match outcome {
            VersionOutcome::Fresh | VersionOutcome::Compatible => {}
            VersionOutcome::Incompatible { stored_data, stored_meta } => {
                if !config.clear_incompatible_data {
                    return Err(Error::Incompatible { stored_data, stored_meta });
                }
                facade.transact(|txn| {
                    directory::remove(txn, &root).or(Ok::<(), Error>(()))?;
                    Self::initialize_fresh(txn, &root)
                })?;
            }
        }

        let (ais, name_generator) = facade.view(|txn| {
            let registry = GenerationRegistry::open(txn, &root)?;
            let generation = registry.get_transactional_generation(txn)?;
            let ais = Self::load_from_storage(txn, &root, generation)?;

            let mut name_generator = DefaultNameGenerator::new();
            name_generator.merge_ais(&ais);
            let cache = OnlineCache::build(txn, &ais)?;
            for online_ais in cache.online_ais.values() {
                name_generator.merge_ais(online_ais);
            }
            Ok((ais, name_generator))
        })?;

        Ok(Self {
            facade,
            ctx: SchemaContext {
                root,
                cur_ais: Mutex::new(Arc::new(ais)),
                name_generator: Mutex::new(name_generator),
            },
        })
    }

    fn check_versions<T: Engine>(txn: &Transaction<T>, root: &[String]) -> CResult<VersionOutcome> {
        let dir = directory::create_or_open(txn, root)?;
        let data_version = txn.get(&directory::pack(&dir, DATA_VERSION_KEY))?;
        let meta_version = txn.get(&directory::pack(&dir, META_VERSION_KEY))?;
        match (data_version, meta_version) {
            (None, None) => {
                Self::initialize_fresh(txn, root)?;
                Ok(VersionOutcome::Fresh)
            }
            (Some(dv), Some(mv)) => {
                let stored_data = tuple::unpack_i64(&dv)?;
                let stored_meta = tuple::unpack_i64(&mv)?;
                if stored_data == CURRENT_DATA_VERSION && stored_meta == CURRENT_META_VERSION {
                    Ok(VersionOutcome::Compatible)
                } else {
                    Ok(VersionOutcome::Incompatible { stored_data, stored_meta })
                }
            }
            _ => Err(Error::ExternalClear("dataVersion/metaDataVersion partially present".into())),
        }
    }

    fn initialize_fresh<T: Engine>(txn: &Transaction<T>, root: &[String]) -> CResult<()> {
        let dir = directory::create_or_open(txn, root)?;
        txn.set(&directory::pack(&dir, DATA_VERSION_KEY), tuple::pack_i64(CURRENT_DATA_VERSION))?;
        txn.set(&directory::pack(&dir, META_VERSION_KEY), tuple::pack_i64(CURRENT_META_VERSION))?;
        directory::create_or_open(txn, &protobuf_dir_path(root))?;
        GenerationRegistry::open(txn, root)?.initialize(txn)
    }

    fn load_from_storage<T: Engine>(txn: &Transaction<T>, root: &[String], generation: i64) -> CResult<Ais> {
        let mut reader = AisReader::new();
        if let Ok(dir) = directory::open_dir(txn, &protobuf_dir_path(root)) {
            let (start, end) = directory::range(&dir);
            for (_, value) in txn.scan(start..end)?.collect()? {
                reader.read_into(&value)?;
            }
        }
        let mut ais = reader.finish()?;
        ais.generation = generation;
        Ok(ais)
    }

    /// Returns the AIS visible to `session`'s current transaction,
    /// reconciling the session's cache against the generation `txn`
    /// actually observes (spec.md §4.4 `get_session_ais`).
    pub fn get_ais_in_txn(&self, session: &Session, txn: &Transaction<E>) -> CResult<Arc<Ais>> {
        let registry = GenerationRegistry::open(txn, &self.ctx.root)?;
        let generation = registry.get_transactional_generation(txn)?;

        if let Some(cached) = session.attached_for(generation) {
            return Ok(cached);
        }

        let result = {
            let cur = self.ctx.cur_ais.lock().unwrap();
            if cur.generation == generation {
                Some(cur.clone())
            } else {
                None
            }
        };
        let result = match result {
            Some(ais) => ais,
            None => {
                let loaded = Arc::new(Self::load_from_storage(txn, &self.ctx.root, generation)?);
                self.ctx.name_generator.lock().unwrap().merge_ais(&loaded);
                self.ctx.install_cur_ais(loaded.clone());
                loaded
            }
        };

        session.attach(result.clone());
        Ok(result)
    }

    /// Runs `get_ais_in_txn` inside a fresh read-only transaction, then
    /// detaches the session's cache (spec.md §3: "attached at first access
    /// in the transaction, detached at transaction end").
    pub fn get_ais(&self, session: &Session) -> CResult<Arc<Ais>> {
        let result = self.facade.view(|txn| self.get_ais_in_txn(session, txn))?;
        session.end_transaction();
        Ok(result)
    }

    fn get_online_ais_in_txn(&self, session: &Session, txn: &Transaction<E>) -> CResult<Ais> {
        let online_id = session
            .online_session_id()
            .ok_or_else(|| Error::NoSuchOnlineChange("session has no active online change".into()))?;
        let committed = self.get_ais_in_txn(session, txn)?;
        let cache = OnlineCache::build(txn, &committed)?;
        cache
            .online_ais
            .get(&online_id)
            .cloned()
            .ok_or_else(|| Error::NoSuchOnlineChange(format!("online id {online_id} has no staged ais yet")))
    }

    /// The AIS staged under `session`'s active online change, overlaid
    /// onto the rest of the currently committed schemas (spec.md §4.5
    /// `OnlineCache`).
    pub fn get_online_ais(&self, session: &Session) -> CResult<Arc<Ais>> {
        let ais = self.facade.view(|txn| self.get_online_ais_in_txn(session, txn))?;
        Ok(Arc::new(ais))
    }

    /// Applies an ordinary (non-online) DDL change: clones the AIS
    /// `session` currently sees into a builder, runs `mutator` against it
    /// (with transactional KV access, e.g. to mint ids via C3), validates
    /// and freezes the result, rewrites the protobuf fragment for every
    /// schema that actually changed, and bumps `generation` once. The new
    /// AIS is installed into the process-wide cache and `session`'s own
    /// cache only after the underlying commit has actually succeeded, so a
    /// conflict-retry never leaks a not-yet-committed candidate and other
    /// sessions observe the change only once it is durable (spec.md
    /// Testable Property 3).
    pub fn apply_ddl(
        &self,
        session: &Session,
        mutator: impl Fn(&Transaction<E>, &mut AisBuilder) -> CResult<()>,
    ) -> CResult<Arc<Ais>> {
        let candidate = self.facade.transact(|txn| {
            let cur = self.get_ais_in_txn(session, txn)?;
            let mut builder = AisBuilder::from_ais(&cur);
            mutator(txn, &mut builder)?;
            let mut candidate = builder.finish()?;

            let protobuf_dir = directory::create_or_open(txn, &protobuf_dir_path(&self.ctx.root))?;
            for schema in Self::changed_schemas(&cur, &candidate) {
                let bytes = codec::serialize(&candidate, &schema, &WriteSelector::AllSchemas)?;
                txn.set(&directory::pack(&protobuf_dir, schema.as_bytes()), bytes)?;
            }

            let registry = GenerationRegistry::open(txn, &self.ctx.root)?;
            candidate.generation = registry.next_generation(txn)?;
            Ok(candidate)
        })?;

        let candidate = Arc::new(candidate);
        self.ctx.install_cur_ais(candidate.clone());
        session.attach(candidate.clone());
        Ok(candidate)
    }

    /// Names every schema present in `candidate` whose table set differs
    /// from what it was in `old` (a new schema counts as changed in
    /// full). Bounds `apply_ddl`'s rewrite cost to the schemas a DDL
    /// statement actually touched (spec.md §9: "framed by schema name so
    /// partial re-writes cost O(changed schemas)").
    fn changed_schemas(old: &Ais, candidate: &Ais) -> Vec<String> {
        candidate
            .schema_names()
            .into_iter()
            .filter(|name| {
                let old_tables: Vec<_> = old.schema(name).map(|s| s.tables.values().filter_map(|id| old.table(*id)).collect()).unwrap_or_default();
                let new_tables: Vec<_> =
                    candidate.schema(name).map(|s| s.tables.values().filter_map(|id| candidate.table(*id)).collect()).unwrap_or_default();
                old.schema(name).is_none() || old_tables != new_tables
            })
            .collect()
    }

    /// Creates a table with freshly minted table and tree ids, and opens
    /// the (empty, bookkeeping-only; row storage itself is out of scope)
    /// data directory its rows would live under.
    pub fn create_table(&self, session: &Session, schema: &str, table: &str, columns: Vec<Column>) -> CResult<Arc<Ais>> {
        let schema = schema.to_string();
        let table = table.to_string();
        self.apply_ddl(session, move |txn, builder| {
            let table_id = {
                let mut local = self.ctx.name_generator.lock().unwrap();
                namegen::next_table_id(txn, &self.ctx.root, &mut local)?
            };
            builder.add_table(table_id, &schema, &table, columns.clone())?;
            let tree = {
                let mut local = self.ctx.name_generator.lock().unwrap();
                namegen::next_tree_name(txn, &self.ctx.root, &schema, &table, &mut local)?
            };
            builder.set_group_name(table_id, tree)?;
            directory::create_or_open(txn, &data_dir_path(&self.ctx.root, &schema, &table))?;
            Ok(())
        })
    }

    /// Renames a table, moving its data directory to mirror the new
    /// schema-qualified name (spec.md §4.6 `rename_table`).
    pub fn rename_table(&self, session: &Session, old_schema: &str, old_name: &str, new_schema: &str, new_name: &str) -> CResult<Arc<Ais>> {
        let old_schema = old_schema.to_string();
        let old_name = old_name.to_string();
        let new_schema = new_schema.to_string();
        let new_name = new_name.to_string();
        self.apply_ddl(session, move |txn, builder| {
            builder.rename_table(&old_schema, &old_name, &new_schema, &new_name)?;
            directory::create_or_open(txn, &data_schema_dir_path(&self.ctx.root, &new_schema))?;
            let from = data_dir_path(&self.ctx.root, &old_schema, &old_name);
            let to = data_dir_path(&self.ctx.root, &new_schema, &new_name);
            if directory::open_dir(txn, &from).is_ok() {
                directory::move_dir(txn, &from, &to)?;
            }
            Ok(())
        })
    }

    /// Drops a table and removes its data directory (spec.md §4.6
    /// `drop_table`, §8 scenario S6: "DROP removes storage").
    pub fn drop_table(&self, session: &Session, schema: &str, table: &str) -> CResult<Arc<Ais>> {
        let schema = schema.to_string();
        let table = table.to_string();
        self.apply_ddl(session, move |txn, builder| {
            builder.drop_table(&schema, &table)?;
            let path = data_dir_path(&self.ctx.root, &schema, &table);
            if directory::open_dir(txn, &path).is_ok() {
                directory::remove(txn, &path)?;
            }
            Ok(())
        })
    }

    /// Every storage path (tree name) currently referenced by `session`'s
    /// view of the AIS (spec.md §4.6 `list_storage_paths`).
    pub fn list_storage_paths(&self, session: &Session) -> CResult<std::collections::BTreeSet<String>> {
        Ok(self.get_ais(session)?.storage_paths())
    }

    /// Runs `f` inside the same read-write transaction machinery every
    /// other schema-manager operation uses. Row/index storage itself is
    /// out of scope for this crate (spec.md §1), but whatever system
    /// executes DML needs to call [`Self::record_online_handled_hkey`]
    /// from within its own write transaction -- this is the seam that lets
    /// it do so without reaching into `KvFacade` directly.
    pub fn transact<T>(&self, f: impl Fn(&Transaction<E>) -> CResult<T>) -> CResult<T> {
        self.facade.transact(f)
    }

    /// Opens a fresh online session and attaches its id to `session`
    /// (spec.md §4.5 state 1, Open).
    pub fn begin_online(&self, session: &Session) -> CResult<i64> {
        if session.online_session_id().is_some() {
            return Err(Error::Internal("session already has an active online change".into()));
        }
        let id = self.facade.transact(OnlineSessionTracker::begin)?;
        session.set_online_session_id(Some(id));
        Ok(id)
    }

    /// Attaches `session` to a previously allocated online id, for
    /// administrative tools (`schema-cli`) that resume an in-progress
    /// online change from a brand new process -- and therefore a brand new
    /// `Session` -- rather than the one that called `begin_online`. spec.md
    /// §3 still holds "at most one `OnlineSession` per session at a time"
    /// within that new process.
    pub fn resume_online(&self, session: &Session, id: i64) -> CResult<()> {
        if session.online_session_id().is_some() {
            return Err(Error::Internal("session already has an active online change".into()));
        }
        session.set_online_session_id(Some(id));
        Ok(())
    }

    /// Records a ChangeSet against `session`'s active online id.
    pub fn add_online_change_set(&self, session: &Session, cs: ChangeSet) -> CResult<()> {
        let online_id = session
            .online_session_id()
            .ok_or_else(|| Error::NoSuchOnlineChange("session has no active online change".into()))?;
        self.facade.transact(|txn| {
            let registry = GenerationRegistry::open(txn, &self.ctx.root)?;
            OnlineSessionTracker::add_change_set(txn, online_id, &cs, &registry)
        })
    }

    /// Stages a candidate AIS under `session`'s active online id, visible
    /// only via [`Self::get_online_ais`] until [`Self::finalize_online`]
    /// (spec.md §4.5 state 2, Staged).
    pub fn stage_online(
        &self,
        session: &Session,
        schemas: &[String],
        mutator: impl Fn(&Transaction<E>, &mut AisBuilder) -> CResult<()>,
    ) -> CResult<Arc<Ais>> {
        let online_id = session
            .online_session_id()
            .ok_or_else(|| Error::NoSuchOnlineChange("session has no active online change".into()))?;
        let schemas = schemas.to_vec();
        let staged = self.facade.transact(|txn| {
            let cur = self.get_ais_in_txn(session, txn)?;
            let mut builder = AisBuilder::from_ais(&cur);
            mutator(txn, &mut builder)?;
            let mut candidate = builder.finish()?;
            let registry = GenerationRegistry::open(txn, &self.ctx.root)?;
            candidate.generation = OnlineSessionTracker::stage(txn, online_id, &registry, &candidate, &schemas)?;
            Ok(candidate)
        })?;
        Ok(Arc::new(staged))
    }

    /// Publishes the staged AIS as the new committed state and closes
    /// `session`'s active online id (spec.md §4.5 state 3, Active ->
    /// Finalized).
    pub fn finalize_online(&self, session: &Session) -> CResult<Arc<Ais>> {
        let online_id = session
            .online_session_id()
            .ok_or_else(|| Error::NoSuchOnlineChange("session has no active online change".into()))?;
        let finalized = self.facade.transact(|txn| {
            let committed = self.get_ais_in_txn(session, txn)?;
            let cache = OnlineCache::build(txn, &committed)?;
            let mut staged = cache
                .online_ais
                .get(&online_id)
                .cloned()
                .ok_or_else(|| Error::NoSuchOnlineChange(format!("online id {online_id} has no staged ais")))?;
            let registry = GenerationRegistry::open(txn, &self.ctx.root)?;
            OnlineSessionTracker::finalize(txn, online_id, &registry)?;
            staged.generation = registry.get_transactional_generation(txn)?;
            Ok(staged)
        })?;

        let finalized = Arc::new(finalized);
        self.ctx.install_cur_ais(finalized.clone());
        session.set_online_session_id(None);
        session.end_transaction();
        Ok(finalized)
    }

    /// Tears down `session`'s active online id without publishing
    /// anything (spec.md §4.5 state 5, Aborted).
    pub fn abort_online(&self, session: &Session) -> CResult<()> {
        let online_id = session
            .online_session_id()
            .ok_or_else(|| Error::NoSuchOnlineChange("session has no active online change".into()))?;
        self.facade.transact(|txn| {
            let was_externally_visible = Self::online_was_externally_visible(txn, &self.ctx.root, online_id)?;
            let registry = GenerationRegistry::open(txn, &self.ctx.root)?;
            OnlineSessionTracker::abort(txn, online_id, was_externally_visible, &registry)
        })?;
        session.set_online_session_id(None);
        Ok(())
    }

    /// True once this online id's `generation` key has moved off
    /// `UNPUBLISHED`, whether that happened via `stage` or via
    /// `add_change_set`'s own conditional bump -- either way a reader may
    /// have already observed the new generation, so an abort from here on
    /// must invalidate it (spec.md §4.5 state 5, Aborted).
    fn online_was_externally_visible<T: Engine>(txn: &Transaction<T>, root: &[String], online_id: i64) -> CResult<bool> {
        let path = [root.to_vec(), vec!["online".to_string(), online_id.to_string()]].concat();
        let dir = match directory::open_dir(txn, &path) {
            Ok(dir) => dir,
            Err(_) => return Ok(false),
        };
        match txn.get(&directory::pack(&dir, b"generation"))? {
            Some(v) => Ok(tuple::unpack_i64(&v)? != -1),
            None => Ok(false),
        }
    }

    /// Logs that the calling DML wrote `hkey` in `table_id` within `txn`,
    /// attributing it to whichever online id currently claims that table
    /// (spec.md §4.5 `record_dml_hkey`). Participates in whatever
    /// transaction the DML statement itself is running under, rather than
    /// opening its own, since it must see the DML's own uncommitted
    /// writes-in-progress as part of the same unit of work.
    pub fn record_online_handled_hkey(&self, txn: &Transaction<E>, table_id: TableId, hkey: &[u8]) -> CResult<()> {
        let committed = self.ctx.cur_ais.lock().unwrap().clone();
        let cache = OnlineCache::build(txn, &committed)?;
        let online_id = *cache
            .table_to_online
            .get(&table_id)
            .ok_or_else(|| Error::NoSuchOnlineChange(format!("no online change active for table {table_id}")))?;
        OnlineSessionTracker::record_dml_hkey(txn, online_id, table_id, hkey)
    }

    /// Enumerates the hkeys logged against `table_id` under `session`'s
    /// active online id, in order, optionally resuming after `from_hkey`
    /// (spec.md §4.5 `enumerate_dml_hkeys`).
    pub fn scan_online_handled_hkeys(&self, session: &Session, table_id: TableId, from_hkey: Option<&[u8]>) -> CResult<Vec<Vec<u8>>> {
        let online_id = session
            .online_session_id()
            .ok_or_else(|| Error::NoSuchOnlineChange("session has no active online change".into()))?;
        let from_hkey = from_hkey.map(|h| h.to_vec());
        self.facade.view(|txn| {
            let mut iter = OnlineSessionTracker::enumerate_dml_hkeys(txn, online_id, table_id, from_hkey.as_deref())?;
            let mut out = Vec::new();
            while iter.has_next() {
                out.push(iter.next().expect("has_next just returned true"));
            }
            Ok(out)
        })
    }
}

enum VersionOutcome {
    Fresh,
    Compatible,
    Incompatible { stored_data: i64, stored_meta: i64 },
}
