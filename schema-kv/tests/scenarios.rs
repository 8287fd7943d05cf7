//! End-to-end scenarios from spec.md §8 (S1-S6), exercised against the
//! schema manager's public surface rather than its internals.

use schema_kv::ais::Column;
use schema_kv::config::{SchemaManagerConfig, StorageBackend};
use schema_kv::error::Error;
use schema_kv::generation::Session;
use schema_kv::kv::log_cask::LogCask;
use schema_kv::kv::memory::Memory;
use schema_kv::manager::{SchemaManager, CURRENT_DATA_VERSION, CURRENT_META_VERSION};
use schema_kv::online::{ChangeSet, ChangeSetKind};

use pretty_assertions::assert_eq;
use serial_test::serial;

fn col(name: &str, type_name: &str) -> Column {
    Column { name: name.to_string(), position: 0, type_name: type_name.to_string(), nullable: true }
}

/// S1: a brand new schema manager starts at generation 0 and the versions
/// this build expects.
#[test]
fn s1_fresh_startup() {
    let manager = SchemaManager::start(Memory::new(), SchemaManagerConfig::default()).unwrap();
    let session = Session::new();
    let ais = manager.get_ais(&session).unwrap();
    assert_eq!(ais.generation, 0);
    assert_eq!(CURRENT_DATA_VERSION, 5);
    assert_eq!(CURRENT_META_VERSION, 3);
}

/// S2: a simple CREATE TABLE bumps the generation by exactly one and is
/// immediately visible to every session, not just the one that issued it.
#[test]
fn s2_create_table_is_visible_across_sessions() {
    let manager = SchemaManager::start(Memory::new(), SchemaManagerConfig::default()).unwrap();
    let writer = Session::new();
    let ais = manager
        .create_table(&writer, "sales", "orders", vec![col("id", "BIGINT"), col("total", "DECIMAL")])
        .unwrap();
    assert_eq!(ais.generation, 1);

    let reader = Session::new();
    let seen = manager.get_ais(&reader).unwrap();
    assert_eq!(seen.generation, 1);
    let table = seen.table_by_name("sales", "orders").unwrap();
    assert_eq!(table.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["id", "total"]);
}

/// S3: a crash/restart round-trip against a persistent `LogCask` file --
/// the committed AIS and generation survive a process exit and a fresh
/// `SchemaManager::start` against the same file.
#[test]
#[serial]
fn s3_crash_restart_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let storage_path = dir.path().join("schema-manager.db");
    let config = SchemaManagerConfig { storage_backend: StorageBackend::LogCask, storage_path: storage_path.clone(), ..SchemaManagerConfig::default() };

    {
        let manager = SchemaManager::start(LogCask::new(storage_path.clone()).unwrap(), config.clone()).unwrap();
        let session = Session::new();
        manager.create_table(&session, "inventory", "widgets", vec![col("id", "BIGINT")]).unwrap();
    }

    let manager = SchemaManager::start(LogCask::new(storage_path).unwrap(), config).unwrap();
    let session = Session::new();
    let ais = manager.get_ais(&session).unwrap();
    assert_eq!(ais.generation, 1);
    assert!(ais.table_by_name("inventory", "widgets").is_some());
}

/// S4: an online ADD COLUMN stays invisible to ordinary readers until
/// finalize, while concurrent DML against the affected table logs hkeys
/// that the online session can enumerate in order once staged.
#[test]
fn s4_online_add_column_with_concurrent_dml() {
    let manager = SchemaManager::start(Memory::new(), SchemaManagerConfig::default()).unwrap();
    let owner = Session::new();
    manager.create_table(&owner, "sales", "orders", vec![col("id", "BIGINT")]).unwrap();
    let table_id = manager.get_ais(&owner).unwrap().table_by_name("sales", "orders").unwrap().id;

    manager.begin_online(&owner).unwrap();
    manager
        .add_online_change_set(&owner, ChangeSet { table_id, kind: ChangeSetKind::AddColumn { column: "total".into() } })
        .unwrap();

    // Concurrent DML against the claimed table, logged via the ambient
    // transaction machinery rather than the owner's online session.
    manager
        .transact(|txn| manager.record_online_handled_hkey(txn, table_id, b"row-002"))
        .unwrap();
    manager
        .transact(|txn| manager.record_online_handled_hkey(txn, table_id, b"row-001"))
        .unwrap();

    let staged = manager
        .stage_online(&owner, &["sales".to_string()], move |_txn, builder| builder.add_column(table_id, col("total", "DECIMAL")))
        .unwrap();
    assert!(staged.table_by_name("sales", "orders").unwrap().column("total").is_some());

    let other = Session::new();
    let committed = manager.get_ais(&other).unwrap();
    assert!(committed.table_by_name("sales", "orders").unwrap().column("total").is_none());

    let hkeys = manager.scan_online_handled_hkeys(&owner, table_id, None).unwrap();
    assert_eq!(hkeys, vec![b"row-001".to_vec(), b"row-002".to_vec()]);

    let resumed = manager.scan_online_handled_hkeys(&owner, table_id, Some(b"row-001")).unwrap();
    assert_eq!(resumed, vec![b"row-002".to_vec()]);

    let finalized = manager.finalize_online(&owner).unwrap();
    assert!(finalized.table_by_name("sales", "orders").unwrap().column("total").is_some());
    let after = manager.get_ais(&other).unwrap();
    assert!(after.table_by_name("sales", "orders").unwrap().column("total").is_some());
}

/// S5: a version mismatch fails startup unless `clear_incompatible_data`
/// authorizes wiping and reinitializing. Runs against a real `LogCask`
/// file rather than `Memory`, since `Memory::clone()` copies data at the
/// point of the call instead of sharing it -- only a real file backs the
/// "another process tampered with the metadata" scenario this exercises.
#[test]
#[serial]
fn s5_version_mismatch_then_authorized_clear() {
    use schema_kv::kv::directory;
    use schema_kv::kv::facade::KvFacade;
    use schema_kv::kv::tuple;

    let dir = tempfile::tempdir().unwrap();
    let storage_path = dir.path().join("schema-manager.db");
    let base_config =
        SchemaManagerConfig { storage_backend: StorageBackend::LogCask, storage_path: storage_path.clone(), ..SchemaManagerConfig::default() };

    {
        let manager = SchemaManager::start(LogCask::new(storage_path.clone()).unwrap(), base_config.clone()).unwrap();
        manager.create_table(&Session::new(), "a", "t", vec![col("x", "INT")]).unwrap();
    }

    let reopened = SchemaManager::start(LogCask::new(storage_path.clone()).unwrap(), base_config.clone()).unwrap();
    assert_eq!(reopened.get_ais(&Session::new()).unwrap().generation, 1);
    drop(reopened);

    // Tamper with the stored dataVersion directly, as an out-of-band
    // migration tool (or a downgrade) would.
    {
        let facade = KvFacade::new(LogCask::new(storage_path.clone()).unwrap());
        facade
            .transact(|txn| {
                let meta_dir = directory::open_dir(txn, &base_config.root_path)?;
                txn.set(&directory::pack(&meta_dir, b"dataVersion"), tuple::pack_i64(CURRENT_DATA_VERSION + 1))
            })
            .unwrap();
    }

    let refused = SchemaManager::start(LogCask::new(storage_path.clone()).unwrap(), base_config.clone());
    assert!(matches!(refused, Err(Error::Incompatible { stored_data, .. }) if stored_data == CURRENT_DATA_VERSION + 1));

    let cleared_config = SchemaManagerConfig { clear_incompatible_data: true, ..base_config };
    let manager = SchemaManager::start(LogCask::new(storage_path).unwrap(), cleared_config).unwrap();
    assert_eq!(manager.get_ais(&Session::new()).unwrap().generation, 0);
    assert!(manager.get_ais(&Session::new()).unwrap().table_by_name("a", "t").is_none());
}

/// S6: DROP removes storage -- both the table from the AIS and its data
/// directory from `list_storage_paths`.
#[test]
fn s6_drop_removes_storage() {
    let manager = SchemaManager::start(Memory::new(), SchemaManagerConfig::default()).unwrap();
    let session = Session::new();
    manager.create_table(&session, "sales", "orders", vec![col("id", "BIGINT")]).unwrap();
    assert_eq!(manager.list_storage_paths(&session).unwrap().len(), 1);

    let ais = manager.drop_table(&session, "sales", "orders").unwrap();
    assert!(ais.table_by_name("sales", "orders").is_none());
    assert!(manager.list_storage_paths(&session).unwrap().is_empty());
}
