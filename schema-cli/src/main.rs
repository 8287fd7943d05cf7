//! `schema-cli`: drives a [`schema_kv`] `SchemaManager` from the terminal.
//! One invocation, one command -- there's no REPL here, because each online
//! DDL subcommand after `online begin` is meant to be run as its own
//! process against the same on-disk storage, not as a long-lived session
//! (spec.md §8 scenario S4's "concurrent DML" plays out across separate
//! writers in practice).

use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use schema_cli::command::{self, Command, OnlineCommand};
use schema_cli::config::ConfigLoad;
use schema_cli::trace;
use schema_kv::ais::{AisBuilder, Column};
use schema_kv::config::{SchemaManagerConfig, StorageBackend};
use schema_kv::generation::Session;
use schema_kv::kv::engine::Engine;
use schema_kv::kv::log_cask::LogCask;
use schema_kv::kv::memory::Memory;
use schema_kv::manager::SchemaManager;
use schema_kv::online::ChangeSetKind;

#[derive(Debug, Parser)]
#[command(name = "schema-cli", about = "Administers a schema-kv schema manager instance")]
struct Args {
    /// Path to a config file, loaded with a default-on-error fallback.
    #[arg(long, default_value = "schema-cli.toml")]
    config: String,

    /// The online id to resume, for every `online` subcommand except
    /// `begin`. Each invocation is a fresh process with a fresh `Session`,
    /// so there's nothing else to reattach to.
    #[arg(long)]
    online_id: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigLoad::load(&args.config);
    let _log_guards = trace::init_logging(&config.log_dir, &config.log_level)?;

    let manager_config = SchemaManagerConfig {
        clear_incompatible_data: config.clear_incompatible_data,
        storage_path: config.storage_path.clone(),
        storage_backend: config.storage_backend,
        ..SchemaManagerConfig::default()
    };

    match manager_config.storage_backend {
        StorageBackend::Memory => {
            log::warn!("storage_backend=memory: nothing will be visible to the next invocation of this binary");
            let manager = SchemaManager::start(Memory::new(), manager_config).context("starting schema manager")?;
            run(&manager, args.command, args.online_id)
        }
        StorageBackend::LogCask => {
            if let Some(parent) = config.storage_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let engine = LogCask::new(config.storage_path.clone()).context("opening storage file")?;
            let manager = SchemaManager::start(engine, manager_config).context("starting schema manager")?;
            run(&manager, args.command, args.online_id)
        }
    }
}

fn run<E: Engine>(manager: &SchemaManager<E>, command: Command, online_id: Option<i64>) -> Result<()> {
    let session = Session::new();

    if let Command::Online(ref sub) = command {
        if !matches!(sub, OnlineCommand::Begin) {
            let id = online_id.context("this online subcommand requires --online-id <id> from a prior `online begin`")?;
            manager.resume_online(&session, id).map_err(|e| anyhow!(e))?;
        }
    }

    match command {
        Command::Init => {
            let ais = manager.get_ais(&session).map_err(|e| anyhow!(e))?;
            println!("generation: {}", ais.generation);
        }
        Command::Status => print_status(manager, &session)?,
        Command::CreateTable { spec } => {
            let (schema, table, columns) = command::parse_create_table_spec(&spec)?;
            let ais = manager.create_table(&session, &schema, &table, columns).map_err(|e| anyhow!(e))?;
            println!("created {schema}.{table}, generation now {}", ais.generation);
        }
        Command::DropTable { spec } => {
            let (schema, table) = command::parse_qualified_name(&spec)?;
            let ais = manager.drop_table(&session, &schema, &table).map_err(|e| anyhow!(e))?;
            println!("dropped {schema}.{table}, generation now {}", ais.generation);
        }
        Command::RenameTable { from, to } => {
            let (old_schema, old_table) = command::parse_qualified_name(&from)?;
            let (new_schema, new_table) = command::parse_qualified_name(&to)?;
            let ais = manager
                .rename_table(&session, &old_schema, &old_table, &new_schema, &new_table)
                .map_err(|e| anyhow!(e))?;
            println!("renamed {from} to {to}, generation now {}", ais.generation);
        }
        Command::Gc => {
            let paths: BTreeSet<String> = manager.list_storage_paths(&session).map_err(|e| anyhow!(e))?;
            for path in paths {
                println!("{path}");
            }
        }
        Command::Online(sub) => run_online(manager, &session, sub)?,
    }
    Ok(())
}

fn print_status<E: Engine>(manager: &SchemaManager<E>, session: &Session) -> Result<()> {
    let ais = manager.get_ais(session).map_err(|e| anyhow!(e))?;
    println!("generation: {}", ais.generation);
    for schema in ais.schemas() {
        println!("schema {}", schema.name);
        for table_id in schema.tables.values() {
            if let Some(table) = ais.table(*table_id) {
                println!("  table {} ({} columns, version {})", table.name, table.columns.len(), table.version);
            }
        }
    }
    Ok(())
}

fn run_online<E: Engine>(manager: &SchemaManager<E>, session: &Session, command: OnlineCommand) -> Result<()> {
    match command {
        OnlineCommand::Begin => {
            let id = manager.begin_online(session).map_err(|e| anyhow!(e))?;
            println!("online id: {id}");
            println!("pass --online-id {id} to the remaining `online` subcommands");
        }
        OnlineCommand::AddChange { id: _, table_id, kind } => {
            let cs = command::parse_change_set(table_id, &kind)?;
            manager.add_online_change_set(session, cs).map_err(|e| anyhow!(e))?;
            println!("change set recorded against table {table_id}");
        }
        OnlineCommand::Stage { id: _, schemas, table_id, kind } => {
            let kind = command::parse_change_set(table_id, &kind)?.kind;
            let schema_list: Vec<String> = schemas.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            if schema_list.is_empty() {
                return Err(anyhow!("stage requires at least one schema name"));
            }
            let ais = manager
                .stage_online(session, &schema_list, move |_txn, builder| apply_change_set(builder, table_id, &kind))
                .map_err(|e| anyhow!(e))?;
            println!("staged, generation now {}", ais.generation);
        }
        OnlineCommand::Finalize { id: _ } => {
            let ais = manager.finalize_online(session).map_err(|e| anyhow!(e))?;
            println!("finalized, generation now {}", ais.generation);
        }
        OnlineCommand::Abort { id: _ } => {
            manager.abort_online(session).map_err(|e| anyhow!(e))?;
            println!("aborted");
        }
    }
    Ok(())
}

/// Applies a `ChangeSetKind` to the AIS builder staging an online change.
/// `add-column`'s CLI shorthand carries no type, so it falls back to
/// `TEXT`; anything more specific needs `create-table`'s richer
/// `name:type` syntax instead.
fn apply_change_set(builder: &mut AisBuilder, table_id: u32, kind: &ChangeSetKind) -> schema_kv::error::CResult<()> {
    match kind {
        ChangeSetKind::AddColumn { column } => {
            builder.add_column(table_id, Column { name: column.clone(), position: 0, type_name: "TEXT".to_string(), nullable: true })
        }
        ChangeSetKind::DropColumn { column } => builder.drop_column(table_id, column),
        ChangeSetKind::AlterColumnType { column, new_type } => {
            builder.drop_column(table_id, column)?;
            builder.add_column(table_id, Column { name: column.clone(), position: 0, type_name: new_type.clone(), nullable: true })
        }
        ChangeSetKind::AlterPrimaryKey | ChangeSetKind::Other(_) => {
            Err(schema_kv::error::Error::Internal(format!("{kind:?} has no CLI-shorthand mutation")))
        }
    }
}
