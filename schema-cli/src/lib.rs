//! `schema-cli`: a thin administrative binary over [`schema_kv`]'s
//! `SchemaManager` -- init / status / DDL / online-DDL lifecycle / gc. It
//! plays the role the teacher's own `kv-cli` plays over `kv`: a way to
//! drive the library from a terminal or an operational script, not a SQL
//! front end (spec.md §1 leaves the parser/planner/executor out of scope).

pub mod command;
pub mod config;
pub mod trace;
