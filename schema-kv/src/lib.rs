//! `schema-kv` is a schema manager for a SQL-over-ordered-KV-store system:
//! an in-memory, versioned snapshot of every schema/table/column/index/
//! sequence/routine/foreign-key (the "AIS"), persisted as schema-framed
//! fragments on top of a small transactional key-value store, with
//! support for online (concurrent) DDL that stages a change behind its
//! own id until the owning session finalizes it.
//!
//! The crate is layered bottom-up:
//! - [`kv`] — the transactional key-value store itself: a pluggable
//!   [`kv::engine::Engine`], MVCC transactions on top of it, a directory
//!   layer for named subspaces, and a retrying [`kv::facade::KvFacade`].
//! - [`ais`] — the Akiban Information Schema data model and its
//!   [`ais::codec`] for (de)serializing schema fragments.
//! - [`namegen`] — mints globally unique table/index ids and storage
//!   tree names.
//! - [`generation`] — the single authoritative `generation` counter and
//!   per-session AIS caching.
//! - [`online`] — the online-DDL staging area and its DML-hkey log.
//! - [`config`] — ambient configuration for [`manager::SchemaManager`].
//! - [`manager`] — the front door: [`manager::SchemaManager`], the one
//!   type client code actually holds.

pub mod ais;
pub mod config;
pub mod error;
pub mod generation;
pub mod kv;
pub mod manager;
pub mod namegen;
pub mod online;
