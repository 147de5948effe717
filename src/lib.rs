//! # VellumDB
//!
//! An embeddable LSM-tree key-value store with **key-value separation**:
//! large values are kept out of the sorted tables and written to
//! append-only side files (vTables), while the tables carry only small
//! index entries pointing into them. Values can also be composite — a
//! mapping of named fields with a reverse lookup.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                          Db                                │
//! │  ┌────────────┐   flush   ┌──────────┐      ┌───────────┐  │
//! │  │   Write    │ ────────► │ SSTables │ ...► │  vTables  │  │
//! │  │   buffer   │           │  (.ldb)  │ index│  (.vtb)   │  │
//! │  └────────────┘           └────┬─────┘      └─────┬─────┘  │
//! │                                │ compact          │ GC     │
//! │                                ▼                  ▼        │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │    vTable manager (liveness, refcounts, VTABLEMETA)  │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Database handle — open, read, write, flush, compact, fields |
//! | [`vtable`] | Separated-value files: format, builder, reader, manager, GC |
//! | [`flush`] | Flush-time separator routing values to SST or vTable |
//! | [`sstable`] | Immutable sorted tables with bloom filters and block CRCs |
//! | [`compaction`] | Whole-tree merge reporting dropped index entries |
//! | [`fields`] | Composite values: a `name → value` mapping per key |
//! | [`encoding`] | Varint/fixed-int wire primitives shared by every format |
//! | [`env`] | Pluggable filesystem and thread primitive |
//!
//! ## Key properties
//!
//! - **Separation by threshold** — values at or above
//!   [`engine::DbConfig::kv_sep_size`] bytes leave the SST at flush time;
//!   the read path resolves them transparently.
//! - **Ordered durability** — a flush syncs the SST before its vTable, and
//!   publishes only after both, so index entries never dangle after a crash.
//! - **Reference-counted GC** — dead vTables are unlinked by a detached
//!   background worker, never while a reader holds them open.
//! - **Crash-safe metadata** — the manager's manifest is rewritten whole
//!   via write-temp, fsync, atomic rename.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vellumdb::engine::{Db, DbConfig};
//! use vellumdb::fields::Fields;
//!
//! let db = Db::open("/tmp/my_db", DbConfig::default()).unwrap();
//!
//! // Small values stay inline; large ones are separated at flush.
//! db.put("hello", b"world").unwrap();
//! db.put("blob", &vec![0u8; 64 * 1024]).unwrap();
//! db.flush().unwrap();
//! assert_eq!(db.get(b"hello").unwrap().as_deref(), Some(&b"world"[..]));
//!
//! // Composite values.
//! let mut fields = Fields::new();
//! fields.set("name", "Arcueid");
//! fields.set("phone", "122-233-4455");
//! db.put_fields("person:1", &fields).unwrap();
//! let hits = db.find_keys_by_field(b"name", b"Arcueid").unwrap();
//! assert_eq!(hits, vec![b"person:1".to_vec()]);
//!
//! db.close().unwrap();
//! ```

pub mod compaction;
pub mod encoding;
pub mod engine;
pub mod env;
pub mod fields;
pub mod filename;
pub mod flush;
pub mod ikey;
pub mod sstable;
pub mod vtable;
