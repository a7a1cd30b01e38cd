//! Document storage subsystem for aeroquery
//!
//! An in-memory record store that behaves like the engine the query layer
//! runs against: slot-addressed records, insertion-ordered natural scans,
//! capped collections that recycle slots, and indexes maintained on every
//! write.
//!
//! # Design Principles
//!
//! - Records never move while they exist; updates happen in place
//! - Slots of normal collections are never reused
//! - Capped collections overwrite their oldest record and reuse its slot
//! - Every collection and index has an `ident` so drops are observable

mod collection;
mod database;
mod errors;
mod record;

pub use collection::{Collection, CollectionOptions};
pub use database::{CollectionHandle, Database};
pub use errors::{StorageError, StorageResult};
pub use record::{lookup_path, Record, RecordId};
