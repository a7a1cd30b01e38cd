//! aeroquery - multi-plan query optimizer cursor for a document store
//!
//! Candidate index plans race each other, one `$or` clause at a time, over
//! an in-memory record store; the cursor surfaces each matching record once
//! and survives yields while writers change the collection.

pub mod cli;
pub mod config;
pub mod cursor;
pub mod index;
pub mod observability;
pub mod planner;
pub mod storage;
