//! Postgres persistence for the sync pipeline.
//!
//! A refresh runs inside one transaction: open a [`PgSession`], do every
//! source/item/reply write through it, then commit once at the end. Reads for
//! the enrichment stage go straight through [`PgStore`] on the pool.

pub mod store;

pub use store::{ItemRef, ItemStats, NewItem, NewReply, PgSession, PgStore};
