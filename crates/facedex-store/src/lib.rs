//! facedex-store — SQLite persistence for enrolled people.
//!
//! Two tables: `people` (name and main photo bytes) and `images`
//! (one face embedding per row, raw little-endian `f64` blob).

mod schema;
mod store;

pub use store::{Person, PersonSummary, Store, StoreError, StoredEmbedding};
