//! # concur-map
//!
//! A concurrent, in-memory open-addressing hash table where the only lock
//! is a per-slot atomic state machine (`Empty -> Setting -> Live ->
//! Updating -> Removed`). Reads never block writers and writers only ever
//! block other writers targeting the *same* slot — growth is the one
//! stop-the-world step, and even that only drains in-flight writers, not
//! readers.
//!
//! ```rust
//! use concur_map::Table;
//!
//! let table: Table<String> = Table::new();
//! table.set(1i64, "one".to_string()).unwrap();
//! table.set("two", "2".to_string()).unwrap();
//!
//! assert_eq!(table.get(1i64), Some("one".to_string()));
//! assert_eq!(table.len(), 2);
//! ```
//!
//! Keys are a closed set ([`Key`]) covering the common scalar, byte-sequence,
//! and string kinds; anything else goes through [`Key::Fallback`] via its
//! `Display`/`Debug` rendering and is documented as lossy.

pub mod error;
pub mod hash;
pub mod key;
mod slot;
mod storage;
pub mod table;

pub use error::TableError;
pub use hash::{Mixer, Xxh3Mixer};
pub use key::Key;
pub use slot::StoredValue;
pub use table::{Table, TableOptions, DEFAULT_INITIAL_CAPACITY, GROW_AT_FULLNESS, MAXIMAL_SIZE};
