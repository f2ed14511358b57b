//! SQLite plumbing under [`crate::store::sqlite::SqliteStore`].
//!
//! [`connection::connect_sqlite`] opens a connection with the pragmas the
//! pipeline relies on (WAL journal, foreign keys, 5s busy timeout).
//! [`migrate`] embeds the `symbols`/`observations` migrations and applies
//! them either to a path or to an open connection.
//!
//! ```no_run
//! use asset_sync::db::{connection, migrate};
//!
//! let path = std::env::temp_dir().join("market_sync.sqlite");
//! let path = path.to_str().unwrap();
//! migrate::run_sqlite(path).expect("migrations");
//! let _conn = connection::connect_sqlite(path).expect("connect");
//! ```

pub mod connection;
pub mod migrate;
