//! SQL DDL for the record store.
//! One SQLite file per database; collections live side by side in `records`.

/// SQLite schema with:
/// - `meta`: database-level settings, currently only `version`
/// - `collections`: one row per collection, `next_id` is its key generator
/// - `records`: JSON bodies keyed by `(collection, id)`
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    next_id INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    id INTEGER NOT NULL,
    body TEXT NOT NULL, -- JSON object, without the id
    PRIMARY KEY (collection, id)
);
"#;

pub const VERSION_KEY: &str = "version";
