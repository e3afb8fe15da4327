pub const SCHEMA: &str = r#"
-- Static asset entries, one named cache per worker version
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, entry_key)
);

-- Cache names exist independently of their entries (an opened cache may be empty)
CREATE TABLE IF NOT EXISTS cache_names (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Background sync tags registered but not yet fired
CREATE TABLE IF NOT EXISTS sync_registrations (
    tag TEXT PRIMARY KEY,
    registered_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Lifecycle of each worker version, keyed by its cache name
CREATE TABLE IF NOT EXISTS worker_state (
    cache_name TEXT PRIMARY KEY,
    lifecycle TEXT NOT NULL,
    skip_waiting INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
