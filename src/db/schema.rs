pub const SCHEMA: &str = r#"
-- Photos table: one row per physical file known to the catalog
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    base_name TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('front', 'back', 'base', 'extra')),

    -- Lifecycle: a single state column keeps processed/ignored mutually
    -- exclusive; the timestamps record when the transition happened.
    state TEXT NOT NULL DEFAULT 'unprocessed'
        CHECK (state IN ('unprocessed', 'processed', 'ignored')),
    processed_at TEXT,
    ignored_at TEXT,

    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_photos_base_name ON photos(base_name);
CREATE INDEX IF NOT EXISTS idx_photos_state ON photos(state);

-- Similarity groups discovered by clustering; fully replaced each run
CREATE TABLE IF NOT EXISTS photo_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    description TEXT,
    similarity_score REAL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Photo to group membership edges
CREATE TABLE IF NOT EXISTS photo_group_members (
    photo_id INTEGER NOT NULL,
    group_id INTEGER NOT NULL,
    similarity_score REAL,
    PRIMARY KEY (photo_id, group_id),
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE,
    FOREIGN KEY (group_id) REFERENCES photo_groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_group ON photo_group_members(group_id);

-- Feature embeddings for similarity analysis
CREATE TABLE IF NOT EXISTS photo_embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    embedding BLOB NOT NULL,  -- float32 array stored as little-endian bytes
    embedding_dim INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE,
    UNIQUE (photo_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_embeddings_photo ON photo_embeddings(photo_id);
"#;

/// Additive schema migrations, applied on every startup. Each statement is a
/// no-op failure when the column already exists, so re-runs are harmless.
pub const MIGRATIONS: &[&str] = &[
    // Best-effort capture date inferred at ingestion (YYYY-MM-DD)
    "ALTER TABLE photos ADD COLUMN default_date TEXT",
];
