//! Catalog store: durable, concurrency-safe state for photos, embeddings
//! and similarity groups.
//!
//! The catalog is a single SQLite file opened in WAL mode so the background
//! pipeline and interactive queries can run side by side. Writes that hit a
//! busy database are retried with exponential backoff plus jitter before the
//! error is surfaced.

mod schema;

use anyhow::{Context, Result};
use rand::Rng;
use rusqlite::{Connection, ErrorCode};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub use schema::{MIGRATIONS, SCHEMA};

use crate::pairing::Role;

/// Bounded retry for transient lock contention.
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 1000;

/// A photo staged for insertion by the ingestion scanner.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub path: String,
    pub base_name: String,
    pub role: Role,
    pub default_date: Option<String>,
}

/// All unprocessed files sharing a base name, materialized on demand.
#[derive(Debug, Clone, Default)]
pub struct PhotoSet {
    pub base_name: String,
    pub front: Option<String>,
    pub back: Option<String>,
    pub variants: Vec<String>,
    /// Representative capture date: the front's, else the back's, else the
    /// first variant that has one. Advisory only.
    pub default_date: Option<String>,
}

impl PhotoSet {
    /// Every file path in the set, front and back first.
    pub fn files(&self) -> Vec<&str> {
        self.front
            .iter()
            .chain(self.back.iter())
            .chain(self.variants.iter())
            .map(|s| s.as_str())
            .collect()
    }

    /// Sets with neither a front nor a back are not shown to the operator.
    pub fn is_displayable(&self) -> bool {
        self.front.is_some() || self.back.is_some()
    }
}

/// One stored feature vector, joined with its photo's current path.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub photo_id: i64,
    pub path: String,
    pub embedding: Vec<f32>,
}

/// Clustering output staged for persistence. Members reference photo ids
/// that existed when the embeddings were read.
#[derive(Debug, Clone)]
pub struct DiscoveredGroup {
    pub name: String,
    pub description: String,
    pub similarity_score: f32,
    pub members: Vec<(i64, f32)>,
}

/// A persisted group with its member photos, for display.
#[derive(Debug, Clone)]
pub struct GroupView {
    pub id: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub similarity_score: Option<f64>,
    pub members: Vec<GroupMemberView>,
}

#[derive(Debug, Clone)]
pub struct GroupMemberView {
    pub path: String,
    pub base_name: String,
    pub role: Role,
    pub similarity_score: Option<f64>,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create catalog directory {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open catalog at {:?}", path))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 30_000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self { conn })
    }

    /// In-memory catalog for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.run_migrations()?;
        Ok(())
    }

    /// Applies the additive migration sequence. A statement that fails
    /// because the column already exists is skipped.
    fn run_migrations(&self) -> Result<()> {
        for migration in MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
        Ok(())
    }

    /// Runs an operation, retrying transient "database is locked/busy"
    /// failures with exponential backoff plus jitter. Other errors are
    /// surfaced immediately.
    fn with_retry<T>(&self, mut op: impl FnMut(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op(&self.conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = BACKOFF_BASE_MS * (1 << attempt);
                    let jitter = rand::thread_rng().gen_range(0..BACKOFF_BASE_MS);
                    tracing::warn!(
                        "Catalog busy, retrying in {}ms (attempt {}/{})",
                        backoff + jitter,
                        attempt + 1,
                        MAX_ATTEMPTS
                    );
                    std::thread::sleep(Duration::from_millis(backoff + jitter));
                    attempt += 1;
                }
                Err(e) => return Err(e).context("Catalog operation failed"),
            }
        }
    }

    // ========================================================================
    // Photo operations
    // ========================================================================

    /// Bulk insert-if-absent. A path already in the catalog is left
    /// untouched, so a re-scan never clobbers lifecycle state.
    /// Returns the number of rows actually inserted.
    pub fn upsert_photos(&self, batch: &[NewPhoto]) -> Result<usize> {
        self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT OR IGNORE INTO photos (path, base_name, role, default_date)
                    VALUES (?, ?, ?, ?)
                    "#,
                )?;
                for photo in batch {
                    inserted += stmt.execute(rusqlite::params![
                        photo.path,
                        photo.base_name,
                        photo.role.as_str(),
                        photo.default_date,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    pub fn all_photo_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT path FROM photos")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(paths)
    }

    /// Paths currently in the given lifecycle state.
    pub fn paths_with_state(&self, state: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT path FROM photos WHERE state = ?")?;
        let paths = stmt
            .query_map([state], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(paths)
    }

    /// Atomically relocates the record to `new_path` and marks it processed.
    /// Returns false when `old_path` is not in the catalog; callers treat
    /// that as a recoverable warning, not a failure.
    pub fn mark_processed(&self, old_path: &str, new_path: &str) -> Result<bool> {
        let rows = self.with_retry(|conn| {
            conn.execute(
                r#"
                UPDATE photos
                SET path = ?, state = 'processed',
                    processed_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
                WHERE path = ?
                "#,
                rusqlite::params![new_path, old_path],
            )
        })?;
        if rows == 0 {
            tracing::warn!("No catalog record for path: {}", old_path);
        }
        Ok(rows > 0)
    }

    pub fn mark_ignored(&self, path: &str) -> Result<bool> {
        let rows = self.with_retry(|conn| {
            conn.execute(
                r#"
                UPDATE photos
                SET state = 'ignored',
                    ignored_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
                WHERE path = ?
                "#,
                [path],
            )
        })?;
        Ok(rows > 0)
    }

    /// Unprocessed photos grouped into sets by base name, each annotated
    /// with a representative default date. Ordered by base name.
    pub fn unprocessed_sets(&self) -> Result<Vec<PhotoSet>> {
        let rows = self.with_retry(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT path, base_name, role, default_date
                FROM photos
                WHERE state = 'unprocessed'
                ORDER BY base_name, role, path
                "#,
            )?;
            let rows: Vec<(String, String, String, Option<String>)> = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })?;

        let mut sets: BTreeMap<String, (PhotoSet, Vec<Option<String>>)> = BTreeMap::new();
        for (path, base_name, role, default_date) in rows {
            let entry = sets.entry(base_name.clone()).or_insert_with(|| {
                (
                    PhotoSet {
                        base_name,
                        ..PhotoSet::default()
                    },
                    Vec::new(),
                )
            });
            let (set, variant_dates) = entry;
            match Role::from_str(&role) {
                Some(Role::Front) if set.front.is_none() => {
                    set.front = Some(path);
                    if default_date.is_some() {
                        set.default_date = default_date;
                    }
                }
                Some(Role::Back) if set.back.is_none() => {
                    set.back = Some(path);
                    if set.default_date.is_none() && default_date.is_some() {
                        set.default_date = default_date;
                    }
                }
                _ => {
                    set.variants.push(path);
                    variant_dates.push(default_date);
                }
            }
        }

        Ok(sets
            .into_values()
            .map(|(mut set, variant_dates)| {
                if set.default_date.is_none() {
                    set.default_date = variant_dates.into_iter().flatten().next();
                }
                set
            })
            .collect())
    }

    /// Removes catalog records whose file no longer exists on disk,
    /// cascading to embeddings and group memberships. Offline maintenance,
    /// not the hot path. Returns the number of photos removed.
    pub fn reconcile_missing(&self) -> Result<usize> {
        let mut stmt = self.conn.prepare("SELECT id, path FROM photos")?;
        let all: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let missing: Vec<i64> = all
            .into_iter()
            .filter(|(_, path)| !Path::new(path).exists())
            .map(|(id, path)| {
                tracing::info!("Removing record for missing file: {}", path);
                id
            })
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        let placeholders: Vec<&str> = missing.iter().map(|_| "?").collect();
        let sql = format!(
            "DELETE FROM photos WHERE id IN ({})",
            placeholders.join(", ")
        );
        self.with_retry(|conn| {
            let params: Vec<&dyn rusqlite::ToSql> =
                missing.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
            conn.execute(&sql, params.as_slice())
        })?;

        Ok(missing.len())
    }

    pub fn count_photos(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn count_by_state(&self, state: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM photos WHERE state = ?",
            [state],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========================================================================
    // Embedding operations
    // ========================================================================

    /// Stores an embedding, replacing any prior vector of the same kind.
    pub fn store_embedding(&self, photo_id: i64, kind: &str, embedding: &[f32]) -> Result<()> {
        let bytes = embedding_to_bytes(embedding);
        self.with_retry(|conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO photo_embeddings
                    (photo_id, kind, embedding, embedding_dim, created_at)
                VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
                "#,
                rusqlite::params![photo_id, kind, bytes, embedding.len() as i64],
            )
        })?;
        Ok(())
    }

    /// All embeddings of the given kind, joined with the photo's current path.
    pub fn embeddings(&self, kind: &str) -> Result<Vec<EmbeddingRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.id, p.path, e.embedding
            FROM photos p
            JOIN photo_embeddings e ON p.id = e.photo_id
            WHERE e.kind = ?
            ORDER BY p.id
            "#,
        )?;
        let records = stmt
            .query_map([kind], |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok(EmbeddingRecord {
                    photo_id: row.get(0)?,
                    path: row.get(1)?,
                    embedding: bytes_to_embedding(&bytes),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Base-role, unprocessed photos that have no embedding of the given
    /// kind yet. Front/back splits are never embedded independently.
    pub fn photos_needing_embedding(&self, kind: &str) -> Result<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.id, p.path
            FROM photos p
            LEFT JOIN photo_embeddings e ON p.id = e.photo_id AND e.kind = ?
            WHERE e.photo_id IS NULL
              AND p.state = 'unprocessed'
              AND p.role = 'base'
            ORDER BY p.id
            "#,
        )?;
        let results = stmt
            .query_map([kind], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(results)
    }

    // ========================================================================
    // Group operations
    // ========================================================================

    /// Replaces all persisted groups with the given clustering output.
    /// Clustering is always a full recompute, never an incremental merge.
    pub fn replace_groups(&self, groups: &[DiscoveredGroup]) -> Result<()> {
        self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM photo_group_members", [])?;
            tx.execute("DELETE FROM photo_groups", [])?;
            for group in groups {
                tx.execute(
                    r#"
                    INSERT INTO photo_groups (name, description, similarity_score)
                    VALUES (?, ?, ?)
                    "#,
                    rusqlite::params![group.name, group.description, group.similarity_score],
                )?;
                let group_id = tx.last_insert_rowid();
                for (photo_id, score) in &group.members {
                    tx.execute(
                        r#"
                        INSERT OR REPLACE INTO photo_group_members
                            (photo_id, group_id, similarity_score)
                        VALUES (?, ?, ?)
                        "#,
                        rusqlite::params![photo_id, group_id, score],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// All groups with their members, newest group first.
    pub fn list_groups(&self) -> Result<Vec<GroupView>> {
        let rows = self.with_retry(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT g.id, g.name, g.description, g.similarity_score,
                       p.path, p.base_name, p.role, m.similarity_score
                FROM photo_groups g
                LEFT JOIN photo_group_members m ON g.id = m.group_id
                LEFT JOIN photos p ON m.photo_id = p.id
                ORDER BY g.created_at DESC, g.id DESC, p.base_name, p.role
                "#,
            )?;
            let rows: Vec<(
                i64,
                Option<String>,
                Option<String>,
                Option<f64>,
                Option<String>,
                Option<String>,
                Option<String>,
                Option<f64>,
            )> = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })?;

        let mut groups: Vec<GroupView> = Vec::new();
        for (id, name, description, score, path, base_name, role, member_score) in rows {
            if groups.last().map(|g| g.id) != Some(id) {
                groups.push(GroupView {
                    id,
                    name,
                    description,
                    similarity_score: score,
                    members: Vec::new(),
                });
            }
            // LEFT JOIN leaves empty groups with NULL member columns
            if let (Some(group), Some(path), Some(base_name), Some(role)) =
                (groups.last_mut(), path, base_name, role)
            {
                if let Some(role) = Role::from_str(&role) {
                    group.members.push(GroupMemberView {
                        path,
                        base_name,
                        role,
                        similarity_score: member_score,
                    });
                }
            }
        }
        Ok(groups)
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

/// Convert f32 slice to little-endian bytes for storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert stored bytes back to an f32 vector.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap();
            f32::from_le_bytes(arr)
        })
        .collect()
}
