use rusqlite::{Connection, Result};
use tracing::debug;

/// Which optional SQLite features are available on this connection.
/// Probed once at startup; the engine degrades gracefully per missing piece.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// FTS5 present — keyword search works.
    pub fts: bool,
    /// vec0 virtual table present — ANN search instead of brute-force cosine.
    pub vec: bool,
}

/// Initialise memory tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<Capabilities> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=3000;",
    )?;

    create_items_table(conn)?;
    create_embedding_cache(conn)?;

    let fts = create_fts_index(conn).is_ok();
    let vec = create_vec_table(conn).is_ok();
    debug!(fts, vec, "memory db capabilities probed");

    Ok(Capabilities { fts, vec })
}

fn create_items_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_items (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            type                TEXT NOT NULL,
            content             TEXT NOT NULL,
            content_hash        TEXT NOT NULL,
            source              TEXT NOT NULL,
            source_id           TEXT,
            project_path        TEXT NOT NULL,
            created_by          TEXT NOT NULL,
            created_at          TEXT NOT NULL,
            reinforcement_count INTEGER NOT NULL DEFAULT 1,
            last_reinforced_at  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_items_hash
            ON memory_items(content_hash);
        CREATE INDEX IF NOT EXISTS idx_items_type
            ON memory_items(type);
        CREATE INDEX IF NOT EXISTS idx_items_project
            ON memory_items(project_path);",
    )
}

fn create_embedding_cache(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS embedding_cache (
            content_hash TEXT PRIMARY KEY,
            embedding    BLOB NOT NULL,
            model        TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );",
    )
}

/// FTS5 virtual table for keyword search with BM25 ranking.
/// content='memory_items' makes it external-content — synced manually on write.
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts
            USING fts5(content, type, created_by,
                       content='memory_items', content_rowid='id');",
    )
}

/// vec0 virtual table — present only when the sqlite-vec extension is loaded.
/// Bundled SQLite doesn't ship it, so this probe normally fails and search
/// falls back to brute-force cosine over `embedding_cache`.
fn create_vec_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memory_vec
            USING vec0(id INTEGER PRIMARY KEY, embedding float[1536]);",
    )
}

/// Pack an f32 vector into a little-endian BLOB.
pub fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Unpack a little-endian BLOB into an f32 vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let caps1 = init_db(&conn).unwrap();
        let caps2 = init_db(&conn).unwrap();
        assert_eq!(caps1.fts, caps2.fts);
    }

    #[test]
    fn fts_available_with_bundled_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        let caps = init_db(&conn).unwrap();
        assert!(caps.fts);
        // vec0 requires the sqlite-vec extension, absent in the bundled build.
        assert!(!caps.vec);
    }

    #[test]
    fn blob_round_trip() {
        let v = vec![0.1f32, -2.5, 3.75, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn blob_ignores_trailing_partial() {
        let mut blob = vec_to_blob(&[1.0]);
        blob.push(0xFF);
        assert_eq!(blob_to_vec(&blob), vec![1.0]);
    }
}
