use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use opsforge_core::hash::content_hash;
use opsforge_provider::embedding::{cosine_distance, EmbeddingProvider};

use crate::db::{self, Capabilities};
use crate::error::{MemoryError, Result};
use crate::types::*;

/// Weight of the vector phase in the hybrid merge.
const VECTOR_WEIGHT: f64 = 0.7;
/// Weight of the keyword phase in the hybrid merge.
const KEYWORD_WEIGHT: f64 = 0.3;
/// Recency half-life for the salience boost, in days.
const SALIENCE_HALF_LIFE_DAYS: f64 = 30.0;
/// Candidate pool multiplier over the requested limit.
const POOL_FACTOR: usize = 3;

/// SQLite-backed memory store with hybrid search.
///
/// The connection is owned here and never shared; all access goes through the
/// Mutex, which confines writes to one caller at a time (WAL mode is on for
/// readers like the export loop).
pub struct MemoryEngine {
    db: Mutex<Connection>,
    caps: Capabilities,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    /// Pinged after every mutation; the export scheduler debounces on it.
    mutated: tokio::sync::Notify,
}

impl MemoryEngine {
    pub fn new(
        conn: Connection,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        let caps = db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            caps,
            embedder,
            mutated: tokio::sync::Notify::new(),
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Wait for the next mutation signal (used by the export scheduler).
    pub async fn mutation_signal(&self) {
        self.mutated.notified().await;
    }

    /// Insert an item, or reinforce the existing row with the same
    /// `(content_hash, project_path)`. One logical transaction.
    ///
    /// Embedding happens off this call path: new items get their vector from
    /// a spawned task (or the backfill loop) so inserts never block on HTTP.
    pub fn add_item(self: &Arc<Self>, new: NewMemoryItem) -> Result<AddOutcome> {
        let hash = content_hash(&new.content);
        let now = chrono::Utc::now().to_rfc3339();

        let outcome = {
            let mut db = self.db.lock().unwrap();
            let tx = db.transaction()?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM memory_items
                     WHERE content_hash = ?1 AND project_path = ?2",
                    rusqlite::params![hash, new.project_path],
                    |row| row.get(0),
                )
                .ok();

            let outcome = match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE memory_items
                         SET reinforcement_count = reinforcement_count + 1,
                             last_reinforced_at = ?1
                         WHERE id = ?2",
                        rusqlite::params![now, id],
                    )?;
                    debug!(id, hash = %hash, "memory item reinforced");
                    AddOutcome {
                        id,
                        action: AddAction::Reinforced,
                    }
                }
                None => {
                    tx.execute(
                        "INSERT INTO memory_items
                         (type, content, content_hash, source, source_id,
                          project_path, created_by, created_at,
                          reinforcement_count, last_reinforced_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?8)",
                        rusqlite::params![
                            new.item_type.to_string(),
                            new.content,
                            hash,
                            new.source.to_string(),
                            new.source_id,
                            new.project_path,
                            new.created_by,
                            now,
                        ],
                    )?;
                    let id = tx.last_insert_rowid();
                    if self.caps.fts {
                        tx.execute(
                            "INSERT INTO memory_fts(rowid, content, type, created_by)
                             VALUES (?1, ?2, ?3, ?4)",
                            rusqlite::params![
                                id,
                                new.content,
                                new.item_type.to_string(),
                                new.created_by
                            ],
                        )?;
                    }
                    debug!(id, hash = %hash, "memory item inserted");
                    AddOutcome {
                        id,
                        action: AddAction::Inserted,
                    }
                }
            };

            tx.commit()?;
            outcome
        };

        // Vector insert only for new content, off the write path.
        if outcome.action == AddAction::Inserted {
            if let Some(embedder) = self.embedder.clone() {
                let engine = Arc::clone(self);
                let content = new.content.clone();
                let hash2 = hash.clone();
                tokio::spawn(async move {
                    if let Err(e) = engine.embed_and_cache(&embedder, &hash2, &content).await {
                        warn!(error = %e, "embedding insert failed (backfill will retry)");
                    }
                });
            }
        }

        self.mutated.notify_one();
        Ok(outcome)
    }

    /// Compute and cache an embedding for one content hash. Idempotent.
    async fn embed_and_cache(
        &self,
        embedder: &Arc<dyn EmbeddingProvider>,
        hash: &str,
        content: &str,
    ) -> Result<()> {
        {
            let db = self.db.lock().unwrap();
            let exists: Option<i64> = db
                .query_row(
                    "SELECT 1 FROM embedding_cache WHERE content_hash = ?1",
                    [hash],
                    |row| row.get(0),
                )
                .ok();
            if exists.is_some() {
                return Ok(());
            }
        }

        let vectors = embedder
            .embed(std::slice::from_ref(&content.to_string()))
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let Some(vector) = vectors.into_iter().next() else {
            return Err(MemoryError::Embedding("empty embed response".into()));
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO embedding_cache
             (content_hash, embedding, model, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                hash,
                db::vec_to_blob(&vector),
                embedder.model(),
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Backfill embeddings for items missing a cache row. Runs after startup.
    pub async fn backfill_embeddings(self: &Arc<Self>) -> Result<usize> {
        let Some(embedder) = self.embedder.clone() else {
            return Ok(0);
        };

        let missing: Vec<(String, String)> = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(
                "SELECT DISTINCT m.content_hash, m.content
                 FROM memory_items m
                 LEFT JOIN embedding_cache e ON e.content_hash = m.content_hash
                 WHERE e.content_hash IS NULL",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.filter_map(|r| r.ok()).collect()
        };

        if missing.is_empty() {
            return Ok(0);
        }
        info!(count = missing.len(), "backfilling missing embeddings");

        let mut done = 0;
        for (hash, content) in missing {
            match self.embed_and_cache(&embedder, &hash, &content).await {
                Ok(()) => done += 1,
                Err(e) => warn!(error = %e, hash = %hash, "backfill embed failed"),
            }
        }
        Ok(done)
    }

    /// Hybrid search: vector similarity + keyword BM25, merged and boosted
    /// by salience (reinforcement count x recency decay).
    pub async fn search(
        &self,
        query: &str,
        project_path: &str,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<SearchHit>> {
        let pool = limit.saturating_mul(POOL_FACTOR).max(1);

        let vector_scores = self.vector_phase(query, project_path, pool).await?;
        let keyword_scores = self.keyword_phase(query, project_path, pool)?;

        // Merge the two phases by item id.
        let mut merged: HashMap<i64, (f64, bool, bool)> = HashMap::new();
        for (id, score) in &vector_scores {
            let entry = merged.entry(*id).or_insert((0.0, false, false));
            entry.0 += VECTOR_WEIGHT * score;
            entry.1 = true;
        }
        for (id, score) in &keyword_scores {
            let entry = merged.entry(*id).or_insert((0.0, false, false));
            entry.0 += KEYWORD_WEIGHT * score;
            entry.2 = true;
        }

        if merged.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = merged.keys().copied().collect();
        let items = self.get_items(&ids)?;
        let now = chrono::Utc::now();

        let mut hits: Vec<SearchHit> = items
            .into_iter()
            .filter_map(|item| {
                let (base, from_vec, from_kw) = *merged.get(&item.id)?;
                let score = base * salience_boost(&item, now);
                let match_source = match (from_vec, from_kw) {
                    (true, true) => MatchSource::Hybrid,
                    (true, false) => MatchSource::Vector,
                    _ => MatchSource::Keyword,
                };
                Some(SearchHit {
                    item,
                    score,
                    match_source,
                })
            })
            .filter(|h| h.score >= min_score)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Vector phase: embed the query (cached by content hash), brute-force
    /// cosine over the project's cached vectors, min-max normalized
    /// similarity `1 - d/2`. Empty without an embedding provider.
    async fn vector_phase(
        &self,
        query: &str,
        project_path: &str,
        pool: usize,
    ) -> Result<Vec<(i64, f64)>> {
        let Some(embedder) = self.embedder.clone() else {
            return Ok(Vec::new());
        };

        let query_vec = match self.query_embedding(&embedder, query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed, vector phase skipped");
                return Ok(Vec::new());
            }
        };

        let rows: Vec<(i64, Vec<u8>)> = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(
                "SELECT m.id, e.embedding
                 FROM memory_items m
                 JOIN embedding_cache e ON e.content_hash = m.content_hash
                 WHERE m.project_path = ?1",
            )?;
            let mapped = stmt.query_map([project_path], |row| Ok((row.get(0)?, row.get(1)?)))?;
            mapped.filter_map(|r| r.ok()).collect()
        };

        let mut scored: Vec<(i64, f32)> = rows
            .into_iter()
            .map(|(id, blob)| {
                let v = db::blob_to_vec(&blob);
                (id, cosine_distance(&query_vec, &v))
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(pool);

        // distance -> similarity, then min-max normalize across candidates.
        let sims: Vec<(i64, f64)> = scored
            .into_iter()
            .map(|(id, d)| (id, 1.0 - (d as f64) / 2.0))
            .collect();
        Ok(min_max_normalize(sims))
    }

    async fn query_embedding(
        &self,
        embedder: &Arc<dyn EmbeddingProvider>,
        query: &str,
    ) -> Result<Vec<f32>> {
        let hash = content_hash(query);
        {
            let db = self.db.lock().unwrap();
            let cached: Option<Vec<u8>> = db
                .query_row(
                    "SELECT embedding FROM embedding_cache WHERE content_hash = ?1",
                    [&hash],
                    |row| row.get(0),
                )
                .ok();
            if let Some(blob) = cached {
                return Ok(db::blob_to_vec(&blob));
            }
        }

        let vectors = embedder
            .embed(std::slice::from_ref(&query.to_string()))
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::Embedding("empty embed response".into()))?;

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO embedding_cache
             (content_hash, embedding, model, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                hash,
                db::vec_to_blob(&vector),
                embedder.model(),
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(vector)
    }

    /// Keyword phase: sanitized FTS5 MATCH with BM25 rank, min-max
    /// normalized. Empty when FTS is unavailable or no usable terms remain.
    fn keyword_phase(
        &self,
        query: &str,
        project_path: &str,
        pool: usize,
    ) -> Result<Vec<(i64, f64)>> {
        if !self.caps.fts {
            return Ok(Vec::new());
        }
        let Some(match_expr) = sanitize_fts_query(query) else {
            return Ok(Vec::new());
        };

        let ranked: Vec<(i64, f64)> = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(
                "SELECT m.id, rank
                 FROM memory_fts
                 JOIN memory_items m ON m.id = memory_fts.rowid
                 WHERE memory_fts MATCH ?1 AND m.project_path = ?2
                 ORDER BY rank
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![match_expr, project_path, pool as i64],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)),
            )?;
            rows.filter_map(|r| r.ok()).collect()
        };

        // BM25 rank: lower (more negative) is better. Flip via min-max so the
        // best rank maps to 1.0.
        if ranked.is_empty() {
            return Ok(Vec::new());
        }
        let flipped: Vec<(i64, f64)> = ranked.iter().map(|(id, r)| (*id, -r)).collect();
        Ok(min_max_normalize(flipped))
    }

    fn get_items(&self, ids: &[i64]) -> Result<Vec<MemoryItem>> {
        let db = self.db.lock().unwrap();
        let mut out = Vec::with_capacity(ids.len());
        let mut stmt = db.prepare(
            "SELECT id, type, content, content_hash, source, source_id,
                    project_path, created_by, created_at,
                    reinforcement_count, last_reinforced_at
             FROM memory_items WHERE id = ?1",
        )?;
        for id in ids {
            if let Ok(item) = stmt.query_row([id], row_to_item) {
                out.push(item);
            }
        }
        Ok(out)
    }

    /// All items of one type, ascending by creation time (export order).
    pub fn list_by_type(&self, item_type: MemoryType) -> Result<Vec<MemoryItem>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, type, content, content_hash, source, source_id,
                    project_path, created_by, created_at,
                    reinforcement_count, last_reinforced_at
             FROM memory_items WHERE type = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([item_type.to_string()], row_to_item)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Per-type counts with up to three most-recent previews — the compact
    /// overview embedded into the dispatcher prompt.
    pub fn get_index(&self, project_path: &str) -> Result<MemoryIndex> {
        let db = self.db.lock().unwrap();
        let mut entries = Vec::new();

        for item_type in MemoryType::ALL {
            let count: i64 = db.query_row(
                "SELECT COUNT(*) FROM memory_items
                 WHERE type = ?1 AND project_path = ?2",
                rusqlite::params![item_type.to_string(), project_path],
                |row| row.get(0),
            )?;
            if count == 0 {
                continue;
            }

            let mut stmt = db.prepare(
                "SELECT id, content, created_at, created_by
                 FROM memory_items
                 WHERE type = ?1 AND project_path = ?2
                 ORDER BY created_at DESC LIMIT 3",
            )?;
            let recent = stmt
                .query_map(rusqlite::params![item_type.to_string(), project_path], |row| {
                    let content: String = row.get(1)?;
                    Ok(MemoryPreview {
                        id: row.get(0)?,
                        preview: preview_of(&content),
                        created_at: row.get(2)?,
                        created_by: row.get(3)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();

            entries.push(MemoryIndexEntry {
                item_type,
                count,
                recent,
            });
        }

        Ok(MemoryIndex { entries })
    }

    /// Fetch one item by id.
    pub fn get_item(&self, id: i64) -> Result<MemoryItem> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, type, content, content_hash, source, source_id,
                    project_path, created_by, created_at,
                    reinforcement_count, last_reinforced_at
             FROM memory_items WHERE id = ?1",
            [id],
            row_to_item,
        )
        .map_err(|_| MemoryError::NotFound { id })
    }
}

/// `score · log(1+count) · exp(−ln2 · days/30)` on the freshest timestamp.
fn salience_boost(item: &MemoryItem, now: chrono::DateTime<chrono::Utc>) -> f64 {
    let reference = item
        .last_reinforced_at
        .as_deref()
        .unwrap_or(&item.created_at);
    let days = chrono::DateTime::parse_from_rfc3339(reference)
        .map(|t| {
            let secs = now.signed_duration_since(t.with_timezone(&chrono::Utc)).num_seconds();
            (secs.max(0) as f64) / 86_400.0
        })
        .unwrap_or(0.0);

    let count_factor = (1.0 + item.reinforcement_count as f64).ln();
    let decay = (-std::f64::consts::LN_2 * days / SALIENCE_HALF_LIFE_DAYS).exp();
    count_factor * decay
}

/// Min-max normalize scores to [0, 1]. A single candidate (or a flat set)
/// normalizes to 1.0.
fn min_max_normalize(scores: Vec<(i64, f64)>) -> Vec<(i64, f64)> {
    if scores.is_empty() {
        return scores;
    }
    let min = scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = scores.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return scores.into_iter().map(|(id, _)| (id, 1.0)).collect();
    }
    scores
        .into_iter()
        .map(|(id, s)| (id, (s - min) / (max - min)))
        .collect()
}

/// Reduce a free-text query to quoted alphanumeric/CJK word runs joined with
/// OR. Returns None when nothing searchable remains.
fn sanitize_fts_query(query: &str) -> Option<String> {
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"", w))
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" OR "))
    }
}

fn preview_of(content: &str) -> String {
    const PREVIEW_CHARS: usize = 80;
    let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryItem> {
    let type_str: String = row.get(1)?;
    let source_str: String = row.get(4)?;
    Ok(MemoryItem {
        id: row.get(0)?,
        item_type: type_str.parse().unwrap_or(MemoryType::Context),
        content: row.get(2)?,
        content_hash: row.get(3)?,
        source: source_str.parse().unwrap_or(MemorySource::Manual),
        source_id: row.get(5)?,
        project_path: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
        reinforcement_count: row.get(9)?,
        last_reinforced_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use opsforge_provider::provider::ProviderError;

    fn engine() -> Arc<MemoryEngine> {
        let conn = Connection::open_in_memory().unwrap();
        Arc::new(MemoryEngine::new(conn, None).unwrap())
    }

    fn item(content: &str) -> NewMemoryItem {
        NewMemoryItem {
            item_type: MemoryType::Decision,
            content: content.to_string(),
            source: MemorySource::Manual,
            source_id: None,
            project_path: "/proj/foo".to_string(),
            created_by: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_inserts_reinforce() {
        let engine = engine();
        let first = engine
            .add_item(item("Use Postgres for the user service."))
            .unwrap();
        assert_eq!(first.action, AddAction::Inserted);

        for _ in 0..4 {
            let again = engine
                .add_item(item("Use Postgres for the user service."))
                .unwrap();
            assert_eq!(again.action, AddAction::Reinforced);
            assert_eq!(again.id, first.id);
        }

        let stored = engine.get_item(first.id).unwrap();
        assert_eq!(stored.reinforcement_count, 5);
        assert!(stored.last_reinforced_at.is_some());
    }

    #[tokio::test]
    async fn whitespace_and_case_variants_reinforce_same_row() {
        let engine = engine();
        let a = engine.add_item(item("Adopt  Redis as cache")).unwrap();
        let b = engine.add_item(item("  adopt redis AS cache ")).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.action, AddAction::Reinforced);
    }

    #[tokio::test]
    async fn same_content_different_project_gets_own_row() {
        let engine = engine();
        let a = engine.add_item(item("shared decision")).unwrap();
        let mut other = item("shared decision");
        other.project_path = "/proj/bar".to_string();
        let b = engine.add_item(other).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.action, AddAction::Inserted);
    }

    #[tokio::test]
    async fn keyword_search_without_embedder() {
        let engine = engine();
        engine.add_item(item("Adopted Redis as cache layer.")).unwrap();
        engine.add_item(item("Postgres chosen for storage.")).unwrap();

        let hits = engine.search("cache layer", "/proj/foo", 3, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].match_source, MatchSource::Keyword);
        assert!(hits[0].item.content.contains("Redis"));
    }

    #[tokio::test]
    async fn empty_query_terms_yield_no_keyword_hits() {
        let engine = engine();
        engine.add_item(item("something indexed")).unwrap();
        let hits = engine.search("!!! ...", "/proj/foo", 3, 0.0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_respects_min_score() {
        let engine = engine();
        engine.add_item(item("Adopted Redis as cache layer.")).unwrap();
        let hits = engine
            .search("cache", "/proj/foo", 3, f64::INFINITY)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn reinforced_items_outrank_stale_ones() {
        let engine = engine();
        let a = engine.add_item(item("Adopted Redis as cache layer.")).unwrap();
        for _ in 0..4 {
            engine.add_item(item("Adopted Redis as cache layer.")).unwrap();
        }
        let b = engine
            .add_item(item("Considered memcached for the cache."))
            .unwrap();

        // Age B's timestamps by 60 days.
        let old = (chrono::Utc::now() - chrono::Duration::days(60)).to_rfc3339();
        {
            let db = engine.db.lock().unwrap();
            db.execute(
                "UPDATE memory_items SET created_at = ?1, last_reinforced_at = ?1 WHERE id = ?2",
                rusqlite::params![old, b.id],
            )
            .unwrap();
        }

        let hits = engine.search("cache layer", "/proj/foo", 3, 0.0).await.unwrap();
        assert!(hits.len() >= 2);
        assert_eq!(hits[0].item.id, a.id, "fresh reinforced item should rank first");
    }

    #[tokio::test]
    async fn index_counts_and_previews() {
        let engine = engine();
        engine.add_item(item("first decision")).unwrap();
        engine.add_item(item("second decision")).unwrap();
        let mut pref = item("prefers tabs");
        pref.item_type = MemoryType::Preference;
        engine.add_item(pref).unwrap();

        let index = engine.get_index("/proj/foo").unwrap();
        let decisions = index
            .entries
            .iter()
            .find(|e| e.item_type == MemoryType::Decision)
            .unwrap();
        assert_eq!(decisions.count, 2);
        assert!(decisions.recent.len() <= 3);
        assert!(decisions.recent[0].preview.len() <= 83); // 80 chars + ellipsis bytes
    }

    #[test]
    fn sanitize_quotes_and_joins() {
        assert_eq!(
            sanitize_fts_query("cache layer").unwrap(),
            "\"cache\" OR \"layer\""
        );
        assert_eq!(sanitize_fts_query("fix-login (now!)").unwrap(), "\"fix\" OR \"login\" OR \"now\"");
        assert!(sanitize_fts_query("!!! ???").is_none());
    }

    #[test]
    fn sanitize_keeps_cjk_runs() {
        let q = sanitize_fts_query("缓存 layer").unwrap();
        assert!(q.contains("\"缓存\""));
        assert!(q.contains("\"layer\""));
    }

    #[test]
    fn min_max_flat_set_normalizes_to_one() {
        let out = min_max_normalize(vec![(1, 0.4), (2, 0.4)]);
        assert!(out.iter().all(|(_, s)| (*s - 1.0).abs() < f64::EPSILON));
    }

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        fn model(&self) -> &str {
            "stub-768"
        }
        fn dimension(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            // Toy semantic space: "cache"-ish content points one way,
            // everything else another.
            Ok(texts
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("cache") {
                        vec![1.0, 0.0, 0.0]
                    } else {
                        vec![0.0, 1.0, 0.0]
                    }
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn hybrid_match_source_when_both_phases_hit() {
        let conn = Connection::open_in_memory().unwrap();
        let engine = Arc::new(MemoryEngine::new(conn, Some(Arc::new(StubEmbedder))).unwrap());

        engine.add_item(item("Adopted Redis as cache layer.")).unwrap();
        engine.add_item(item("Postgres chosen for storage.")).unwrap();
        // Let the spawned embedding tasks land, then backfill any stragglers.
        tokio::task::yield_now().await;
        engine.backfill_embeddings().await.unwrap();

        let hits = engine.search("cache layer", "/proj/foo", 3, 0.0).await.unwrap();
        let top = &hits[0];
        assert!(top.item.content.contains("Redis"));
        assert_eq!(top.match_source, MatchSource::Hybrid);
    }

    #[tokio::test]
    async fn vector_only_results_when_keywords_miss() {
        let conn = Connection::open_in_memory().unwrap();
        let engine = Arc::new(MemoryEngine::new(conn, Some(Arc::new(StubEmbedder))).unwrap());
        engine.add_item(item("Adopted Redis as cache layer.")).unwrap();
        engine.backfill_embeddings().await.unwrap();

        // No keyword overlap with stored content, but the stub embedder
        // still places the query near the cache item.
        let hits = engine.search("caches", "/proj/foo", 3, 0.0).await.unwrap();
        assert!(!hits.is_empty());
    }
}
