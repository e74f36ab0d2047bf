//! Append-only per-chat conversation logs, sharded by month.
//!
//! Shard key is the composite `<chat_id>_<YYYY-MM>` — one JSONL file per
//! shard under `conversations/`, plus `_state.json` recording how far the
//! extractor has consumed each shard. Appends hit an in-memory cache and a
//! pending batch that a single debounced writer flushes (~2 s).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{MemoryError, Result};
use crate::types::StoredChatMessage;

const FLUSH_DEBOUNCE: Duration = Duration::from_secs(2);
const STATE_FILE: &str = "_state.json";

pub struct ConversationLog {
    dir: PathBuf,
    /// Loaded shard contents, keyed by `<chat_id>_<YYYY-MM>`.
    shards: Mutex<HashMap<String, Vec<StoredChatMessage>>>,
    /// Messages appended but not yet written to disk.
    pending: Mutex<Vec<(String, StoredChatMessage)>>,
    /// Extraction watermark per shard.
    state: Mutex<HashMap<String, usize>>,
    /// At most one debounced flush outstanding.
    flush_scheduled: AtomicBool,
}

impl ConversationLog {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let state_path = dir.join(STATE_FILE);
        let state = if state_path.exists() {
            let raw = std::fs::read_to_string(&state_path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        Ok(Self {
            dir,
            shards: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            state: Mutex::new(state),
            flush_scheduled: AtomicBool::new(false),
        })
    }

    /// Shard key for a chat as of now.
    pub fn current_shard(chat_id: &str) -> String {
        format!("{}_{}", chat_id, chrono::Utc::now().format("%Y-%m"))
    }

    /// Append a message to the chat's current month shard. Disk write is
    /// debounced; the in-memory view is updated immediately.
    pub fn append(self: &Arc<Self>, chat_id: &str, msg: StoredChatMessage) {
        let shard = Self::current_shard(chat_id);
        self.ensure_loaded(&shard);

        {
            let mut shards = self.shards.lock().unwrap();
            shards.entry(shard.clone()).or_default().push(msg.clone());
        }
        {
            let mut pending = self.pending.lock().unwrap();
            pending.push((shard, msg));
        }

        self.schedule_flush();
    }

    /// Kick off the debounced flush task if none is outstanding.
    fn schedule_flush(self: &Arc<Self>) {
        if self
            .flush_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let log = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(FLUSH_DEBOUNCE).await;
            log.flush_scheduled.store(false, Ordering::SeqCst);
            if let Err(e) = log.flush_now() {
                warn!(error = %e, "conversation flush failed");
            }
        });
    }

    /// Write all pending messages to their shard files. Safe to call at any
    /// time (shutdown path does).
    pub fn flush_now(&self) -> Result<()> {
        use std::io::Write;

        let drained: Vec<(String, StoredChatMessage)> = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending)
        };
        if drained.is_empty() {
            return Ok(());
        }

        let mut grouped: HashMap<String, Vec<StoredChatMessage>> = HashMap::new();
        for (shard, msg) in drained {
            grouped.entry(shard).or_default().push(msg);
        }

        for (shard, messages) in grouped {
            let path = self.shard_path(&shard);
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            for msg in &messages {
                let line = serde_json::to_string(msg)?;
                writeln!(file, "{}", line)?;
            }
            debug!(shard = %shard, count = messages.len(), "conversation shard flushed");
        }

        Ok(())
    }

    /// Last `n` messages for a chat in chronological order, walking shards
    /// newest-first until enough are collected.
    pub fn get_recent_messages(&self, chat_id: &str, n: usize) -> Result<Vec<StoredChatMessage>> {
        let mut shard_keys = self.list_shards(chat_id)?;
        // Newest month first: the YYYY-MM suffix sorts lexicographically.
        shard_keys.sort();
        shard_keys.reverse();

        let mut collected: Vec<StoredChatMessage> = Vec::new();
        for shard in shard_keys {
            self.ensure_loaded(&shard);
            let shards = self.shards.lock().unwrap();
            if let Some(messages) = shards.get(&shard) {
                // Take from the end of this shard, newest first.
                for msg in messages.iter().rev() {
                    collected.push(msg.clone());
                    if collected.len() >= n {
                        break;
                    }
                }
            }
            if collected.len() >= n {
                break;
            }
        }

        collected.reverse();
        Ok(collected)
    }

    /// Total messages in the chat's current shard.
    pub fn message_count(&self, shard: &str) -> usize {
        self.ensure_loaded(shard);
        let shards = self.shards.lock().unwrap();
        shards.get(shard).map(|m| m.len()).unwrap_or(0)
    }

    /// Extraction watermark for a shard (0 when never extracted).
    pub fn extracted_up_to(&self, shard: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.get(shard).copied().unwrap_or(0)
    }

    /// Messages past the extraction watermark, with the current watermark.
    pub fn unextracted(&self, shard: &str) -> (usize, Vec<StoredChatMessage>) {
        self.ensure_loaded(shard);
        let up_to = self.extracted_up_to(shard);
        let shards = self.shards.lock().unwrap();
        let slice = shards
            .get(shard)
            .map(|m| m.get(up_to..).unwrap_or_default().to_vec())
            .unwrap_or_default();
        (up_to, slice)
    }

    /// Advance the extraction watermark. Rejects regressions and marks
    /// beyond the shard's message count.
    pub fn mark_extracted(&self, shard: &str, up_to: usize) -> Result<()> {
        let count = self.message_count(shard);
        let current = self.extracted_up_to(shard);
        if up_to <= current || up_to > count {
            return Err(MemoryError::StateRegression {
                shard: shard.to_string(),
                from: current,
                to: up_to,
            });
        }

        {
            let mut state = self.state.lock().unwrap();
            state.insert(shard.to_string(), up_to);
        }
        self.persist_state()
    }

    fn persist_state(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        let raw = serde_json::to_string_pretty(&*state)?;
        std::fs::write(self.dir.join(STATE_FILE), raw)?;
        Ok(())
    }

    fn shard_path(&self, shard: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", shard))
    }

    /// Load a shard file into the in-memory cache if not already there.
    fn ensure_loaded(&self, shard: &str) {
        {
            let shards = self.shards.lock().unwrap();
            if shards.contains_key(shard) {
                return;
            }
        }

        let path = self.shard_path(shard);
        let messages = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(raw) => raw
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .filter_map(|l| serde_json::from_str(l).ok())
                    .collect(),
                Err(e) => {
                    warn!(error = %e, shard = %shard, "failed to load conversation shard");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut shards = self.shards.lock().unwrap();
        shards.entry(shard.to_string()).or_insert(messages);
    }

    /// All shard keys for a chat, from cache and disk.
    fn list_shards(&self, chat_id: &str) -> Result<Vec<String>> {
        let prefix = format!("{}_", chat_id);
        let mut keys: Vec<String> = {
            let shards = self.shards.lock().unwrap();
            shards
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect()
        };

        if self.dir.exists() {
            for entry in std::fs::read_dir(&self.dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(stem) = name.strip_suffix(".jsonl") {
                    if stem.starts_with(&prefix) && !keys.iter().any(|k| k == stem) {
                        keys.push(stem.to_string());
                    }
                }
            }
        }

        Ok(keys)
    }
}

/// Helper for building a stored message stamped now.
pub fn chat_message(role: &str, content: &str, sender_name: &str) -> StoredChatMessage {
    StoredChatMessage {
        role: role.to_string(),
        content: content.to_string(),
        sender_name: sender_name.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> (tempfile::TempDir, Arc<ConversationLog>) {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ConversationLog::new(dir.path()).unwrap());
        (dir, log)
    }

    #[tokio::test]
    async fn append_and_recent_round_trip() {
        let (_dir, log) = log();
        for i in 0..5 {
            log.append("oc_chat1", chat_message("user", &format!("msg {i}"), "alice"));
        }
        let recent = log.get_recent_messages("oc_chat1", 3).unwrap();
        assert_eq!(recent.len(), 3);
        // Chronological order: oldest of the three first.
        assert_eq!(recent[0].content, "msg 2");
        assert_eq!(recent[2].content, "msg 4");
    }

    #[tokio::test]
    async fn flush_writes_jsonl_lines() {
        let (dir, log) = log();
        log.append("oc_chat1", chat_message("user", "hello", "alice"));
        log.append("oc_chat1", chat_message("assistant", "hi!", "bot"));
        log.flush_now().unwrap();

        let shard = ConversationLog::current_shard("oc_chat1");
        let raw = std::fs::read_to_string(dir.path().join(format!("{shard}.jsonl"))).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains("\"hello\""));
    }

    #[tokio::test]
    async fn reload_from_disk_after_flush() {
        let (dir, log) = log();
        log.append("oc_chat1", chat_message("user", "persisted", "alice"));
        log.flush_now().unwrap();
        drop(log);

        let reloaded = Arc::new(ConversationLog::new(dir.path()).unwrap());
        let recent = reloaded.get_recent_messages("oc_chat1", 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "persisted");
    }

    #[tokio::test]
    async fn extraction_watermark_is_monotonic() {
        let (_dir, log) = log();
        let shard = ConversationLog::current_shard("oc_chat1");
        for i in 0..6 {
            log.append("oc_chat1", chat_message("user", &format!("m{i}"), "alice"));
        }

        let (up_to, unseen) = log.unextracted(&shard);
        assert_eq!(up_to, 0);
        assert_eq!(unseen.len(), 6);

        log.mark_extracted(&shard, 6).unwrap();
        assert_eq!(log.extracted_up_to(&shard), 6);

        // Regression and overshoot both rejected.
        assert!(log.mark_extracted(&shard, 4).is_err());
        assert!(log.mark_extracted(&shard, 99).is_err());
    }

    #[tokio::test]
    async fn watermark_survives_reload() {
        let (dir, log) = log();
        let shard = ConversationLog::current_shard("oc_chat1");
        log.append("oc_chat1", chat_message("user", "a", "alice"));
        log.append("oc_chat1", chat_message("user", "b", "alice"));
        log.flush_now().unwrap();
        log.mark_extracted(&shard, 2).unwrap();
        drop(log);

        let reloaded = Arc::new(ConversationLog::new(dir.path()).unwrap());
        assert_eq!(reloaded.extracted_up_to(&shard), 2);
    }

    #[tokio::test]
    async fn chats_do_not_interleave() {
        let (_dir, log) = log();
        log.append("oc_a", chat_message("user", "for a", "alice"));
        log.append("oc_b", chat_message("user", "for b", "bob"));
        let a = log.get_recent_messages("oc_a", 10).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].content, "for a");
    }
}
