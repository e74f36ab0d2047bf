//! JSONL export views — one file per memory type, regenerated on a 5 s
//! debounce after any mutation. The executor browses these with `read_file`;
//! they are never read back by the engine itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::MemoryEngine;
use crate::error::Result;
use crate::types::MemoryType;

const EXPORT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Regenerate every per-type export file from current DB contents.
/// A pure function of the database at call time.
pub fn export_all(engine: &MemoryEngine, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    for item_type in MemoryType::ALL {
        let items = engine.list_by_type(item_type)?;
        let path = dir.join(format!("{}.jsonl", item_type));
        let mut out = String::new();
        for item in &items {
            out.push_str(&serde_json::to_string(item)?);
            out.push('\n');
        }
        std::fs::write(&path, out)?;
    }
    debug!(dir = %dir.display(), "memory export views regenerated");
    Ok(())
}

/// Long-running loop: waits for a mutation signal, debounces, exports.
/// Spawn once at startup; exits when the engine is dropped by the caller
/// holding the only other Arc (the loop keeps its own).
pub fn spawn_export_loop(engine: Arc<MemoryEngine>, dir: impl Into<PathBuf>) {
    let dir = dir.into();
    tokio::spawn(async move {
        loop {
            engine.mutation_signal().await;
            tokio::time::sleep(EXPORT_DEBOUNCE).await;
            if let Err(e) = export_all(&engine, &dir) {
                warn!(error = %e, "memory export failed");
            }
        }
    });
}
