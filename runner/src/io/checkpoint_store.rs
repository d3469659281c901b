//! Checkpoint persistence: atomic JSON read/write.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::checkpoint::Checkpoint;
use crate::core::clock::Clock;

/// Load the checkpoint, tolerating a missing file.
///
/// A missing file yields a fresh state; a file that exists but fails to parse
/// is fatal so state loss never goes unnoticed.
pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    if !path.exists() {
        debug!(path = %path.display(), "no checkpoint yet, starting fresh");
        return Ok(Checkpoint::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read checkpoint {}", path.display()))?;
    let checkpoint: Checkpoint = serde_json::from_str(&contents)
        .with_context(|| format!("corrupt checkpoint {} (inspect or remove it)", path.display()))?;
    debug!(
        done = checkpoint.done_task_ids.len(),
        blocked = checkpoint.blocked_task_ids.len(),
        "checkpoint loaded"
    );
    Ok(checkpoint)
}

/// Stamp `updated_at` and atomically write the checkpoint (temp file +
/// rename) so a crash mid-write never corrupts it.
pub fn save_checkpoint(path: &Path, checkpoint: &mut Checkpoint, clock: &dyn Clock) -> Result<()> {
    checkpoint.updated_at = clock.now().to_rfc3339();
    let mut buf = serde_json::to_string_pretty(checkpoint)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("checkpoint path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp checkpoint {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace checkpoint {}", path.display()))?;
    Ok(())
}
