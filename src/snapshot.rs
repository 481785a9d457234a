use std::path::Path;

use anyhow::{Context, Result};
use nanoid::nanoid;

use crate::data_models::IndexSnapshot;

/// Writes the snapshot as JSON next to `path` and renames it into place, so
/// a crash never leaves a half-written index behind.
pub async fn save(path: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    let json = serde_json::to_vec(snapshot).context("Failed to serialize index snapshot")?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index.json".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, nanoid!(8)));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&tmp, &json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(e).with_context(|| format!("Failed to move snapshot to {}", path.display()));
    }
    log::info!(
        "saved {} chunks to {}",
        snapshot.chunks.len(),
        path.display()
    );
    Ok(())
}

/// `Ok(None)` when there is no snapshot at `path` yet.
pub async fn load(path: &Path) -> Result<Option<IndexSnapshot>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)
        .with_context(|| format!("Malformed index snapshot at {}", path.display()))?;
    Ok(Some(snapshot))
}
