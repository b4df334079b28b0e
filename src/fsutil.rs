//! Shared filesystem helpers: atomic whole-file rewrite and append-only
//! writes, used by every component that owns an on-disk artifact.

use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Writes to a sibling `<path>.tmp-<pid>` file, flushes it, then renames
/// over the target. A reader never observes a partially written file.
pub async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    write_bytes_atomic(path, &bytes).await
}

/// Atomically replace `path` with `bytes`.
pub async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension(format!(
        "tmp-{}",
        std::process::id()
    ));
    {
        let mut f = fs::File::create(&tmp_path).await?;
        f.write_all(bytes).await?;
        f.sync_all().await?;
    }
    fs::rename(&tmp_path, path).await
}

/// Append a single line (newline appended) to `path`, creating it and any
/// parent directories if necessary. Used for NDJSON / log files that are
/// never rewritten wholesale.
pub async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    f.write_all(line.as_bytes()).await?;
    f.write_all(b"\n").await?;
    Ok(())
}

/// Read a file's entire contents as a string, returning `None` if the file
/// does not exist. Other I/O errors propagate.
pub async fn read_to_string_opt(path: &Path) -> std::io::Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
