//! NDJSON snapshot contract (spec §4.4.1), used by the archive-snapshot
//! processing plan: a single raw cursor is spilled to a temp file so each
//! included sub-format can read it back independently without re-querying
//! the source collection.

use crate::error::EngineError;
use crate::generators::RowStream;
use crate::model::Row;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

pub struct SnapshotResult {
    pub path: PathBuf,
    pub row_count: u64,
    pub bytes: u64,
}

/// Writes `rows` to `<dir>/<name>` as newline-delimited JSON, one row per
/// line. Aborts with `SnapshotSizeExceeded` the instant cumulative bytes
/// would exceed `max_bytes`, deleting the partial file before returning.
pub async fn write_snapshot(
    mut rows: RowStream,
    dir: &Path,
    name: &str,
    max_bytes: u64,
    buffer_bytes: usize,
) -> Result<SnapshotResult, EngineError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);

    let file = tokio::fs::File::create(&path).await?;
    let mut writer = BufWriter::with_capacity(buffer_bytes.max(4096), file);

    let mut row_count: u64 = 0;
    let mut bytes: u64 = 0;

    let result = async {
        while let Some(row) = rows.next().await {
            let row = row?;
            let mut line = serde_json::to_vec(&row)?;
            line.push(b'\n');

            let next_total = bytes + line.len() as u64;
            if next_total > max_bytes {
                return Err(EngineError::SnapshotSizeExceeded { max_bytes });
            }

            writer.write_all(&line).await?;
            bytes = next_total;
            row_count += 1;
        }
        writer.flush().await?;
        Ok(())
    }
    .await;

    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(err);
    }

    Ok(SnapshotResult {
        path,
        row_count,
        bytes,
    })
}

/// Reads back a snapshot as a lazy row stream, parsing one non-empty line
/// at a time; empty lines are skipped. Runs the file read on a spawned
/// task feeding a bounded channel, the same producer/consumer shape the
/// generators use for their byte streams.
pub fn snapshot_rows(path: PathBuf, buffer_bytes: usize) -> RowStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Row, EngineError>>(16);

    tokio::spawn(async move {
        let result: Result<(), EngineError> = async {
            let file = tokio::fs::File::open(&path).await?;
            let mut lines = BufReader::with_capacity(buffer_bytes.max(4096), file).lines();
            while let Some(line) = lines.next_line().await? {
                if line.is_empty() {
                    continue;
                }
                let row: Row = serde_json::from_str(&line)?;
                if tx.send(Ok(row)).await.is_err() {
                    return Ok(());
                }
            }
            Ok(())
        }
        .await;

        if let Err(err) = result {
            let _ = tx.send(Err(err)).await;
        }
    });

    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

/// Deletes the snapshot file unconditionally; failures are logged, not
/// raised, per spec §4.4 step 10.
pub async fn cleanup_snapshot(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = %err, path = %path.display(), "failed to delete report snapshot file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    fn row(status: &str) -> Row {
        let mut m = Row::new();
        m.insert("status".to_string(), json!(status));
        m
    }

    #[tokio::test]
    async fn round_trips_rows_through_the_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let rows: RowStream = Box::pin(stream::iter(vec![Ok(row("paid")), Ok(row("void"))]));

        let result = write_snapshot(rows, dir.path(), "snapshot.ndjson", 1024 * 1024, 4096)
            .await
            .unwrap();
        assert_eq!(result.row_count, 2);

        let mut read_back = snapshot_rows(result.path.clone(), 4096);
        let mut statuses = Vec::new();
        while let Some(row) = read_back.next().await {
            statuses.push(row.unwrap()["status"].as_str().unwrap().to_string());
        }
        assert_eq!(statuses, vec!["paid", "void"]);

        cleanup_snapshot(&result.path).await;
        assert!(!result.path.exists());
    }

    #[tokio::test]
    async fn aborts_and_deletes_the_partial_file_past_max_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let rows: RowStream = Box::pin(stream::iter(vec![
            Ok(row("paid")),
            Ok(row("void")),
            Ok(row("refunded")),
        ]));

        let err = write_snapshot(rows, dir.path(), "snapshot.ndjson", 20, 4096)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SnapshotSizeExceeded { .. }));
        assert!(!dir.path().join("snapshot.ndjson").exists());
    }
}
