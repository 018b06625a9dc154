//! Archive generator (spec §4.2): concatenates an ordered list of named
//! entry streams into a ZIP archive (deflate level 9), produced
//! streamingly — each entry's bytes are appended to the archive as they
//! arrive rather than buffered up front. Errors on any input stream
//! propagate and destroy the archive output.
//!
//! `zip::ZipWriter` is a synchronous `Write`-based API, so the writer runs
//! on a blocking task (`spawn_blocking`) while the async side feeds it
//! entry bytes and drains its output through a pair of bounded Tokio
//! channels using `blocking_send`/`blocking_recv` — the same bridging
//! pattern the teacher's services use when wrapping a sync SDK call inside
//! an async handler.

use super::{ByteStream, GeneratedStream, StreamOptions};
use crate::error::EngineError;
use bytes::Bytes;
use futures::StreamExt;
use std::io::Write;
use zip::write::FileOptions;
use zip::ZipWriter;

pub struct ArchiveEntry {
    pub name: String,
    pub body: ByteStream,
}

enum ZipCmd {
    StartEntry(String),
    Chunk(Bytes),
    Finish,
    Abort(EngineError),
}

pub fn generate_archive(entries: Vec<ArchiveEntry>, opts: StreamOptions) -> GeneratedStream {
    let (out_tx, out_rx) = tokio::sync::mpsc::channel::<Result<Bytes, EngineError>>(16);
    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::channel::<ZipCmd>(16);

    let buffer_bytes = opts.buffer_bytes.max(1);
    let writer_out_tx = out_tx.clone();
    tokio::task::spawn_blocking(move || run_zip_writer(cmd_rx, writer_out_tx, buffer_bytes));

    tokio::spawn(async move {
        for entry in entries {
            if cmd_tx
                .send(ZipCmd::StartEntry(entry.name.clone()))
                .await
                .is_err()
            {
                return;
            }

            let mut body = entry.body;
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        if cmd_tx.send(ZipCmd::Chunk(bytes)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = cmd_tx.send(ZipCmd::Abort(err)).await;
                        return;
                    }
                }
            }
        }
        let _ = cmd_tx.send(ZipCmd::Finish).await;
    });

    GeneratedStream {
        content_type: "application/zip",
        extension: "zip",
        body: Box::pin(tokio_stream::wrappers::ReceiverStream::new(out_rx)),
    }
}

/// Runs on a blocking thread: owns the (synchronous) `ZipWriter` and
/// forwards its compressed output to `out_tx` in `buffer_bytes`-sized
/// chunks.
fn run_zip_writer(
    mut cmd_rx: tokio::sync::mpsc::Receiver<ZipCmd>,
    out_tx: tokio::sync::mpsc::Sender<Result<Bytes, EngineError>>,
    buffer_bytes: usize,
) {
    let writer = ChannelWriter {
        buf: Vec::with_capacity(buffer_bytes),
        out_tx: out_tx.clone(),
        threshold: buffer_bytes,
    };
    let mut zip = ZipWriter::new(writer);
    let options: FileOptions =
        FileOptions::default().compression_method(zip::CompressionMethod::Deflated).compression_level(Some(9));

    loop {
        match cmd_rx.blocking_recv() {
            Some(ZipCmd::StartEntry(name)) => {
                if let Err(err) = zip.start_file(name, options) {
                    let _ = out_tx.blocking_send(Err(EngineError::from(err)));
                    return;
                }
            }
            Some(ZipCmd::Chunk(bytes)) => {
                if let Err(err) = zip.write_all(&bytes) {
                    let _ = out_tx.blocking_send(Err(EngineError::from(err)));
                    return;
                }
            }
            Some(ZipCmd::Abort(err)) => {
                let _ = out_tx.blocking_send(Err(err));
                return;
            }
            Some(ZipCmd::Finish) => {
                match zip.finish() {
                    Ok(mut writer) => writer.flush_remaining(),
                    Err(err) => {
                        let _ = out_tx.blocking_send(Err(EngineError::from(err)));
                    }
                }
                return;
            }
            None => return,
        }
    }
}

struct ChannelWriter {
    buf: Vec<u8>,
    out_tx: tokio::sync::mpsc::Sender<Result<Bytes, EngineError>>,
    threshold: usize,
}

impl ChannelWriter {
    fn flush_remaining(&mut self) {
        if !self.buf.is_empty() {
            let chunk = std::mem::take(&mut self.buf);
            let _ = self.out_tx.blocking_send(Ok(Bytes::from(chunk)));
        }
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= self.threshold {
            let chunk = std::mem::take(&mut self.buf);
            if self.out_tx.blocking_send(Ok(Bytes::from(chunk))).is_err() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "archive output receiver dropped",
                ));
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn byte_stream(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    #[tokio::test]
    async fn produces_a_zip_with_entry_names_in_order() {
        let entries = vec![
            ArchiveEntry {
                name: "report.csv".to_string(),
                body: byte_stream(vec![b"status\npaid\n"]),
            },
            ArchiveEntry {
                name: "report.json".to_string(),
                body: byte_stream(vec![b"[{\"status\":\"paid\"}]"]),
            },
        ];

        let generated = generate_archive(entries, StreamOptions::default());
        let bytes: Vec<Bytes> = generated
            .body
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let all: Vec<u8> = bytes.into_iter().flat_map(|b| b.to_vec()).collect();

        assert_eq!(&all[0..4], b"PK\x03\x04");
        let haystack = String::from_utf8_lossy(&all);
        assert!(haystack.contains("report.csv"));
        assert!(haystack.contains("report.json"));
    }

    #[tokio::test]
    async fn propagates_entry_errors_and_destroys_output() {
        let failing: ByteStream = Box::pin(stream::iter(vec![Err(EngineError::Internal {
            message: "boom".to_string(),
        })]));
        let entries = vec![ArchiveEntry {
            name: "report.csv".to_string(),
            body: failing,
        }];

        let generated = generate_archive(entries, StreamOptions::default());
        let results: Vec<_> = generated.body.collect().await;
        assert!(results.iter().any(|r| r.is_err()));
    }
}
