//! C2: Streaming Format Generators (spec §4.2).
//!
//! Each generator consumes a lazy, single-consumer `RowStream` exactly
//! once, in order, and produces a `GeneratedStream`: a tagged content type
//! plus a back-pressured byte stream. Per §9's design note the generator
//! family is a tagged variant, matched directly rather than dispatched
//! through a factory trait object.

mod archive;
mod delimited;
mod json_array;
mod paginated;
mod spreadsheet;

pub use archive::{generate_archive, ArchiveEntry};

use crate::error::EngineError;
use crate::model::Row;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;

pub type RowStream = Pin<Box<dyn Stream<Item = Result<Row, EngineError>> + Send>>;
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, EngineError>> + Send>>;

/// `{ bufferBytes, documentMaxRows }` (spec §4.2).
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub buffer_bytes: usize,
    pub document_max_rows: Option<usize>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            buffer_bytes: 64 * 1024,
            document_max_rows: None,
        }
    }
}

pub struct GeneratedStream {
    pub content_type: &'static str,
    pub extension: &'static str,
    pub body: ByteStream,
}

/// The single-format tagged variant (spec §9). `Archive` is handled
/// separately by `generate_archive`, which composes several of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleFormat {
    Delimited,
    StructuredObject,
    Spreadsheet,
    Paginated,
}

pub fn generate(format: SingleFormat, rows: RowStream, opts: StreamOptions) -> GeneratedStream {
    match format {
        SingleFormat::Delimited => delimited::generate(rows, opts),
        SingleFormat::StructuredObject => json_array::generate(rows, opts),
        SingleFormat::Spreadsheet => spreadsheet::generate(rows, opts),
        SingleFormat::Paginated => paginated::generate(rows, opts),
    }
}

/// Helper shared by the textual generators: spawn a task that drains
/// `rows` through `produce`, sending byte chunks into a bounded channel so
/// a slow downstream consumer (the storage upload) back-pressures a fast
/// producer, per §9's "size-bounded buffers, not unbounded queues".
pub(crate) fn spawn_byte_stream<F, Fut>(produce: F) -> ByteStream
where
    F: FnOnce(tokio::sync::mpsc::Sender<Result<Bytes, EngineError>>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        produce(tx).await;
    });
    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

/// Renders one row's first-row-derived header as a CSV/JSON-safe column
/// list. `None` until the first row has been observed.
pub(crate) struct HeaderState {
    pub columns: Option<Vec<String>>,
}

impl HeaderState {
    pub fn new() -> Self {
        Self { columns: None }
    }

    /// Observe a row; on the first call, captures its key order as the
    /// header. Subsequent rows with different key sets substitute missing
    /// values as empty (spec §4.2).
    pub fn observe(&mut self, row: &Row) -> &[String] {
        if self.columns.is_none() {
            self.columns = Some(row.keys().cloned().collect());
        }
        self.columns.as_deref().unwrap()
    }
}

pub(crate) fn row_value_or_null<'a>(row: &'a Row, key: &str) -> Option<&'a serde_json::Value> {
    row.get(key)
}

/// Drains a RowStream, collapsing it to `()` while propagating the first
/// error, used by generators that need to check `StreamExt::next` in a loop.
pub(crate) async fn next_row(
    rows: &mut RowStream,
) -> Option<Result<Row, EngineError>> {
    rows.next().await
}
