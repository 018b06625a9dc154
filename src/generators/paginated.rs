//! Paginated-document generator (spec §4.2): a title page with a "Report"
//! heading, then one text line per row of the form `<index>. <JSON(row)>`.
//! If `documentMaxRows` is set and exceeded, the generator fails with
//! `DocumentRowLimitExceeded` and destroys the stream — no bytes are sent.

use super::{spawn_byte_stream, GeneratedStream, RowStream, StreamOptions};
use crate::error::EngineError;
use bytes::Bytes;
use futures::StreamExt;
use printpdf::{BuiltinFont, Mm, PdfDocument};
use std::io::Cursor;

const PAGE_WIDTH_MM: f64 = 210.0;
const PAGE_HEIGHT_MM: f64 = 297.0;
const TOP_MARGIN_MM: f64 = 280.0;
const BOTTOM_MARGIN_MM: f64 = 15.0;
const LINE_HEIGHT_MM: f64 = 7.0;
const BODY_FONT_SIZE: f64 = 10.0;
const TITLE_FONT_SIZE: f64 = 24.0;

pub fn generate(rows: RowStream, opts: StreamOptions) -> GeneratedStream {
    let body = spawn_byte_stream(move |tx| async move {
        if let Err(err) = run(rows, opts, &tx).await {
            let _ = tx.send(Err(err)).await;
        }
    });

    GeneratedStream {
        content_type: "application/pdf",
        extension: "pdf",
        body,
    }
}

async fn run(
    mut rows: RowStream,
    opts: StreamOptions,
    tx: &tokio::sync::mpsc::Sender<Result<Bytes, EngineError>>,
) -> Result<(), EngineError> {
    let (doc, page1, layer1) =
        PdfDocument::new("Report", Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_err)?;

    let mut current_layer = doc.get_page(page1).get_layer(layer1);
    current_layer.use_text("Report", TITLE_FONT_SIZE, Mm(10.0), Mm(TOP_MARGIN_MM), &font);

    let mut y = TOP_MARGIN_MM - LINE_HEIGHT_MM * 2.0;
    let mut row_count: usize = 0;

    while let Some(row) = rows.next().await {
        let row = row?;
        row_count += 1;

        if let Some(max_rows) = opts.document_max_rows {
            if row_count > max_rows {
                // Destroy the partial document: no bytes are ever sent.
                return Err(EngineError::DocumentRowLimitExceeded { max_rows });
            }
        }

        if y < BOTTOM_MARGIN_MM {
            let (page, layer) = doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
            current_layer = doc.get_page(page).get_layer(layer);
            y = TOP_MARGIN_MM;
        }

        let line = format!(
            "{}. {}",
            row_count,
            serde_json::to_string(&row).unwrap_or_default()
        );
        current_layer.use_text(line, BODY_FONT_SIZE, Mm(10.0), Mm(y), &font);
        y -= LINE_HEIGHT_MM;
    }

    let mut buffer = Vec::new();
    doc.save(&mut Cursor::new(&mut buffer)).map_err(pdf_err)?;

    for chunk in buffer.chunks(opts.buffer_bytes.max(1)) {
        if tx.send(Ok(Bytes::copy_from_slice(chunk))).await.is_err() {
            break;
        }
    }

    Ok(())
}

fn pdf_err(err: impl std::fmt::Display) -> EngineError {
    EngineError::Internal {
        message: format!("document generation failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Row;
    use futures::stream;
    use serde_json::json;

    fn row(status: &str) -> Row {
        let mut m = Row::new();
        m.insert("status".to_string(), json!(status));
        m
    }

    #[tokio::test]
    async fn produces_a_pdf_when_under_the_row_limit() {
        let rows = vec![Ok(row("paid")), Ok(row("pending"))];
        let stream: RowStream = Box::pin(stream::iter(rows));
        let opts = StreamOptions {
            document_max_rows: Some(10),
            ..StreamOptions::default()
        };
        let generated = generate(stream, opts);
        let bytes: Vec<Bytes> = generated.body.collect::<Vec<_>>().await.into_iter()
            .map(|r| r.unwrap())
            .collect();
        let all: Vec<u8> = bytes.into_iter().flat_map(|b| b.to_vec()).collect();
        assert!(all.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn fails_with_document_row_limit_exceeded_and_emits_no_bytes() {
        let rows = vec![Ok(row("a")), Ok(row("b"))];
        let stream: RowStream = Box::pin(stream::iter(rows));
        let opts = StreamOptions {
            document_max_rows: Some(1),
            ..StreamOptions::default()
        };
        let generated = generate(stream, opts);
        let results: Vec<Result<Bytes, EngineError>> = generated.body.collect().await;
        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(EngineError::DocumentRowLimitExceeded { max_rows }) => assert_eq!(*max_rows, 1),
            other => panic!("expected DocumentRowLimitExceeded, got {other:?}"),
        }
    }
}
