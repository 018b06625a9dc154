//! Spreadsheet generator (spec §4.2): a single-worksheet workbook, header
//! from the first row's keys, each subsequent row appended incrementally.
//!
//! `rust_xlsxwriter` builds its worksheet in memory as rows are appended
//! (no full-row-set Vec is ever held by this module — each row is written
//! directly into the worksheet and dropped) and only serializes the
//! zip/XML container once, at `save_to_buffer`, since the OOXML format's
//! central directory cannot be written before the last row is known. That
//! single buffer is then chunked out at `StreamOptions::buffer_bytes`
//! boundaries like the other generators.

use super::{spawn_byte_stream, GeneratedStream, HeaderState, RowStream, StreamOptions};
use crate::error::EngineError;
use bytes::Bytes;
use futures::StreamExt;
use rust_xlsxwriter::{Workbook, Worksheet};
use serde_json::Value;

pub fn generate(rows: RowStream, opts: StreamOptions) -> GeneratedStream {
    let body = spawn_byte_stream(move |tx| async move {
        if let Err(err) = run(rows, opts, &tx).await {
            let _ = tx.send(Err(err)).await;
        }
    });

    GeneratedStream {
        content_type: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        extension: "xlsx",
        body,
    }
}

async fn run(
    mut rows: RowStream,
    opts: StreamOptions,
    tx: &tokio::sync::mpsc::Sender<Result<Bytes, EngineError>>,
) -> Result<(), EngineError> {
    let mut worksheet = Worksheet::new();
    let mut header = HeaderState::new();
    let mut row_idx: u32 = 0;

    while let Some(row) = rows.next().await {
        let row = row?;
        let columns = header.observe(&row).to_vec();

        if row_idx == 0 {
            for (col_idx, col) in columns.iter().enumerate() {
                worksheet
                    .write(0, col_idx as u16, col.as_str())
                    .map_err(xlsx_err)?;
            }
            row_idx = 1;
        }

        for (col_idx, col) in columns.iter().enumerate() {
            write_cell(&mut worksheet, row_idx, col_idx as u16, row.get(col))?;
        }
        row_idx += 1;
    }

    let mut workbook = Workbook::new();
    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer().map_err(xlsx_err)?;

    for chunk in buffer.chunks(opts.buffer_bytes.max(1)) {
        if tx.send(Ok(Bytes::copy_from_slice(chunk))).await.is_err() {
            break;
        }
    }

    Ok(())
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: Option<&Value>,
) -> Result<(), EngineError> {
    match value {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(s)) => worksheet.write(row, col, s.as_str()).map(|_| ()).map_err(xlsx_err),
        Some(Value::Bool(b)) => worksheet.write(row, col, *b).map(|_| ()).map_err(xlsx_err),
        Some(Value::Number(n)) => {
            if let Some(f) = n.as_f64() {
                worksheet.write(row, col, f).map(|_| ()).map_err(xlsx_err)
            } else {
                worksheet
                    .write(row, col, n.to_string().as_str())
                    .map(|_| ())
                    .map_err(xlsx_err)
            }
        }
        Some(other) => worksheet
            .write(row, col, other.to_string().as_str())
            .map(|_| ())
            .map_err(xlsx_err),
    }
}

fn xlsx_err(err: rust_xlsxwriter::XlsxError) -> EngineError {
    EngineError::Internal {
        message: format!("spreadsheet generation failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Row;
    use futures::stream;
    use serde_json::json;

    #[tokio::test]
    async fn produces_a_non_empty_xlsx_zip_container() {
        let mut r1 = Row::new();
        r1.insert("status".to_string(), json!("paid"));
        r1.insert("amount".to_string(), json!(10));

        let stream: RowStream = Box::pin(stream::iter(vec![Ok(r1)]));
        let generated = generate(stream, StreamOptions::default());
        let bytes: Vec<Bytes> = generated.body.map(|r| r.unwrap()).collect::<Vec<_>>().await;
        let all: Vec<u8> = bytes.into_iter().flat_map(|b| b.to_vec()).collect();
        // xlsx is a zip container; the local file header magic is "PK\x03\x04".
        assert_eq!(&all[0..4], b"PK\x03\x04");
    }
}
