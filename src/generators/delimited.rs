//! Delimited (CSV) generator (spec §4.2).

use super::{spawn_byte_stream, GeneratedStream, HeaderState, RowStream, StreamOptions};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;

pub fn generate(rows: RowStream, opts: StreamOptions) -> GeneratedStream {
    let body = spawn_byte_stream(move |tx| async move {
        if let Err(err) = run(rows, opts, &tx).await {
            let _ = tx.send(Err(err)).await;
        }
    });

    GeneratedStream {
        content_type: "text/csv",
        extension: "csv",
        body,
    }
}

async fn run(
    mut rows: RowStream,
    opts: StreamOptions,
    tx: &tokio::sync::mpsc::Sender<Result<Bytes, crate::error::EngineError>>,
) -> Result<(), crate::error::EngineError> {
    let mut header = HeaderState::new();
    let mut buf = String::new();
    let mut header_written = false;

    while let Some(row) = rows.next().await {
        let row = row?;
        let columns = header.observe(&row).to_vec();

        if !header_written {
            buf.push_str(&columns.iter().map(|c| csv_escape(c)).collect::<Vec<_>>().join(","));
            buf.push('\n');
            header_written = true;
        }

        let mut first = true;
        for col in &columns {
            if !first {
                buf.push(',');
            }
            first = false;
            let rendered = render_value(row.get(col));
            buf.push_str(&csv_escape(&rendered));
        }
        buf.push('\n');

        if buf.len() >= opts.buffer_bytes {
            let chunk = std::mem::take(&mut buf);
            if tx.send(Ok(Bytes::from(chunk))).await.is_err() {
                return Ok(());
            }
        }
    }

    if !buf.is_empty() {
        let _ = tx.send(Ok(Bytes::from(buf))).await;
    }

    Ok(())
}

/// null/undefined -> empty; strings pass through; other values ->
/// JSON-serialized (timestamps have already been normalized to ISO-8601
/// strings upstream by C1, so they fall into the "strings pass through"
/// branch here).
fn render_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A value is quoted iff it contains `,`, `"`, or `\n`; embedded `"` is doubled.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Row;
    use futures::stream;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        let mut m = Row::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        m
    }

    async fn collect_body(rows: Vec<Row>, opts: StreamOptions) -> String {
        let stream: RowStream = Box::pin(stream::iter(rows.into_iter().map(Ok)));
        let generated = generate(stream, opts);
        let bytes: Vec<Bytes> = generated
            .body
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        bytes
            .into_iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn header_from_first_row_and_missing_fields_become_empty() {
        let rows = vec![
            row(&[("a", json!(1)), ("b", json!("x"))]),
            row(&[("a", json!(2))]),
        ];
        let body = collect_body(rows, StreamOptions::default()).await;
        let mut lines = body.lines();
        assert_eq!(lines.next().unwrap(), "a,b");
        assert_eq!(lines.next().unwrap(), "1,x");
        assert_eq!(lines.next().unwrap(), "2,");
    }

    #[tokio::test]
    async fn quotes_values_containing_comma_quote_or_newline() {
        let rows = vec![row(&[("a", json!("has,comma")), ("b", json!("has\"quote"))])];
        let body = collect_body(rows, StreamOptions::default()).await;
        let data_line = body.lines().nth(1).unwrap();
        assert_eq!(data_line, "\"has,comma\",\"has\"\"quote\"");
    }

    #[tokio::test]
    async fn empty_input_produces_empty_body() {
        let body = collect_body(vec![], StreamOptions::default()).await;
        assert_eq!(body, "");
    }
}
