//! Structured-object array generator (spec §4.2): `[` + comma-separated
//! JSON rows + `]`. Empty input emits `[]` exactly.

use super::{spawn_byte_stream, GeneratedStream, RowStream, StreamOptions};
use bytes::Bytes;
use futures::StreamExt;

pub fn generate(rows: RowStream, opts: StreamOptions) -> GeneratedStream {
    let body = spawn_byte_stream(move |tx| async move {
        if let Err(err) = run(rows, opts, &tx).await {
            let _ = tx.send(Err(err)).await;
        }
    });

    GeneratedStream {
        content_type: "application/json",
        extension: "json",
        body,
    }
}

async fn run(
    mut rows: RowStream,
    opts: StreamOptions,
    tx: &tokio::sync::mpsc::Sender<Result<Bytes, crate::error::EngineError>>,
) -> Result<(), crate::error::EngineError> {
    let mut buf = String::from("[");
    let mut first = true;

    while let Some(row) = rows.next().await {
        let row = row?;
        if !first {
            buf.push(',');
        }
        first = false;
        buf.push_str(&serde_json::to_string(&row)?);

        if buf.len() >= opts.buffer_bytes {
            let chunk = std::mem::take(&mut buf);
            if tx.send(Ok(Bytes::from(chunk))).await.is_err() {
                return Ok(());
            }
        }
    }

    buf.push(']');
    let _ = tx.send(Ok(Bytes::from(buf))).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Row;
    use futures::stream;
    use serde_json::json;

    async fn collect_body(rows: Vec<Row>) -> String {
        let stream: RowStream = Box::pin(stream::iter(rows.into_iter().map(Ok)));
        let generated = generate(stream, StreamOptions::default());
        let bytes: Vec<Bytes> = generated.body.map(|r| r.unwrap()).collect::<Vec<_>>().await;
        bytes
            .into_iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn empty_input_emits_empty_array_exactly() {
        assert_eq!(collect_body(vec![]).await, "[]");
    }

    #[tokio::test]
    async fn preserves_row_order_and_fields() {
        let mut r1 = Row::new();
        r1.insert("status".to_string(), json!("paid"));
        let mut r2 = Row::new();
        r2.insert("status".to_string(), json!("pending"));

        let body = collect_body(vec![r1, r2]).await;
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        let arr = parsed.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["status"], "paid");
        assert_eq!(arr[1]["status"], "pending");
    }
}
