//! Source collection access (spec §4.3, §4.4): identifier-bounds/aggregate
//! queries for the reduce engine, a sorted raw cursor for raw/archive
//! modes, the allowlist check on `sourceCollection`, and the read-endpoint
//! `hello` liveness check.

use crate::config::ReduceConfig;
use crate::error::EngineError;
use crate::generators::RowStream;
use crate::model::{MetricOp, ReduceSpec, Row};
use crate::normalize::normalize_bson;
use crate::reduce::{Identifier, IdentifierRange, RangeAggregator};
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::FindOptions;
use mongodb::{Collection, Database};
use once_cell::sync::Lazy;
use regex::Regex;

static COLLECTION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static regex is valid"));

/// §4.4 step 3: trims the job's `sourceCollection`, falls back to the
/// configured default, and checks it against the allowlist.
pub fn resolve_source_collection(
    requested: Option<&str>,
    default_collection: &str,
    allowlist: &[String],
) -> Result<String, EngineError> {
    let trimmed = requested.map(str::trim).filter(|s| !s.is_empty());
    let name = trimmed.unwrap_or(default_collection).to_string();

    if !COLLECTION_NAME_RE.is_match(&name) || !allowlist.iter().any(|c| c == &name) {
        return Err(EngineError::SourceCollectionNotAllowed { name });
    }
    Ok(name)
}

/// §6: the read endpoint must resolve to a non-writable secondary.
pub async fn verify_not_primary(read_database: &Database) -> Result<(), EngineError> {
    let reply = read_database.run_command(doc! { "hello": 1 }, None).await?;
    let is_writable_primary = reply
        .get_bool("isWritablePrimary")
        .unwrap_or_else(|_| reply.get_bool("ismaster").unwrap_or(false));
    if is_writable_primary {
        return Err(EngineError::ReadEndpointIsPrimary);
    }
    Ok(())
}

/// Tenant/filter-scoped view over one source collection, read via the
/// read-endpoint database.
#[derive(Clone)]
pub struct SourceClient {
    collection: Collection<Document>,
    tenant_id: String,
    filters: Document,
    cursor_batch_size: u32,
}

impl SourceClient {
    pub fn new(
        database: &Database,
        collection_name: &str,
        tenant_id: &str,
        sanitized_filters: &serde_json::Map<String, serde_json::Value>,
        config: &ReduceConfig,
    ) -> Result<Self, EngineError> {
        let filters = mongodb::bson::to_document(&serde_json::Value::Object(
            sanitized_filters.clone(),
        ))?;
        Ok(Self {
            collection: database.collection(collection_name),
            tenant_id: tenant_id.to_string(),
            filters,
            cursor_batch_size: config.cursor_batch_size,
        })
    }

    fn base_match(&self) -> Document {
        let mut filter = doc! { "tenantId": self.tenant_id.clone() };
        for (key, value) in self.filters.iter() {
            filter.insert(key.clone(), value.clone());
        }
        filter
    }

    /// §4.4 raw/archive modes: a single sorted cursor over the tenant- and
    /// filter-scoped collection, ascending by `_id`. Each document passes
    /// through the value normalizer before reaching the generator.
    pub fn raw_cursor(&self, max_id: Option<Bson>) -> RowStream {
        let collection = self.collection.clone();
        let mut filter = self.base_match();
        if let Some(max_id) = max_id {
            filter.insert("_id", doc! { "$lte": max_id });
        }
        let batch_size = self.cursor_batch_size;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Row, EngineError>>(16);
        tokio::spawn(async move {
            let result: Result<(), EngineError> = async {
                let options = FindOptions::builder()
                    .sort(doc! { "_id": 1 })
                    .batch_size(batch_size)
                    .build();
                let mut cursor = collection.find(filter, options).await?;
                while let Some(doc) = cursor.try_next().await? {
                    let value = normalize_bson(&Bson::Document(doc));
                    let row = match value {
                        serde_json::Value::Object(map) => map,
                        other => {
                            let mut map = Row::new();
                            map.insert("value".to_string(), other);
                            map
                        }
                    };
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

    /// The maximum `_id` under the tenant/filter scope, used by the
    /// archive-multipass plan to pin every sub-format's cursor to the same
    /// snapshot of the dataset.
    pub async fn max_id(&self) -> Result<Option<Bson>, EngineError> {
        let options = FindOptions::builder()
            .sort(doc! { "_id": -1 })
            .limit(1)
            .build();
        let mut cursor = self.collection.find(self.base_match(), options).await?;
        Ok(cursor.try_next().await?.and_then(|d| d.get("_id").cloned()))
    }
}

#[async_trait]
impl RangeAggregator for SourceClient {
    async fn identifier_bounds(&self) -> Result<Option<(Identifier, Identifier)>, EngineError> {
        let min_opts = FindOptions::builder().sort(doc! { "_id": 1 }).limit(1).build();
        let max_opts = FindOptions::builder().sort(doc! { "_id": -1 }).limit(1).build();

        let mut min_cursor = self.collection.find(self.base_match(), min_opts).await?;
        let mut max_cursor = self.collection.find(self.base_match(), max_opts).await?;

        let (Some(min_doc), Some(max_doc)) = (min_cursor.try_next().await?, max_cursor.try_next().await?)
        else {
            return Ok(None);
        };

        let min_id = min_doc.get_object_id("_id").map_err(|e| EngineError::Database {
            message: format!("source collection identifier is not an ObjectId: {e}"),
        })?;
        let max_id = max_doc.get_object_id("_id").map_err(|e| EngineError::Database {
            message: format!("source collection identifier is not an ObjectId: {e}"),
        })?;

        Ok(Some((
            Identifier::from_object_id(min_id),
            Identifier::from_object_id(max_id),
        )))
    }

    async fn aggregate_range(
        &self,
        spec: &ReduceSpec,
        range: &IdentifierRange,
    ) -> Result<Vec<Row>, EngineError> {
        let mut id_match = doc! { "$gte": range.start.to_object_id()? };
        if let Some(end) = range.end {
            id_match.insert("$lt", end.to_object_id()?);
        }

        let mut match_stage = self.base_match();
        match_stage.insert("_id", id_match);

        let group_id: Document = spec
            .group_by
            .iter()
            .map(|field| (field.clone(), Bson::String(format!("${field}"))))
            .collect();

        let mut group_stage = doc! { "_id": group_id, "__input_count": { "$sum": 1 } };
        for metric in &spec.metrics {
            match metric.op {
                MetricOp::Count => {
                    group_stage.insert(metric.alias.clone(), doc! { "$sum": 1 });
                }
                MetricOp::Sum => {
                    let field = metric.field.as_deref().unwrap_or_default();
                    group_stage.insert(metric.alias.clone(), doc! { "$sum": format!("${field}") });
                }
                MetricOp::Min => {
                    let field = metric.field.as_deref().unwrap_or_default();
                    group_stage.insert(metric.alias.clone(), doc! { "$min": format!("${field}") });
                }
                MetricOp::Max => {
                    let field = metric.field.as_deref().unwrap_or_default();
                    group_stage.insert(metric.alias.clone(), doc! { "$max": format!("${field}") });
                }
                MetricOp::Avg => {
                    let field = metric.field.as_deref().unwrap_or_default();
                    group_stage.insert(
                        format!("__avg_sum__{}", metric.alias),
                        doc! { "$sum": format!("${field}") },
                    );
                    group_stage.insert(
                        format!("__avg_count__{}", metric.alias),
                        doc! { "$sum": { "$cond": [{ "$ne": [format!("${field}"), Bson::Null] }, 1, 0] } },
                    );
                }
            }
        }

        let pipeline = vec![doc! { "$match": match_stage }, doc! { "$group": group_stage }];
        let options = mongodb::options::AggregateOptions::builder()
            .allow_disk_use(true)
            .batch_size(self.cursor_batch_size)
            .build();

        let mut cursor = self.collection.aggregate(pipeline, options).await?;
        let mut rows = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            rows.push(flatten_group_result(doc, spec));
        }
        Ok(rows)
    }
}

/// Flattens a `$group` result `{_id: {field: value, ...}, alias: ...}`
/// into a flat partial row the accumulator can `consume`, and runs every
/// value through the normalizer.
fn flatten_group_result(doc: Document, spec: &ReduceSpec) -> Row {
    let mut row = Row::new();
    if let Ok(id_doc) = doc.get_document("_id") {
        for field in &spec.group_by {
            let value = id_doc
                .get(field)
                .map(|b| normalize_bson(b))
                .unwrap_or(serde_json::Value::Null);
            row.insert(field.clone(), value);
        }
    }
    for (key, value) in doc.iter() {
        if key == "_id" {
            continue;
        }
        row.insert(key.clone(), normalize_bson(value));
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_default_collection_when_none_requested() {
        let allowlist = vec!["payments".to_string()];
        let resolved = resolve_source_collection(None, "payments", &allowlist).unwrap();
        assert_eq!(resolved, "payments");
    }

    #[test]
    fn rejects_a_collection_not_on_the_allowlist() {
        let allowlist = vec!["payments".to_string()];
        let err = resolve_source_collection(Some("secrets"), "payments", &allowlist).unwrap_err();
        assert!(matches!(err, EngineError::SourceCollectionNotAllowed { .. }));
    }

    #[test]
    fn rejects_names_with_invalid_characters() {
        let allowlist = vec!["pay.ments".to_string()];
        let err = resolve_source_collection(Some("pay.ments"), "payments", &allowlist).unwrap_err();
        assert!(matches!(err, EngineError::SourceCollectionNotAllowed { .. }));
    }

    #[test]
    fn trims_whitespace_before_matching() {
        let allowlist = vec!["payments".to_string()];
        let resolved = resolve_source_collection(Some("  payments  "), "payments", &allowlist).unwrap();
        assert_eq!(resolved, "payments");
    }
}
