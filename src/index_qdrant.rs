//! Qdrant REST backend for the vector index boundary.
//!
//! Talks to Qdrant's HTTP API directly with reqwest. Collections are created
//! with cosine distance, an HNSW config tuned for mid-sized corpora, on-disk
//! payloads, and keyword/datetime payload indexes on the fields the engine
//! filters by (`db_key`, `source_collection`, `source_doc_id`, `created_at`).
//!
//! Writes (`upsert`, `delete`) are sent with `wait=true` so a successful
//! response means the points are durable — the sync engine's state record is
//! only written after every batch has landed.
//!
//! Transient failures (429, 5xx, network) are retried with exponential
//! backoff; other client errors fail immediately.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use crate::config::IndexConfig;
use crate::index::{CollectionInfo, PointFilter, ScrollPage, ScrolledPoint, VectorIndex};
use crate::models::{PointPayload, VectorPoint};

/// Vector index backed by a Qdrant instance over REST.
pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl QdrantIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("index.url required for the qdrant backend"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var(&config.api_key_env).ok(),
            max_retries: config.max_retries,
        })
    }

    /// Send a request with bounded retry on 429/5xx/network failures.
    /// Returns the response body on success, `None` on 404.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.request(method.clone(), &url);
            if let Some(key) = &self.api_key {
                request = request.header("api-key", key);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_success() {
                        return Ok(Some(response.json().await?));
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow!("Qdrant error {} on {}: {}", status, path, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Qdrant error {} on {}: {}", status, path, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Qdrant request failed after retries")))
    }

    async fn create_payload_index(&self, name: &str, field: &str, schema: &str) -> Result<()> {
        self.request(
            Method::PUT,
            &format!("/collections/{}/index?wait=true", name),
            Some(&json!({
                "field_name": field,
                "field_schema": schema,
            })),
        )
        .await?;
        Ok(())
    }
}

fn filter_to_json(filter: &PointFilter) -> Option<Value> {
    let mut must = Vec::new();
    if let Some(db_key) = &filter.db_key {
        must.push(json!({"key": "db_key", "match": {"value": db_key}}));
    }
    if let Some(coll) = &filter.source_collection {
        must.push(json!({"key": "source_collection", "match": {"value": coll}}));
    }
    if must.is_empty() {
        None
    } else {
        Some(json!({"must": must}))
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let body = json!({
            "vectors": {
                "size": dimension,
                "distance": "Cosine",
            },
            "hnsw_config": {
                "m": 16,
                "ef_construct": 100,
                "full_scan_threshold": 10000,
            },
            "optimizers_config": {
                "indexing_threshold": 20000,
            },
            "on_disk_payload": true,
        });
        self.request(Method::PUT, &format!("/collections/{}", name), Some(&body))
            .await?
            .ok_or_else(|| anyhow!("Qdrant returned 404 creating collection '{}'", name))?;

        // Payload indexes for filtered deletion and scroll enumeration.
        self.create_payload_index(name, "db_key", "keyword").await?;
        self.create_payload_index(name, "source_collection", "keyword")
            .await?;
        self.create_payload_index(name, "source_doc_id", "keyword")
            .await?;
        self.create_payload_index(name, "created_at", "datetime")
            .await?;

        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let response = self
            .request(Method::GET, &format!("/collections/{}", name), None)
            .await?;

        let Some(response) = response else {
            return Ok(None);
        };
        let result = response
            .get("result")
            .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result"))?;

        let dimension = result
            .pointer("/config/params/vectors/size")
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow!("Invalid Qdrant response: missing vector size"))?;
        let point_count = result
            .get("points_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let status = result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        Ok(Some(CollectionInfo {
            dimension: dimension as usize,
            point_count,
            status,
        }))
    }

    async fn upsert(&self, name: &str, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let payload_points: Vec<Value> = points
            .iter()
            .map(|p| {
                Ok(json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": serde_json::to_value(&p.payload)?,
                }))
            })
            .collect::<Result<_>>()?;

        self.request(
            Method::PUT,
            &format!("/collections/{}/points?wait=true", name),
            Some(&json!({"points": payload_points})),
        )
        .await?
        .ok_or_else(|| anyhow!("Qdrant collection '{}' not found during upsert", name))?;
        Ok(())
    }

    async fn scroll(
        &self,
        name: &str,
        filter: &PointFilter,
        offset: Option<String>,
        limit: usize,
        with_payload: bool,
    ) -> Result<ScrollPage> {
        let mut body = json!({
            "limit": limit,
            "with_payload": with_payload,
            "with_vector": false,
        });
        if let Some(filter) = filter_to_json(filter) {
            body["filter"] = filter;
        }
        if let Some(offset) = offset {
            body["offset"] = Value::String(offset);
        }

        let response = self
            .request(
                Method::POST,
                &format!("/collections/{}/points/scroll", name),
                Some(&body),
            )
            .await?
            .ok_or_else(|| anyhow!("Qdrant collection '{}' not found during scroll", name))?;

        let result = response
            .get("result")
            .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result"))?;

        let points = result
            .get("points")
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .map(|p| {
                        let id = match p.get("id") {
                            Some(Value::String(s)) => s.clone(),
                            Some(Value::Number(n)) => n.to_string(),
                            _ => String::new(),
                        };
                        let payload = p
                            .get("payload")
                            .cloned()
                            .and_then(|v| serde_json::from_value::<PointPayload>(v).ok());
                        ScrolledPoint { id, payload }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let next_offset = match result.get("next_page_offset") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Ok(ScrollPage {
            points,
            next_offset,
        })
    }

    async fn delete_points(&self, name: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.request(
            Method::POST,
            &format!("/collections/{}/points/delete?wait=true", name),
            Some(&json!({"points": ids})),
        )
        .await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/collections/{}", name), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_json_shape() {
        let filter = PointFilter::for_collection("primary", "notes");
        let json = filter_to_json(&filter).unwrap();
        let must = json["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0]["key"], "db_key");
        assert_eq!(must[0]["match"]["value"], "primary");
        assert_eq!(must[1]["key"], "source_collection");

        assert!(filter_to_json(&PointFilter::default()).is_none());
    }
}
