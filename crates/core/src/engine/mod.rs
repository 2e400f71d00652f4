//! Component C: typed wrapper over the remote search engine.

pub mod model;

use std::sync::Arc;
use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::config::ElasticsearchConfig;
use crate::document::Document;
use crate::error::EngineError;

use model::{
	BulkOp, BulkResponse, DeleteByQueryIdsRequest, DeleteByQueryResponse, IndexDefinition,
	ScrollSearchResponse, SearchResponse,
};

/// Bounded retry count for idempotent reads, mirroring the original's
/// `max_retries=10` on the elasticsearch-py client.
const MAX_RETRIES: u32 = 10;

/// A typed client for the subset of the search engine's REST API this
/// indexer needs. Holds two HTTP clients: one wrapped in a bounded
/// exponential-backoff retry middleware for idempotent operations, and a
/// plain one for writes, which the bulk helper retries per-item itself
/// rather than at this layer.
#[derive(Clone)]
pub struct EngineAdapter {
	base_url: String,
	auth: Option<(String, Option<String>)>,
	retrying: ClientWithMiddleware,
	plain: Arc<reqwest::Client>,
}

impl EngineAdapter {
	pub fn new(config: &ElasticsearchConfig) -> Result<Self, EngineError> {
		let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));

		if !config.verify_certs {
			if config.ssl_show_warn {
				warn!("certificate verification is disabled for the search engine connection");
			}
			builder = builder.danger_accept_invalid_certs(true);
		}

		if let Some(ca_path) = &config.ca_certs {
			let pem = std::fs::read(ca_path).map_err(|source| EngineError::CaCertRead {
				path: ca_path.clone(),
				source,
			})?;
			let cert = reqwest::Certificate::from_pem(&pem).map_err(|source| EngineError::CaCertParse {
				path: ca_path.clone(),
				source,
			})?;
			builder = builder.add_root_certificate(cert);
		}

		let plain = builder.build().map_err(EngineError::ClientBuild)?;

		let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
		let retrying = ClientBuilder::new(plain.clone())
			.with(RetryTransientMiddleware::new_with_policy(retry_policy))
			.build();

		Ok(Self {
			base_url: config.url.trim_end_matches('/').to_string(),
			auth: config
				.user
				.as_ref()
				.map(|user| (user.clone(), config.password.clone())),
			retrying,
			plain: Arc::new(plain),
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.base_url, path)
	}

	fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		match &self.auth {
			Some((user, password)) => builder.basic_auth(user, password.as_deref()),
			None => builder,
		}
	}

	fn with_auth_retrying(
		&self,
		builder: reqwest_middleware::RequestBuilder,
	) -> reqwest_middleware::RequestBuilder {
		match &self.auth {
			Some((user, password)) => builder.basic_auth(user, password.as_deref()),
			None => builder,
		}
	}

	fn connection_error(&self, source: reqwest::Error) -> EngineError {
		EngineError::Connection {
			url: self.base_url.clone(),
			source: reqwest_middleware::Error::Reqwest(source),
		}
	}

	fn connection_error_mw(&self, source: reqwest_middleware::Error) -> EngineError {
		EngineError::Connection {
			url: self.base_url.clone(),
			source,
		}
	}

	pub async fn index_exists(&self, name: &str) -> Result<bool, EngineError> {
		let resp = self
			.with_auth_retrying(self.retrying.head(self.url(name)))
			.send()
			.await
			.map_err(|e| self.connection_error_mw(e))?;
		Ok(resp.status().is_success())
	}

	pub async fn get_settings(&self, name: &str) -> Result<Value, EngineError> {
		let resp = self
			.with_auth_retrying(self.retrying.get(self.url(&format!("{name}/_settings"))))
			.send()
			.await
			.map_err(|e| self.connection_error_mw(e))?;
		json_or_status_error(resp).await
	}

	pub async fn get_mapping(&self, name: &str) -> Result<Value, EngineError> {
		let resp = self
			.with_auth_retrying(self.retrying.get(self.url(&format!("{name}/_mapping"))))
			.send()
			.await
			.map_err(|e| self.connection_error_mw(e))?;
		json_or_status_error(resp).await
	}

	pub async fn create_index(&self, name: &str, definition: &IndexDefinition) -> Result<(), EngineError> {
		debug!(index = name, "creating index");
		let resp = self
			.with_auth(self.plain.put(self.url(name)))
			.json(definition)
			.send()
			.await
			.map_err(|e| self.connection_error(e))?;

		match resp.status().as_u16() {
			200..=299 => Ok(()),
			400 => Err(EngineError::BadRequest(body_text(resp).await)),
			409 => Err(EngineError::AlreadyExists(name.to_string())),
			status => Err(unexpected(status, resp).await),
		}
	}

	pub async fn put_mapping(&self, name: &str, properties: &Value) -> Result<(), EngineError> {
		let resp = self
			.with_auth(self.plain.put(self.url(&format!("{name}/_mapping"))))
			.json(&serde_json::json!({ "properties": properties }))
			.send()
			.await
			.map_err(|e| self.connection_error(e))?;

		match resp.status().as_u16() {
			200..=299 => Ok(()),
			400 => Err(EngineError::BadRequest(body_text(resp).await)),
			status => Err(unexpected(status, resp).await),
		}
	}

	pub async fn delete_index(&self, name: &str) -> Result<(), EngineError> {
		debug!(index = name, "deleting index");
		let resp = self
			.with_auth(self.plain.delete(self.url(name)))
			.send()
			.await
			.map_err(|e| self.connection_error(e))?;

		match resp.status().as_u16() {
			200..=299 | 404 => Ok(()),
			status => Err(unexpected(status, resp).await),
		}
	}

	/// Sends a heterogeneous batch of index/delete operations as a single
	/// bulk request. On transport failure the whole batch fails; this layer
	/// does not retry.
	pub async fn bulk(&self, name: &str, ops: &[BulkOp]) -> Result<(), EngineError> {
		if ops.is_empty() {
			return Ok(());
		}

		let mut body = String::new();
		for op in ops {
			body.push_str(&op.to_ndjson_lines()?);
		}

		let resp = self
			.with_auth(self.plain.post(self.url("_bulk")))
			.header("Content-Type", "application/x-ndjson")
			.query(&[("index", name)])
			.body(body)
			.send()
			.await
			.map_err(|e| self.connection_error(e))?;

		if !resp.status().is_success() {
			return Err(unexpected(resp.status().as_u16(), resp).await);
		}

		let parsed: BulkResponse = resp.json().await?;
		if parsed.errors {
			return Err(EngineError::BulkFailed(format!(
				"{} item(s) failed in bulk request",
				parsed.items.iter().filter(|item| item_failed(item)).count()
			)));
		}

		Ok(())
	}

	pub async fn delete_by_query_ids(&self, name: &str, ids: &[String]) -> Result<u64, EngineError> {
		if ids.is_empty() {
			return Ok(0);
		}

		let resp = self
			.with_auth(self.plain.post(self.url(&format!("{name}/_delete_by_query"))))
			.json(&DeleteByQueryIdsRequest::for_ids(ids))
			.send()
			.await
			.map_err(|e| self.connection_error(e))?;

		if !resp.status().is_success() {
			return Err(unexpected(resp.status().as_u16(), resp).await);
		}

		let parsed: DeleteByQueryResponse = resp.json().await?;
		Ok(parsed.deleted)
	}

	pub async fn single_index(&self, name: &str, id: &str, doc: &Document) -> Result<(), EngineError> {
		let resp = self
			.with_auth(self.plain.put(self.url(&format!("{name}/_doc/{id}"))))
			.json(doc)
			.send()
			.await
			.map_err(|e| self.connection_error(e))?;

		if resp.status().is_success() {
			Ok(())
		} else {
			Err(unexpected(resp.status().as_u16(), resp).await)
		}
	}

	/// Deletes a single document. A missing id is treated as success.
	pub async fn single_delete(&self, name: &str, id: &str) -> Result<(), EngineError> {
		let resp = self
			.with_auth(self.plain.delete(self.url(&format!("{name}/_doc/{id}"))))
			.send()
			.await
			.map_err(|e| self.connection_error(e))?;

		match resp.status().as_u16() {
			200..=299 | 404 => Ok(()),
			status => Err(unexpected(status, resp).await),
		}
	}

	/// Returns a finite, non-restartable cursor over every document id in
	/// the index.
	pub fn scroll_all_ids(&self, name: &str, batch_size: usize) -> ScrollIds {
		ScrollIds {
			adapter: self.clone(),
			index: name.to_string(),
			batch_size,
			scroll_id: None,
			done: false,
		}
	}

	pub async fn refresh(&self, name: &str) -> Result<(), EngineError> {
		trace!(index = name, "refreshing index");
		let resp = self
			.with_auth_retrying(self.retrying.post(self.url(&format!("{name}/_refresh"))))
			.send()
			.await
			.map_err(|e| self.connection_error_mw(e))?;

		if resp.status().is_success() {
			Ok(())
		} else {
			Err(unexpected(resp.status().as_u16(), resp).await)
		}
	}

	pub async fn put_slowlog_thresholds(&self, name: &str, values: &Value) -> Result<(), EngineError> {
		let resp = self
			.with_auth(self.plain.put(self.url(&format!("{name}/_settings"))))
			.json(&serde_json::json!({
				"index": {
					"search": {
						"slowlog": {
							"threshold": values
						}
					}
				}
			}))
			.send()
			.await
			.map_err(|e| self.connection_error(e))?;

		if resp.status().is_success() {
			Ok(())
		} else {
			Err(unexpected(resp.status().as_u16(), resp).await)
		}
	}

	/// Executes a `query_string` search, used by the rename handler and the
	/// admin `search` command (Component I).
	pub async fn search(
		&self,
		name: &str,
		query: &Value,
		from: u64,
		size: u64,
	) -> Result<SearchResponse, EngineError> {
		let resp = self
			.with_auth_retrying(self.retrying.post(self.url(&format!("{name}/_search"))))
			.json(&serde_json::json!({
				"query": query,
				"from": from,
				"size": size,
			}))
			.send()
			.await
			.map_err(|e| self.connection_error_mw(e))?;

		json_or_status_error(resp).await
	}
}

/// A finite, one-shot cursor over every id in an index. Must be driven to
/// completion in a single pass.
pub struct ScrollIds {
	adapter: EngineAdapter,
	index: String,
	batch_size: usize,
	scroll_id: Option<String>,
	done: bool,
}

impl ScrollIds {
	/// Fetches the next batch of ids, refreshing the server-side cursor
	/// with each call. Returns an empty `Vec` once exhausted.
	pub async fn next_batch(&mut self) -> Result<Vec<String>, EngineError> {
		if self.done {
			return Ok(Vec::new());
		}

		let resp = match &self.scroll_id {
			None => self
				.adapter
				.with_auth_retrying(
					self.adapter
						.retrying
						.post(self.adapter.url(&format!("{}/_search", self.index)))
						.query(&[("scroll", "1m")]),
				)
				.json(&serde_json::json!({
					"size": self.batch_size,
					"_source": false,
					"sort": ["_doc"],
					"query": { "match_all": {} },
				}))
				.send()
				.await
				.map_err(|e| self.adapter.connection_error_mw(e))?,
			Some(scroll_id) => self
				.adapter
				.with_auth_retrying(self.adapter.retrying.post(self.adapter.url("_search/scroll")))
				.json(&serde_json::json!({
					"scroll": "1m",
					"scroll_id": scroll_id,
				}))
				.send()
				.await
				.map_err(|e| self.adapter.connection_error_mw(e))?,
		};

		let parsed: ScrollSearchResponse = json_or_status_error(resp).await?;

		self.scroll_id = parsed.scroll_id;
		if parsed.hits.hits.is_empty() {
			self.done = true;
		}

		Ok(parsed.hits.hits.into_iter().map(|hit| hit.id).collect())
	}

	/// Drives the cursor to completion, collecting every id.
	pub async fn collect_all(mut self) -> Result<std::collections::HashSet<String>, EngineError> {
		let mut ids = std::collections::HashSet::new();
		loop {
			let batch = self.next_batch().await?;
			if batch.is_empty() {
				break;
			}
			ids.extend(batch);
		}
		Ok(ids)
	}
}

fn item_failed(item: &Value) -> bool {
	item.as_object()
		.and_then(|obj| obj.values().next())
		.and_then(|action| action.get("error"))
		.is_some()
}

async fn body_text(resp: reqwest::Response) -> String {
	resp.text().await.unwrap_or_default()
}

async fn unexpected(status: u16, resp: reqwest::Response) -> EngineError {
	EngineError::Unexpected {
		status,
		body: body_text(resp).await,
	}
}

async fn json_or_status_error<T: serde::de::DeserializeOwned>(
	resp: reqwest::Response,
) -> Result<T, EngineError> {
	if !resp.status().is_success() {
		return Err(unexpected(resp.status().as_u16(), resp).await);
	}
	Ok(resp.json().await?)
}
