//! Wire-level types for the search engine's bulk and settings/mapping APIs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;

/// A single item in a heterogeneous bulk request, tagged by operation
/// rather than represented as an untyped map.
#[derive(Debug, Clone)]
pub enum BulkOp {
	Index { id: String, body: Document },
	Delete { id: String },
}

impl BulkOp {
	/// Renders this op as the two NDJSON lines the bulk API expects: an
	/// action/metadata line, optionally followed by a source line.
	pub fn to_ndjson_lines(&self) -> Result<String, serde_json::Error> {
		match self {
			Self::Index { id, body } => {
				let action = serde_json::json!({ "index": { "_id": id } });
				Ok(format!(
					"{}\n{}\n",
					serde_json::to_string(&action)?,
					serde_json::to_string(body)?
				))
			}
			Self::Delete { id } => {
				let action = serde_json::json!({ "delete": { "_id": id } });
				Ok(format!("{}\n", serde_json::to_string(&action)?))
			}
		}
	}

	/// Renders this op as a JSON value, used by the crash-dump helper on
	/// bulk failure to persist the actual failed batch rather than just
	/// its size.
	pub fn to_dump_value(&self) -> Value {
		match self {
			Self::Index { id, body } => serde_json::json!({ "op": "index", "id": id, "body": body }),
			Self::Delete { id } => serde_json::json!({ "op": "delete", "id": id }),
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct BulkResponse {
	pub errors: bool,
	#[serde(default)]
	pub items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteByQueryResponse {
	pub deleted: u64,
}

#[derive(Debug, Serialize)]
pub struct DeleteByQueryIdsRequest {
	pub query: DeleteByQueryIdsQuery,
}

#[derive(Debug, Serialize)]
pub struct DeleteByQueryIdsQuery {
	pub terms: Value,
}

impl DeleteByQueryIdsRequest {
	pub fn for_ids(ids: &[String]) -> Self {
		Self {
			query: DeleteByQueryIdsQuery {
				terms: serde_json::json!({ "_id": ids }),
			},
		}
	}
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IndexDefinition {
	pub settings: Value,
	pub mappings: Value,
}

#[derive(Debug, Deserialize)]
pub struct ScrollSearchResponse {
	#[serde(rename = "_scroll_id")]
	pub scroll_id: Option<String>,
	pub hits: ScrollHits,
}

#[derive(Debug, Deserialize)]
pub struct ScrollHits {
	pub hits: Vec<ScrollHit>,
}

#[derive(Debug, Deserialize)]
pub struct ScrollHit {
	#[serde(rename = "_id")]
	pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
	pub hits: SearchHits,
}

#[derive(Debug, Deserialize)]
pub struct SearchHits {
	pub hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
pub struct SearchHit {
	#[serde(rename = "_id")]
	pub id: String,
	#[serde(rename = "_source")]
	pub source: Value,
}
