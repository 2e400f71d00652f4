//! Component D: compare the live index's settings/mapping against what's
//! expected and decide whether it can be updated in place.

use serde_json::Value;
use tracing::{info, warn};

use crate::config::ElasticsearchConfig;
use crate::engine::model::IndexDefinition;
use crate::engine::EngineAdapter;
use crate::error::EngineError;

/// Outcome of comparing the live index against the expected definition.
#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
	/// The live mapping can be patched in place via `put-mapping`.
	Compatible,
	/// Settings have diverged in a way that requires delete + recreate
	/// (tokenizer changed, or a default analyzer filter was dropped).
	NeedsRecreate,
}

/// Walks the expected settings/mapping tree and asserts each leaf equals
/// the live value under the same key path.
pub fn compare(expected: &IndexDefinition, live_settings: &Value, live_mapping: &Value) -> Verdict {
	if analyzer_tokenizer_changed(expected, live_settings) || default_analyzer_lost_filters(live_settings) {
		return Verdict::NeedsRecreate;
	}

	if mapping_keys_mismatched(&expected.mappings, live_mapping) {
		return Verdict::NeedsRecreate;
	}

	Verdict::Compatible
}

fn default_analyzer_path(settings: &Value) -> Option<&Value> {
	settings
		.pointer("/index/analysis/analyzer/default")
		.or_else(|| settings.pointer("/analysis/analyzer/default"))
}

fn analyzer_tokenizer_changed(expected: &IndexDefinition, live_settings: &Value) -> bool {
	let expected_tokenizer = default_analyzer_path(&expected.settings).and_then(|a| a.get("tokenizer"));
	let live_tokenizer = default_analyzer_path(live_settings).and_then(|a| a.get("tokenizer"));

	match (expected_tokenizer, live_tokenizer) {
		(Some(expected), Some(live)) => expected != live,
		_ => false,
	}
}

fn default_analyzer_lost_filters(live_settings: &Value) -> bool {
	let Some(filters) = default_analyzer_path(live_settings).and_then(|a| a.get("filter")) else {
		return false;
	};
	let Some(filters) = filters.as_array() else {
		return false;
	};

	let names: Vec<&str> = filters.iter().filter_map(Value::as_str).collect();
	!names.contains(&"lowercase") || !names.contains(&"asciifolding")
}

fn mapping_keys_mismatched(expected: &Value, live: &Value) -> bool {
	let Some(expected_props) = expected.get("properties").and_then(Value::as_object) else {
		return false;
	};
	let Some(live_props) = find_properties(live) else {
		return true;
	};

	for (key, expected_value) in expected_props {
		match live_props.get(key) {
			Some(live_value) => {
				if expected_value.get("properties").is_some() {
					if mapping_keys_mismatched(expected_value, live_value) {
						return true;
					}
				} else if expected_value.get("type") != live_value.get("type") {
					return true;
				} else if multifields_mismatched(expected_value, live_value) {
					return true;
				}
			}
			None => return true,
		}
	}

	false
}

/// Compares the `fields` multi-field sub-mapping (e.g. the `tree`/`fulltext`
/// multi-fields on `path.real` and `file.filename`) by key and `type`.
fn multifields_mismatched(expected_value: &Value, live_value: &Value) -> bool {
	let Some(expected_fields) = expected_value.get("fields").and_then(Value::as_object) else {
		return false;
	};
	let Some(live_fields) = live_value.get("fields").and_then(Value::as_object) else {
		return true;
	};

	for (name, expected_field) in expected_fields {
		match live_fields.get(name) {
			Some(live_field) => {
				if expected_field.get("type") != live_field.get("type") {
					return true;
				}
			}
			None => return true,
		}
	}

	false
}

/// The `_mapping` response nests the requested index's mapping under its
/// own name; find the first `properties` object regardless of that nesting.
fn find_properties(mapping: &Value) -> Option<&serde_json::Map<String, Value>> {
	if let Some(props) = mapping.get("properties").and_then(Value::as_object) {
		return Some(props);
	}
	mapping
		.as_object()?
		.values()
		.find_map(|v| v.pointer("/mappings/properties").and_then(Value::as_object))
}

/// Ensures the configured index exists and matches the expected
/// settings/mapping, creating or recreating it as needed.
pub async fn ensure_index(
	adapter: &EngineAdapter,
	config: &ElasticsearchConfig,
	expected: &IndexDefinition,
) -> Result<(), EngineError> {
	let name = &config.index;

	if !adapter.index_exists(name).await? {
		info!(index = %name, "index does not exist, creating");
		return adapter.create_index(name, expected).await;
	}

	let live_settings = adapter.get_settings(name).await?;
	let live_mapping = adapter.get_mapping(name).await?;

	match compare(expected, &live_settings, &live_mapping) {
		Verdict::Compatible => {
			let properties = expected
				.mappings
				.get("properties")
				.cloned()
				.unwrap_or_else(|| serde_json::json!({}));

			match adapter.put_mapping(name, &properties).await {
				Ok(()) => Ok(()),
				Err(EngineError::BadRequest(reason)) => {
					warn!(index = %name, %reason, "mapping update rejected, recreating index");
					recreate(adapter, name, expected).await
				}
				Err(err) => Err(err),
			}
		}
		Verdict::NeedsRecreate => {
			info!(index = %name, "live index settings incompatible, recreating");
			recreate(adapter, name, expected).await
		}
	}
}

async fn recreate(adapter: &EngineAdapter, name: &str, expected: &IndexDefinition) -> Result<(), EngineError> {
	adapter.delete_index(name).await?;
	adapter.create_index(name, expected).await
}
