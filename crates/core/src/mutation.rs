//! Component G: applies a single Change Source event to the live index
//! and the known-id set.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::change_source::{is_xattr_sidechannel, ChangeEvent};
use crate::config::Config;
use crate::document::{map_path, path_to_id};
use crate::engine::model::BulkOp;
use crate::engine::EngineAdapter;
use crate::error::EngineError;
use crate::path_filter::PathFilter;

/// Caps the number of documents rewritten for a directory rename in one
/// call.
const RENAME_HIT_CAP: u64 = 100;

/// Applies one event, returning 1 if it resulted in a write and 0 if it
/// was dropped.
pub async fn apply(
	adapter: &EngineAdapter,
	config: &Config,
	filter: &PathFilter,
	known_ids: &mut HashSet<String>,
	event: ChangeEvent,
) -> Result<usize, EngineError> {
	match event {
		ChangeEvent::Create(path) => apply_create(adapter, config, filter, known_ids, &path).await,
		ChangeEvent::Delete(path) => apply_delete(adapter, config, filter, known_ids, &path).await,
		ChangeEvent::Rename { src, dst } => apply_rename(adapter, config, known_ids, &src, &dst).await,
	}
}

async fn apply_create(
	adapter: &EngineAdapter,
	config: &Config,
	filter: &PathFilter,
	known_ids: &mut HashSet<String>,
	path: &Path,
) -> Result<usize, EngineError> {
	if is_xattr_sidechannel(path) || !filter.admits(path, true) {
		trace!(path = %path.display(), "dropping create event");
		return Ok(0);
	}

	let filename = path
		.file_name()
		.map(|n| n.to_string_lossy().into_owned())
		.unwrap_or_default();

	let doc = match map_path(path, &filename, config) {
		Ok(Some(doc)) => doc,
		Ok(None) => return Ok(0),
		Err(err) => {
			warn!(path = %path.display(), error = %err, "failed to stat path for create event");
			return Ok(0);
		}
	};

	adapter
		.single_index(&config.elasticsearch.index, &doc.id, &doc)
		.await?;
	known_ids.insert(doc.id);
	debug!(path = %path.display(), "indexed new path");
	Ok(1)
}

async fn apply_delete(
	adapter: &EngineAdapter,
	config: &Config,
	filter: &PathFilter,
	known_ids: &mut HashSet<String>,
	path: &Path,
) -> Result<usize, EngineError> {
	if is_xattr_sidechannel(path) || !filter.admits(path, true) {
		trace!(path = %path.display(), "dropping delete event");
		return Ok(0);
	}

	let id = path_to_id(path);
	known_ids.remove(&id);
	adapter.single_delete(&config.elasticsearch.index, &id).await?;
	debug!(path = %path.display(), "removed path from index");
	Ok(1)
}

/// Renaming a directory moves every document whose `path.real` begins
/// with `src`. The top-level `src -> dst` pair is always included, even
/// when the search below finds no other hits.
async fn apply_rename(
	adapter: &EngineAdapter,
	config: &Config,
	known_ids: &mut HashSet<String>,
	src: &Path,
	dst: &Path,
) -> Result<usize, EngineError> {
	let index = &config.elasticsearch.index;
	let src_str = src.to_string_lossy().into_owned();
	let dst_str = dst.to_string_lossy().into_owned();

	let query = crate::query::scope_only(&src_str);
	let hits = adapter.search(index, &query, 0, RENAME_HIT_CAP).await?;

	let mut pairs: Vec<(String, String)> = hits
		.hits
		.hits
		.into_iter()
		.map(|hit| {
			let old_path = hit
				.source
				.pointer("/path/real")
				.and_then(|v| v.as_str())
				.unwrap_or(&src_str)
				.to_string();
			let new_path = old_path.replacen(&src_str, &dst_str, 1);
			(old_path, new_path)
		})
		.collect();

	if !pairs.iter().any(|(old, _)| old == &src_str) {
		pairs.push((src_str.clone(), dst_str.clone()));
	}

	let mut ops = Vec::with_capacity(pairs.len() * 2);
	for (old_path, new_path) in &pairs {
		let old_id = path_to_id(Path::new(old_path));
		let new_id = path_to_id(Path::new(new_path));

		let filename = Path::new(new_path)
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_default();

		ops.push(BulkOp::Delete { id: old_id.clone() });
		ops.push(BulkOp::Index {
			id: new_id.clone(),
			body: crate::document::Document {
				id: new_id.clone(),
				path: crate::document::PathField { real: new_path.clone() },
				file: crate::document::FileField {
					filename,
					filesize: None,
					last_modified: None,
				},
			},
		});

		known_ids.remove(&old_id);
		known_ids.insert(new_id);
	}

	if ops.is_empty() {
		return Ok(0);
	}

	adapter.bulk(index, &ops).await?;
	debug!(src = %src.display(), dst = %dst.display(), pairs = pairs.len(), "applied rename");
	Ok(pairs.len())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rename_hit_cap_matches_query_interface_limit() {
		assert_eq!(RENAME_HIT_CAP, 100);
	}
}
