//! Component F: full crawl + set-diff reconciliation against the live
//! index.

use std::collections::HashSet;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::document::map_path;
use crate::engine::model::BulkOp;
use crate::engine::EngineAdapter;
use crate::error::EngineError;
use crate::path_filter::PathFilter;

/// Summary of one reconcile pass, used for logging and for the crash dump
/// helper on bulk failure.
#[derive(Debug, Default)]
pub struct ReconcileReport {
	pub discovered: usize,
	pub created: usize,
	pub deleted: usize,
	pub wall_clock: std::time::Duration,
}

/// Walks every configured root, diffs the discovered paths against
/// `known_ids`, flushes index/delete operations to the engine and returns
/// the updated known-id set.
///
/// On return, `known_ids` and the engine agree on the set of ids observed
/// during this call.
///
/// New documents are flushed to the engine as soon as the buffer reaches
/// `bulk_size`, not just once the whole tree has been walked, so memory use
/// during a crawl is bounded by the configured batch size rather than by
/// the size of the tree.
pub async fn reconcile(
	adapter: &EngineAdapter,
	config: &Config,
	filter: &PathFilter,
	known_ids: &mut HashSet<String>,
) -> Result<ReconcileReport, EngineError> {
	let started = Instant::now();
	let mut stale = std::mem::take(known_ids);
	let mut fresh = HashSet::with_capacity(stale.len());

	let mut buffer: Vec<BulkOp> = Vec::with_capacity(config.elasticsearch.bulk_size);
	let mut report = ReconcileReport::default();

	for root in &config.directories {
		for entry in WalkDir::new(root).into_iter().filter_map(|e| match e {
			Ok(entry) => Some(entry),
			Err(err) => {
				warn!(error = %err, "error walking directory tree");
				None
			}
		}) {
			let path = entry.path();

			if !filter.admits(path, false) {
				continue;
			}

			let filename = entry.file_name().to_string_lossy();
			let doc = match map_path(path, &filename, config) {
				Ok(Some(doc)) => doc,
				Ok(None) => continue,
				Err(err) => {
					warn!(path = %path.display(), error = %err, "failed to stat path during crawl");
					continue;
				}
			};

			let id = doc.id.clone();
			fresh.insert(id.clone());
			let is_new = !stale.remove(&id);
			report.discovered += 1;

			if !is_new {
				continue;
			}

			buffer.push(BulkOp::Index { id, body: doc });
			if buffer.len() >= config.elasticsearch.bulk_size {
				let mut chunk = Vec::with_capacity(config.elasticsearch.bulk_size);
				std::mem::swap(&mut chunk, &mut buffer);
				flush(adapter, config, &chunk, &mut report).await?;
			}
		}
	}

	flush(adapter, config, &buffer, &mut report).await?;

	if !stale.is_empty() {
		info!(stale = stale.len(), "removing ids no longer present on disk");
		adapter.refresh(&config.elasticsearch.index).await?;

		let ids: Vec<String> = stale.into_iter().collect();
		for chunk in ids.chunks(config.elasticsearch.bulk_size) {
			let deleted = adapter
				.delete_by_query_ids(&config.elasticsearch.index, chunk)
				.await?;
			report.deleted += deleted as usize;
		}
	}

	*known_ids = fresh;
	report.wall_clock = started.elapsed();

	debug!(
		discovered = report.discovered,
		created = report.created,
		deleted = report.deleted,
		elapsed_ms = report.wall_clock.as_millis(),
		"reconcile pass complete"
	);

	Ok(report)
}

async fn flush(
	adapter: &EngineAdapter,
	config: &Config,
	ops: &[BulkOp],
	report: &mut ReconcileReport,
) -> Result<(), EngineError> {
	if ops.is_empty() {
		return Ok(());
	}

	match adapter.bulk(&config.elasticsearch.index, ops).await {
		Ok(()) => {
			report.created += ops.len();
			Ok(())
		}
		Err(err) => {
			if config.dump_documents_on_error {
				dump_failed_batch(ops);
			}
			Err(err)
		}
	}
}

/// Writes the batch that failed to index to `/tmp/esindexer-failed-documents-<ISO
/// timestamp>.json` for post-mortem inspection.
fn dump_failed_batch(ops: &[BulkOp]) {
	let path = std::env::temp_dir().join(format!(
		"esindexer-failed-documents-{}.json",
		chrono::Utc::now().format("%Y%m%dT%H%M%S")
	));

	let docs: Vec<Value> = ops.iter().map(BulkOp::to_dump_value).collect();
	match serde_json::to_vec_pretty(&docs) {
		Ok(bytes) => {
			if let Err(err) = std::fs::write(&path, bytes) {
				warn!(path = %path.display(), error = %err, "failed to write crash dump");
			} else {
				warn!(path = %path.display(), count = docs.len(), "wrote failed bulk batch for inspection");
			}
		}
		Err(err) => warn!(error = %err, "failed to serialize crash dump"),
	}
}
