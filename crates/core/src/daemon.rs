//! Component H: daemon loop orchestration.

use std::collections::HashSet;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::change_source::{AuditLogSource, ChangeSource, KernelNotifySource};
use crate::config::Config;
use crate::engine::model::IndexDefinition;
use crate::engine::EngineAdapter;
use crate::error::{EngineError, Error};
use crate::mutation;
use crate::path_filter::PathFilter;
use crate::reconciler;
use crate::validator;

/// Loads the index mapping/settings JSON files named in configuration.
pub fn load_index_definition(config: &Config) -> Result<IndexDefinition, Error> {
	let settings = match &config.elasticsearch.index_settings {
		Some(path) => read_json(path)?,
		None => serde_json::json!({}),
	};
	let mappings = match &config.elasticsearch.index_mapping {
		Some(path) => read_json(path)?,
		None => serde_json::json!({ "properties": {} }),
	};

	Ok(IndexDefinition { settings, mappings })
}

fn read_json(path: &std::path::Path) -> Result<serde_json::Value, Error> {
	let raw = std::fs::read_to_string(path).map_err(|source| Error::Io {
		path: path.to_path_buf(),
		source,
	})?;
	serde_json::from_str(&raw).map_err(|source| EngineError::Serde(source).into())
}

/// Chooses the live Change Source per `use_fanotify`, constructing but not
/// starting it.
pub fn select_change_source(config: &Config) -> Box<dyn ChangeSource> {
	if config.use_fanotify {
		Box::new(KernelNotifySource::new(config.directories.clone()))
	} else {
		Box::new(AuditLogSource::new(&config.samba))
	}
}

/// Runs a single non-looping reconcile pass: prepare the index, fetch
/// known ids, reconcile once. Used directly by the `index` command and as
/// the first step of [`run`].
pub async fn index_once(adapter: &EngineAdapter, config: &Config, filter: &PathFilter) -> Result<(), Error> {
	let definition = load_index_definition(config)?;
	validator::ensure_index(adapter, &config.elasticsearch, &definition).await?;

	let mut known_ids = adapter
		.scroll_all_ids(&config.elasticsearch.index, config.elasticsearch.bulk_size)
		.collect_all()
		.await?;

	let report = reconciler::reconcile(adapter, config, filter, &mut known_ids).await?;
	info!(
		discovered = report.discovered,
		created = report.created,
		deleted = report.deleted,
		"reconcile complete"
	);

	Ok(())
}

/// Runs forever: start the change source, prepare the index, run an
/// initial reconcile, then alternate `watch`/sleep with reconcile.
pub async fn run(adapter: EngineAdapter, config: Config, filter: PathFilter) -> Result<(), Error> {
	let wait_time = config.wait_time_duration()?;

	let mut source = select_change_source(&config);
	let source_active = source.start().await;
	if source_active {
		info!("change source started");
	} else {
		info!("change source unavailable, falling back to sleep-only reconciliation");
	}

	let definition = load_index_definition(&config)?;
	validator::ensure_index(&adapter, &config.elasticsearch, &definition).await?;

	let mut known_ids: HashSet<String> = adapter
		.scroll_all_ids(&config.elasticsearch.index, config.elasticsearch.bulk_size)
		.collect_all()
		.await?;

	reconciler::reconcile(&adapter, &config, &filter, &mut known_ids).await?;

	loop {
		if source_active {
			watch_and_apply(source.as_mut(), wait_time, &adapter, &config, &filter, &mut known_ids)
				.await
				.map_err(|err| {
					error!(error = %err, "fatal engine error applying mutation");
					err
				})?;
		} else {
			tokio::time::sleep(wait_time).await;
		}

		if let Err(err) = reconciler::reconcile(&adapter, &config, &filter, &mut known_ids).await {
			error!(error = %err, "fatal engine error during reconcile");
			return Err(err.into());
		}
	}
}

/// Drives `source.watch` for `timeout`, routing each event through a
/// channel to an async consumer that applies it immediately rather than
/// waiting for the whole window to elapse.
async fn watch_and_apply(
	source: &mut dyn ChangeSource,
	timeout: std::time::Duration,
	adapter: &EngineAdapter,
	config: &Config,
	filter: &PathFilter,
	known_ids: &mut HashSet<String>,
) -> Result<(), EngineError> {
	let (tx, rx) = mpsc::unbounded_channel();
	let mut push = move |event| {
		let _ = tx.send(event);
	};

	let (_, result) = tokio::join!(
		source.watch(timeout, &mut push),
		apply_as_they_arrive(rx, adapter, config, filter, known_ids)
	);
	result
}

async fn apply_as_they_arrive(
	mut events: mpsc::UnboundedReceiver<crate::change_source::ChangeEvent>,
	adapter: &EngineAdapter,
	config: &Config,
	filter: &PathFilter,
	known_ids: &mut HashSet<String>,
) -> Result<(), EngineError> {
	while let Some(event) = events.recv().await {
		mutation::apply(adapter, config, filter, known_ids, event).await?;
	}
	Ok(())
}
