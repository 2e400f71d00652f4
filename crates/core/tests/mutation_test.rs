//! Integration coverage for create/delete/rename mutation handling and
//! the idempotence of deleting an already-absent id.

use std::collections::HashSet;

use esindexer_core::change_source::ChangeEvent;
use esindexer_core::config::{Config, ElasticsearchConfig, Exclusions, SambaConfig};
use esindexer_core::document::path_to_id;
use esindexer_core::mutation::apply;
use esindexer_core::path_filter::PathFilter;
use esindexer_core::EngineAdapter;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(root: &std::path::Path, index_url: String) -> Config {
	Config {
		directories: vec![root.to_path_buf()],
		exclusions: Exclusions::default(),
		wait_time: "30m".to_string(),
		use_fanotify: false,
		samba: SambaConfig {
			audit_log: None,
			monitor_sleep_time: 1,
		},
		elasticsearch: ElasticsearchConfig {
			url: index_url,
			index: "files".to_string(),
			bulk_size: 10_000,
			user: None,
			password: None,
			verify_certs: true,
			ssl_show_warn: false,
			ca_certs: None,
			index_mapping: None,
			index_settings: None,
			library_version: 8,
		},
		index_file_dates: false,
		add_additional_fields: false,
		dump_documents_on_error: false,
	}
}

/// A create event indexes the new file via single-index.
#[tokio::test]
async fn create_indexes_new_file() {
	let dir = TempDir::new().unwrap();
	std::fs::write(dir.path().join("d.txt"), b"new").unwrap();

	let server = MockServer::start().await;
	Mock::given(method("PUT"))
		.and(path_prefix_matcher("/files/_doc/"))
		.respond_with(ResponseTemplate::new(201).set_body_json(json!({ "result": "created" })))
		.mount(&server)
		.await;

	let config = config_for(dir.path(), server.uri());
	let filter = PathFilter::new(&config).unwrap();
	let adapter = EngineAdapter::new(&config.elasticsearch).unwrap();

	let mut known_ids = HashSet::new();
	let applied = apply(
		&adapter,
		&config,
		&filter,
		&mut known_ids,
		ChangeEvent::Create(dir.path().join("d.txt")),
	)
	.await
	.unwrap();

	assert_eq!(applied, 1);
	assert!(known_ids.contains(&path_to_id(&dir.path().join("d.txt"))));
}

/// Deleting an already-absent id is still a success and leaves the
/// known-id set unchanged.
#[tokio::test]
async fn delete_of_absent_id_succeeds() {
	let dir = TempDir::new().unwrap();
	let target = dir.path().join("a.txt");

	let server = MockServer::start().await;
	Mock::given(method("DELETE"))
		.and(path_prefix_matcher("/files/_doc/"))
		.respond_with(ResponseTemplate::new(404))
		.mount(&server)
		.await;

	let config = config_for(dir.path(), server.uri());
	let filter = PathFilter::new(&config).unwrap();
	let adapter = EngineAdapter::new(&config.elasticsearch).unwrap();

	let mut known_ids = HashSet::new();
	let applied = apply(&adapter, &config, &filter, &mut known_ids, ChangeEvent::Delete(target))
		.await
		.unwrap();

	assert_eq!(applied, 1);
	assert!(known_ids.is_empty());
}

/// Any event touching an extended-attribute side-channel path is
/// dropped before it reaches the engine.
#[tokio::test]
async fn drops_xattr_sidechannel_paths() {
	let dir = TempDir::new().unwrap();

	// No mocks registered: any HTTP call would fail the test by panicking
	// inside wiremock's unmatched-request handler.
	let server = MockServer::start().await;

	let config = config_for(dir.path(), server.uri());
	let filter = PathFilter::new(&config).unwrap();
	let adapter = EngineAdapter::new(&config.elasticsearch).unwrap();

	let mut known_ids = HashSet::new();
	let applied = apply(
		&adapter,
		&config,
		&filter,
		&mut known_ids,
		ChangeEvent::Create(dir.path().join("a.txt:com.apple.FinderInfo")),
	)
	.await
	.unwrap();

	assert_eq!(applied, 0);
	assert!(known_ids.is_empty());
}

/// Renaming a directory rewrites every hit the scope search returns,
/// plus the top-level src->dst pair even when the search doesn't return
/// it directly.
#[tokio::test]
async fn rename_rewrites_subtree_and_top_level_pair() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path_prefix_matcher("/files/_search"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"hits": {
				"hits": [
					{
						"_id": path_to_id(std::path::Path::new("/data/sub/c.txt")),
						"_source": { "path": { "real": "/data/sub/c.txt" }, "file": { "filename": "c.txt" } }
					}
				]
			}
		})))
		.mount(&server)
		.await;

	Mock::given(method("POST"))
		.and(path_prefix_matcher("/_bulk"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "errors": false, "items": [] })))
		.mount(&server)
		.await;

	let config = config_for(std::path::Path::new("/data"), server.uri());
	let filter = PathFilter::new(&config).unwrap();
	let adapter = EngineAdapter::new(&config.elasticsearch).unwrap();

	let mut known_ids = HashSet::new();
	known_ids.insert(path_to_id(std::path::Path::new("/data/sub")));
	known_ids.insert(path_to_id(std::path::Path::new("/data/sub/c.txt")));

	let applied = apply(
		&adapter,
		&config,
		&filter,
		&mut known_ids,
		ChangeEvent::Rename {
			src: "/data/sub".into(),
			dst: "/data/sub2".into(),
		},
	)
	.await
	.unwrap();

	// the hit for c.txt, plus the top-level sub -> sub2 pair.
	assert_eq!(applied, 2);

	assert!(!known_ids.contains(&path_to_id(std::path::Path::new("/data/sub"))));
	assert!(!known_ids.contains(&path_to_id(std::path::Path::new("/data/sub/c.txt"))));
	assert!(known_ids.contains(&path_to_id(std::path::Path::new("/data/sub2"))));
	assert!(known_ids.contains(&path_to_id(std::path::Path::new("/data/sub2/c.txt"))));
}

/// Helper matcher since `wiremock::matchers::path` requires an exact path.
fn path_prefix_matcher(prefix: &'static str) -> impl wiremock::Match {
	struct PathPrefix(&'static str);
	impl wiremock::Match for PathPrefix {
		fn matches(&self, request: &wiremock::Request) -> bool {
			request.url.path().starts_with(self.0)
		}
	}
	PathPrefix(prefix)
}
