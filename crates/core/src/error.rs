use std::path::PathBuf;

/// Errors raised while loading or validating the daemon's configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse config file {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
	#[error(r#"unknown or malformed "wait_time": {0:?}, expected "<int>s|m|h|d""#)]
	InvalidWaitTime(String),
}

/// Errors surfaced by the [`crate::engine::EngineAdapter`].
///
/// Connection errors are fatal, `BadRequest` on `put_mapping` is
/// recoverable, and `NotFound` on `single_delete` is benign and handled
/// by the caller rather than here.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
	#[error("failed to reach search engine at {url}: {source}")]
	Connection {
		url: String,
		#[source]
		source: reqwest_middleware::Error,
	},
	#[error("search engine rejected the request (bad request): {0}")]
	BadRequest(String),
	#[error("index {0:?} already exists")]
	AlreadyExists(String),
	#[error("index {0:?} not found")]
	NotFound(String),
	#[error("search engine returned an unexpected status {status}: {body}")]
	Unexpected { status: u16, body: String },
	#[error("failed to (de)serialize request/response body: {0}")]
	Serde(#[from] serde_json::Error),
	#[error("bulk request failed: {0}")]
	BulkFailed(String),
	#[error("failed to read CA bundle {path}: {source}")]
	CaCertRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse CA bundle {path}: {source}")]
	CaCertParse {
		path: PathBuf,
		#[source]
		source: reqwest::Error,
	},
	#[error("failed to build http client: {0}")]
	ClientBuild(#[source] reqwest::Error),
}

/// Top-level error type aggregating every subsystem's errors, used by the
/// daemon loop and the CLI's command handlers.
///
/// The audit-log and kernel-notify change sources never surface their own
/// failures here: both treat a failed `start`/`watch` as non-fatal and fall
/// back to sleep-only polling, logging the underlying cause themselves.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Engine(#[from] EngineError),
	#[error("io error at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
