//! Declarative daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration, loaded once at startup and shared by reference
/// with every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub directories: Vec<PathBuf>,

	#[serde(default)]
	pub exclusions: Exclusions,

	#[serde(default = "default_wait_time")]
	pub wait_time: String,

	#[serde(default)]
	pub use_fanotify: bool,

	#[serde(default)]
	pub samba: SambaConfig,

	#[serde(default)]
	pub elasticsearch: ElasticsearchConfig,

	#[serde(default)]
	pub index_file_dates: bool,

	#[serde(default)]
	pub add_additional_fields: bool,

	#[serde(default)]
	pub dump_documents_on_error: bool,
}

fn default_wait_time() -> String {
	"30m".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Exclusions {
	#[serde(default)]
	pub partial_paths: Vec<String>,
	#[serde(default)]
	pub regular_expressions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SambaConfig {
	pub audit_log: Option<PathBuf>,
	#[serde(default = "default_monitor_sleep_time")]
	pub monitor_sleep_time: u64,
}

impl Default for SambaConfig {
	fn default() -> Self {
		Self {
			audit_log: None,
			monitor_sleep_time: default_monitor_sleep_time(),
		}
	}
}

fn default_monitor_sleep_time() -> u64 {
	1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
	#[serde(default = "default_es_url")]
	pub url: String,
	#[serde(default = "default_es_index")]
	pub index: String,
	#[serde(default = "default_bulk_size")]
	pub bulk_size: usize,
	pub user: Option<String>,
	pub password: Option<String>,
	#[serde(default = "default_true")]
	pub verify_certs: bool,
	#[serde(default = "default_true")]
	pub ssl_show_warn: bool,
	pub ca_certs: Option<PathBuf>,
	pub index_mapping: Option<PathBuf>,
	pub index_settings: Option<PathBuf>,
	/// Accepted for compatibility with configuration files migrated from
	/// the original Python tool; no longer selects between two client code
	/// paths (see DESIGN.md).
	#[serde(default = "default_library_version")]
	pub library_version: u8,
}

impl Default for ElasticsearchConfig {
	fn default() -> Self {
		Self {
			url: default_es_url(),
			index: default_es_index(),
			bulk_size: default_bulk_size(),
			user: None,
			password: None,
			verify_certs: true,
			ssl_show_warn: true,
			ca_certs: None,
			index_mapping: None,
			index_settings: None,
			library_version: default_library_version(),
		}
	}
}

fn default_es_url() -> String {
	"http://localhost:9200".to_string()
}
fn default_es_index() -> String {
	"files".to_string()
}
fn default_bulk_size() -> usize {
	10_000
}
fn default_true() -> bool {
	true
}
fn default_library_version() -> u8 {
	8
}

impl Config {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;

		let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})?;

		// Parse eagerly so a malformed wait_time is fatal at startup.
		config.wait_time_duration()?;

		Ok(config)
	}

	/// Parses `wait_time` (`<int><s|m|h|d>`) into a [`Duration`].
	///
	/// Unknown units or unparsable strings are a fatal configuration error.
	pub fn wait_time_duration(&self) -> Result<Duration, ConfigError> {
		parse_wait_time(&self.wait_time)
	}
}

fn parse_wait_time(raw: &str) -> Result<Duration, ConfigError> {
	let digits_end = raw
		.find(|c: char| !c.is_ascii_digit())
		.filter(|&i| i > 0)
		.ok_or_else(|| ConfigError::InvalidWaitTime(raw.to_string()))?;

	let (number, unit) = raw.split_at(digits_end);
	if unit.len() != 1 {
		return Err(ConfigError::InvalidWaitTime(raw.to_string()));
	}

	let count: u64 = number
		.parse()
		.map_err(|_| ConfigError::InvalidWaitTime(raw.to_string()))?;

	let seconds = match unit {
		"s" => count,
		"m" => count * 60,
		"h" => count * 60 * 60,
		"d" => count * 60 * 60 * 24,
		_ => return Err(ConfigError::InvalidWaitTime(raw.to_string())),
	};

	Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_seconds_minutes_hours_days() {
		assert_eq!(parse_wait_time("30s").unwrap(), Duration::from_secs(30));
		assert_eq!(parse_wait_time("5m").unwrap(), Duration::from_secs(300));
		assert_eq!(parse_wait_time("2h").unwrap(), Duration::from_secs(7200));
		assert_eq!(parse_wait_time("1d").unwrap(), Duration::from_secs(86_400));
	}

	#[test]
	fn rejects_unknown_unit() {
		assert!(parse_wait_time("30x").is_err());
	}

	#[test]
	fn rejects_unparsable_string() {
		assert!(parse_wait_time("soon").is_err());
		assert!(parse_wait_time("").is_err());
		assert!(parse_wait_time("30").is_err());
	}
}
