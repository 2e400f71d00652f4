//! Component B: deterministically derive a document id from a path and
//! build the document body.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;

/// The unit stored in the search engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
	pub id: String,
	pub path: PathField,
	pub file: FileField,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathField {
	pub real: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileField {
	pub filename: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub filesize: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_modified: Option<i64>,
}

/// Derives the document id for `path`: hex of SHA-256 over the path's raw
/// on-disk byte encoding.
///
/// On Unix, filesystem paths are arbitrary byte sequences that need not be
/// valid UTF-8 (lone surrogates can appear when a directory contains
/// bytes transcoded from e.g. Windows filenames). Hashing the raw
/// `OsStr` bytes directly reproduces the Python original's
/// `path.encode('utf-8', 'surrogatepass')` behavior without needing an
/// actual surrogate-pass re-encoding step: the bytes are already the
/// "encoding" there is. Deterministic: hashing the same path twice, on any
/// host, always yields the same id.
pub fn path_to_id(path: &Path) -> String {
	let bytes = path_bytes(path);
	let mut hasher = Sha256::new();
	hasher.update(&bytes);
	hex::encode(hasher.finalize())
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
	use std::os::unix::ffi::OsStrExt;
	path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
	path.to_string_lossy().as_bytes().to_vec()
}

/// Maps a path to a document, returning `Ok(None)` ("skip") if the file
/// vanished between discovery and stat rather than treating that as a
/// hard error — the caller must not count it as a failure.
pub fn map_path(path: &Path, filename: &str, config: &Config) -> std::io::Result<Option<Document>> {
	let real = path.to_string_lossy().into_owned();
	let id = path_to_id(path);

	let (filesize, last_modified) = if config.add_additional_fields || config.index_file_dates {
		match std::fs::metadata(path) {
			Ok(metadata) => {
				let filesize = config.add_additional_fields.then_some(metadata.len());
				let last_modified = config.index_file_dates.then(|| {
					metadata
						.modified()
						.ok()
						.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
						.map(|d| d.as_secs() as i64)
						.unwrap_or(0)
				});
				(filesize, last_modified)
			}
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(err) => return Err(err),
		}
	} else {
		(None, None)
	};

	Ok(Some(Document {
		id,
		path: PathField { real },
		file: FileField {
			filename: filename.to_string(),
			filesize,
			last_modified,
		},
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	/// The id is a pure, deterministic function of the path: hashing the
	/// same path twice always agrees, even across independent callers.
	#[test]
	fn id_is_pure_function_of_path() {
		let a = path_to_id(Path::new("/data/a.txt"));
		let b = path_to_id(Path::new("/data/a.txt"));
		assert_eq!(a, b);
		assert_eq!(a.len(), 64);

		let different = path_to_id(Path::new("/data/b.txt"));
		assert_ne!(a, different);
	}

	#[cfg(unix)]
	#[test]
	fn id_handles_non_utf8_bytes() {
		use std::ffi::OsStr;
		use std::os::unix::ffi::OsStrExt;

		let valid = Path::new("/data/a.txt");
		let invalid = Path::new(OsStr::from_bytes(b"/data/\xff\xfe.txt"));
		// Should not panic, and should differ from a valid-UTF-8 path's id.
		assert_ne!(path_to_id(valid), path_to_id(invalid));
	}
}
