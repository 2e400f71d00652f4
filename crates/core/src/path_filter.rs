//! Component A: decide per-path whether to index.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::Config;

/// Compiled admission rules: substrings, anchored regular expressions and
/// the configured root directories. Built once from [`Config`] and reused
/// for every path tested, so the (possibly many) regexes are compiled a
/// single time rather than per call.
pub struct PathFilter {
	roots: Vec<PathBuf>,
	partial_paths: Vec<String>,
	regular_expressions: Vec<Regex>,
}

impl PathFilter {
	/// Builds a filter from configuration.
	///
	/// Regular expressions are anchored to the start of the path,
	/// regardless of whether the operator wrote a leading `^` themselves.
	pub fn new(config: &Config) -> Result<Self, regex::Error> {
		let regular_expressions = config
			.exclusions
			.regular_expressions
			.iter()
			.map(|pattern| anchor(pattern))
			.collect::<Result<Vec<_>, _>>()?;

		Ok(Self {
			roots: config.directories.clone(),
			partial_paths: config.exclusions.partial_paths.clone(),
			regular_expressions,
		})
	}

	/// Tests whether `path` should be indexed.
	///
	/// Rules are evaluated in order: root-prefix check (if requested),
	/// substring exclusions, then regex exclusions. No I/O is performed.
	pub fn admits(&self, path: &Path, check_under_roots: bool) -> bool {
		if check_under_roots && !self.is_under_a_root(path) {
			return false;
		}

		let path_str = path.to_string_lossy();

		if self
			.partial_paths
			.iter()
			.any(|needle| path_str.contains(needle.as_str()))
		{
			return false;
		}

		if self
			.regular_expressions
			.iter()
			.any(|re| re.is_match(&path_str))
		{
			return false;
		}

		true
	}

	fn is_under_a_root(&self, path: &Path) -> bool {
		self.roots.iter().any(|root| path.starts_with(root))
	}
}

fn anchor(pattern: &str) -> Result<Regex, regex::Error> {
	if pattern.starts_with('^') {
		Regex::new(pattern)
	} else {
		Regex::new(&format!("^(?:{pattern})"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{Config, Exclusions};

	fn config(roots: &[&str], partial: &[&str], regexes: &[&str]) -> Config {
		Config {
			directories: roots.iter().map(PathBuf::from).collect(),
			exclusions: Exclusions {
				partial_paths: partial.iter().map(|s| s.to_string()).collect(),
				regular_expressions: regexes.iter().map(|s| s.to_string()).collect(),
			},
			wait_time: "30m".to_string(),
			use_fanotify: false,
			samba: Default::default(),
			elasticsearch: Default::default(),
			index_file_dates: false,
			add_additional_fields: false,
			dump_documents_on_error: false,
		}
	}

	#[test]
	fn admits_plain_path() {
		let filter = PathFilter::new(&config(&["/data"], &[], &[])).unwrap();
		assert!(filter.admits(Path::new("/data/a.txt"), false));
	}

	#[test]
	fn rejects_substring_match() {
		let filter = PathFilter::new(&config(&["/data"], &[".tmp"], &[])).unwrap();
		assert!(!filter.admits(Path::new("/data/b.tmp"), false));
		assert!(filter.admits(Path::new("/data/a.txt"), false));
	}

	#[test]
	fn rejects_anchored_regex_match() {
		let filter = PathFilter::new(&config(&["/data"], &[], &["/data/\\.recycle"])).unwrap();
		assert!(!filter.admits(Path::new("/data/.recycle/x"), false));
		assert!(filter.admits(Path::new("/data/normal"), false));
	}

	#[test]
	fn root_check_rejects_paths_outside_roots() {
		let filter = PathFilter::new(&config(&["/data"], &[], &[])).unwrap();
		assert!(!filter.admits(Path::new("/other/a.txt"), true));
		assert!(filter.admits(Path::new("/data/a.txt"), true));
	}

	/// Prepending a configured substring anywhere in an admitted path
	/// flips it to rejected.
	#[test]
	fn prepending_excluded_substring_flips_admission() {
		let filter = PathFilter::new(&config(&["/data"], &[".tmp"], &[])).unwrap();
		let admitted = Path::new("/data/a.txt");
		assert!(filter.admits(admitted, false));

		let rejected = PathBuf::from("/data/.tmp/a.txt");
		assert!(!filter.admits(&rejected, false));
	}

	/// Re-evaluating the same path with the same configuration is stable.
	#[test]
	fn admission_is_stable_under_reevaluation() {
		let filter = PathFilter::new(&config(&["/data"], &[".tmp"], &["^/data/\\.recycle"])).unwrap();
		let path = Path::new("/data/sub/c.txt");
		assert_eq!(filter.admits(path, false), filter.admits(path, false));
	}
}
