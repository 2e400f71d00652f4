//! Component I: query shapes for the engine's `query_string` parser.

use serde_json::{json, Value};

/// Default page size for all three shapes.
pub const DEFAULT_SIZE: u64 = 100;

/// `(*T* OR content:*T*) AND path.real.fulltext:"S"`.
///
/// Matches files whose name or content contains `term`, scoped to `scope`.
pub fn term_search(term: &str, scope: &str) -> Value {
	query_string(&format!(
		"(*{term}* OR content:*{term}*) AND path.real.fulltext:\"{scope}\"",
	))
}

/// `file.filename: *F* AND path.real.fulltext:"S"`.
pub fn filename_search(filename: &str, scope: &str) -> Value {
	query_string(&format!(
		"file.filename: *{filename}* AND path.real.fulltext:\"{scope}\"",
	))
}

/// `path.real.fulltext:"S"` — used by the rename handler to enumerate
/// every document under a moved directory.
pub fn scope_only(scope: &str) -> Value {
	query_string(&format!("path.real.fulltext:\"{scope}\""))
}

fn query_string(query: &str) -> Value {
	json!({ "query_string": { "query": query } })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn term_search_conjuncts_scope() {
		let q = term_search("report", "/data/shared");
		let query = q["query_string"]["query"].as_str().unwrap();
		assert!(query.contains("*report*"));
		assert!(query.contains("content:*report*"));
		assert!(query.contains(r#"path.real.fulltext:"/data/shared""#));
	}

	#[test]
	fn filename_search_uses_filename_field() {
		let q = filename_search("invoice", "/data/shared");
		let query = q["query_string"]["query"].as_str().unwrap();
		assert!(query.contains("file.filename: *invoice*"));
		assert!(query.contains(r#"path.real.fulltext:"/data/shared""#));
	}

	#[test]
	fn scope_only_has_no_term_clause() {
		let q = scope_only("/data/shared");
		let query = q["query_string"]["query"].as_str().unwrap();
		assert_eq!(query, r#"path.real.fulltext:"/data/shared""#);
	}
}
