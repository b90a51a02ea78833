//! Document selector and glob pattern matching.
//!
//! Selectors arrive as raw JSON inside dynamic registration options. A
//! selector is a language-id string, a `{language?, scheme?, pattern?}`
//! filter, or an array of either (any-of). Patterns are extended globs with
//! `**`; a relative form `{baseUri, pattern}` anchors the glob at a base
//! path. A `null` selector matches every document.

use std::path::Path;

use lsp_types::Uri;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::uri::{path_of, scheme_of};

/// Tests a selector (as found in `registerOptions.documentSelector`) against
/// a document.
pub fn selector_matches(selector: &JsonValue, uri: &Uri, language_id: &str) -> bool {
	match selector {
		JsonValue::Null => true,
		JsonValue::String(language) => language == language_id,
		JsonValue::Array(filters) => filters.iter().any(|f| selector_matches(f, uri, language_id)),
		JsonValue::Object(filter) => filter_matches(filter, uri, language_id),
		_ => false,
	}
}

fn filter_matches(filter: &serde_json::Map<String, JsonValue>, uri: &Uri, language_id: &str) -> bool {
	if let Some(language) = filter.get("language").and_then(JsonValue::as_str)
		&& language != language_id
	{
		return false;
	}

	if let Some(scheme) = filter.get("scheme").and_then(JsonValue::as_str)
		&& scheme != scheme_of(uri)
	{
		return false;
	}

	if let Some(pattern) = filter.get("pattern")
		&& !pattern.is_null()
	{
		return glob_pattern_matches(pattern, &path_of(uri));
	}

	true
}

/// Tests an LSP `GlobPattern` (bare glob string or `{baseUri, pattern}`
/// relative pattern) against a path-like string.
pub fn glob_pattern_matches(pattern: &JsonValue, path: &str) -> bool {
	match pattern {
		JsonValue::String(glob) => glob_matches(glob, path),
		JsonValue::Object(relative) => {
			let Some(glob) = relative.get("pattern").and_then(JsonValue::as_str) else {
				return false;
			};
			let Some(base_path) = relative_base_path(relative.get("baseUri")) else {
				return false;
			};
			let Some(rest) = descendant_suffix(&base_path, path) else {
				return false;
			};
			glob_matches(glob, &rest)
		}
		_ => false,
	}
}

/// Resolves the base path of a relative pattern.
///
/// `baseUri` is either a URI string or a workspace folder `{uri, name}`.
fn relative_base_path(base: Option<&JsonValue>) -> Option<String> {
	let uri_text = match base? {
		JsonValue::String(s) => s.as_str(),
		JsonValue::Object(folder) => folder.get("uri").and_then(JsonValue::as_str)?,
		_ => return None,
	};
	let uri: Uri = uri_text.parse().ok()?;
	Some(path_of(&uri))
}

/// Returns `path` relative to `base` when `path` is a descendant of `base`.
///
/// The parent check uses OS path semantics; the returned suffix is
/// normalized to `/` separators for glob matching.
fn descendant_suffix(base: &str, path: &str) -> Option<String> {
	let suffix = Path::new(path).strip_prefix(Path::new(base)).ok()?;
	let mut text = suffix.to_string_lossy().replace('\\', "/");
	if let Some(trimmed) = text.strip_prefix('/') {
		text = trimmed.to_string();
	}
	Some(text)
}

/// Matches an extended glob (with `**` and `{a,b}` alternations) against a
/// `/`-separated path string.
pub fn glob_matches(glob: &str, path: &str) -> bool {
	let options = glob::MatchOptions {
		case_sensitive: true,
		require_literal_separator: true,
		require_literal_leading_dot: false,
	};

	expand_braces(glob).iter().any(|candidate| match glob::Pattern::new(candidate) {
		Ok(pattern) => pattern.matches_with(path, options),
		Err(err) => {
			debug!(glob = candidate.as_str(), error = %err, "ignoring unparsable glob");
			false
		}
	})
}

/// Expands `{a,b}` alternations into plain globs, one per combination.
///
/// The `glob` crate has no brace support; LSP globs use them routinely
/// (`**/*.{ts,js}`). Nested braces expand recursively.
pub fn expand_braces(glob: &str) -> Vec<String> {
	let Some(open) = glob.find('{') else {
		return vec![glob.to_string()];
	};

	let mut depth = 0usize;
	let mut close = None;
	for (idx, ch) in glob[open..].char_indices() {
		match ch {
			'{' => depth += 1,
			'}' => {
				depth -= 1;
				if depth == 0 {
					close = Some(open + idx);
					break;
				}
			}
			_ => {}
		}
	}
	let Some(close) = close else {
		// Unbalanced brace; treat literally.
		return vec![glob.to_string()];
	};

	let prefix = &glob[..open];
	let body = &glob[open + 1..close];
	let suffix = &glob[close + 1..];

	let mut alternatives = Vec::new();
	let mut depth = 0usize;
	let mut start = 0usize;
	for (idx, ch) in body.char_indices() {
		match ch {
			'{' => depth += 1,
			'}' => depth = depth.saturating_sub(1),
			',' if depth == 0 => {
				alternatives.push(&body[start..idx]);
				start = idx + 1;
			}
			_ => {}
		}
	}
	alternatives.push(&body[start..]);

	let mut expanded = Vec::new();
	for alternative in alternatives {
		for tail in expand_braces(&format!("{prefix}{alternative}{suffix}")) {
			expanded.push(tail);
		}
	}
	expanded
}

#[cfg(test)]
mod tests {
	use std::str::FromStr;

	use serde_json::json;

	use super::*;

	fn uri(s: &str) -> Uri {
		Uri::from_str(s).unwrap()
	}

	#[test]
	fn null_selector_matches_everything() {
		assert!(selector_matches(&JsonValue::Null, &uri("file:///a.rs"), "rust"));
	}

	#[test]
	fn string_selector_matches_language() {
		let u = uri("file:///a.rs");
		assert!(selector_matches(&json!("rust"), &u, "rust"));
		assert!(!selector_matches(&json!("python"), &u, "rust"));
	}

	#[test]
	fn filter_requires_all_present_fields() {
		let u = uri("file:///src/a.rs");
		assert!(selector_matches(&json!({"language": "rust", "scheme": "file"}), &u, "rust"));
		assert!(!selector_matches(&json!({"language": "rust", "scheme": "untitled"}), &u, "rust"));
		assert!(selector_matches(&json!({"pattern": "**/*.rs"}), &u, "rust"));
		assert!(!selector_matches(&json!({"pattern": "**/*.go"}), &u, "rust"));
	}

	#[test]
	fn array_selector_is_any_of() {
		let u = uri("file:///a.rs");
		assert!(selector_matches(&json!(["python", {"scheme": "file"}]), &u, "rust"));
		assert!(!selector_matches(&json!(["python", "go"]), &u, "rust"));
	}

	#[test]
	fn relative_pattern_requires_descendant() {
		let pattern = json!({"baseUri": "file:///workspace", "pattern": "src/**/*.rs"});
		assert!(glob_pattern_matches(&pattern, "/workspace/src/deep/mod.rs"));
		assert!(!glob_pattern_matches(&pattern, "/elsewhere/src/mod.rs"));
		assert!(!glob_pattern_matches(&pattern, "/workspace/tests/mod.rs"));
	}

	#[test]
	fn relative_pattern_accepts_workspace_folder_base() {
		let pattern = json!({"baseUri": {"uri": "file:///ws", "name": "ws"}, "pattern": "*.toml"});
		assert!(glob_pattern_matches(&pattern, "/ws/Cargo.toml"));
		assert!(!glob_pattern_matches(&pattern, "/ws/nested/Cargo.toml"));
	}

	#[test]
	fn globstar_crosses_directories_but_star_does_not() {
		assert!(glob_matches("**/*.rs", "a/b/c.rs"));
		assert!(glob_matches("*.rs", "c.rs"));
		assert!(!glob_matches("*.rs", "a/c.rs"));
	}

	#[test]
	fn braces_expand() {
		assert_eq!(expand_braces("*.{ts,js}"), vec!["*.ts", "*.js"]);
		assert_eq!(expand_braces("plain"), vec!["plain"]);
		assert!(glob_matches("**/*.{ts,tsx}", "src/app.tsx"));
		assert!(!glob_matches("**/*.{ts,tsx}", "src/app.rs"));
	}

	#[test]
	fn nested_braces_expand() {
		let expanded = expand_braces("a{b,c{d,e}}f");
		assert_eq!(expanded, vec!["abf", "acdf", "acef"]);
	}
}
