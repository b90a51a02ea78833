//! Minimal URI accessors.
//!
//! Selector and watcher matching only needs the scheme and the decoded path
//! of a document URI, so this module parses those two pieces directly from
//! the textual form instead of pulling in a full URI library.

use lsp_types::Uri;

/// Returns the scheme of `uri`, or `""` when the text has none.
pub fn scheme_of(uri: &Uri) -> &str {
	let s = uri.as_str();
	match s.find(':') {
		Some(idx) if !s[..idx].contains('/') => &s[..idx],
		_ => "",
	}
}

/// Returns the percent-decoded path component of `uri`.
///
/// For `scheme://authority/p/a/t/h` this is `/p/a/t/h`; for authority-less
/// forms like `inmemory:model.json` it is everything after the scheme.
pub fn path_of(uri: &Uri) -> String {
	let s = uri.as_str();
	let after_scheme = match s.find(':') {
		Some(idx) if !s[..idx].contains('/') => &s[idx + 1..],
		_ => s,
	};

	let raw = if let Some(rest) = after_scheme.strip_prefix("//") {
		match rest.find('/') {
			Some(idx) => &rest[idx..],
			None => "",
		}
	} else {
		after_scheme
	};

	let raw = raw.split(['?', '#']).next().unwrap_or(raw);
	percent_decode(raw)
}

fn percent_decode(s: &str) -> String {
	let mut out = Vec::with_capacity(s.len());
	let bytes = s.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%'
			&& let (Some(hi), Some(lo)) = (hex_val(bytes.get(i + 1)), hex_val(bytes.get(i + 2)))
		{
			out.push(hi << 4 | lo);
			i += 3;
		} else {
			out.push(bytes[i]);
			i += 1;
		}
	}
	String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: Option<&u8>) -> Option<u8> {
	match b? {
		b @ b'0'..=b'9' => Some(b - b'0'),
		b @ b'a'..=b'f' => Some(b - b'a' + 10),
		b @ b'A'..=b'F' => Some(b - b'A' + 10),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use std::str::FromStr;

	use super::*;

	fn uri(s: &str) -> Uri {
		Uri::from_str(s).unwrap()
	}

	#[test]
	fn file_uri_parts() {
		let u = uri("file:///home/user/src%20dir/main.rs");
		assert_eq!(scheme_of(&u), "file");
		assert_eq!(path_of(&u), "/home/user/src dir/main.rs");
	}

	#[test]
	fn inmemory_uri_parts() {
		let u = uri("inmemory://model/m.json");
		assert_eq!(scheme_of(&u), "inmemory");
		assert_eq!(path_of(&u), "/m.json");
	}

	#[test]
	fn authority_only_uri_has_empty_path() {
		let u = uri("untitled://host");
		assert_eq!(path_of(&u), "");
	}
}
