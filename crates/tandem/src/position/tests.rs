use lsp_types::Position;
use ropey::Rope;

use super::*;

#[test]
fn ascii_round_trip() {
	let text = Rope::from_str("hello\nworld\n");

	let pos = char_to_lsp_position(&text, 8, OffsetEncoding::Utf16).unwrap();
	assert_eq!(pos, Position { line: 1, character: 2 });
	assert_eq!(lsp_position_to_char(&text, pos, OffsetEncoding::Utf16), Some(8));
}

#[test]
fn utf16_counts_surrogate_pairs() {
	// '😀' is U+1F600, two UTF-16 code units.
	let text = Rope::from_str("a😀b\n");

	let pos = char_to_lsp_position(&text, 2, OffsetEncoding::Utf16).unwrap();
	assert_eq!(pos, Position { line: 0, character: 3 });
	assert_eq!(lsp_position_to_char(&text, pos, OffsetEncoding::Utf16), Some(2));

	let pos32 = char_to_lsp_position(&text, 2, OffsetEncoding::Utf32).unwrap();
	assert_eq!(pos32, Position { line: 0, character: 2 });
}

#[test]
fn utf8_counts_bytes() {
	// 'é' is two bytes in UTF-8.
	let text = Rope::from_str("é!");

	let pos = char_to_lsp_position(&text, 1, OffsetEncoding::Utf8).unwrap();
	assert_eq!(pos, Position { line: 0, character: 2 });
	assert_eq!(lsp_position_to_char(&text, pos, OffsetEncoding::Utf8), Some(1));
}

#[test]
fn column_past_line_end_clamps() {
	let text = Rope::from_str("ab\ncd\n");
	let idx = lsp_position_to_char(&text, Position { line: 0, character: 99 }, OffsetEncoding::Utf16);
	// Clamped to before the newline of line 0.
	assert_eq!(idx, Some(2));
}

#[test]
fn line_out_of_bounds_is_none() {
	let text = Rope::from_str("ab\n");
	// "ab\n" has two rope lines (the trailing empty one included).
	assert_eq!(lsp_position_to_char(&text, Position { line: 5, character: 0 }, OffsetEncoding::Utf16), None);
}

#[test]
fn end_of_document_position() {
	let text = Rope::from_str("ab\ncd");
	let pos = char_to_lsp_position(&text, text.len_chars(), OffsetEncoding::Utf16).unwrap();
	assert_eq!(pos, Position { line: 1, character: 2 });
}

#[test]
fn position_after_trailing_newline() {
	let text = Rope::from_str("ab\n");
	let pos = char_to_lsp_position(&text, 3, OffsetEncoding::Utf16).unwrap();
	assert_eq!(pos, Position { line: 1, character: 0 });
}
