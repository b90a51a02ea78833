//! Position conversion utilities for LSP.
//!
//! LSP uses `Position` (line, character) where the character offset depends on
//! the negotiated encoding (UTF-8, UTF-16, or UTF-32). This module converts
//! between rope character indices and LSP positions.
//!
//! Since `Rope` indexes Unicode codepoints, UTF-32 is a 1:1 mapping. UTF-16
//! (the LSP default) counts surrogate pairs as 2 units for characters outside
//! the BMP.

use lsp_types::{Position, Range};
use ropey::{Rope, RopeSlice};

/// Character offset encoding negotiated with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetEncoding {
	/// Character offsets count bytes.
	Utf8,
	/// Character offsets count UTF-16 code units (LSP default).
	#[default]
	Utf16,
	/// Character offsets count Unicode codepoints.
	Utf32,
}

impl OffsetEncoding {
	/// Measures one character in this encoding's units.
	pub fn units_of(self, ch: char) -> usize {
		match self {
			Self::Utf8 => ch.len_utf8(),
			Self::Utf16 => ch.len_utf16(),
			Self::Utf32 => 1,
		}
	}
}

/// Convert an LSP Position to a character index in the rope.
///
/// Returns `None` if the line is out of bounds; columns past the end of a
/// line clamp to the line length.
pub fn lsp_position_to_char(text: &Rope, pos: Position, encoding: OffsetEncoding) -> Option<usize> {
	let line = pos.line as usize;
	if line >= text.len_lines() {
		return None;
	}

	let line_start = text.line_to_char(line);
	let line_text = text.line(line);
	let char_offset = lsp_col_to_char_offset(line_text, pos.character, encoding);

	Some(line_start + char_offset)
}

/// Convert a character index in the rope to an LSP Position.
///
/// Returns `None` if the index is out of bounds.
pub fn char_to_lsp_position(text: &Rope, char_idx: usize, encoding: OffsetEncoding) -> Option<Position> {
	if char_idx > text.len_chars() {
		return None;
	}

	let line = text.char_to_line(char_idx);
	let line_start = text.line_to_char(line);
	let char_offset = char_idx - line_start;
	let line_text = text.line(line);
	let lsp_col = char_offset_to_lsp_col(line_text, char_offset, encoding);

	Some(Position {
		line: line as u32,
		character: lsp_col,
	})
}

/// Convert a character range to an LSP Range.
pub fn char_range_to_lsp_range(text: &Rope, start: usize, end: usize, encoding: OffsetEncoding) -> Option<Range> {
	let start_pos = char_to_lsp_position(text, start, encoding)?;
	let end_pos = char_to_lsp_position(text, end, encoding)?;
	Some(Range {
		start: start_pos,
		end: end_pos,
	})
}

/// Convert an LSP Range to a character range (start, end).
pub fn lsp_range_to_char_range(text: &Rope, range: Range, encoding: OffsetEncoding) -> Option<(usize, usize)> {
	let start = lsp_position_to_char(text, range.start, encoding)?;
	let end = lsp_position_to_char(text, range.end, encoding)?;
	Some((start, end))
}

/// Convert an LSP character column to a rope character offset within a line.
fn lsp_col_to_char_offset(line: RopeSlice, lsp_col: u32, encoding: OffsetEncoding) -> usize {
	let target = lsp_col as usize;
	if encoding == OffsetEncoding::Utf32 {
		return target.min(line_char_len_without_newline(line));
	}

	let mut units = 0;
	for (char_idx, ch) in line.chars().enumerate() {
		if units >= target {
			return char_idx;
		}
		units += encoding.units_of(ch);
	}
	line_char_len_without_newline(line)
}

/// Convert a rope character offset within a line to an LSP character column.
fn char_offset_to_lsp_col(line: RopeSlice, char_offset: usize, encoding: OffsetEncoding) -> u32 {
	line.chars().take(char_offset).map(|ch| encoding.units_of(ch)).sum::<usize>() as u32
}

/// Get the character length of a line, excluding the trailing newline if present.
fn line_char_len_without_newline(line: RopeSlice) -> usize {
	let len = line.len_chars();
	if len > 0 && line.char(len - 1) == '\n' { len - 1 } else { len }
}

#[cfg(test)]
mod tests;
