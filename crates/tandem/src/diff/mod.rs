//! Incremental text diffing for `textDocument/didChange`.
//!
//! Computes minimal content changes between two document snapshots, in LSP
//! form and in reverse document order so each range stays valid while the
//! server applies the list top-down.
//!
//! The computation runs under a wall-clock budget. The diff algorithm checks
//! the deadline while it works, so a pathological input (a whole-file paste
//! of unrelated content) is preempted mid-computation rather than after the
//! fact. On overrun the engine returns [`Error::Timeout`] and the caller
//! falls back to a single full-text replacement, which is always correct.

use std::time::{Duration, Instant};

use lsp_types::TextDocumentContentChangeEvent;
use ropey::Rope;
use similar::{DiffOp, DiffTag, TextDiffConfig};

use crate::position::{OffsetEncoding, char_range_to_lsp_range};
use crate::{Error, Result};

/// Default diff time budget.
///
/// A minimal diff of a large replaced document can take seconds and would
/// stall every attached client; a full-text replace is merely more expensive
/// for the server.
pub const DEFAULT_DIFF_BUDGET: Duration = Duration::from_millis(20);

/// Computes LSP content changes that transform `old` into `new`.
///
/// Changes are character-level, coalesced (adjacent delete+insert become one
/// replacement), positioned against `old` in the given `encoding`, and
/// ordered bottom-up.
///
/// Identical inputs produce an empty list; callers elide the notification.
///
/// # Errors
///
/// [`Error::Timeout`] when the budget is exceeded. The partial computation is
/// discarded.
pub fn compute_changes(old: &str, new: &str, budget: Duration, encoding: OffsetEncoding) -> Result<Vec<TextDocumentContentChangeEvent>> {
	if old == new {
		return Ok(Vec::new());
	}

	let started = Instant::now();
	let diff = TextDiffConfig::default().deadline(started + budget).diff_chars(old, new);

	// The deadline makes the algorithm bail out with a coarser (still valid)
	// op list; treat an overrun as failure so the caller sends one full
	// replacement instead of a misleadingly fine-grained giant edit.
	if started.elapsed() >= budget {
		return Err(Error::Timeout(budget));
	}

	let old_rope = Rope::from_str(old);
	let new_rope = Rope::from_str(new);

	let mut changes = Vec::new();
	for op in diff.ops() {
		if op.tag() == DiffTag::Equal {
			continue;
		}
		changes.push(op_to_change(op, &old_rope, &new_rope, encoding)?);
	}

	changes.reverse();
	Ok(changes)
}

/// Builds the full-text replacement used when the incremental path fails.
pub fn full_replacement(new: impl Into<String>) -> TextDocumentContentChangeEvent {
	TextDocumentContentChangeEvent {
		range: None,
		range_length: None,
		text: new.into(),
	}
}

fn op_to_change(op: &DiffOp, old_rope: &Rope, new_rope: &Rope, encoding: OffsetEncoding) -> Result<TextDocumentContentChangeEvent> {
	let old_range = op.old_range();
	let new_range = op.new_range();

	let range = char_range_to_lsp_range(old_rope, old_range.start, old_range.end, encoding)
		.ok_or_else(|| Error::Protocol(format!("diff op out of bounds: {old_range:?}")))?;

	let range_length = old_rope.slice(old_range.clone()).chars().map(|ch| encoding.units_of(ch)).sum::<usize>() as u32;

	Ok(TextDocumentContentChangeEvent {
		range: Some(range),
		range_length: Some(range_length),
		text: new_rope.slice(new_range).to_string(),
	})
}
