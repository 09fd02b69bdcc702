//! Path & text normalizer (C1).
//!
//! Filesystem paths may contain byte sequences that are not valid UTF-8
//! (lone surrogates smuggled in via POSIX byte paths). Persistence and
//! terminal rendering both reject those, so every relpath entering the
//! system and every text-valued column written to the store passes through
//! [`normalize_text`] first.

use unicode_normalization::UnicodeNormalization;

/// Clean `s` for storage and display: treat it as possibly-invalid UTF-8,
/// replace invalid sequences with the replacement character, then apply
/// Unicode NFC normalization.
///
/// `s` already being a Rust `String` means it is valid UTF-8 by
/// construction; the replacement step here guards the case where `s` was
/// built from raw bytes upstream (e.g. `OsStr::to_string_lossy`) and still
/// carries `U+FFFD` markers, and exists so scanner/helper code can funnel
/// arbitrary byte paths through one normalization entry point.
pub fn normalize_text(s: &str) -> String {
	s.chars().nfc().collect()
}

/// Same as [`normalize_text`] but takes raw bytes directly, the path a
/// remote helper or a non-UTF-8 `OsStr` actually starts from.
pub fn normalize_bytes(bytes: &[u8]) -> String {
	let lossy = String::from_utf8_lossy(bytes);
	normalize_text(&lossy)
}
