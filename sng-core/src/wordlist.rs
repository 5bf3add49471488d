use std::collections::HashSet;
use std::path::Path;

use crate::error::{Result, SngError};
use crate::io;

/// Characters treated as word separators, on top of whitespace.
pub const FILTERS: &str = "!\"#$%&()*+,-./:;<=>?@[\\]^_`{|}~0123456789–…'\"’«·»";

/// Word lists shipped with the library, by file name.
const BUILTIN_WORDLISTS: &[(&str, &str)] = &[
	("english.txt", include_str!("../wordlists/english.txt")),
	("german.txt", include_str!("../wordlists/german.txt")),
	("latin.txt", include_str!("../wordlists/latin.txt")),
];

/// Turns raw text into a list of unique lower-case words.
///
/// - Punctuation and digits from [`FILTERS`] act as separators
/// - Text is lower-cased and split on whitespace
/// - Duplicates are dropped, first occurrence order is kept
pub fn preprocess(text: &str) -> Vec<String> {
	let lowered = text.to_lowercase();
	let mut seen = HashSet::new();
	lowered
		.split(|c: char| c.is_whitespace() || FILTERS.contains(c))
		.filter(|word| !word.is_empty())
		.filter(|word| seen.insert(*word))
		.map(str::to_owned)
		.collect()
}

/// Reads and preprocesses a text file.
pub fn read_wordlist<P: AsRef<Path>>(filename: P) -> Result<Vec<String>> {
	let path = filename.as_ref();
	let contents = io::read_text(path).map_err(|e| match e.kind() {
		std::io::ErrorKind::NotFound => SngError::NotFound(format!("word list {}", path.display())),
		_ => SngError::Io(e),
	})?;
	Ok(preprocess(&contents))
}

/// Names of the builtin word lists, usable with [`load_builtin_wordlist`].
pub fn show_builtin_wordlists() -> Vec<&'static str> {
	BUILTIN_WORDLISTS.iter().map(|(name, _)| *name).collect()
}

/// Loads and preprocesses one of the builtin word lists.
///
/// The `.txt` extension may be omitted.
///
/// # Errors
/// Returns [`SngError::NotFound`] if no builtin list has this name.
pub fn load_builtin_wordlist(name: &str) -> Result<Vec<String>> {
	let file_name = if name.ends_with(".txt") { name.to_owned() } else { format!("{name}.txt") };
	BUILTIN_WORDLISTS
		.iter()
		.find(|(builtin, _)| *builtin == file_name)
		.map(|(_, contents)| preprocess(contents))
		.ok_or_else(|| SngError::NotFound(format!("builtin word list '{name}'")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn preprocess_filters_and_splits() {
		let words = preprocess("Hello, World! 42 times\tthe world's «end»");
		assert_eq!(words, vec!["hello", "world", "times", "the", "s", "end"]);
	}

	#[test]
	fn preprocess_deduplicates() {
		let words = preprocess("Rabbit rabbit RABBIT hole\nrabbit-hole");
		assert_eq!(words, vec!["rabbit", "hole"]);
	}

	#[test]
	fn preprocess_keeps_accents() {
		assert_eq!(preprocess("Königs Höhe"), vec!["königs", "höhe"]);
	}

	#[test]
	fn builtin_lists() {
		let names = show_builtin_wordlists();
		assert!(names.contains(&"latin.txt"));
		for name in names {
			let words = load_builtin_wordlist(name).unwrap();
			assert!(words.len() > 50, "{name}");
			assert!(words.iter().all(|w| w.chars().all(|c| !c.is_ascii_digit() && !c.is_whitespace())));
		}
		assert_eq!(load_builtin_wordlist("latin").unwrap(), load_builtin_wordlist("latin.txt").unwrap());
	}

	#[test]
	fn unknown_builtin_is_not_found() {
		assert!(matches!(load_builtin_wordlist("klingon"), Err(SngError::NotFound(_))));
	}

	#[test]
	fn missing_file_is_not_found() {
		assert!(matches!(read_wordlist("/definitely/not/here.txt"), Err(SngError::NotFound(_))));
	}
}
