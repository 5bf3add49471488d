use std::collections::{BTreeSet, HashMap};

use ndarray::Array1;

use crate::error::{Result, SngError};

/// End-of-word symbol. Always stored at index 0.
pub const TERMINATOR: char = '\n';

/// Index of [`TERMINATOR`] in every vocabulary.
pub const TERMINATOR_INDEX: usize = 0;

/// Character alphabet of a corpus with a stable index mapping.
///
/// The alphabet is the sorted set of characters seen in the words,
/// with the terminator forced to the front. Building from the same
/// set of words always yields the same vocabulary, whatever their order.
///
/// ## Invariants
/// - `characters[0] == TERMINATOR`
/// - `index_of` and `char_of` are inverse bijections over `0..len()`
/// - At least one non-terminator character
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
	characters: Vec<char>,
	indices: HashMap<char, usize>,
}

impl Vocabulary {
	/// Builds the vocabulary of a word list.
	///
	/// Words may or may not already carry a trailing terminator.
	///
	/// # Errors
	/// - the list holds no non-empty word
	/// - the words contain no character besides the terminator
	pub fn from_words<S: AsRef<str>>(words: &[S]) -> Result<Self> {
		let mut usable = 0;
		let mut alphabet = BTreeSet::new();
		for word in words {
			let word = word.as_ref().trim_end_matches(TERMINATOR);
			if word.is_empty() {
				continue;
			}
			usable += 1;
			alphabet.extend(word.chars().filter(|c| *c != TERMINATOR));
		}

		if usable == 0 {
			return Err(SngError::config("the corpus holds no usable word"));
		}

		let mut characters = Vec::with_capacity(alphabet.len() + 1);
		characters.push(TERMINATOR);
		characters.extend(alphabet);

		Self::from_characters(characters)
	}

	/// Rebuilds a vocabulary from an ordered character list.
	fn from_characters(characters: Vec<char>) -> Result<Self> {
		if characters.len() <= 1 {
			return Err(SngError::config("vocabulary must hold at least one character besides the terminator"));
		}
		let indices = characters.iter().enumerate().map(|(i, c)| (*c, i)).collect();
		Ok(Self { characters, indices })
	}

	/// Number of symbols, terminator included.
	pub fn len(&self) -> usize {
		self.characters.len()
	}

	/// Always false, a vocabulary holds at least two symbols.
	pub fn is_empty(&self) -> bool {
		self.characters.is_empty()
	}

	/// All symbols ordered by index.
	pub fn characters(&self) -> &[char] {
		&self.characters
	}

	pub fn contains(&self, c: char) -> bool {
		self.indices.contains_key(&c)
	}

	pub fn index_of(&self, c: char) -> Option<usize> {
		self.indices.get(&c).copied()
	}

	pub fn char_of(&self, index: usize) -> Option<char> {
		self.characters.get(index).copied()
	}

	/// One-hot vector for `c`.
	///
	/// Returns `None` if `c` is not part of the alphabet.
	pub fn one_hot(&self, c: char) -> Option<Array1<f32>> {
		let index = self.index_of(c)?;
		let mut v = Array1::zeros(self.len());
		v[index] = 1.0;
		Some(v)
	}
}
