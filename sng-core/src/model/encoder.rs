use ndarray::Array3;

use super::vocabulary::Vocabulary;
use crate::error::{Result, SngError};

/// Teacher-forcing training tensors for a corpus.
///
/// Both tensors have shape `(words, max_word_len, vocab_size)`.
/// `targets[n, t]` holds the character that follows `inputs[n, t]`,
/// so `targets[n, t] == inputs[n, t + 1]` wherever the word is long enough.
#[derive(Clone, Debug)]
pub struct EncodedCorpus {
	pub inputs: Array3<f32>,
	pub targets: Array3<f32>,
}

impl EncodedCorpus {
	pub fn len(&self) -> usize {
		self.inputs.dim().0
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// One-hot encodes every word of `words`.
///
/// Words are expected to end with the terminator, which is what teaches
/// the model to close a word after its last real character. Words longer
/// than `max_word_len` are truncated; positions past a word's end stay
/// all-zero in both tensors.
///
/// # Errors
/// Returns a configuration error if `max_word_len` is zero or a word uses
/// a character outside the vocabulary.
pub fn encode<S: AsRef<str>>(words: &[S], vocabulary: &Vocabulary, max_word_len: usize) -> Result<EncodedCorpus> {
	if max_word_len == 0 {
		return Err(SngError::config("max_word_len must be >= 1"));
	}

	let shape = (words.len(), max_word_len, vocabulary.len());
	let mut inputs = Array3::<f32>::zeros(shape);
	let mut targets = Array3::<f32>::zeros(shape);

	for (n, word) in words.iter().enumerate() {
		for (t, c) in word.as_ref().chars().take(max_word_len).enumerate() {
			let index = vocabulary
				.index_of(c)
				.ok_or_else(|| SngError::config(format!("character {c:?} is not part of the vocabulary")))?;
			inputs[[n, t, index]] = 1.0;
			if t > 0 {
				// the 'next char' of position t - 1
				targets[[n, t - 1, index]] = 1.0;
			}
		}
	}

	Ok(EncodedCorpus { inputs, targets })
}
