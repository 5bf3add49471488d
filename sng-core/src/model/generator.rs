use log::debug;
use ndarray::{s, Array1, Array2, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SngError};
use crate::model::network::SequenceModel;
use crate::model::sampler::{argmax_except, check_temperature, draw, temperature_scale};
use crate::model::state::SamplingState;
use crate::model::vocabulary::{Vocabulary, TERMINATOR_INDEX};

/// Default ceiling of terminator redraws before giving up.
pub const DEFAULT_TERMINATOR_RETRIES: usize = 1000;

/// Anything able to predict the next-character distribution of a one-hot prefix.
///
/// Implemented by [`SequenceModel`]; tests plug scripted models in here.
pub trait NextCharModel {
	fn vocab_size(&self) -> usize;

	/// Longest prefix accepted by [`NextCharModel::predict_next`].
	fn max_seq_len(&self) -> usize;

	fn predict_next(&self, prefix: ArrayView2<f32>) -> Result<Array1<f32>>;
}

impl NextCharModel for SequenceModel {
	fn vocab_size(&self) -> usize {
		SequenceModel::vocab_size(self)
	}

	fn max_seq_len(&self) -> usize {
		SequenceModel::max_seq_len(self)
	}

	fn predict_next(&self, prefix: ArrayView2<f32>) -> Result<Array1<f32>> {
		SequenceModel::predict_next(self, prefix)
	}
}

/// Snapshot of the parameters driving a generation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SamplingParams {
	/// Sampling sharpness, in (0, inf).
	pub temperature: f64,

	/// Terminators drawn before this length are redrawn.
	pub min_word_len: usize,

	/// Hard upper bound on the generated length.
	pub max_word_len: usize,

	/// Redraw ceiling, after which a terminator is accepted anyway.
	pub terminator_retries: usize,
}

impl Default for SamplingParams {
	fn default() -> Self {
		Self {
			temperature: 1.0,
			min_word_len: 4,
			max_word_len: 12,
			terminator_retries: DEFAULT_TERMINATOR_RETRIES,
		}
	}
}

impl SamplingParams {
	/// # Errors
	/// Returns a configuration error for a non-positive temperature,
	/// a zero `max_word_len`, or `min_word_len > max_word_len`.
	pub fn validate(&self) -> Result<()> {
		check_temperature(self.temperature)?;
		if self.max_word_len == 0 {
			return Err(SngError::config("max_word_len must be >= 1"));
		}
		if self.min_word_len > self.max_word_len {
			return Err(SngError::config(format!(
				"min_word_len ({}) must not exceed max_word_len ({})",
				self.min_word_len, self.max_word_len
			)));
		}
		Ok(())
	}
}

/// Result of one generation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneratedWord {
	/// The word, first letter uppercased, terminator excluded.
	pub text: String,

	/// A terminator was accepted before `min_word_len` after exhausting the retries.
	pub escaped: bool,

	/// The first character kept drawing the terminator and was replaced by
	/// the most likely other character.
	pub first_char_forced: bool,
}

impl GeneratedWord {
	/// Length in characters.
	pub fn len(&self) -> usize {
		self.text.chars().count()
	}

	pub fn is_empty(&self) -> bool {
		self.text.is_empty()
	}
}

/// Appends the uppercase form of `c`.
///
/// `'ß'` becomes the capital `'ẞ'` so the word keeps one character per
/// sampled symbol, any other character takes its full uppercase form.
fn push_uppercase(text: &mut String, c: char) {
	match c {
		'ß' => text.push('ẞ'),
		_ => text.extend(c.to_uppercase()),
	}
}

/// Autoregressive word sampler.
///
/// Feeds a growing one-hot prefix to the model, reshapes every predicted
/// distribution with the temperature and draws the next character.
///
/// # Responsibilities
/// - Never start a word with the terminator
/// - Redraw early terminators until `min_word_len`, within the retry ceiling
/// - Stop at the terminator or after `max_word_len` characters
pub struct WordGenerator<'a, M: NextCharModel + ?Sized> {
	model: &'a M,
	vocabulary: &'a Vocabulary,
	params: &'a SamplingParams,
}

impl<'a, M: NextCharModel + ?Sized> WordGenerator<'a, M> {
	/// # Errors
	/// - configuration error if `params` is invalid
	/// - shape error if the model does not match the vocabulary or cannot
	///   read prefixes as long as `max_word_len`
	pub fn new(model: &'a M, vocabulary: &'a Vocabulary, params: &'a SamplingParams) -> Result<Self> {
		params.validate()?;
		if model.vocab_size() != vocabulary.len() {
			return Err(SngError::shape(format!(
				"model predicts {} symbols, vocabulary has {}",
				model.vocab_size(),
				vocabulary.len()
			)));
		}
		if params.max_word_len > model.max_seq_len() {
			return Err(SngError::shape(format!(
				"max_word_len {} exceeds the model sequence length {}",
				params.max_word_len,
				model.max_seq_len()
			)));
		}
		Ok(Self { model, vocabulary, params })
	}

	fn distribution(&self, prefix: ArrayView2<f32>) -> Result<Array1<f64>> {
		let probabilities = self.model.predict_next(prefix)?;
		temperature_scale(probabilities.view(), self.params.temperature)
	}

	fn char_at(&self, index: usize) -> Result<char> {
		self.vocabulary
			.char_of(index)
			.ok_or_else(|| SngError::shape(format!("index {index} is outside the vocabulary")))
	}

	/// Draws the first character, which can never be the terminator.
	///
	/// After `terminator_retries` terminator draws the most likely other
	/// character is taken instead.
	fn draw_first<R: Rng + ?Sized>(&self, distribution: &Array1<f64>, rng: &mut R, word: &mut GeneratedWord) -> Result<usize> {
		for _ in 0..=self.params.terminator_retries {
			let index = draw(distribution, rng);
			if index != TERMINATOR_INDEX {
				return Ok(index);
			}
		}

		debug!("first character keeps sampling the terminator, taking the most likely character");
		word.first_char_forced = true;
		argmax_except(distribution, TERMINATOR_INDEX)
			.ok_or_else(|| SngError::config("vocabulary holds only the terminator"))
	}

	/// Draws the character at `position`, redrawing early terminators.
	fn draw_next<R: Rng + ?Sized>(&self, distribution: &Array1<f64>, position: usize, rng: &mut R, word: &mut GeneratedWord) -> usize {
		let mut index = draw(distribution, rng);
		let mut retries = 0;

		while index == TERMINATOR_INDEX && position < self.params.min_word_len {
			if retries >= self.params.terminator_retries {
				debug!(
					"caught in a near-infinite loop at position {position}, accepting the terminator \
					(temperature {} may be too low)",
					self.params.temperature
				);
				word.escaped = true;
				break;
			}
			retries += 1;
			index = draw(distribution, rng);
		}

		index
	}

	/// Generates one word.
	pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<GeneratedWord> {
		let max_word_len = self.params.max_word_len;
		let mut buffer = Array2::<f32>::zeros((max_word_len, self.vocabulary.len()));
		let mut word = GeneratedWord::default();
		let mut state = SamplingState::AwaitingFirstChar;

		while !state.is_done() {
			state = match state {
				SamplingState::AwaitingFirstChar => {
					// An all-zero row stands for the empty prefix
					let distribution = self.distribution(buffer.slice(s![0..1, ..]))?;
					let index = self.draw_first(&distribution, rng, &mut word)?;
					buffer[[0, index]] = 1.0;

					push_uppercase(&mut word.text, self.char_at(index)?);
					SamplingState::advance(0, max_word_len, false)
				}
				SamplingState::Sampling { position } => {
					let distribution = self.distribution(buffer.slice(s![0..position, ..]))?;
					let index = self.draw_next(&distribution, position, rng, &mut word);
					buffer[[position, index]] = 1.0;

					let terminated = index == TERMINATOR_INDEX;
					if !terminated {
						word.text.push(self.char_at(index)?);
					}
					SamplingState::advance(position, max_word_len, terminated)
				}
				SamplingState::Done => SamplingState::Done,
			};
		}

		Ok(word)
	}

	/// Generates `n` words.
	pub fn generate_many<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Vec<GeneratedWord>> {
		(0..n).map(|_| self.generate(rng)).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::vocabulary::TERMINATOR;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	/// Model whose prediction depends only on the prefix length.
	struct Scripted {
		vocab_size: usize,
		max_seq_len: usize,
		script: fn(usize, usize) -> Vec<f32>,
	}

	impl NextCharModel for Scripted {
		fn vocab_size(&self) -> usize {
			self.vocab_size
		}

		fn max_seq_len(&self) -> usize {
			self.max_seq_len
		}

		fn predict_next(&self, prefix: ArrayView2<f32>) -> Result<Array1<f32>> {
			assert!(prefix.nrows() >= 1 && prefix.nrows() <= self.max_seq_len);
			Ok(Array1::from((self.script)(prefix.nrows(), self.vocab_size)))
		}
	}

	fn uniform(_: usize, v: usize) -> Vec<f32> {
		vec![1.0 / v as f32; v]
	}

	fn always_terminator(_: usize, v: usize) -> Vec<f32> {
		let mut p = vec![0.0; v];
		p[0] = 1.0;
		p
	}

	/// Terminator-certain once the prefix holds 3 characters.
	fn ends_after_three(len: usize, v: usize) -> Vec<f32> {
		if len >= 3 { always_terminator(len, v) } else { uniform(len, v) }
	}

	fn vocabulary() -> Vocabulary {
		Vocabulary::from_words(&["cat\n", "car\n", "can\n"]).unwrap()
	}

	fn bounds(min_word_len: usize, max_word_len: usize) -> SamplingParams {
		SamplingParams { min_word_len, max_word_len, ..SamplingParams::default() }
	}

	#[test]
	fn words_respect_structure() {
		let vocab = vocabulary();
		let model = Scripted { vocab_size: vocab.len(), max_seq_len: 12, script: uniform };
		let params = bounds(4, 12);
		let generator = WordGenerator::new(&model, &vocab, &params).unwrap();
		let mut rng = StdRng::seed_from_u64(1);

		for word in generator.generate_many(200, &mut rng).unwrap() {
			assert!(!word.escaped);
			assert!(!word.first_char_forced);
			assert!((4..=12).contains(&word.len()), "{:?}", word.text);
			let first = word.text.chars().next().unwrap();
			assert!(first.is_uppercase());
			assert!(!word.text.contains(TERMINATOR));
			assert!(word.text.chars().skip(1).all(|c| vocab.contains(c)));
		}
	}

	/// Certain of 'ß' for the empty prefix, of the terminator afterwards.
	struct SharpS {
		sharp_s: usize,
		vocab_size: usize,
	}

	impl NextCharModel for SharpS {
		fn vocab_size(&self) -> usize {
			self.vocab_size
		}

		fn max_seq_len(&self) -> usize {
			4
		}

		fn predict_next(&self, prefix: ArrayView2<f32>) -> Result<Array1<f32>> {
			let mut p = Array1::zeros(self.vocab_size);
			if prefix.sum() == 0.0 {
				p[self.sharp_s] = 1.0;
			} else {
				p[TERMINATOR_INDEX] = 1.0;
			}
			Ok(p)
		}
	}

	#[test]
	fn first_character_without_single_uppercase() {
		let vocab = Vocabulary::from_words(&["daß\n", "straße\n"]).unwrap();
		let model = SharpS { sharp_s: vocab.index_of('ß').unwrap(), vocab_size: vocab.len() };
		let params = bounds(1, 4);
		let generator = WordGenerator::new(&model, &vocab, &params).unwrap();
		let mut rng = StdRng::seed_from_u64(8);

		let word = generator.generate(&mut rng).unwrap();
		assert_eq!(word.text, "ẞ");
		assert!(word.text.chars().all(char::is_uppercase));
		assert_eq!(word.len(), 1);
	}

	#[test]
	fn uppercase_forms() {
		let mut text = String::new();
		for c in ['a', 'é', 'ß', 'ﬁ'] {
			push_uppercase(&mut text, c);
		}
		assert_eq!(text, "AÉẞFI");
	}

	#[test]
	fn equal_bounds_force_exact_length() {
		let vocab = vocabulary();
		let model = Scripted { vocab_size: vocab.len(), max_seq_len: 5, script: uniform };
		let params = bounds(5, 5);
		let generator = WordGenerator::new(&model, &vocab, &params).unwrap();
		let mut rng = StdRng::seed_from_u64(2);

		for word in generator.generate_many(100, &mut rng).unwrap() {
			assert_eq!(word.len(), 5, "{:?}", word.text);
		}
	}

	#[test]
	fn early_terminator_is_redrawn() {
		let vocab = vocabulary();
		// terminator is certain after 3 characters, but 4 are required:
		// redraws cannot help, the retry ceiling lets the word end at 3
		let model = Scripted { vocab_size: vocab.len(), max_seq_len: 12, script: ends_after_three };
		let params = SamplingParams { terminator_retries: 10, ..bounds(4, 12) };
		let generator = WordGenerator::new(&model, &vocab, &params).unwrap();
		let mut rng = StdRng::seed_from_u64(3);

		let word = generator.generate(&mut rng).unwrap();
		assert_eq!(word.len(), 3);
		assert!(word.escaped);

		// with a minimum of 3 the same model never needs the escape
		let params = bounds(3, 12);
		let generator = WordGenerator::new(&model, &vocab, &params).unwrap();
		let word = generator.generate(&mut rng).unwrap();
		assert_eq!(word.len(), 3);
		assert!(!word.escaped);
	}

	#[test]
	fn terminator_only_model_terminates() {
		let vocab = vocabulary();
		let model = Scripted { vocab_size: vocab.len(), max_seq_len: 12, script: always_terminator };
		let params = bounds(4, 12);
		let generator = WordGenerator::new(&model, &vocab, &params).unwrap();
		let mut rng = StdRng::seed_from_u64(4);

		let word = generator.generate(&mut rng).unwrap();
		assert!(word.first_char_forced);
		assert!(word.escaped);
		assert_eq!(word.len(), 1);
		assert!(word.text.chars().all(char::is_uppercase));
	}

	#[test]
	fn single_character_words() {
		let vocab = vocabulary();
		let model = Scripted { vocab_size: vocab.len(), max_seq_len: 1, script: uniform };
		let params = bounds(0, 1);
		let generator = WordGenerator::new(&model, &vocab, &params).unwrap();
		let word = generator.generate(&mut StdRng::seed_from_u64(5)).unwrap();
		assert_eq!(word.len(), 1);
	}

	#[test]
	fn invalid_setups() {
		let vocab = vocabulary();
		let model = Scripted { vocab_size: vocab.len(), max_seq_len: 6, script: uniform };

		let too_long = bounds(4, 12);
		assert!(matches!(WordGenerator::new(&model, &vocab, &too_long), Err(SngError::Shape(_))));

		let inverted = bounds(6, 5);
		assert!(matches!(WordGenerator::new(&model, &vocab, &inverted), Err(SngError::Config(_))));

		let frozen = SamplingParams { temperature: 0.0, ..bounds(2, 5) };
		assert!(matches!(WordGenerator::new(&model, &vocab, &frozen), Err(SngError::Config(_))));

		let wrong_width = Scripted { vocab_size: 3, max_seq_len: 6, script: uniform };
		let ok = bounds(2, 5);
		assert!(matches!(WordGenerator::new(&wrong_width, &vocab, &ok), Err(SngError::Shape(_))));
	}

	#[test]
	fn seeded_generation_is_reproducible() {
		let vocab = vocabulary();
		let model = Scripted { vocab_size: vocab.len(), max_seq_len: 12, script: uniform };
		let params = bounds(4, 12);
		let generator = WordGenerator::new(&model, &vocab, &params).unwrap();

		let a = generator.generate_many(10, &mut StdRng::seed_from_u64(9)).unwrap();
		let b = generator.generate_many(10, &mut StdRng::seed_from_u64(9)).unwrap();
		assert_eq!(a, b);
	}
}
