use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::{Result, SngError};
use crate::io;
use crate::model::encoder::encode;
use crate::model::generator::{GeneratedWord, SamplingParams, WordGenerator};
use crate::model::network::SequenceModel;
use crate::model::vocabulary::{Vocabulary, TERMINATOR};

/// Words sampled at every progress report during training.
pub const PROGRESS_WORDS: usize = 4;

const CONFIG_ARTIFACT: &str = "config";
const WORDLIST_ARTIFACT: &str = "wordlist";
const MODEL_ARTIFACT: &str = "model";

/// Extra information captured when the `debug` option is set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
	/// Mean loss of every training epoch.
	pub loss_history: Vec<f32>,
	/// Words sampled during training, with the epoch they were sampled at.
	pub progress_samples: Vec<(usize, Vec<String>)>,
	/// Words produced by `simulate`.
	pub generated: usize,
	/// Words that ended early after exhausting the terminator retries.
	pub escapes: usize,
	/// Words whose first character had to be forced.
	pub forced_first_chars: usize,
}

/// Holds the configuration, the word list, its vocabulary and the trained model.
///
/// A session is created from a word list (pre-fit), trained with
/// [`Session::fit`], and can then simulate names. [`Session::save`] and
/// [`Session::load`] snapshot and restore the post-fit state.
///
/// ```no_run
/// use sng_core::config::Config;
/// use sng_core::session::Session;
/// use sng_core::wordlist::load_builtin_wordlist;
///
/// let words = load_builtin_wordlist("latin")?;
/// let mut session = Session::new(Config::default(), words)?;
/// session.fit()?;
/// println!("{:?}", session.simulate(5)?);
/// # Ok::<(), sng_core::error::SngError>(())
/// ```
#[derive(Debug)]
pub struct Session {
	config: Config,
	/// Unique words, each terminated by the terminator symbol.
	words: Vec<String>,
	vocabulary: Vocabulary,
	model: Option<SequenceModel>,
	rng: StdRng,
	diagnostics: Diagnostics,
}

impl Session {
	/// Creates an untrained session, seeding its random source from the OS.
	///
	/// # Errors
	/// Returns a configuration error if the config is invalid or the word
	/// list holds no usable word.
	pub fn new<I, S>(config: Config, words: I) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		Self::with_rng(config, words, StdRng::from_os_rng())
	}

	/// Same as [`Session::new`] with an explicit random source, for reproducible runs.
	pub fn with_rng<I, S>(config: Config, words: I, rng: StdRng) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		config.validate()?;

		let mut seen = HashSet::new();
		let words: Vec<String> = words
			.into_iter()
			.map(|word| word.as_ref().trim().to_owned())
			.filter(|word| !word.is_empty() && seen.insert(word.clone()))
			.map(|mut word| {
				word.push(TERMINATOR);
				word
			})
			.collect();

		let vocabulary = Vocabulary::from_words(&words)?;

		if config.verbose() {
			info!("{} words", words.len());
			info!("{} characters, including the \\n: {:?}", vocabulary.len(), vocabulary.characters());
			info!("first two sample words: {:?}", &words[..words.len().min(2)]);
		}

		Ok(Self {
			config,
			words,
			vocabulary,
			model: None,
			rng,
			diagnostics: Diagnostics::default(),
		})
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn vocabulary(&self) -> &Vocabulary {
		&self.vocabulary
	}

	/// The training words, terminator included.
	pub fn words(&self) -> &[String] {
		&self.words
	}

	pub fn model(&self) -> Option<&SequenceModel> {
		self.model.as_ref()
	}

	pub fn is_fitted(&self) -> bool {
		self.model.is_some()
	}

	pub fn diagnostics(&self) -> &Diagnostics {
		&self.diagnostics
	}

	/// Trains a fresh model on the word list.
	///
	/// Every `progress_every` epochs a few words are sampled from the model
	/// in training and logged (when `verbose`) or kept in the diagnostics
	/// (when `debug`). Sampling uses its own random stream, forked from the
	/// session one, and only reads the model.
	///
	/// The previous model, if any, is only replaced once training completes.
	pub fn fit(&mut self) -> Result<()> {
		let corpus = encode(&self.words, &self.vocabulary, self.config.max_word_len())?;
		let mut model = SequenceModel::new(
			self.vocabulary.len(),
			self.config.hidden_dim(),
			self.config.n_layers(),
			self.config.max_word_len(),
			&mut self.rng,
		)?;

		let params = self.config.sampling_params();
		let options = self.config.train_options();
		let (verbose, debug) = (self.config.verbose(), self.config.debug());
		let progress_every = self.config.progress_every();
		let vocabulary = &self.vocabulary;
		let mut progress_rng = StdRng::from_rng(&mut self.rng);
		let mut samples = Vec::new();

		let history = model.train(&corpus.inputs, &corpus.targets, &options, &mut self.rng, |report, model| {
			if progress_every == 0 || report.epoch % progress_every != 0 || !(verbose || debug) {
				return;
			}
			let words = WordGenerator::new(model, vocabulary, &params)
				.and_then(|generator| generator.generate_many(PROGRESS_WORDS, &mut progress_rng));
			match words {
				Ok(words) => {
					let words: Vec<String> = words.into_iter().map(|word| word.text).collect();
					if verbose {
						info!("epoch {} words: {}, loss: {:.4}", report.epoch, words.join(", "), report.loss);
					}
					if debug {
						samples.push((report.epoch, words));
					}
				}
				Err(e) => warn!("epoch {}: cannot sample progress words: {e}", report.epoch),
			}
		})?;

		if debug {
			self.diagnostics.loss_history = history;
			self.diagnostics.progress_samples = samples;
		}
		self.model = Some(model);
		Ok(())
	}

	/// Simulates `n` name suggestions with the configured sampling options.
	///
	/// Each name gets the configured suffix appended.
	pub fn simulate(&mut self, n: usize) -> Result<Vec<String>> {
		let params = self.config.sampling_params();
		self.simulate_with(n, &params)
	}

	/// Simulates `n` name suggestions, overriding the sampling options.
	///
	/// # Errors
	/// - [`SngError::NotFitted`] before `fit` or `load`
	/// - configuration error for invalid `params`
	/// - shape error if `params.max_word_len` exceeds the trained `max_word_len`
	pub fn simulate_with(&mut self, n: usize, params: &SamplingParams) -> Result<Vec<String>> {
		let words = self.generate_words(n, params)?;
		Ok(words
			.into_iter()
			.map(|word| word.text + self.config.suffix())
			.collect())
	}

	/// Generates `n` words with their sampling flags, without suffix.
	pub fn generate_words(&mut self, n: usize, params: &SamplingParams) -> Result<Vec<GeneratedWord>> {
		let model = self.model.as_ref().ok_or(SngError::NotFitted)?;
		let generator = WordGenerator::new(model, &self.vocabulary, params)?;

		let mut words = Vec::with_capacity(n);
		for _ in 0..n {
			let word = generator.generate(&mut self.rng)?;
			if word.escaped && (self.config.verbose() || self.config.debug()) {
				warn!(
					"caught in a near-infinite loop generating '{}': the temperature ({}) may be too low \
					and the sampler keeps drawing the terminator",
					word.text, params.temperature
				);
			}
			if self.config.debug() {
				self.diagnostics.generated += 1;
				self.diagnostics.escapes += usize::from(word.escaped);
				self.diagnostics.forced_first_chars += usize::from(word.first_char_forced);
			}
			words.push(word);
		}

		Ok(words)
	}

	/// Stores the configuration, the word list and the model weights into `directory`.
	///
	/// # Errors
	/// - [`SngError::NotFitted`] if there is no model to store
	/// - [`SngError::AlreadyExists`] if `directory` is not empty and `overwrite` is false
	pub fn save<P: AsRef<Path>>(&self, directory: P, overwrite: bool) -> Result<()> {
		let directory = directory.as_ref();
		let model = self.model.as_ref().ok_or(SngError::NotFitted)?;

		// Encode everything before touching the file system
		let artifacts = [
			(CONFIG_ARTIFACT, postcard::to_stdvec(&self.config)?),
			(WORDLIST_ARTIFACT, postcard::to_stdvec(&self.words)?),
			(MODEL_ARTIFACT, postcard::to_stdvec(model)?),
		];

		if !overwrite && io::has_entries(directory)? {
			return Err(SngError::AlreadyExists(directory.to_path_buf()));
		}
		fs::create_dir_all(directory)?;

		let files: Vec<_> = artifacts
			.into_iter()
			.map(|(name, bytes)| (io::artifact_path(directory, name), bytes))
			.collect();
		io::write_files(&files)?;

		if self.config.verbose() {
			info!("session saved to {}", directory.display());
		}
		Ok(())
	}

	/// Restores a session stored with [`Session::save`].
	pub fn load<P: AsRef<Path>>(directory: P) -> Result<Self> {
		Self::load_with_rng(directory, StdRng::from_os_rng())
	}

	/// Same as [`Session::load`] with an explicit random source.
	///
	/// # Errors
	/// - [`SngError::NotFound`] if `directory` does not exist
	/// - [`SngError::Corrupt`] if an artifact is missing, cannot be decoded,
	///   or the weights do not match the configuration and vocabulary
	pub fn load_with_rng<P: AsRef<Path>>(directory: P, rng: StdRng) -> Result<Self> {
		let directory = directory.as_ref();
		if !directory.is_dir() {
			return Err(SngError::NotFound(format!("session directory {}", directory.display())));
		}

		let config: Config = read_artifact(directory, CONFIG_ARTIFACT)?;
		let words: Vec<String> = read_artifact(directory, WORDLIST_ARTIFACT)?;
		let model: SequenceModel = read_artifact(directory, MODEL_ARTIFACT)?;

		config.validate().map_err(|e| SngError::Corrupt(format!("stored configuration: {e}")))?;
		model.validate().map_err(|e| SngError::Corrupt(format!("stored model: {e}")))?;

		let mut session = Self::with_rng(config, words, rng).map_err(|e| SngError::Corrupt(format!("stored word list: {e}")))?;
		let expected = (
			session.vocabulary.len(),
			session.config.max_word_len(),
			session.config.hidden_dim(),
			session.config.n_layers(),
		);
		let found = (model.vocab_size(), model.max_seq_len(), model.hidden_dim(), model.n_layers());
		if expected != found {
			return Err(SngError::Corrupt(format!(
				"model (vocab, length, hidden, layers) = {found:?} does not match the session {expected:?}"
			)));
		}

		session.model = Some(model);
		Ok(session)
	}
}

fn read_artifact<T: DeserializeOwned>(directory: &Path, name: &str) -> Result<T> {
	let path = io::artifact_path(directory, name);
	let bytes = fs::read(&path).map_err(|e| match e.kind() {
		std::io::ErrorKind::NotFound => SngError::Corrupt(format!("missing {}", path.display())),
		_ => SngError::Io(e),
	})?;
	postcard::from_bytes(&bytes).map_err(|e| SngError::Corrupt(format!("cannot decode {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn small_config() -> Config {
		Config::builder()
			.epochs(2)
			.batch_size(4)
			.n_layers(1)
			.hidden_dim(8)
			.min_word_len(2)
			.max_word_len(6)
			.verbose(false)
			.build()
			.unwrap()
	}

	fn session(seed: u64) -> Session {
		Session::with_rng(small_config(), ["cat", "car", "can", "cat ", ""], StdRng::seed_from_u64(seed)).unwrap()
	}

	#[test]
	fn words_are_deduplicated_and_terminated() {
		let session = session(0);
		assert_eq!(session.words(), &["cat\n", "car\n", "can\n"]);
		assert_eq!(session.vocabulary().characters(), &['\n', 'a', 'c', 'n', 'r', 't']);
		assert!(!session.is_fitted());
	}

	#[test]
	fn empty_corpus_is_rejected() {
		let empty: Vec<String> = Vec::new();
		assert!(matches!(Session::new(small_config(), empty), Err(SngError::Config(_))));
		assert!(matches!(Session::new(small_config(), ["  ", "\n"]), Err(SngError::Config(_))));
	}

	#[test]
	fn simulate_requires_fit() {
		let mut session = session(1);
		assert!(matches!(session.simulate(1), Err(SngError::NotFitted)));
		let dir = tempfile::tempdir().unwrap();
		assert!(matches!(session.save(dir.path().join("s"), false), Err(SngError::NotFitted)));
	}

	#[test]
	fn fit_then_simulate() {
		let mut session = session(2);
		session.fit().unwrap();
		assert!(session.is_fitted());
		assert_eq!(session.diagnostics().loss_history.len(), 2);
		// progress words are sampled at epoch 0 only
		assert_eq!(session.diagnostics().progress_samples.len(), 1);
		assert_eq!(session.diagnostics().progress_samples[0].1.len(), PROGRESS_WORDS);

		let words = session.simulate(5).unwrap();
		assert_eq!(words.len(), 5);
		for word in &words {
			assert!(word.chars().count() <= 6);
			assert!(word.chars().next().unwrap().is_uppercase());
		}
		assert_eq!(session.diagnostics().generated, 5);
	}

	#[test]
	fn progress_words_follow_the_interval() {
		let config = small_config().to_builder().epochs(5).progress_every(2).build().unwrap();
		let mut session = Session::with_rng(config, ["cat", "car", "can"], StdRng::seed_from_u64(6)).unwrap();
		session.fit().unwrap();

		let epochs: Vec<usize> = session.diagnostics().progress_samples.iter().map(|(epoch, _)| *epoch).collect();
		assert_eq!(epochs, vec![0, 2, 4]);
		assert_eq!(session.diagnostics().loss_history.len(), 5);

		let config = small_config().to_builder().progress_every(0).build().unwrap();
		let mut session = Session::with_rng(config, ["cat", "car", "can"], StdRng::seed_from_u64(6)).unwrap();
		session.fit().unwrap();
		assert!(session.diagnostics().progress_samples.is_empty());
	}

	#[test]
	fn suffix_is_appended() {
		let config = small_config().to_builder().suffix(" Labs").build().unwrap();
		let mut session = Session::with_rng(config, ["cat", "car"], StdRng::seed_from_u64(3)).unwrap();
		session.fit().unwrap();
		for word in session.simulate(3).unwrap() {
			assert!(word.ends_with(" Labs"));
		}
	}

	#[test]
	fn overrides_are_validated() {
		let mut session = session(4);
		session.fit().unwrap();

		let longer = SamplingParams { max_word_len: 7, ..session.config().sampling_params() };
		assert!(matches!(session.simulate_with(1, &longer), Err(SngError::Shape(_))));

		let inverted = SamplingParams { min_word_len: 5, max_word_len: 3, ..session.config().sampling_params() };
		assert!(matches!(session.simulate_with(1, &inverted), Err(SngError::Config(_))));

		let shorter = SamplingParams { min_word_len: 3, max_word_len: 3, ..session.config().sampling_params() };
		for word in session.simulate_with(10, &shorter).unwrap() {
			assert_eq!(word.chars().count(), 3);
		}
	}

	#[test]
	fn same_seed_same_session() {
		let mut a = session(5);
		let mut b = session(5);
		a.fit().unwrap();
		b.fit().unwrap();
		assert_eq!(a.model(), b.model());
		assert_eq!(a.simulate(5).unwrap(), b.simulate(5).unwrap());
	}
}
