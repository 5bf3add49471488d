use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SngError};
use crate::model::generator::{SamplingParams, DEFAULT_TERMINATOR_RETRIES};
use crate::model::network::TrainOptions;

/// Training and simulation options of a [`Session`](crate::session::Session).
///
/// A `Config` can only be obtained through [`Config::default`] or
/// [`ConfigBuilder::build`], so every instance is valid. It is stored
/// along with the trained weights when a session is saved.
///
/// # Invariants
/// - `batch_size`, `n_layers`, `hidden_dim` and `max_word_len` are >= 1
/// - `min_word_len <= max_word_len`
/// - `temperature` and `learning_rate` are finite and > 0
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
	epochs: usize,
	batch_size: usize,
	n_layers: usize,
	hidden_dim: usize,
	min_word_len: usize,
	max_word_len: usize,
	temperature: f64,
	suffix: String,
	verbose: bool,
	debug: bool,
	learning_rate: f32,
	progress_every: usize,
	terminator_retries: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			epochs: 100,
			batch_size: 64,
			n_layers: 2,
			hidden_dim: 50,
			min_word_len: 4,
			max_word_len: 12,
			temperature: 1.0,
			suffix: String::new(),
			verbose: true,
			debug: true,
			learning_rate: 0.001,
			progress_every: 10,
			terminator_retries: DEFAULT_TERMINATOR_RETRIES,
		}
	}
}

impl Config {
	/// Starts from the defaults.
	pub fn builder() -> ConfigBuilder {
		ConfigBuilder { config: Config::default() }
	}

	/// Starts from this configuration, to derive a modified copy.
	pub fn to_builder(&self) -> ConfigBuilder {
		ConfigBuilder { config: self.clone() }
	}

	/// Checks every invariant, used by the builder and after loading a session.
	pub fn validate(&self) -> Result<()> {
		if self.batch_size == 0 {
			return Err(SngError::config("batch_size must be >= 1"));
		}
		if self.n_layers == 0 {
			return Err(SngError::config("n_layers must be >= 1"));
		}
		if self.hidden_dim == 0 {
			return Err(SngError::config("hidden_dim must be >= 1"));
		}
		if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
			return Err(SngError::config("learning_rate must be a finite value > 0"));
		}
		self.sampling_params().validate()
	}

	/// Training passes over the whole corpus.
	pub fn epochs(&self) -> usize {
		self.epochs
	}

	pub fn batch_size(&self) -> usize {
		self.batch_size
	}

	/// Number of stacked LSTM layers.
	pub fn n_layers(&self) -> usize {
		self.n_layers
	}

	/// Units per LSTM layer.
	pub fn hidden_dim(&self) -> usize {
		self.hidden_dim
	}

	pub fn min_word_len(&self) -> usize {
		self.min_word_len
	}

	/// Longest generated word, also the encoding width of training words.
	pub fn max_word_len(&self) -> usize {
		self.max_word_len
	}

	/// Lower values are "colder": sampling gets more conservative.
	pub fn temperature(&self) -> f64 {
		self.temperature
	}

	/// Appended verbatim to every simulated word, e.g. `" Software"`.
	pub fn suffix(&self) -> &str {
		&self.suffix
	}

	pub fn verbose(&self) -> bool {
		self.verbose
	}

	/// Keeps loss history and sampling statistics in the session diagnostics.
	pub fn debug(&self) -> bool {
		self.debug
	}

	pub fn learning_rate(&self) -> f32 {
		self.learning_rate
	}

	/// Epoch interval of the progress samples, 0 disables them.
	pub fn progress_every(&self) -> usize {
		self.progress_every
	}

	pub fn terminator_retries(&self) -> usize {
		self.terminator_retries
	}

	pub fn sampling_params(&self) -> SamplingParams {
		SamplingParams {
			temperature: self.temperature,
			min_word_len: self.min_word_len,
			max_word_len: self.max_word_len,
			terminator_retries: self.terminator_retries,
		}
	}

	pub fn train_options(&self) -> TrainOptions {
		TrainOptions {
			epochs: self.epochs,
			batch_size: self.batch_size,
			learning_rate: self.learning_rate,
		}
	}
}

impl fmt::Display for Config {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "epochs: {}", self.epochs)?;
		writeln!(f, "batch_size: {}", self.batch_size)?;
		writeln!(f, "n_layers: {}", self.n_layers)?;
		writeln!(f, "hidden_dim: {}", self.hidden_dim)?;
		writeln!(f, "min_word_len: {}", self.min_word_len)?;
		writeln!(f, "max_word_len: {}", self.max_word_len)?;
		writeln!(f, "temperature: {}", self.temperature)?;
		writeln!(f, "suffix: {:?}", self.suffix)?;
		writeln!(f, "verbose: {}", self.verbose)?;
		writeln!(f, "debug: {}", self.debug)?;
		writeln!(f, "learning_rate: {}", self.learning_rate)?;
		writeln!(f, "progress_every: {}", self.progress_every)?;
		write!(f, "terminator_retries: {}", self.terminator_retries)
	}
}

/// Validated construction of a [`Config`].
///
/// ```
/// use sng_core::config::Config;
///
/// let config = Config::builder().min_word_len(6).max_word_len(10).build().unwrap();
/// assert_eq!(config.min_word_len(), 6);
/// assert!(Config::builder().min_word_len(8).max_word_len(5).build().is_err());
/// ```
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
	config: Config,
}

impl ConfigBuilder {
	pub fn epochs(mut self, epochs: usize) -> Self {
		self.config.epochs = epochs;
		self
	}

	pub fn batch_size(mut self, batch_size: usize) -> Self {
		self.config.batch_size = batch_size;
		self
	}

	pub fn n_layers(mut self, n_layers: usize) -> Self {
		self.config.n_layers = n_layers;
		self
	}

	pub fn hidden_dim(mut self, hidden_dim: usize) -> Self {
		self.config.hidden_dim = hidden_dim;
		self
	}

	pub fn min_word_len(mut self, min_word_len: usize) -> Self {
		self.config.min_word_len = min_word_len;
		self
	}

	pub fn max_word_len(mut self, max_word_len: usize) -> Self {
		self.config.max_word_len = max_word_len;
		self
	}

	pub fn temperature(mut self, temperature: f64) -> Self {
		self.config.temperature = temperature;
		self
	}

	pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
		self.config.suffix = suffix.into();
		self
	}

	pub fn verbose(mut self, verbose: bool) -> Self {
		self.config.verbose = verbose;
		self
	}

	pub fn debug(mut self, debug: bool) -> Self {
		self.config.debug = debug;
		self
	}

	pub fn learning_rate(mut self, learning_rate: f32) -> Self {
		self.config.learning_rate = learning_rate;
		self
	}

	pub fn progress_every(mut self, progress_every: usize) -> Self {
		self.config.progress_every = progress_every;
		self
	}

	pub fn terminator_retries(mut self, terminator_retries: usize) -> Self {
		self.config.terminator_retries = terminator_retries;
		self
	}

	/// # Errors
	/// Returns a configuration error if any invariant of [`Config`] is broken.
	pub fn build(self) -> Result<Config> {
		self.config.validate()?;
		Ok(self.config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let config = Config::default();
		assert!(config.validate().is_ok());
		assert_eq!(config.epochs(), 100);
		assert_eq!(config.batch_size(), 64);
		assert_eq!(config.n_layers(), 2);
		assert_eq!(config.hidden_dim(), 50);
		assert_eq!(config.min_word_len(), 4);
		assert_eq!(config.max_word_len(), 12);
		assert_eq!(config.temperature(), 1.0);
		assert_eq!(config.suffix(), "");
		assert!(config.verbose());
		assert!(config.debug());
		assert_eq!(config.terminator_retries(), 1000);
	}

	#[test]
	fn builder_overrides_only_given_fields() {
		let config = Config::builder().suffix(" Software").epochs(3).build().unwrap();
		assert_eq!(config.suffix(), " Software");
		assert_eq!(config.epochs(), 3);
		assert_eq!(config.hidden_dim(), 50);

		let derived = config.to_builder().temperature(0.5).build().unwrap();
		assert_eq!(derived.temperature(), 0.5);
		assert_eq!(derived.suffix(), " Software");
	}

	#[test]
	fn invalid_values_are_rejected() {
		let cases = [
			Config::builder().min_word_len(13),
			Config::builder().max_word_len(0),
			Config::builder().temperature(0.0),
			Config::builder().temperature(-0.5),
			Config::builder().batch_size(0),
			Config::builder().n_layers(0),
			Config::builder().hidden_dim(0),
			Config::builder().learning_rate(0.0),
		];
		for builder in cases {
			assert!(matches!(builder.build(), Err(SngError::Config(_))));
		}
	}

	#[test]
	fn derived_parameters() {
		let config = Config::builder().temperature(0.7).min_word_len(5).max_word_len(5).build().unwrap();
		let params = config.sampling_params();
		assert_eq!(params.temperature, 0.7);
		assert_eq!((params.min_word_len, params.max_word_len), (5, 5));
		let options = config.train_options();
		assert_eq!((options.epochs, options.batch_size), (100, 64));
	}

	#[test]
	fn display_lists_every_option() {
		let text = Config::default().to_string();
		assert_eq!(text.lines().count(), 13);
		assert!(text.contains("hidden_dim: 50"));
	}
}
