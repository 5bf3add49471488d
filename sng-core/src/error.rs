use std::path::PathBuf;
use std::{fmt, io};

/// Error type shared by every operation of the crate.
///
/// Variants follow the failure classes of the generator:
/// configuration problems are detected at construction time,
/// shape problems are programmer errors when feeding the model,
/// and the persistence variants describe what went wrong with a
/// session directory.
#[derive(thiserror::Error, Debug)]
pub enum SngError {
	/// Invalid configuration or corpus (empty corpus, bad lengths, bad temperature...).
	#[error("invalid configuration: {0}")]
	Config(String),

	/// Input or target tensors do not match what the model was built for.
	#[error("shape mismatch: {0}")]
	Shape(String),

	/// The session has no trained model yet.
	#[error("no trained model, call fit() or load a saved session first")]
	NotFitted,

	/// A named resource (session directory, builtin word list) does not exist.
	#[error("not found: {0}")]
	NotFound(String),

	/// Save target already holds data and overwrite was not requested.
	#[error("target already exists: {}", .0.display())]
	AlreadyExists(PathBuf),

	/// A saved session is incomplete or cannot be decoded.
	#[error("corrupt session: {0}")]
	Corrupt(String),

	/// A session artifact could not be encoded.
	#[error("cannot encode session: {0}")]
	Encoding(#[from] postcard::Error),

	#[error(transparent)]
	Io(#[from] io::Error),
}

impl SngError {
	pub(crate) fn config(msg: impl fmt::Display) -> Self {
		SngError::Config(msg.to_string())
	}

	pub(crate) fn shape(msg: impl fmt::Display) -> Self {
		SngError::Shape(msg.to_string())
	}
}

pub type Result<T> = std::result::Result<T, SngError>;
