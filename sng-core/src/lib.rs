//! Character-level startup name generator.
//!
//! This crate learns the "feel" of a word list with a stacked LSTM and
//! samples new pronounceable words from it:
//! - Word list preprocessing and builtin word lists (`wordlist`)
//! - Validated training and sampling options (`config`)
//! - Vocabulary, corpus encoding, the sequence model and the sampler (`model`)
//! - Training, simulation and persistence of a whole run (`session`)
//!
//! Most users only need [`session::Session`], [`config::Config`] and the
//! functions of [`wordlist`].

/// Validated options shared by training and simulation.
pub mod config;

/// Error type of the crate.
pub mod error;

/// Low-level models and word generation.
pub mod model;

/// A trainable, savable name generator.
pub mod session;

/// Word list loading and preprocessing.
pub mod wordlist;

/// File helpers and listing of saved sessions.
pub mod io;

pub use config::{Config, ConfigBuilder};
pub use error::{Result, SngError};
pub use session::{Diagnostics, Session};
