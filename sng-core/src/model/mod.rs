//! Building blocks of the name generator.
//!
//! - Character set of a word list (`Vocabulary`)
//! - One-hot encoding of training words (`encode`)
//! - Stacked LSTM with a softmax head (`SequenceModel`)
//! - Temperature scaling and weighted draws (`sampler`)
//! - Word-by-word sampling loop (`WordGenerator`)

/// Ordered character set, the terminator always comes first.
pub mod vocabulary;

/// One-hot input/target tensors built from terminated words.
pub mod encoder;

/// Single LSTM layer with forward and backward passes.
///
/// Only used through `SequenceModel`.
pub(crate) mod lstm;

/// RMSprop update rule.
pub(crate) mod optimizer;

/// Stacked LSTM sequence model, training and prediction.
pub mod network;

/// Temperature scaling and categorical draws over a distribution.
pub mod sampler;

/// Word generation from a trained model.
///
/// Handles the first-character rule, minimum length retries and
/// the escape after too many terminator draws.
pub mod generator;

/// States of a single word generation.
mod state;
