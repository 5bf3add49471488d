/// Progress of a single word generation.
///
/// Generation always starts in `AwaitingFirstChar`, moves to `Sampling`
/// once a non-terminator first character has been drawn, and ends in
/// `Done` when the terminator is accepted or the buffer is full.
///
/// ## Invariants
/// - `Sampling { position }` always has `1 <= position < max_word_len`
/// - `Done` is terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingState {
	AwaitingFirstChar,
	/// Next slot of the one-hot buffer to fill.
	Sampling { position: usize },
	Done,
}

impl SamplingState {
	/// State following a filled slot at `position`.
	///
	/// Returns `Done` when the terminator was accepted or when no slot is left.
	pub fn advance(position: usize, max_word_len: usize, terminated: bool) -> Self {
		if terminated || position + 1 >= max_word_len {
			SamplingState::Done
		} else {
			SamplingState::Sampling { position: position + 1 }
		}
	}

	pub fn is_done(&self) -> bool {
		matches!(self, SamplingState::Done)
	}
}
