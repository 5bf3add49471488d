use super::network::{Gradients, SequenceModel};

/// RMSprop optimizer.
///
/// Keeps a running average of squared gradients per parameter and scales
/// each step by its root:
/// `s = rho * s + (1 - rho) * g²`, `w -= lr * g / (sqrt(s) + eps)`.
#[derive(Debug)]
pub struct RmsProp {
	learning_rate: f32,
	rho: f32,
	epsilon: f32,
	/// Squared gradient averages, allocated on the first step.
	state: Option<Gradients>,
}

impl RmsProp {
	pub const DEFAULT_RHO: f32 = 0.9;
	pub const DEFAULT_EPSILON: f32 = 1e-7;

	pub fn new(learning_rate: f32) -> Self {
		Self {
			learning_rate,
			rho: Self::DEFAULT_RHO,
			epsilon: Self::DEFAULT_EPSILON,
			state: None,
		}
	}

	pub fn learning_rate(&self) -> f32 {
		self.learning_rate
	}

	/// Applies one update of `grads` to the model weights.
	pub fn step(&mut self, model: &mut SequenceModel, grads: &Gradients) {
		let state = self.state.get_or_insert_with(|| model.zero_gradients());
		let (lr, rho, eps) = (self.learning_rate, self.rho, self.epsilon);

		model.apply(grads, state, |w, g, s| {
			*s = rho * *s + (1.0 - rho) * g * g;
			*w -= lr * g / (s.sqrt() + eps);
		});
	}
}
