use ndarray::{s, Array1, Array2, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A single LSTM layer processing a whole batch, one timestep at a time.
///
/// Gates are packed in a `4 * hidden_dim` wide block, in the order
/// input, forget, cell candidate, output.
///
/// # Invariants
/// - `w_input` is `(input_dim, 4 * hidden_dim)`
/// - `w_hidden` is `(hidden_dim, 4 * hidden_dim)`
/// - `bias` has `4 * hidden_dim` entries
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LstmLayer {
	input_dim: usize,
	hidden_dim: usize,
	w_input: Array2<f32>,
	w_hidden: Array2<f32>,
	bias: Array1<f32>,
}

/// Activations kept from the forward pass of one timestep.
struct StepCache {
	x: Array2<f32>,
	h_prev: Array2<f32>,
	c_prev: Array2<f32>,
	i: Array2<f32>,
	f: Array2<f32>,
	g: Array2<f32>,
	o: Array2<f32>,
	tanh_c: Array2<f32>,
}

/// Everything the backward pass needs, one entry per timestep.
pub(crate) struct LstmCache {
	steps: Vec<StepCache>,
}

/// Gradients of an [`LstmLayer`], same shapes as its parameters.
#[derive(Clone, Debug)]
pub(crate) struct LstmGradients {
	pub w_input: Array2<f32>,
	pub w_hidden: Array2<f32>,
	pub bias: Array1<f32>,
}

pub(crate) fn sigmoid(x: f32) -> f32 {
	1.0 / (1.0 + (-x).exp())
}

impl LstmLayer {
	/// Creates a layer with weights drawn uniformly in `±1/sqrt(hidden_dim)`.
	///
	/// The forget gate bias starts at 1 so that early training keeps the cell state.
	pub fn new<R: Rng + ?Sized>(input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
		let bound = 1.0 / (hidden_dim as f32).sqrt();
		let w_input = Array2::from_shape_fn((input_dim, 4 * hidden_dim), |_| rng.random_range(-bound..bound));
		let w_hidden = Array2::from_shape_fn((hidden_dim, 4 * hidden_dim), |_| rng.random_range(-bound..bound));
		let mut bias = Array1::zeros(4 * hidden_dim);
		bias.slice_mut(s![hidden_dim..2 * hidden_dim]).fill(1.0);

		Self { input_dim, hidden_dim, w_input, w_hidden, bias }
	}

	pub fn input_dim(&self) -> usize {
		self.input_dim
	}

	pub fn hidden_dim(&self) -> usize {
		self.hidden_dim
	}

	/// Checks that the stored matrices agree with the declared dimensions.
	pub(crate) fn is_consistent(&self) -> bool {
		let gates = 4 * self.hidden_dim;
		self.w_input.dim() == (self.input_dim, gates)
			&& self.w_hidden.dim() == (self.hidden_dim, gates)
			&& self.bias.len() == gates
	}

	/// Runs the layer over a sequence of `(batch, input_dim)` matrices.
	///
	/// Returns the hidden state of every timestep, each `(batch, hidden_dim)`,
	/// and the cache required by [`LstmLayer::backward`].
	pub(crate) fn forward(&self, xs: &[Array2<f32>]) -> (Vec<Array2<f32>>, LstmCache) {
		let batch = xs.first().map_or(0, |x| x.nrows());
		let hd = self.hidden_dim;

		let mut h = Array2::<f32>::zeros((batch, hd));
		let mut c = Array2::<f32>::zeros((batch, hd));
		let mut outputs = Vec::with_capacity(xs.len());
		let mut steps = Vec::with_capacity(xs.len());

		for x in xs {
			let z = x.dot(&self.w_input) + h.dot(&self.w_hidden) + &self.bias;

			let i = z.slice(s![.., 0..hd]).mapv(sigmoid);
			let f = z.slice(s![.., hd..2 * hd]).mapv(sigmoid);
			let g = z.slice(s![.., 2 * hd..3 * hd]).mapv(f32::tanh);
			let o = z.slice(s![.., 3 * hd..4 * hd]).mapv(sigmoid);

			let c_next = &f * &c + &i * &g;
			let tanh_c = c_next.mapv(f32::tanh);
			let h_next = &o * &tanh_c;

			steps.push(StepCache {
				x: x.clone(),
				h_prev: h,
				c_prev: c,
				i,
				f,
				g,
				o,
				tanh_c,
			});
			outputs.push(h_next.clone());

			h = h_next;
			c = c_next;
		}

		(outputs, LstmCache { steps })
	}

	/// Backpropagation through time.
	///
	/// `d_outputs[t]` is the loss gradient w.r.t. the hidden state emitted at `t`.
	/// Returns the parameter gradients and the gradient w.r.t. each input.
	pub(crate) fn backward(&self, cache: &LstmCache, d_outputs: &[Array2<f32>]) -> (LstmGradients, Vec<Array2<f32>>) {
		let hd = self.hidden_dim;
		let mut grads = self.zero_gradients();
		let mut d_inputs = vec![Array2::<f32>::zeros((0, 0)); cache.steps.len()];

		let batch = cache.steps.first().map_or(0, |step| step.x.nrows());
		let mut dh_next = Array2::<f32>::zeros((batch, hd));
		let mut dc_next = Array2::<f32>::zeros((batch, hd));

		for (t, step) in cache.steps.iter().enumerate().rev() {
			let dh = &d_outputs[t] + &dh_next;

			let d_o = &dh * &step.tanh_c;
			let dc = &dc_next + &(&dh * &step.o * step.tanh_c.mapv(|v| 1.0 - v * v));
			let d_i = &dc * &step.g;
			let d_g = &dc * &step.i;
			let d_f = &dc * &step.c_prev;
			dc_next = &dc * &step.f;

			let mut dz = Array2::<f32>::zeros((batch, 4 * hd));
			dz.slice_mut(s![.., 0..hd]).assign(&(&d_i * &step.i.mapv(|v| v * (1.0 - v))));
			dz.slice_mut(s![.., hd..2 * hd]).assign(&(&d_f * &step.f.mapv(|v| v * (1.0 - v))));
			dz.slice_mut(s![.., 2 * hd..3 * hd]).assign(&(&d_g * &step.g.mapv(|v| 1.0 - v * v)));
			dz.slice_mut(s![.., 3 * hd..4 * hd]).assign(&(&d_o * &step.o.mapv(|v| v * (1.0 - v))));

			grads.w_input += &step.x.t().dot(&dz);
			grads.w_hidden += &step.h_prev.t().dot(&dz);
			grads.bias += &dz.sum_axis(Axis(0));

			d_inputs[t] = dz.dot(&self.w_input.t());
			dh_next = dz.dot(&self.w_hidden.t());
		}

		(grads, d_inputs)
	}

	pub(crate) fn zero_gradients(&self) -> LstmGradients {
		LstmGradients {
			w_input: Array2::zeros(self.w_input.raw_dim()),
			w_hidden: Array2::zeros(self.w_hidden.raw_dim()),
			bias: Array1::zeros(self.bias.raw_dim()),
		}
	}

	/// Applies `update(param, grad, state)` to each parameter, paired with its
	/// gradient and the matching optimizer state slot.
	pub(crate) fn apply<F>(&mut self, grads: &LstmGradients, state: &mut LstmGradients, mut update: F)
	where
		F: FnMut(&mut f32, f32, &mut f32),
	{
		Zip::from(&mut self.w_input)
			.and(&grads.w_input)
			.and(&mut state.w_input)
			.for_each(|p, &g, s| update(p, g, s));
		Zip::from(&mut self.w_hidden)
			.and(&grads.w_hidden)
			.and(&mut state.w_hidden)
			.for_each(|p, &g, s| update(p, g, s));
		Zip::from(&mut self.bias)
			.and(&grads.bias)
			.and(&mut state.bias)
			.for_each(|p, &g, s| update(p, g, s));
	}
}

impl LstmGradients {
	/// Adds `other` into `self`, used to combine per-worker partial gradients.
	pub fn merge(&mut self, other: &Self) {
		self.w_input += &other.w_input;
		self.w_hidden += &other.w_hidden;
		self.bias += &other.bias;
	}

	pub fn scale(&mut self, factor: f32) {
		self.w_input *= factor;
		self.w_hidden *= factor;
		self.bias *= factor;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_abs_diff_eq;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn sequence(batch: usize, input_dim: usize, len: usize) -> Vec<Array2<f32>> {
		(0..len)
			.map(|t| Array2::from_shape_fn((batch, input_dim), |(b, i)| ((b + i + t) % 3) as f32 * 0.5 - 0.5))
			.collect()
	}

	#[test]
	fn forward_shapes() {
		let mut rng = StdRng::seed_from_u64(1);
		let layer = LstmLayer::new(5, 7, &mut rng);
		assert!(layer.is_consistent());
		let (outputs, cache) = layer.forward(&sequence(3, 5, 4));
		assert_eq!(outputs.len(), 4);
		assert_eq!(cache.steps.len(), 4);
		for h in &outputs {
			assert_eq!(h.dim(), (3, 7));
			assert!(h.iter().all(|v| v.abs() < 1.0));
		}
	}

	#[test]
	fn forget_bias_starts_at_one() {
		let mut rng = StdRng::seed_from_u64(1);
		let layer = LstmLayer::new(2, 3, &mut rng);
		assert_eq!(layer.bias.to_vec(), vec![0., 0., 0., 1., 1., 1., 0., 0., 0., 0., 0., 0.]);
	}

	/// Compares the analytic gradient of `sum(h_T)` with a finite difference.
	#[test]
	fn backward_matches_finite_difference() {
		let mut rng = StdRng::seed_from_u64(7);
		let mut layer = LstmLayer::new(3, 4, &mut rng);
		let xs = sequence(2, 3, 3);

		let loss = |layer: &LstmLayer| -> f32 { layer.forward(&xs).0.iter().map(|h| h.sum()).sum() };

		let (outputs, cache) = layer.forward(&xs);
		let d_outputs: Vec<_> = outputs.iter().map(|h| Array2::ones(h.raw_dim())).collect();
		let (grads, d_inputs) = layer.backward(&cache, &d_outputs);
		assert_eq!(d_inputs.len(), 3);
		assert_eq!(d_inputs[0].dim(), (2, 3));

		let eps = 1e-2;
		for (r, c) in [(0, 0), (1, 5), (2, 11)] {
			let original = layer.w_input[[r, c]];
			layer.w_input[[r, c]] = original + eps;
			let plus = loss(&layer);
			layer.w_input[[r, c]] = original - eps;
			let minus = loss(&layer);
			layer.w_input[[r, c]] = original;
			assert_abs_diff_eq!(grads.w_input[[r, c]], (plus - minus) / (2.0 * eps), epsilon = 1e-2);
		}
		for k in [0, 4, 9, 15] {
			let original = layer.bias[k];
			layer.bias[k] = original + eps;
			let plus = loss(&layer);
			layer.bias[k] = original - eps;
			let minus = loss(&layer);
			layer.bias[k] = original;
			assert_abs_diff_eq!(grads.bias[k], (plus - minus) / (2.0 * eps), epsilon = 1e-2);
		}
	}

	#[test]
	fn merge_and_scale() {
		let mut rng = StdRng::seed_from_u64(3);
		let layer = LstmLayer::new(2, 2, &mut rng);
		let mut a = layer.zero_gradients();
		let mut b = layer.zero_gradients();
		b.bias.fill(2.0);
		a.merge(&b);
		a.merge(&b);
		a.scale(0.25);
		assert!(a.bias.iter().all(|v| *v == 1.0));
	}
}
