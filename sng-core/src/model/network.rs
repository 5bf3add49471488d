use std::sync::mpsc;
use std::thread;

use log::debug;
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis, Zip};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::lstm::{LstmCache, LstmGradients, LstmLayer};
use super::optimizer::RmsProp;
use crate::error::{Result, SngError};

/// Below this many rows per worker, a batch is processed on the calling thread.
const MIN_ROWS_PER_WORKER: usize = 8;

/// Lower bound applied to probabilities before taking their log.
const PROBABILITY_FLOOR: f32 = 1e-12;

/// Hyper-parameters of a training run.
#[derive(Clone, Debug)]
pub struct TrainOptions {
	pub epochs: usize,
	pub batch_size: usize,
	pub learning_rate: f32,
}

impl Default for TrainOptions {
	fn default() -> Self {
		Self { epochs: 100, batch_size: 64, learning_rate: 0.001 }
	}
}

/// Passed to the epoch hook after every training epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochReport {
	/// Zero based epoch index.
	pub epoch: usize,
	pub epochs: usize,
	/// Mean cross-entropy per position over the epoch.
	pub loss: f32,
}

/// Character-level sequence model.
///
/// A stack of LSTM layers followed by a position-wise dense projection
/// and a softmax, mapping a one-hot sequence `(t, vocab_size)` to a
/// distribution over the next character at every position.
///
/// # Responsibilities
/// - Train on teacher-forced one-hot tensors (cross-entropy, RMSprop)
/// - Predict the next-character distribution of a prefix
///
/// # Invariants
/// - `layers[0]` reads `vocab_size` inputs, every other layer reads the
///   hidden state of the layer below
/// - `w_out` is `(hidden_dim, vocab_size)` and `b_out` has `vocab_size` entries
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SequenceModel {
	vocab_size: usize,
	/// Longest sequence the model accepts (the encoding width).
	max_seq_len: usize,
	layers: Vec<LstmLayer>,
	w_out: Array2<f32>,
	b_out: Array1<f32>,
}

/// Gradients of a whole [`SequenceModel`].
///
/// Also used as the per-parameter state of the optimizer.
#[derive(Clone, Debug)]
pub struct Gradients {
	layers: Vec<LstmGradients>,
	w_out: Array2<f32>,
	b_out: Array1<f32>,
}

struct Forward {
	caches: Vec<LstmCache>,
	/// Hidden states of the last layer.
	top: Vec<Array2<f32>>,
	probs: Vec<Array2<f32>>,
}

fn softmax_rows(logits: &mut Array2<f32>) {
	for mut row in logits.rows_mut() {
		let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
		row.mapv_inplace(|v| (v - max).exp());
		let sum = row.sum();
		row /= sum;
	}
}

impl SequenceModel {
	/// Creates an untrained model.
	///
	/// # Errors
	/// Returns a configuration error if any dimension is zero or if the
	/// vocabulary holds a single symbol.
	pub fn new<R: Rng + ?Sized>(
		vocab_size: usize,
		hidden_dim: usize,
		n_layers: usize,
		max_seq_len: usize,
		rng: &mut R,
	) -> Result<Self> {
		if vocab_size <= 1 {
			return Err(SngError::config("vocabulary size must be > 1"));
		}
		if hidden_dim == 0 || n_layers == 0 || max_seq_len == 0 {
			return Err(SngError::config("hidden_dim, n_layers and max_seq_len must be >= 1"));
		}

		let mut layers = Vec::with_capacity(n_layers);
		layers.push(LstmLayer::new(vocab_size, hidden_dim, rng));
		for _ in 1..n_layers {
			layers.push(LstmLayer::new(hidden_dim, hidden_dim, rng));
		}

		let bound = 1.0 / (hidden_dim as f32).sqrt();
		let w_out = Array2::from_shape_fn((hidden_dim, vocab_size), |_| rng.random_range(-bound..bound));

		Ok(Self {
			vocab_size,
			max_seq_len,
			layers,
			w_out,
			b_out: Array1::zeros(vocab_size),
		})
	}

	pub fn vocab_size(&self) -> usize {
		self.vocab_size
	}

	pub fn max_seq_len(&self) -> usize {
		self.max_seq_len
	}

	pub fn n_layers(&self) -> usize {
		self.layers.len()
	}

	pub fn hidden_dim(&self) -> usize {
		self.layers.first().map_or(0, LstmLayer::hidden_dim)
	}

	/// Checks the internal shapes, typically after deserialization.
	pub(crate) fn validate(&self) -> Result<()> {
		let mut input_dim = self.vocab_size;
		for (l, layer) in self.layers.iter().enumerate() {
			if !layer.is_consistent() || layer.input_dim() != input_dim {
				return Err(SngError::shape(format!("layer {l} does not match its input")));
			}
			input_dim = layer.hidden_dim();
		}
		if self.layers.is_empty()
			|| self.w_out.dim() != (input_dim, self.vocab_size)
			|| self.b_out.len() != self.vocab_size
		{
			return Err(SngError::shape("output projection does not match the vocabulary"));
		}
		Ok(())
	}

	fn check_sequence(&self, steps: usize, width: usize) -> Result<()> {
		if width != self.vocab_size {
			return Err(SngError::shape(format!(
				"expected {} symbols per step, got {}",
				self.vocab_size, width
			)));
		}
		if steps == 0 || steps > self.max_seq_len {
			return Err(SngError::shape(format!(
				"sequence length must be in 1..={}, got {}",
				self.max_seq_len, steps
			)));
		}
		Ok(())
	}

	fn forward(&self, xs: &[Array2<f32>]) -> Forward {
		let mut caches = Vec::with_capacity(self.layers.len());
		let mut hidden = xs.to_vec();
		for layer in &self.layers {
			let (outputs, cache) = layer.forward(&hidden);
			caches.push(cache);
			hidden = outputs;
		}

		let probs = hidden
			.iter()
			.map(|h| {
				let mut logits = h.dot(&self.w_out) + &self.b_out;
				softmax_rows(&mut logits);
				logits
			})
			.collect();

		Forward { caches, top: hidden, probs }
	}

	/// Next-character distributions for every position of `prefix`.
	///
	/// `prefix` is `(t, vocab_size)`, the result has the same shape and
	/// row `k` is the distribution of the character following row `k`.
	///
	/// # Errors
	/// Returns a shape error if the width is not `vocab_size` or `t` is
	/// outside `1..=max_seq_len`.
	pub fn predict_sequence(&self, prefix: ArrayView2<f32>) -> Result<Array2<f32>> {
		let (steps, width) = prefix.dim();
		self.check_sequence(steps, width)?;

		let xs: Vec<Array2<f32>> = prefix.rows().into_iter().map(|row| row.to_owned().insert_axis(Axis(0))).collect();
		let forward = self.forward(&xs);

		let mut out = Array2::zeros((steps, width));
		for (mut row, probs) in out.rows_mut().into_iter().zip(&forward.probs) {
			row.assign(&probs.row(0));
		}
		Ok(out)
	}

	/// Distribution of the character following the last row of `prefix`.
	pub fn predict_next(&self, prefix: ArrayView2<f32>) -> Result<Array1<f32>> {
		let probs = self.predict_sequence(prefix)?;
		Ok(probs.row(probs.nrows() - 1).to_owned())
	}

	pub(crate) fn zero_gradients(&self) -> Gradients {
		Gradients {
			layers: self.layers.iter().map(LstmLayer::zero_gradients).collect(),
			w_out: Array2::zeros(self.w_out.raw_dim()),
			b_out: Array1::zeros(self.b_out.raw_dim()),
		}
	}

	/// See [`LstmLayer::apply`].
	pub(crate) fn apply<F>(&mut self, grads: &Gradients, state: &mut Gradients, mut update: F)
	where
		F: FnMut(&mut f32, f32, &mut f32),
	{
		for ((layer, g), s) in self.layers.iter_mut().zip(&grads.layers).zip(state.layers.iter_mut()) {
			layer.apply(g, s, &mut update);
		}
		Zip::from(&mut self.w_out)
			.and(&grads.w_out)
			.and(&mut state.w_out)
			.for_each(|w, &g, s| update(w, g, s));
		Zip::from(&mut self.b_out)
			.and(&grads.b_out)
			.and(&mut state.b_out)
			.for_each(|w, &g, s| update(w, g, s));
	}

	/// Summed (not averaged) cross-entropy gradients and loss over `rows`.
	fn batch_gradients(&self, inputs: &Array3<f32>, targets: &Array3<f32>, rows: &[usize]) -> (Gradients, f32) {
		let x = inputs.select(Axis(0), rows);
		let y = targets.select(Axis(0), rows);
		let steps = x.dim().1;

		let xs: Vec<Array2<f32>> = (0..steps).map(|t| x.index_axis(Axis(1), t).to_owned()).collect();
		let forward = self.forward(&xs);

		let mut grads = self.zero_gradients();
		let mut loss = 0.0;
		let mut d_top = Vec::with_capacity(steps);
		for t in 0..steps {
			let probs = &forward.probs[t];
			let target = y.index_axis(Axis(1), t);

			loss -= (&target * &probs.mapv(|p| p.max(PROBABILITY_FLOOR).ln())).sum();

			// Softmax + cross-entropy: dL/dz = p * sum(y) - y, zero for empty rows.
			let mass = target.sum_axis(Axis(1)).insert_axis(Axis(1));
			let d_logits = probs * &mass - &target;

			grads.w_out += &forward.top[t].t().dot(&d_logits);
			grads.b_out += &d_logits.sum_axis(Axis(0));
			d_top.push(d_logits.dot(&self.w_out.t()));
		}

		let mut d_outputs = d_top;
		for (l, layer) in self.layers.iter().enumerate().rev() {
			let (layer_grads, d_inputs) = layer.backward(&forward.caches[l], &d_outputs);
			grads.layers[l] = layer_grads;
			d_outputs = d_inputs;
		}

		(grads, loss)
	}

	/// Splits `rows` across worker threads and merges their gradients.
	///
	/// Partial results are merged in chunk order, so the sum does not
	/// depend on thread scheduling.
	fn compute_gradients(&self, inputs: &Array3<f32>, targets: &Array3<f32>, rows: &[usize]) -> (Gradients, f32) {
		let workers = num_cpus::get().min(rows.len() / MIN_ROWS_PER_WORKER).max(1);
		if workers == 1 {
			return self.batch_gradients(inputs, targets, rows);
		}
		let chunk_size = rows.len().div_ceil(workers);

		let (tx, rx) = mpsc::channel();
		thread::scope(|scope| {
			for (chunk_index, chunk) in rows.chunks(chunk_size).enumerate() {
				let tx = tx.clone();
				scope.spawn(move || {
					// The receiver outlives the scope, send cannot fail
					let _ = tx.send((chunk_index, self.batch_gradients(inputs, targets, chunk)));
				});
			}
		});
		drop(tx);

		let mut partials: Vec<_> = rx.iter().collect();
		partials.sort_by_key(|(chunk_index, _)| *chunk_index);

		let mut grads = self.zero_gradients();
		let mut loss = 0.0;
		for (_, (partial, partial_loss)) in &partials {
			grads.merge(partial);
			loss += partial_loss;
		}
		(grads, loss)
	}

	/// Trains the model on teacher-forced tensors.
	///
	/// Rows are reshuffled every epoch with `rng`. After each epoch
	/// `on_epoch_end` receives the epoch report and a shared borrow of the
	/// model, so it can sample from it but cannot touch the weights.
	///
	/// Returns the loss of every epoch.
	///
	/// # Errors
	/// - shape error if `inputs` and `targets` differ or do not fit the model
	/// - configuration error if there are no rows or `batch_size` is zero
	pub fn train<R, F>(
		&mut self,
		inputs: &Array3<f32>,
		targets: &Array3<f32>,
		options: &TrainOptions,
		rng: &mut R,
		mut on_epoch_end: F,
	) -> Result<Vec<f32>>
	where
		R: Rng + ?Sized,
		F: FnMut(&EpochReport, &SequenceModel),
	{
		if inputs.dim() != targets.dim() {
			return Err(SngError::shape(format!(
				"inputs {:?} and targets {:?} differ",
				inputs.dim(),
				targets.dim()
			)));
		}
		let (n, steps, width) = inputs.dim();
		self.check_sequence(steps, width)?;
		if n == 0 {
			return Err(SngError::config("no training examples"));
		}
		if options.batch_size == 0 {
			return Err(SngError::config("batch_size must be >= 1"));
		}

		let mut optimizer = RmsProp::new(options.learning_rate);
		let mut order: Vec<usize> = (0..n).collect();
		let mut history = Vec::with_capacity(options.epochs);
		let positions = (n * steps) as f32;

		for epoch in 0..options.epochs {
			order.shuffle(rng);

			let mut epoch_loss = 0.0;
			for rows in order.chunks(options.batch_size) {
				let (mut grads, loss) = self.compute_gradients(inputs, targets, rows);
				grads.scale(1.0 / (rows.len() * steps) as f32);
				optimizer.step(self, &grads);
				epoch_loss += loss;
			}

			let report = EpochReport { epoch, epochs: options.epochs, loss: epoch_loss / positions };
			debug!("epoch {}/{}: loss {:.4}", epoch + 1, options.epochs, report.loss);
			history.push(report.loss);
			on_epoch_end(&report, self);
		}

		Ok(history)
	}
}

impl Gradients {
	pub fn merge(&mut self, other: &Self) {
		for (layer, other_layer) in self.layers.iter_mut().zip(&other.layers) {
			layer.merge(other_layer);
		}
		self.w_out += &other.w_out;
		self.b_out += &other.b_out;
	}

	pub fn scale(&mut self, factor: f32) {
		for layer in &mut self.layers {
			layer.scale(factor);
		}
		self.w_out *= factor;
		self.b_out *= factor;
	}
}
