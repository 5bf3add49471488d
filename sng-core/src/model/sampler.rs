use ndarray::{Array1, ArrayView1};
use rand::Rng;

use crate::error::{Result, SngError};

/// Smallest probability considered before taking a log.
const PROBABILITY_FLOOR: f64 = 1e-12;

/// Reshapes a distribution by a temperature: `p' = p^(1/T)`, renormalized.
///
/// - `T = 1` leaves the distribution unchanged
/// - `T -> 0` sharpens toward the argmax
/// - `T -> inf` flattens toward uniform
///
/// Entries are clamped to a tiny positive value so zeros never reach the
/// log, and the logs are shifted by their maximum before the division so
/// the result stays finite down to the smallest positive temperature.
///
/// # Errors
/// Returns a configuration error if `temperature` is not a finite value > 0
/// or if `probabilities` is empty.
pub fn temperature_scale(probabilities: ArrayView1<f32>, temperature: f64) -> Result<Array1<f64>> {
	check_temperature(temperature)?;
	if probabilities.is_empty() {
		return Err(SngError::config("cannot scale an empty distribution"));
	}

	let logs = probabilities.mapv(|p| (p as f64).max(PROBABILITY_FLOOR).ln());
	let max = logs.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
	// The shift comes before the division so the largest entry stays at exactly 0
	let mut scaled = logs.mapv(|v| ((v - max) / temperature).exp());
	let sum = scaled.sum();
	scaled /= sum;
	Ok(scaled)
}

/// Validates a sampling temperature.
pub fn check_temperature(temperature: f64) -> Result<()> {
	if !temperature.is_finite() || temperature <= 0.0 {
		return Err(SngError::config(format!("temperature must be a finite value > 0, got {temperature}")));
	}
	Ok(())
}

/// Draws an index from `distribution` with a single uniform draw.
///
/// Performs a cumulative subtraction over the entries. If rounding leaves
/// some mass unassigned, the last index with a non-zero weight is returned.
pub fn draw<R: Rng + ?Sized>(distribution: &Array1<f64>, rng: &mut R) -> usize {
	let total: f64 = distribution.sum();
	let mut r = rng.random::<f64>() * total;

	let mut fallback = 0;
	for (index, weight) in distribution.iter().enumerate() {
		if *weight <= 0.0 {
			continue;
		}
		if r < *weight {
			return index;
		}
		r -= weight;
		fallback = index;
	}

	fallback
}

/// Index of the largest entry, ignoring `skip`.
pub fn argmax_except(distribution: &Array1<f64>, skip: usize) -> Option<usize> {
	distribution
		.iter()
		.enumerate()
		.filter(|(index, _)| *index != skip)
		.max_by(|a, b| a.1.total_cmp(b.1))
		.map(|(index, _)| index)
}
