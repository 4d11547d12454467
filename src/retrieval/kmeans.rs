//! Lloyd k-means over descriptor samples

use anyhow::{bail, Result};
use ndarray::{Array2, ArrayView1};
use rand::prelude::*;
use rayon::prelude::*;

use crate::ui;

const CONVERGENCE_EPS: f32 = 1e-4;

/// Cluster `samples` (`[n, dim]`) into `k` centroids with k-means++
/// seeding. Converges when no centroid moves more than a small epsilon.
pub fn kmeans(samples: &Array2<f32>, k: usize, max_iterations: usize, seed: u64) -> Result<Array2<f32>> {
	let (n, dim) = samples.dim();
	if n < k {
		bail!("Not enough samples for {} clusters: {}", k, n);
	}

	let mut rng = StdRng::seed_from_u64(seed);
	let mut centroids = seed_plus_plus(samples, k, &mut rng);

	for iteration in 0..max_iterations {
		// Assignment step.
		let assignments: Vec<usize> = (0..n)
			.into_par_iter()
			.map(|i| nearest_centroid(samples.row(i), &centroids).0)
			.collect();

		// Update step.
		let mut sums = Array2::<f32>::zeros((k, dim));
		let mut counts = vec![0usize; k];
		for (i, &cluster) in assignments.iter().enumerate() {
			let mut row = sums.row_mut(cluster);
			row += &samples.row(i);
			counts[cluster] += 1;
		}

		let mut movement = 0.0f32;
		for cluster in 0..k {
			if counts[cluster] == 0 {
				// Re-seed empty clusters from a random sample.
				let pick = rng.random_range(0..n);
				centroids.row_mut(cluster).assign(&samples.row(pick));
				continue;
			}
			let inv = 1.0 / counts[cluster] as f32;
			let mut shift = 0.0f32;
			for d in 0..dim {
				let updated = sums[[cluster, d]] * inv;
				let delta = updated - centroids[[cluster, d]];
				shift += delta * delta;
				centroids[[cluster, d]] = updated;
			}
			movement = movement.max(shift.sqrt());
		}

		if movement < CONVERGENCE_EPS {
			ui::debug(&format!("k-means converged after {} iterations", iteration + 1));
			break;
		}
	}

	Ok(centroids)
}

/// Index and squared distance of the nearest centroid.
pub fn nearest_centroid(sample: ArrayView1<f32>, centroids: &Array2<f32>) -> (usize, f32) {
	let mut best = 0;
	let mut best_distance = f32::INFINITY;
	for (cluster, centroid) in centroids.rows().into_iter().enumerate() {
		let mut distance = 0.0f32;
		for (a, b) in sample.iter().zip(centroid.iter()) {
			let d = a - b;
			distance += d * d;
		}
		if distance < best_distance {
			best_distance = distance;
			best = cluster;
		}
	}
	(best, best_distance)
}

fn seed_plus_plus(samples: &Array2<f32>, k: usize, rng: &mut StdRng) -> Array2<f32> {
	let (n, dim) = samples.dim();
	let mut centroids = Array2::<f32>::zeros((k, dim));

	let first = rng.random_range(0..n);
	centroids.row_mut(0).assign(&samples.row(first));

	let mut distances: Vec<f32> = (0..n)
		.map(|i| squared_distance(samples.row(i), centroids.row(0)))
		.collect();

	for cluster in 1..k {
		let total: f32 = distances.iter().sum();
		let pick = if total > 0.0 {
			let mut target = rng.random_range(0.0..total);
			let mut chosen = n - 1;
			for (i, &d) in distances.iter().enumerate() {
				if target < d {
					chosen = i;
					break;
				}
				target -= d;
			}
			chosen
		} else {
			rng.random_range(0..n)
		};

		centroids.row_mut(cluster).assign(&samples.row(pick));
		for i in 0..n {
			let d = squared_distance(samples.row(i), centroids.row(cluster));
			if d < distances[i] {
				distances[i] = d;
			}
		}
	}

	centroids
}

fn squared_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
	a.iter()
		.zip(b.iter())
		.map(|(x, y)| {
			let d = x - y;
			d * d
		})
		.sum()
}
