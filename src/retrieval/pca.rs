//! PCA(+whitening) model for VLAD dimensionality reduction (`.pca`)
//!
//! Fixed-header binary: magic "IPCA", version, input dimension, component
//! count, whitening flag, then mean vector, row-major components matrix,
//! and explained-variance vector as little-endian f32.

use anyhow::{bail, Context, Result};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::ui;

/// "IPCA" as a little-endian u32.
pub const PCA_MAGIC: u32 = 0x4143_5049;
pub const PCA_VERSION: u32 = 1;

const POWER_ITERATIONS: usize = 64;
const WHITEN_EPS: f32 = 1e-8;

#[derive(Debug, Clone)]
pub struct PcaModel {
	pub mean: Array1<f32>,
	/// `[n_components, input_dim]`
	pub components: Array2<f32>,
	pub explained_variance: Array1<f32>,
	pub whiten: bool,
}

impl PcaModel {
	pub fn input_dim(&self) -> usize {
		self.mean.len()
	}

	pub fn n_components(&self) -> usize {
		self.components.nrows()
	}

	pub fn is_valid(&self) -> bool {
		self.n_components() > 0
			&& self.input_dim() > 0
			&& self.components.ncols() == self.input_dim()
			&& self.explained_variance.len() == self.n_components()
	}

	/// Project a vector: center, multiply by components, optionally whiten,
	/// then L2-normalize.
	pub fn apply(&self, input: &[f32]) -> Result<Vec<f32>> {
		if input.len() != self.input_dim() {
			bail!(
				"PCA input dimension mismatch: {} (model expects {})",
				input.len(),
				self.input_dim()
			);
		}

		let centered: Vec<f32> = input
			.iter()
			.zip(self.mean.iter())
			.map(|(v, m)| v - m)
			.collect();

		let mut projected: Vec<f32> = self
			.components
			.rows()
			.into_iter()
			.enumerate()
			.map(|(c, row)| {
				let mut dot = 0.0f32;
				for (r, v) in row.iter().zip(centered.iter()) {
					dot += r * v;
				}
				if self.whiten {
					dot / (self.explained_variance[c] + WHITEN_EPS).sqrt()
				} else {
					dot
				}
			})
			.collect();

		let norm: f32 = projected.iter().map(|v| v * v).sum::<f32>().sqrt();
		if norm > 0.0 {
			for value in &mut projected {
				*value /= norm;
			}
		}
		Ok(projected)
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		let file =
			File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
		let mut out = BufWriter::new(file);

		out.write_all(&PCA_MAGIC.to_le_bytes())?;
		out.write_all(&PCA_VERSION.to_le_bytes())?;
		out.write_all(&(self.input_dim() as u32).to_le_bytes())?;
		out.write_all(&(self.n_components() as u32).to_le_bytes())?;
		out.write_all(&(self.whiten as u32).to_le_bytes())?;

		for value in self.mean.iter() {
			out.write_all(&value.to_le_bytes())?;
		}
		for value in self.components.iter() {
			out.write_all(&value.to_le_bytes())?;
		}
		for value in self.explained_variance.iter() {
			out.write_all(&value.to_le_bytes())?;
		}
		out.flush()?;

		ui::info(&format!(
			"Saved PCA model {}: {} -> {} dims{}",
			path.display(),
			self.input_dim(),
			self.n_components(),
			if self.whiten { " (whitened)" } else { "" }
		));
		Ok(())
	}

	pub fn load(path: &Path) -> Result<Self> {
		let mut file = File::open(path)
			.with_context(|| format!("Failed to open PCA model {}", path.display()))?;

		let mut header = [0u8; 20];
		file.read_exact(&mut header)
			.with_context(|| format!("Truncated PCA header in {}", path.display()))?;

		let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
		if magic != PCA_MAGIC {
			bail!("Invalid PCA model file (wrong magic number): {}", path.display());
		}
		let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
		if version != PCA_VERSION {
			ui::warn(&format!(
				"PCA model version mismatch in {}: {} (expected {})",
				path.display(),
				version,
				PCA_VERSION
			));
		}
		let input_dim = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
		let n_components = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;
		let whiten = u32::from_le_bytes(header[16..20].try_into().unwrap()) != 0;

		let read_f32 = |file: &mut File, count: usize| -> Result<Vec<f32>> {
			let mut bytes = vec![0u8; count * 4];
			file.read_exact(&mut bytes)
				.with_context(|| format!("Truncated PCA payload in {}", path.display()))?;
			Ok(bytes
				.chunks_exact(4)
				.map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
				.collect())
		};

		let mean = Array1::from_vec(read_f32(&mut file, input_dim)?);
		let components =
			Array2::from_shape_vec((n_components, input_dim), read_f32(&mut file, n_components * input_dim)?)?;
		let explained_variance = Array1::from_vec(read_f32(&mut file, n_components)?);

		let model = Self { mean, components, explained_variance, whiten };
		if !model.is_valid() {
			bail!("Inconsistent PCA model in {}", path.display());
		}
		Ok(model)
	}

	/// Fit a model on `samples` (`[n, dim]`) by power iteration with
	/// Gram-Schmidt deflation; adequate for the few hundred components
	/// VLAD reduction uses.
	pub fn train(samples: &Array2<f32>, n_components: usize, whiten: bool) -> Result<Self> {
		let (n, dim) = samples.dim();
		if n < 2 {
			bail!("Not enough samples to train PCA: {}", n);
		}
		let n_components = n_components.min(dim).min(n - 1);

		let mean = samples.mean_axis(ndarray::Axis(0)).unwrap();
		let centered = samples - &mean.view().insert_axis(ndarray::Axis(0));

		let mut rng = StdRng::seed_from_u64(0x70ca);
		let mut components = Array2::<f32>::zeros((n_components, dim));
		let mut explained_variance = Array1::<f32>::zeros(n_components);

		for c in 0..n_components {
			let mut v = Array1::from_shape_fn(dim, |_| rng.random_range(-1.0f32..1.0));
			normalize(&mut v);

			for _ in 0..POWER_ITERATIONS {
				// w = X v; u = X^T w  (covariance product without the matrix)
				let w = centered.dot(&v);
				let mut u = centered.t().dot(&w);

				// Deflate against already-found components.
				for prior in 0..c {
					let prior_row = components.row(prior);
					let dot: f32 = prior_row.iter().zip(u.iter()).map(|(a, b)| a * b).sum();
					for (ui_, pi) in u.iter_mut().zip(prior_row.iter()) {
						*ui_ -= dot * pi;
					}
				}

				normalize(&mut u);
				let delta: f32 = v
					.iter()
					.zip(u.iter())
					.map(|(a, b)| (a - b) * (a - b))
					.sum::<f32>()
					.sqrt();
				v = u;
				if delta < 1e-6 {
					break;
				}
			}

			let projected = centered.dot(&v);
			explained_variance[c] = projected.iter().map(|p| p * p).sum::<f32>() / (n - 1) as f32;
			components.row_mut(c).assign(&v);
		}

		Ok(Self { mean, components, explained_variance, whiten })
	}
}

fn normalize(v: &mut Array1<f32>) {
	let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
	if norm > 0.0 {
		v.mapv_inplace(|x| x / norm);
	}
}
