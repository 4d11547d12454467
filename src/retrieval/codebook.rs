//! Visual codebook files (`.vcbt`)
//!
//! Fixed-header binary holding k-means centroids over 128-d descriptors:
//! magic, version, cluster count, descriptor dimension, then the centroid
//! matrix as little-endian f32.

use anyhow::{bail, Context, Result};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::config::DESCRIPTOR_DIM;
use crate::ui;

/// "VCBT" as a little-endian u32.
pub const CODEBOOK_MAGIC: u32 = 0x5643_4254;
pub const CODEBOOK_VERSION: u32 = 1;

/// Load centroids as a `[num_clusters, 128]` matrix.
pub fn load_codebook(path: &Path) -> Result<Array2<f32>> {
	let mut file =
		File::open(path).with_context(|| format!("Failed to open codebook {}", path.display()))?;

	let mut header = [0u8; 16];
	file.read_exact(&mut header)
		.with_context(|| format!("Truncated codebook header in {}", path.display()))?;

	let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
	if magic != CODEBOOK_MAGIC {
		bail!("Invalid codebook file (wrong magic number): {}", path.display());
	}
	let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
	if version != CODEBOOK_VERSION {
		ui::warn(&format!(
			"Codebook version mismatch in {}: {} (expected {})",
			path.display(),
			version,
			CODEBOOK_VERSION
		));
	}
	let num_clusters = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
	let descriptor_dim = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;
	if descriptor_dim != DESCRIPTOR_DIM {
		bail!("Unsupported descriptor dimension: {}", descriptor_dim);
	}
	if num_clusters == 0 {
		bail!("Codebook {} has zero clusters", path.display());
	}

	let mut bytes = vec![0u8; num_clusters * descriptor_dim * 4];
	file.read_exact(&mut bytes)
		.with_context(|| format!("Failed to read centroids from {}", path.display()))?;

	let values: Vec<f32> = bytes
		.chunks_exact(4)
		.map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
		.collect();

	let centroids = Array2::from_shape_vec((num_clusters, descriptor_dim), values)?;
	ui::info(&format!(
		"Loaded codebook {}: {} clusters",
		path.display(),
		num_clusters
	));
	Ok(centroids)
}

/// Save a `[num_clusters, 128]` centroid matrix.
pub fn save_codebook(path: &Path, centroids: &Array2<f32>) -> Result<()> {
	let (num_clusters, descriptor_dim) = centroids.dim();
	if descriptor_dim != DESCRIPTOR_DIM {
		bail!("Codebook centroids must be {}-dimensional", DESCRIPTOR_DIM);
	}

	let file =
		File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
	let mut out = BufWriter::new(file);

	out.write_all(&CODEBOOK_MAGIC.to_le_bytes())?;
	out.write_all(&CODEBOOK_VERSION.to_le_bytes())?;
	out.write_all(&(num_clusters as u32).to_le_bytes())?;
	out.write_all(&(descriptor_dim as u32).to_le_bytes())?;
	for value in centroids.iter() {
		out.write_all(&value.to_le_bytes())?;
	}
	out.flush()?;

	ui::info(&format!(
		"Saved codebook {}: {} clusters",
		path.display(),
		num_clusters
	));
	Ok(())
}
